//! pql-core: Core types for promptql-mcp
//!
//! This crate provides the error taxonomy and credential configuration
//! shared by the query-service client and the MCP server binary.

pub mod config;
pub mod error;

pub use config::{mask_secret, Config, ConfigStore};
pub use error::Error;

pub type Result<T> = std::result::Result<T, Error>;
