//! Client side of the query service bridge: wire model, HTTP transport,
//! response rendering, and the thread lifecycle coordinator.

pub mod client;
pub mod coordinator;
pub mod render;
pub mod transport;
pub mod wire;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use client::QueryServiceClient;
pub use coordinator::{
    CancelOutcome, InteractionOutcome, PollConfig, ThreadCoordinator, ThreadStart, ThreadStatus,
};
pub use render::{render_interaction, render_table};
pub use transport::ThreadTransport;
pub use wire::{InteractionStatus, ThreadState};
