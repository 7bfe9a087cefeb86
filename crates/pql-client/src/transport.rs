use async_trait::async_trait;

use pql_core::Error;

use crate::client::QueryServiceClient;
use crate::wire::{CancelAck, ContinueThreadRequest, CreateThreadRequest, ThreadState};

/// The four remote thread operations, as a seam between the coordinator and
/// the HTTP client so the lifecycle logic can be tested against a mock.
#[async_trait]
pub trait ThreadTransport: Send + Sync {
    async fn create_thread(&self, request: &CreateThreadRequest) -> Result<ThreadState, Error>;

    async fn fetch_thread(&self, thread_id: &str) -> Result<ThreadState, Error>;

    async fn continue_thread(
        &self,
        thread_id: &str,
        request: &ContinueThreadRequest,
    ) -> Result<ThreadState, Error>;

    async fn cancel_interaction(&self, thread_id: &str) -> Result<CancelAck, Error>;
}

#[async_trait]
impl ThreadTransport for QueryServiceClient {
    async fn create_thread(&self, request: &CreateThreadRequest) -> Result<ThreadState, Error> {
        QueryServiceClient::create_thread(self, request).await
    }

    async fn fetch_thread(&self, thread_id: &str) -> Result<ThreadState, Error> {
        QueryServiceClient::fetch_thread(self, thread_id).await
    }

    async fn continue_thread(
        &self,
        thread_id: &str,
        request: &ContinueThreadRequest,
    ) -> Result<ThreadState, Error> {
        QueryServiceClient::continue_thread(self, thread_id, request).await
    }

    async fn cancel_interaction(&self, thread_id: &str) -> Result<CancelAck, Error> {
        QueryServiceClient::cancel_interaction(self, thread_id).await
    }
}
