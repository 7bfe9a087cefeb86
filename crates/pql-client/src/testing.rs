//! Test utilities shared across the workspace.
//! Only compiled when running tests or with the `testing` feature.

use std::sync::Mutex;

use async_trait::async_trait;

use pql_core::Error;

use crate::transport::ThreadTransport;
use crate::wire::{
    AssistantAction, CancelAck, ContinueThreadRequest, CreateThreadRequest, InteractionState,
    InteractionStatus, ThreadState,
};

/// A mock transport that returns pre-configured responses and records calls.
pub struct MockTransport {
    create_responses: Mutex<Vec<Result<ThreadState, Error>>>,
    fetch_responses: Mutex<Vec<Result<ThreadState, Error>>>,
    continue_responses: Mutex<Vec<Result<ThreadState, Error>>>,
    cancel_responses: Mutex<Vec<Result<CancelAck, Error>>>,
    /// Returned by fetch_thread once the queue is drained, so polling tests
    /// can run an unbounded number of identical status calls.
    fetch_fallback: Mutex<Option<ThreadState>>,
    /// Captured calls (for assertion).
    pub create_calls: Mutex<Vec<CreateThreadRequest>>,
    pub fetch_calls: Mutex<Vec<String>>,
    pub continue_calls: Mutex<Vec<(String, ContinueThreadRequest)>>,
    pub cancel_calls: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            create_responses: Mutex::new(Vec::new()),
            fetch_responses: Mutex::new(Vec::new()),
            continue_responses: Mutex::new(Vec::new()),
            cancel_responses: Mutex::new(Vec::new()),
            fetch_fallback: Mutex::new(None),
            create_calls: Mutex::new(Vec::new()),
            fetch_calls: Mutex::new(Vec::new()),
            continue_calls: Mutex::new(Vec::new()),
            cancel_calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue a response in FIFO order (first queued = first returned).
    pub fn queue_create(&self, response: Result<ThreadState, Error>) {
        self.create_responses.lock().unwrap().insert(0, response);
    }

    pub fn queue_fetch(&self, response: Result<ThreadState, Error>) {
        self.fetch_responses.lock().unwrap().insert(0, response);
    }

    pub fn queue_continue(&self, response: Result<ThreadState, Error>) {
        self.continue_responses.lock().unwrap().insert(0, response);
    }

    pub fn queue_cancel(&self, response: Result<CancelAck, Error>) {
        self.cancel_responses.lock().unwrap().insert(0, response);
    }

    pub fn set_fetch_fallback(&self, state: ThreadState) {
        *self.fetch_fallback.lock().unwrap() = Some(state);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_calls.lock().unwrap().len()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn no_response<T>() -> Result<T, Error> {
    Err(Error::service(500, "no mock response queued"))
}

#[async_trait]
impl ThreadTransport for MockTransport {
    async fn create_thread(&self, request: &CreateThreadRequest) -> Result<ThreadState, Error> {
        self.create_calls.lock().unwrap().push(request.clone());
        self.create_responses
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(no_response)
    }

    async fn fetch_thread(&self, thread_id: &str) -> Result<ThreadState, Error> {
        self.fetch_calls.lock().unwrap().push(thread_id.to_string());
        if let Some(response) = self.fetch_responses.lock().unwrap().pop() {
            return response;
        }
        match self.fetch_fallback.lock().unwrap().clone() {
            Some(state) => Ok(state),
            None => no_response(),
        }
    }

    async fn continue_thread(
        &self,
        thread_id: &str,
        request: &ContinueThreadRequest,
    ) -> Result<ThreadState, Error> {
        self.continue_calls
            .lock()
            .unwrap()
            .push((thread_id.to_string(), request.clone()));
        self.continue_responses
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(no_response)
    }

    async fn cancel_interaction(&self, thread_id: &str) -> Result<CancelAck, Error> {
        self.cancel_calls.lock().unwrap().push(thread_id.to_string());
        self.cancel_responses
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(no_response)
    }
}

/// Build a single-interaction thread snapshot.
pub fn thread_state(
    thread_id: &str,
    interaction_id: &str,
    status: InteractionStatus,
    message: Option<&str>,
) -> ThreadState {
    ThreadState {
        thread_id: Some(thread_id.to_string()),
        interactions: vec![InteractionState {
            interaction_id: Some(interaction_id.to_string()),
            status,
            error: None,
            assistant_actions: message
                .map(|m| {
                    vec![AssistantAction {
                        message: Some(m.to_string()),
                        ..Default::default()
                    }]
                })
                .unwrap_or_default(),
        }],
        modified_artifacts: Vec::new(),
    }
}
