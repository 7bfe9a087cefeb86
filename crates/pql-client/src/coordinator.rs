//! Thread lifecycle coordinator: the start/poll/continue/cancel state
//! machine over the query service's thread API.
//!
//! Per-interaction states, tracked only for the duration of one call:
//! created -> polling -> (complete | cancelled | failed), with a resumable
//! timed-out exit from the polling loop. Nothing is persisted locally; the
//! remote service is the source of truth and the caller carries the ids.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use pql_core::Error;

use crate::render::render_interaction;
use crate::transport::ThreadTransport;
use crate::wire::{ContinueThreadRequest, CreateThreadRequest, InteractionStatus, ThreadState};

/// Polling parameters for blocking waits.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Delay between status fetches.
    pub interval: Duration,
    /// Overall wait budget; expiry yields a resumable `TimedOut`.
    pub deadline: Duration,
    /// Transient transport failures tolerated per wait before giving up.
    pub transport_retries: u32,
    /// Linear backoff base: attempt N sleeps N * retry_backoff.
    pub retry_backoff: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            deadline: Duration::from_secs(120),
            transport_retries: 3,
            retry_backoff: Duration::from_secs(1),
        }
    }
}

/// Terminal (or deliberately non-waited) result of one interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InteractionOutcome {
    /// Submitted without waiting; the service is still working.
    Created,
    Complete {
        content: String,
    },
    Cancelled,
    /// Poll deadline elapsed. The interaction may still complete remotely;
    /// polling resumes via `get_status` with the same ids.
    TimedOut,
    Failed {
        message: String,
    },
}

/// Result of starting or continuing a thread.
#[derive(Debug, Clone)]
pub struct ThreadStart {
    pub thread_id: String,
    pub interaction_id: Option<String>,
    pub outcome: InteractionOutcome,
}

/// Result of a single status fetch.
#[derive(Debug, Clone)]
pub struct ThreadStatus {
    pub thread_id: String,
    pub interaction_id: Option<String>,
    pub status: InteractionStatus,
    pub interaction_count: usize,
    /// Rendered response content, only when the interaction is complete.
    pub content: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    AlreadyComplete,
}

impl CancelOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::AlreadyComplete => "already_complete",
        }
    }
}

pub struct ThreadCoordinator {
    transport: Arc<dyn ThreadTransport>,
    poll: PollConfig,
}

impl ThreadCoordinator {
    pub fn new(transport: Arc<dyn ThreadTransport>) -> Self {
        Self {
            transport,
            poll: PollConfig::default(),
        }
    }

    pub fn with_poll_config(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    /// Start a new thread. With `wait`, blocks (cooperatively) until the
    /// interaction reaches a terminal state or the poll deadline elapses;
    /// otherwise returns after the single create round trip.
    pub async fn start_thread(
        &self,
        message: &str,
        system_instructions: Option<&str>,
        wait: bool,
    ) -> Result<ThreadStart, Error> {
        let request = CreateThreadRequest::new(message, system_instructions);
        let state = self.transport.create_thread(&request).await?;

        let thread_id = state
            .thread_id
            .clone()
            .ok_or_else(|| Error::malformed("create response carried no thread_id"))?;
        info!(thread_id, "Thread created");

        self.resolve_submission(thread_id, state, wait).await
    }

    /// Post a follow-up message to an existing thread.
    pub async fn continue_thread(
        &self,
        thread_id: &str,
        message: &str,
        wait: bool,
    ) -> Result<ThreadStart, Error> {
        let request = ContinueThreadRequest::new(message);
        let state = self.transport.continue_thread(thread_id, &request).await?;

        let thread_id = state
            .thread_id
            .clone()
            .unwrap_or_else(|| thread_id.to_string());
        self.resolve_submission(thread_id, state, wait).await
    }

    async fn resolve_submission(
        &self,
        thread_id: String,
        state: ThreadState,
        wait: bool,
    ) -> Result<ThreadStart, Error> {
        let interaction_id = state.latest_interaction_id().map(String::from);

        if !wait {
            return Ok(ThreadStart {
                thread_id,
                interaction_id,
                outcome: InteractionOutcome::Created,
            });
        }

        // The submit response may already be terminal; no polling then.
        if let Some(interaction) = state.interaction(interaction_id.as_deref()) {
            if interaction.status.is_terminal() {
                let outcome = terminal_outcome(&state, interaction_id.as_deref());
                return Ok(ThreadStart {
                    thread_id,
                    interaction_id,
                    outcome,
                });
            }
        }

        let outcome = self
            .wait_for_completion(&thread_id, interaction_id.as_deref())
            .await;
        Ok(ThreadStart {
            thread_id,
            interaction_id,
            outcome,
        })
    }

    /// Poll until the tracked interaction is terminal or the deadline
    /// elapses. Transient transport failures are retried with linear
    /// backoff; any other failure, or retry exhaustion, yields `Failed`.
    pub async fn wait_for_completion(
        &self,
        thread_id: &str,
        interaction_id: Option<&str>,
    ) -> InteractionOutcome {
        let started = Instant::now();
        let mut failures = 0u32;

        loop {
            if started.elapsed() >= self.poll.deadline {
                info!(thread_id, "Poll deadline reached; wait can be resumed via get_thread_status");
                return InteractionOutcome::TimedOut;
            }

            match self.transport.fetch_thread(thread_id).await {
                Ok(state) => {
                    failures = 0;
                    if let Some(interaction) = state.interaction(interaction_id) {
                        debug!(thread_id, status = interaction.status.as_str(), "Polled thread");
                        if interaction.status.is_terminal() {
                            return terminal_outcome(&state, interaction_id);
                        }
                    }
                }
                Err(err) if err.is_retryable() && failures < self.poll.transport_retries => {
                    failures += 1;
                    warn!(
                        thread_id,
                        attempt = failures,
                        error = %err,
                        "Transient failure while polling; retrying"
                    );
                    tokio::time::sleep(self.poll.retry_backoff * failures).await;
                    continue;
                }
                Err(err) => {
                    warn!(thread_id, error = %err, "Polling failed");
                    return InteractionOutcome::Failed {
                        message: err.to_string(),
                    };
                }
            }

            tokio::time::sleep(self.poll.interval).await;
        }
    }

    /// Single status fetch, no polling. Safe to call repeatedly; a status
    /// read never mutates remote state.
    pub async fn get_status(&self, thread_id: &str) -> Result<ThreadStatus, Error> {
        let state = self.transport.fetch_thread(thread_id).await?;

        let interaction = state.interaction(None);
        let status = interaction
            .map(|i| i.status)
            .unwrap_or(InteractionStatus::Unknown);
        let content = interaction
            .filter(|i| i.status == InteractionStatus::Complete)
            .map(|i| render_interaction(&state, i));

        Ok(ThreadStatus {
            thread_id: state
                .thread_id
                .clone()
                .unwrap_or_else(|| thread_id.to_string()),
            interaction_id: state.latest_interaction_id().map(String::from),
            status,
            interaction_count: state.interactions.len(),
            content,
        })
    }

    /// Cancel the latest interaction. Fire-and-forget: reports the service's
    /// immediate acknowledgment without waiting for the remote computation
    /// to stop. A cancel that races completion is not an error.
    pub async fn cancel(&self, thread_id: &str) -> Result<CancelOutcome, Error> {
        match self.transport.cancel_interaction(thread_id).await {
            Ok(ack) => {
                if matches!(
                    ack.status,
                    Some(InteractionStatus::Complete) | Some(InteractionStatus::Error)
                ) {
                    return Ok(CancelOutcome::AlreadyComplete);
                }
                info!(thread_id, "Interaction cancelled");
                Ok(CancelOutcome::Cancelled)
            }
            // Benign conflict: the interaction was no longer processing.
            Err(Error::Service { status: 409, .. }) => Ok(CancelOutcome::AlreadyComplete),
            Err(err) => Err(err),
        }
    }
}

fn terminal_outcome(state: &ThreadState, interaction_id: Option<&str>) -> InteractionOutcome {
    let Some(interaction) = state.interaction(interaction_id) else {
        return InteractionOutcome::Failed {
            message: "response carried no interactions".to_string(),
        };
    };

    match interaction.status {
        InteractionStatus::Complete => InteractionOutcome::Complete {
            content: render_interaction(state, interaction),
        },
        InteractionStatus::Cancelled => InteractionOutcome::Cancelled,
        InteractionStatus::Error => InteractionOutcome::Failed {
            message: interaction
                .error
                .clone()
                .unwrap_or_else(|| "the service reported an error".to_string()),
        },
        other => InteractionOutcome::Failed {
            message: format!("unexpected non-terminal status: {}", other.as_str()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{thread_state, MockTransport};
    use crate::wire::CancelAck;

    fn coordinator(transport: Arc<MockTransport>, poll: PollConfig) -> ThreadCoordinator {
        ThreadCoordinator::new(transport).with_poll_config(poll)
    }

    fn fast_poll() -> PollConfig {
        PollConfig {
            interval: Duration::from_secs(2),
            deadline: Duration::from_secs(120),
            transport_retries: 3,
            retry_backoff: Duration::from_secs(1),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_without_wait_is_single_round_trip() {
        let transport = Arc::new(MockTransport::new());
        transport.queue_create(Ok(thread_state(
            "t1",
            "i1",
            InteractionStatus::Processing,
            None,
        )));

        let start = coordinator(Arc::clone(&transport), fast_poll())
            .start_thread("List my tables", None, false)
            .await
            .unwrap();

        assert_eq!(start.thread_id, "t1");
        assert_eq!(start.interaction_id.as_deref(), Some("i1"));
        assert_eq!(start.outcome, InteractionOutcome::Created);
        assert_eq!(transport.fetch_count(), 0);

        let captured = transport.create_calls.lock().unwrap();
        assert_eq!(captured[0].user_message.text, "List my tables");
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_with_wait_completes_after_two_polls() {
        let transport = Arc::new(MockTransport::new());
        transport.queue_create(Ok(thread_state(
            "t1",
            "i1",
            InteractionStatus::Processing,
            None,
        )));
        transport.queue_fetch(Ok(thread_state(
            "t1",
            "i1",
            InteractionStatus::Processing,
            None,
        )));
        transport.queue_fetch(Ok(thread_state(
            "t1",
            "i1",
            InteractionStatus::Complete,
            Some("users, orders"),
        )));

        let start = coordinator(Arc::clone(&transport), fast_poll())
            .start_thread("List my tables", None, true)
            .await
            .unwrap();

        assert_eq!(start.thread_id, "t1");
        assert_eq!(start.interaction_id.as_deref(), Some("i1"));
        assert_eq!(
            start.outcome,
            InteractionOutcome::Complete {
                content: "users, orders".to_string()
            }
        );
        assert_eq!(transport.fetch_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_with_wait_skips_polling_when_already_complete() {
        let transport = Arc::new(MockTransport::new());
        transport.queue_create(Ok(thread_state(
            "t1",
            "i1",
            InteractionStatus::Complete,
            Some("done"),
        )));

        let start = coordinator(Arc::clone(&transport), fast_poll())
            .start_thread("quick one", None, true)
            .await
            .unwrap();

        assert_eq!(
            start.outcome,
            InteractionOutcome::Complete {
                content: "done".to_string()
            }
        );
        assert_eq!(transport.fetch_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_times_out_within_call_budget() {
        let transport = Arc::new(MockTransport::new());
        transport.queue_create(Ok(thread_state(
            "t1",
            "i1",
            InteractionStatus::Processing,
            None,
        )));
        transport.set_fetch_fallback(thread_state(
            "t1",
            "i1",
            InteractionStatus::Processing,
            None,
        ));

        let poll = PollConfig {
            interval: Duration::from_secs(2),
            deadline: Duration::from_secs(5),
            ..fast_poll()
        };
        let start = coordinator(Arc::clone(&transport), poll)
            .start_thread("slow query", None, true)
            .await
            .unwrap();

        assert_eq!(start.outcome, InteractionOutcome::TimedOut);
        // ceil(5 / 2) = 3 status calls at t = 0s, 2s, 4s.
        assert_eq!(transport.fetch_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_after_timeout_via_get_status() {
        let transport = Arc::new(MockTransport::new());
        transport.queue_fetch(Ok(thread_state(
            "t1",
            "i1",
            InteractionStatus::Complete,
            Some("late answer"),
        )));

        let status = coordinator(Arc::clone(&transport), fast_poll())
            .get_status("t1")
            .await
            .unwrap();

        assert_eq!(status.status, InteractionStatus::Complete);
        assert_eq!(status.content.as_deref(), Some("late answer"));
        assert_eq!(status.interaction_id.as_deref(), Some("i1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_status_is_idempotent_for_complete_threads() {
        let transport = Arc::new(MockTransport::new());
        transport.set_fetch_fallback(thread_state(
            "t1",
            "i1",
            InteractionStatus::Complete,
            Some("answer"),
        ));

        let coordinator = coordinator(Arc::clone(&transport), fast_poll());
        let first = coordinator.get_status("t1").await.unwrap();
        let second = coordinator.get_status("t1").await.unwrap();

        assert_eq!(first.content, second.content);
        assert_eq!(first.status, second.status);
        assert_eq!(first.interaction_count, second.interaction_count);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_poll_failure_does_not_abort_wait() {
        let transport = Arc::new(MockTransport::new());
        transport.queue_create(Ok(thread_state(
            "t1",
            "i1",
            InteractionStatus::Processing,
            None,
        )));
        transport.queue_fetch(Err(Error::transport("connection reset")));
        transport.queue_fetch(Ok(thread_state(
            "t1",
            "i1",
            InteractionStatus::Complete,
            Some("recovered"),
        )));

        let start = coordinator(Arc::clone(&transport), fast_poll())
            .start_thread("q", None, true)
            .await
            .unwrap();

        assert_eq!(
            start.outcome,
            InteractionOutcome::Complete {
                content: "recovered".to_string()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_transport_retries_surface_failed() {
        let transport = Arc::new(MockTransport::new());
        transport.queue_create(Ok(thread_state(
            "t1",
            "i1",
            InteractionStatus::Processing,
            None,
        )));
        for _ in 0..4 {
            transport.queue_fetch(Err(Error::transport("connection reset")));
        }

        let start = coordinator(Arc::clone(&transport), fast_poll())
            .start_thread("q", None, true)
            .await
            .unwrap();

        assert!(matches!(start.outcome, InteractionOutcome::Failed { .. }));
        // 1 initial attempt + 3 retries.
        assert_eq!(transport.fetch_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_error_during_poll_is_not_retried() {
        let transport = Arc::new(MockTransport::new());
        transport.queue_create(Ok(thread_state(
            "t1",
            "i1",
            InteractionStatus::Processing,
            None,
        )));
        transport.queue_fetch(Err(Error::auth("key revoked")));

        let start = coordinator(Arc::clone(&transport), fast_poll())
            .start_thread("q", None, true)
            .await
            .unwrap();

        match start.outcome {
            InteractionOutcome::Failed { message } => assert!(message.contains("key revoked")),
            other => panic!("expected Failed, got {:?}", other),
        }
        assert_eq!(transport.fetch_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_error_status_maps_to_failed() {
        let transport = Arc::new(MockTransport::new());
        transport.queue_create(Ok(thread_state(
            "t1",
            "i1",
            InteractionStatus::Processing,
            None,
        )));
        let mut errored = thread_state("t1", "i1", InteractionStatus::Error, None);
        errored.interactions[0].error = Some("query planner exploded".to_string());
        transport.queue_fetch(Ok(errored));

        let start = coordinator(Arc::clone(&transport), fast_poll())
            .start_thread("q", None, true)
            .await
            .unwrap();

        assert_eq!(
            start.outcome,
            InteractionOutcome::Failed {
                message: "query planner exploded".to_string()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_without_thread_id_is_malformed() {
        let transport = Arc::new(MockTransport::new());
        transport.queue_create(Ok(ThreadState::default()));

        let err = coordinator(Arc::clone(&transport), fast_poll())
            .start_thread("q", None, false)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::MalformedResponse(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_continue_thread_tracks_new_interaction() {
        let transport = Arc::new(MockTransport::new());
        let mut state = thread_state("t1", "i1", InteractionStatus::Complete, Some("first"));
        state
            .interactions
            .push(crate::wire::InteractionState {
                interaction_id: Some("i2".to_string()),
                status: InteractionStatus::Processing,
                error: None,
                assistant_actions: Vec::new(),
            });
        transport.queue_continue(Ok(state));

        let mut done = thread_state("t1", "i1", InteractionStatus::Complete, Some("first"));
        done.interactions.push(crate::wire::InteractionState {
            interaction_id: Some("i2".to_string()),
            status: InteractionStatus::Complete,
            error: None,
            assistant_actions: vec![crate::wire::AssistantAction {
                message: Some("second".to_string()),
                ..Default::default()
            }],
        });
        transport.queue_fetch(Ok(done));

        let start = coordinator(Arc::clone(&transport), fast_poll())
            .continue_thread("t1", "follow up", true)
            .await
            .unwrap();

        assert_eq!(start.interaction_id.as_deref(), Some("i2"));
        assert_eq!(
            start.outcome,
            InteractionOutcome::Complete {
                content: "second".to_string()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_matches_tracked_interaction_not_latest() {
        let transport = Arc::new(MockTransport::new());
        transport.queue_create(Ok(thread_state(
            "t1",
            "i1",
            InteractionStatus::Processing,
            None,
        )));

        // Another interaction appears later in the response; the wait must
        // still resolve against i1.
        let mut state = thread_state("t1", "i1", InteractionStatus::Complete, Some("mine"));
        state.interactions.push(crate::wire::InteractionState {
            interaction_id: Some("i2".to_string()),
            status: InteractionStatus::Processing,
            error: None,
            assistant_actions: Vec::new(),
        });
        transport.queue_fetch(Ok(state));

        let start = coordinator(Arc::clone(&transport), fast_poll())
            .start_thread("q", None, true)
            .await
            .unwrap();

        assert_eq!(
            start.outcome,
            InteractionOutcome::Complete {
                content: "mine".to_string()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_confirmed() {
        let transport = Arc::new(MockTransport::new());
        transport.queue_cancel(Ok(CancelAck {
            message: Some("cancelling".to_string()),
            status: Some(InteractionStatus::Processing),
        }));

        let outcome = coordinator(Arc::clone(&transport), fast_poll())
            .cancel("t1")
            .await
            .unwrap();

        assert_eq!(outcome, CancelOutcome::Cancelled);
        assert_eq!(outcome.as_str(), "cancelled");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_conflict_is_already_complete() {
        let transport = Arc::new(MockTransport::new());
        transport.queue_cancel(Err(Error::service(409, "interaction is not processing")));

        let outcome = coordinator(Arc::clone(&transport), fast_poll())
            .cancel("t1")
            .await
            .unwrap();

        assert_eq!(outcome, CancelOutcome::AlreadyComplete);
        assert_eq!(outcome.as_str(), "already_complete");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_ack_reporting_complete_is_already_complete() {
        let transport = Arc::new(MockTransport::new());
        transport.queue_cancel(Ok(CancelAck {
            message: None,
            status: Some(InteractionStatus::Complete),
        }));

        let outcome = coordinator(Arc::clone(&transport), fast_poll())
            .cancel("t1")
            .await
            .unwrap();

        assert_eq!(outcome, CancelOutcome::AlreadyComplete);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_hard_failure_propagates() {
        let transport = Arc::new(MockTransport::new());
        transport.queue_cancel(Err(Error::not_found("no such thread")));

        let err = coordinator(Arc::clone(&transport), fast_poll())
            .cancel("missing")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::NotFound(_)));
    }
}
