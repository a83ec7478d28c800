//! Reasoning session
//!
//! Provides:
//! - The append-only conversation turn log
//! - Sequential per-chunk round trips against the reasoner
//! - Batched and streamed answers (fragments concatenated before recording)
//! - Timeout and cancellation of the outstanding call
//! - Resuming a failed request at the prompt that failed
//!
//! State machine: `Idle -> AwaitingResponse -> Idle`, or `-> Failed` on a
//! reasoner error. Failed requests never append turns.

use clinicheck_common::errors::{AppError, Result};
use clinicheck_common::metrics::record_reasoner_call;
use clinicheck_common::models::{ConversationTurn, ResponseMode, Role};
use clinicheck_common::{Reasoner, ReasonerError};
use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Observable state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    AwaitingResponse,
    Failed,
}

/// A request that has begun but not yet completed
#[derive(Debug)]
struct PendingRequest {
    request_id: Uuid,
    user_text: String,
    prompts: Vec<String>,
    mode: ResponseMode,
    /// Answers of the prompts completed so far, in order
    answers: Vec<String>,
    failure: Option<ReasonerError>,
}

/// Stateful conversation with the reasoner
pub struct ReasoningSession {
    reasoner: Arc<dyn Reasoner>,
    timeout: Duration,
    turns: Vec<ConversationTurn>,
    pending: Option<PendingRequest>,
    /// The completed request awaiting commit, with its user text
    completed: Option<(Uuid, String)>,
    next_ordinal: u64,
}

impl ReasoningSession {
    pub fn new(reasoner: Arc<dyn Reasoner>, timeout: Duration) -> Self {
        Self {
            reasoner,
            timeout,
            turns: Vec::new(),
            pending: None,
            completed: None,
            next_ordinal: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        match &self.pending {
            None => SessionState::Idle,
            Some(p) if p.failure.is_some() => SessionState::Failed,
            Some(_) => SessionState::AwaitingResponse,
        }
    }

    /// Read-only snapshot of the committed turns
    pub fn history(&self) -> &[ConversationTurn] {
        &self.turns
    }

    /// Id of the request that is pending or failed, if any
    pub fn pending_request(&self) -> Option<Uuid> {
        self.pending.as_ref().map(|p| p.request_id)
    }

    /// The failure that left the session in `Failed`
    pub fn last_failure(&self) -> Option<&ReasonerError> {
        self.pending.as_ref().and_then(|p| p.failure.as_ref())
    }

    /// Start a request of one prompt per chunk. A previous pending request is dropped.
    pub fn begin(&mut self, user_text: impl Into<String>, prompts: Vec<String>, mode: ResponseMode) -> Uuid {
        if let Some(previous) = self.pending.take() {
            warn!(request_id = %previous.request_id, "Dropping unfinished request");
        }

        let request_id = Uuid::new_v4();
        debug!(%request_id, prompts = prompts.len(), ?mode, "Request started");

        self.pending = Some(PendingRequest {
            request_id,
            user_text: user_text.into(),
            prompts,
            mode,
            answers: Vec::new(),
            failure: None,
        });

        request_id
    }

    /// Issue the remaining prompts of the pending request, in order.
    ///
    /// On success the request moves to the completed set and awaits
    /// [`ReasoningSession::commit`]. On a reasoner error the session enters
    /// `Failed` and keeps the request for [`ReasoningSession::retry`].
    /// Cancellation abandons the request.
    pub async fn drive(&mut self, cancel: &CancellationToken) -> Result<Vec<String>> {
        let mut pending = self
            .pending
            .take()
            .ok_or_else(|| AppError::invalid_input("No request in progress"))?;
        pending.failure = None;

        let total = pending.prompts.len();
        while pending.answers.len() < total {
            let index = pending.answers.len();
            let history = self.history_for(&pending);

            match self
                .round_trip(&history, &pending.prompts[index], pending.mode, cancel)
                .await
            {
                Ok(answer) => {
                    debug!(request_id = %pending.request_id, part = index + 1, total, "Prompt answered");
                    pending.answers.push(answer);
                }
                Err(ReasonerError::Cancelled) => {
                    info!(request_id = %pending.request_id, part = index + 1, "Request cancelled");
                    return Err(AppError::Cancelled);
                }
                Err(e) => {
                    pending.failure = Some(e.clone());
                    self.pending = Some(pending);
                    return Err(e.into());
                }
            }
        }

        if let Some((stale, _)) = self.completed.replace((pending.request_id, pending.user_text)) {
            warn!(request_id = %stale, "Uncommitted request superseded");
        }
        Ok(pending.answers)
    }

    /// Resume a failed request at the prompt that failed
    pub async fn retry(&mut self, cancel: &CancellationToken) -> Result<Vec<String>> {
        if self.state() != SessionState::Failed {
            return Err(AppError::invalid_input("No failed request to retry"));
        }
        self.drive(cancel).await
    }

    /// Drop the pending or failed request without recording anything
    pub fn abandon(&mut self) -> Option<Uuid> {
        self.pending.take().map(|p| p.request_id)
    }

    /// Append the user and assistant turns of a completed request.
    ///
    /// Returns false when the request was already committed or is unknown.
    pub fn commit(&mut self, request_id: Uuid, answer: &str) -> bool {
        if self.completed.as_ref().map(|(id, _)| *id) != Some(request_id) {
            if !self.turns.iter().any(|t| t.request_id == Some(request_id)) {
                warn!(%request_id, "Commit for unknown request ignored");
            }
            return false;
        }
        let Some((_, user_text)) = self.completed.take() else {
            return false;
        };

        self.push_turn(Role::User, user_text, request_id);
        self.push_turn(Role::Assistant, answer.to_string(), request_id);
        true
    }

    /// Clear the history and any pending request
    pub fn reset(&mut self) {
        self.turns.clear();
        self.pending = None;
        self.completed = None;
        self.next_ordinal = 0;
    }

    fn push_turn(&mut self, role: Role, text: String, request_id: Uuid) {
        self.turns.push(ConversationTurn {
            role,
            text,
            ordinal: self.next_ordinal,
            request_id: Some(request_id),
        });
        self.next_ordinal += 1;
    }

    /// Committed turns followed by the earlier exchanges of this request
    fn history_for(&self, pending: &PendingRequest) -> Vec<ConversationTurn> {
        let mut history = self.turns.clone();
        for (prompt, answer) in pending.prompts.iter().zip(&pending.answers) {
            history.push(ConversationTurn::transient(Role::User, prompt.clone()));
            history.push(ConversationTurn::transient(Role::Assistant, answer.clone()));
        }
        history
    }

    async fn round_trip(
        &self,
        history: &[ConversationTurn],
        prompt: &str,
        mode: ResponseMode,
        cancel: &CancellationToken,
    ) -> std::result::Result<String, ReasonerError> {
        let start = Instant::now();

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ReasonerError::Cancelled),
            outcome = tokio::time::timeout(self.timeout, request(self.reasoner.as_ref(), history, prompt, mode)) => {
                outcome.unwrap_or_else(|_| {
                    Err(ReasonerError::unavailable(format!(
                        "no response within {}s",
                        self.timeout.as_secs_f64()
                    )))
                })
            }
        };

        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.outcome_label(),
        };
        record_reasoner_call(start.elapsed(), self.reasoner.name(), outcome);

        match &result {
            Err(ReasonerError::Rejected { reason }) => {
                warn!(outcome, reason = %reason, "Reasoner rejected the request");
            }
            Err(ReasonerError::Unavailable { message }) => {
                warn!(outcome, error = %message, "Reasoner unavailable");
            }
            _ => {}
        }

        result
    }
}

async fn request(
    reasoner: &dyn Reasoner,
    history: &[ConversationTurn],
    prompt: &str,
    mode: ResponseMode,
) -> std::result::Result<String, ReasonerError> {
    match mode {
        ResponseMode::Batched => reasoner.generate_text(history, prompt).await,
        ResponseMode::Streaming => {
            let mut stream = reasoner.generate_stream(history, prompt).await?;
            let mut answer = String::new();
            while let Some(fragment) = stream.next().await {
                answer.push_str(&fragment?);
            }
            if answer.trim().is_empty() {
                return Err(ReasonerError::unavailable("Empty response from reasoner"));
            }
            Ok(answer)
        }
    }
}
