//! Scripted reasoner for tests and local development

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::{FragmentStream, Reasoner, ReasonerError};
use crate::models::ConversationTurn;

/// A scripted answer, consumed in order
#[derive(Debug, Clone)]
pub enum MockReply {
    Text(String),
    /// Streamed as the given fragments; batched callers get them concatenated
    Fragments(Vec<String>),
    /// Fragments followed by a mid-stream fault
    BrokenStream(Vec<String>),
    Reject(String),
    Unavailable(String),
    /// Wait before producing the inner reply
    Delayed(Duration, Box<MockReply>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockRequestKind {
    Text,
    Image,
    Stream,
}

/// A request observed by the mock
#[derive(Debug, Clone)]
pub struct MockRequest {
    pub kind: MockRequestKind,
    pub prompt: String,
    pub history: Vec<ConversationTurn>,
    pub mime_type: Option<String>,
}

/// Mock reasoner for testing
///
/// Replies are returned in order. When the script runs out the mock either
/// echoes (see [`MockReasoner::echo`]) or reports itself unavailable.
#[derive(Debug, Default)]
pub struct MockReasoner {
    replies: Mutex<VecDeque<MockReply>>,
    requests: Mutex<Vec<MockRequest>>,
    echo: bool,
}

impl MockReasoner {
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
            echo: false,
        }
    }

    /// A mock that answers every request with a short synthetic summary
    pub fn echo() -> Self {
        Self {
            echo: true,
            ..Self::default()
        }
    }

    /// Create a mock whose every scripted reply is text
    pub fn with_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(texts.into_iter().map(|t| MockReply::Text(t.into())).collect())
    }

    /// Get all requests that were made to this reasoner.
    pub fn requests(&self) -> Vec<MockRequest> {
        lock(&self.requests).clone()
    }

    /// Get the number of requests made.
    pub fn request_count(&self) -> usize {
        lock(&self.requests).len()
    }

    fn record(&self, kind: MockRequestKind, prompt: &str, history: &[ConversationTurn], mime_type: Option<&str>) {
        lock(&self.requests).push(MockRequest {
            kind,
            prompt: prompt.to_string(),
            history: history.to_vec(),
            mime_type: mime_type.map(str::to_string),
        });
    }

    fn next_reply(&self, prompt: &str) -> MockReply {
        match lock(&self.replies).pop_front() {
            Some(reply) => reply,
            None if self.echo => MockReply::Text(echo_answer(prompt)),
            None => MockReply::Unavailable("MockReasoner: no more responses available".to_string()),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn echo_answer(prompt: &str) -> String {
    let words = prompt.split_whitespace().count();
    format!("Synthetic analysis of a {}-word prompt. [mock reasoner]", words)
}

/// Resolve delays and turn a reply into batched text
async fn settle(reply: MockReply) -> Result<MockReply, ReasonerError> {
    let mut reply = reply;
    while let MockReply::Delayed(delay, inner) = reply {
        tokio::time::sleep(delay).await;
        reply = *inner;
    }

    match reply {
        MockReply::Reject(reason) => Err(ReasonerError::rejected(reason)),
        MockReply::Unavailable(message) => Err(ReasonerError::unavailable(message)),
        other => Ok(other),
    }
}

fn batched(reply: MockReply) -> Result<String, ReasonerError> {
    match reply {
        MockReply::Text(text) => Ok(text),
        MockReply::Fragments(fragments) => Ok(fragments.concat()),
        MockReply::BrokenStream(_) => Err(ReasonerError::unavailable("connection reset")),
        _ => Err(ReasonerError::unavailable("unexpected mock reply")),
    }
}

#[async_trait]
impl Reasoner for MockReasoner {
    async fn generate_text(
        &self,
        history: &[ConversationTurn],
        prompt: &str,
    ) -> Result<String, ReasonerError> {
        self.record(MockRequestKind::Text, prompt, history, None);
        let reply = self.next_reply(prompt);
        batched(settle(reply).await?)
    }

    async fn generate_from_image(
        &self,
        _image: &[u8],
        mime_type: &str,
        prompt: &str,
    ) -> Result<String, ReasonerError> {
        self.record(MockRequestKind::Image, prompt, &[], Some(mime_type));
        let reply = self.next_reply(prompt);
        batched(settle(reply).await?)
    }

    async fn generate_stream(
        &self,
        history: &[ConversationTurn],
        prompt: &str,
    ) -> Result<FragmentStream, ReasonerError> {
        self.record(MockRequestKind::Stream, prompt, history, None);
        let reply = self.next_reply(prompt);

        let items: Vec<Result<String, ReasonerError>> = match settle(reply).await? {
            MockReply::Text(text) => vec![Ok(text)],
            MockReply::Fragments(fragments) => fragments.into_iter().map(Ok).collect(),
            MockReply::BrokenStream(fragments) => fragments
                .into_iter()
                .map(Ok)
                .chain(std::iter::once(Err(ReasonerError::unavailable("stream interrupted"))))
                .collect(),
            _ => vec![Err(ReasonerError::unavailable("unexpected mock reply"))],
        };

        Ok(Box::pin(futures::stream::iter(items)))
    }

    fn name(&self) -> &str {
        "mock"
    }
}
