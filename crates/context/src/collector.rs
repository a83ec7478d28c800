//! Response collection
//!
//! The single join point for per-chunk answers.

use clinicheck_common::models::{AnalysisResult, AnalysisStatus};
use uuid::Uuid;

use crate::session::ReasoningSession;

/// Separator between per-chunk answers in the joined text
pub const ANSWER_SEPARATOR: &str = "\n";

/// Join per-chunk answers, in chunk order, into one completed result
pub fn collect(request_id: Uuid, per_chunk_results: Vec<String>) -> AnalysisResult {
    AnalysisResult {
        request_id,
        text: per_chunk_results.join(ANSWER_SEPARATOR),
        per_chunk_results,
        status: AnalysisStatus::Completed,
        extraction_errors: Vec::new(),
    }
}

/// Append the logical answer of a completed result to the session history.
///
/// Returns whether a new entry was appended; recording the same result again
/// is a no-op.
pub fn record(session: &mut ReasoningSession, result: &AnalysisResult) -> bool {
    if !result.is_completed() {
        return false;
    }
    session.commit(result.request_id, &result.text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinicheck_common::models::ResponseMode;
    use clinicheck_common::reasoner::MockReasoner;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn test_collect_joins_in_order() {
        let id = Uuid::new_v4();
        let result = collect(id, vec!["first".to_string(), "second".to_string()]);

        assert_eq!(result.text, "first\nsecond");
        assert_eq!(result.per_chunk_results.len(), 2);
        assert!(result.is_completed());
        assert_eq!(collect(id, vec!["first".to_string(), "second".to_string()]), result);
    }

    #[tokio::test]
    async fn test_record_twice_appends_once() {
        let mut session = ReasoningSession::new(
            Arc::new(MockReasoner::with_texts(["one", "two"])),
            Duration::from_secs(5),
        );
        let id = session.begin(
            "analyze",
            vec!["p1".to_string(), "p2".to_string()],
            ResponseMode::Batched,
        );
        let answers = session.drive(&CancellationToken::new()).await.unwrap();

        let result = collect(id, answers.clone());
        let again = collect(id, answers);

        assert!(record(&mut session, &result));
        assert!(!record(&mut session, &again));
        assert_eq!(session.history().len(), 2);
        assert_eq!(session.history()[1].text, "one\ntwo");
    }

    #[test]
    fn test_placeholder_is_not_recorded() {
        let mut session = ReasoningSession::new(Arc::new(MockReasoner::echo()), Duration::from_secs(1));
        let placeholder = AnalysisResult::placeholder(
            Uuid::new_v4(),
            AnalysisStatus::Unavailable { message: "timeout".to_string() },
        );

        assert!(!record(&mut session, &placeholder));
        assert!(session.history().is_empty());
    }
}
