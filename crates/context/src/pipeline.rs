//! Analysis pipeline
//!
//! Provides:
//! - `Session`: one user's conversation, evidence and pending request
//! - `AnalysisMode`: the knobs that distinguish the front-end variants
//! - `Analyzer`: extract -> aggregate -> chunk -> compose -> reason -> collect

use chrono::{DateTime, Utc};
use clinicheck_common::config::{AggregationPolicy, AppConfig, PipelineConfig};
use clinicheck_common::errors::{AppError, Result};
use clinicheck_common::metrics::record_analysis;
use clinicheck_common::models::{
    AnalysisRequest, AnalysisResult, AnalysisStatus, Chunk, ConversationTurn, EvidenceBundle,
    ExtractionFailure, Modality, ResponseMode, SubjectContext, TemplateKind,
};
use clinicheck_common::Reasoner;
use clinicheck_ingestion::{
    aggregate, chunk, ChunkingConfig, IngestionError, SourceDocument, SourceExtraction, TextExtractor,
};
use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::collector::{collect, record};
use crate::prompt::{compose, PromptInput, IMAGE_DESCRIPTION_DIRECTIVE};
use crate::session::{ReasoningSession, SessionState};

/// One user's analysis session. All state lives in memory.
pub struct Session {
    id: Uuid,
    created_at: DateTime<Utc>,
    reasoning: ReasoningSession,
    last_bundle: Option<EvidenceBundle>,
    /// Subject context of the most recent analysis, reused by follow-up questions
    last_subject: Option<SubjectContext>,
    /// Extraction failures of the request currently pending, kept for retry
    pending_extraction_errors: Vec<ExtractionFailure>,
    pending_template: TemplateKind,
}

impl Session {
    pub fn new_session(reasoner: Arc<dyn Reasoner>, timeout: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            reasoning: ReasoningSession::new(reasoner, timeout),
            last_bundle: None,
            last_subject: None,
            pending_extraction_errors: Vec::new(),
            pending_template: TemplateKind::default(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Forget the conversation, the evidence and any pending request
    pub fn reset(&mut self) {
        self.reasoning.reset();
        self.last_bundle = None;
        self.last_subject = None;
        self.pending_extraction_errors.clear();
    }

    pub fn history(&self) -> &[ConversationTurn] {
        self.reasoning.history()
    }

    pub fn state(&self) -> SessionState {
        self.reasoning.state()
    }

    /// Evidence of the most recent analysis
    pub fn last_bundle(&self) -> Option<&EvidenceBundle> {
        self.last_bundle.as_ref()
    }
}

/// Pipeline behaviour shared by every request of an analyzer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisMode {
    /// Render the subject context into prompts
    pub include_subject_context: bool,
    /// Refuse analyses without a subject context
    pub require_subject_context: bool,
    pub streaming: bool,
    pub template_kind: TemplateKind,
}

impl Default for AnalysisMode {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

impl From<&PipelineConfig> for AnalysisMode {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            include_subject_context: config.include_subject_context,
            require_subject_context: config.require_subject_context,
            streaming: config.streaming,
            template_kind: config.template_kind,
        }
    }
}

impl AnalysisMode {
    fn response_mode(&self) -> ResponseMode {
        if self.streaming {
            ResponseMode::Streaming
        } else {
            ResponseMode::Batched
        }
    }
}

/// Runs analyses and follow-up questions against a session
pub struct Analyzer {
    extractor: TextExtractor,
    chunking: ChunkingConfig,
    aggregation: AggregationPolicy,
    mode: AnalysisMode,
    max_retries: u32,
    retry_backoff: Duration,
}

impl Analyzer {
    pub fn new(reasoner: Arc<dyn Reasoner>, config: &AppConfig) -> Self {
        Self::with_extractor(
            TextExtractor::new(reasoner, IMAGE_DESCRIPTION_DIRECTIVE)
                .with_timeout(config.reasoner_timeout()),
            config,
        )
    }

    pub fn with_extractor(extractor: TextExtractor, config: &AppConfig) -> Self {
        Self {
            extractor,
            chunking: ChunkingConfig::from(&config.pipeline),
            aggregation: config.pipeline.aggregation_policy,
            mode: AnalysisMode::from(&config.pipeline),
            max_retries: config.reasoner.max_retries,
            retry_backoff: Duration::from_millis(config.reasoner.retry_backoff_ms),
        }
    }

    pub fn with_mode(mut self, mode: AnalysisMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> &AnalysisMode {
        &self.mode
    }

    /// Analyze uploaded files
    #[instrument(skip_all, fields(session_id = %session.id(), files = files.len()))]
    pub async fn analyze(
        &self,
        session: &mut Session,
        files: Vec<SourceDocument>,
        subject: Option<SubjectContext>,
        cancel: &CancellationToken,
    ) -> Result<AnalysisResult> {
        let started = Instant::now();

        if files.is_empty() {
            return Err(AppError::invalid_input("No file uploaded"));
        }
        let subject = if self.mode.include_subject_context {
            if self.mode.require_subject_context && subject.is_none() {
                return Err(AppError::invalid_input("Select a gender before analyzing"));
            }
            subject
        } else {
            None
        };

        let (extractions, failures) = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Analysis cancelled during extraction");
                let result = AnalysisResult::placeholder(Uuid::new_v4(), AnalysisStatus::Cancelled);
                self.observe(started, self.mode.template_kind, &result);
                return Ok(result);
            }
            extracted = self.extract_all(&files) => extracted?,
        };

        let request = AnalysisRequest {
            subject_context: subject,
            evidence_bundle: aggregate(extractions, self.aggregation),
            user_question: None,
        };
        let chunks = chunk(&request.evidence_bundle, &self.chunking);

        let template = if self.mode.template_kind == TemplateKind::InitialAnalysis
            && !request.evidence_bundle.is_empty()
            && !request.evidence_bundle.has_modality(Modality::Text)
        {
            TemplateKind::ImageAnalysis
        } else {
            self.mode.template_kind
        };

        if chunks.is_empty() {
            info!("Uploaded files contain no readable text");
            let result = AnalysisResult::placeholder(Uuid::new_v4(), AnalysisStatus::NothingToAnalyze)
                .with_extraction_errors(failures);
            self.observe(started, template, &result);
            return Ok(result);
        }

        let names: Vec<&str> = files.iter().map(|f| f.source_id.as_str()).collect();
        let user_text = format!("Analyze the uploaded files: {}", names.join(", "));
        let prompts = prompts_for(&chunks, template, &request);
        session.last_bundle = Some(request.evidence_bundle);
        session.last_subject = request.subject_context;

        let result = self
            .run(session, user_text, prompts, template, failures, cancel)
            .await?;
        self.observe(started, template, &result);
        Ok(result)
    }

    /// Answer a follow-up question against prior evidence.
    ///
    /// Uses `prior_bundle` when given, otherwise the session's last bundle.
    /// Without any evidence the question is answered as a general one.
    #[instrument(skip_all, fields(session_id = %session.id()))]
    pub async fn ask(
        &self,
        session: &mut Session,
        question: &str,
        prior_bundle: Option<&EvidenceBundle>,
        cancel: &CancellationToken,
    ) -> Result<AnalysisResult> {
        let started = Instant::now();
        let question = question.trim();
        if question.is_empty() {
            return Err(AppError::invalid_input("Question must not be empty"));
        }

        let template = TemplateKind::ContextualQuestion;
        let request = AnalysisRequest {
            subject_context: session
                .last_subject
                .clone()
                .filter(|_| self.mode.include_subject_context),
            evidence_bundle: prior_bundle
                .or(session.last_bundle.as_ref())
                .cloned()
                .unwrap_or_default(),
            user_question: Some(question.to_string()),
        };
        let chunks = chunk(&request.evidence_bundle, &self.chunking);

        let prompts = if chunks.is_empty() {
            vec![compose(
                template,
                &PromptInput {
                    subject: request.subject_context.as_ref(),
                    question: request.user_question.as_deref(),
                    ..Default::default()
                },
            )]
        } else {
            prompts_for(&chunks, template, &request)
        };

        let result = self
            .run(session, question.to_string(), prompts, template, Vec::new(), cancel)
            .await?;
        self.observe(started, template, &result);
        Ok(result)
    }

    /// Resume the session's failed request
    #[instrument(skip_all, fields(session_id = %session.id()))]
    pub async fn retry(&self, session: &mut Session, cancel: &CancellationToken) -> Result<AnalysisResult> {
        let started = Instant::now();
        let request_id = session
            .reasoning
            .pending_request()
            .filter(|_| session.state() == SessionState::Failed)
            .ok_or_else(|| AppError::invalid_input("No failed request to retry"))?;

        let template = session.pending_template;
        let outcome = session.reasoning.retry(cancel).await;
        let result = self.conclude(session, request_id, outcome, cancel).await?;
        self.observe(started, template, &result);
        Ok(result)
    }

    async fn extract_all(
        &self,
        files: &[SourceDocument],
    ) -> Result<(Vec<SourceExtraction>, Vec<ExtractionFailure>)> {
        let outcomes = join_all(files.iter().map(|f| self.extractor.extract_source(f))).await;

        let mut extractions = Vec::new();
        let mut errors: Vec<IngestionError> = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(extraction) => extractions.push(extraction),
                Err(e) => errors.push(e),
            }
        }

        if extractions.is_empty() && !errors.is_empty() {
            return Err(errors.swap_remove(0).into());
        }

        let failures = errors
            .iter()
            .map(|e| ExtractionFailure {
                source_id: e.source_id().to_string(),
                message: e.to_string(),
            })
            .collect();
        Ok((extractions, failures))
    }

    async fn run(
        &self,
        session: &mut Session,
        user_text: String,
        prompts: Vec<String>,
        template: TemplateKind,
        extraction_errors: Vec<ExtractionFailure>,
        cancel: &CancellationToken,
    ) -> Result<AnalysisResult> {
        let request_id = session
            .reasoning
            .begin(user_text, prompts, self.mode.response_mode());
        session.pending_extraction_errors = extraction_errors;
        session.pending_template = template;

        let outcome = session.reasoning.drive(cancel).await;
        self.conclude(session, request_id, outcome, cancel).await
    }

    /// Apply automatic retries, then turn the outcome into a result
    async fn conclude(
        &self,
        session: &mut Session,
        request_id: Uuid,
        mut outcome: Result<Vec<String>>,
        cancel: &CancellationToken,
    ) -> Result<AnalysisResult> {
        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.retry_backoff)
            .with_max_elapsed_time(None)
            .build();
        let mut attempt = 0;

        loop {
            match outcome {
                Err(AppError::ReasonerUnavailable { message }) if attempt < self.max_retries => {
                    attempt += 1;
                    let delay = backoff.next_backoff().unwrap_or(self.retry_backoff);
                    warn!(
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "Reasoner unavailable, retrying"
                    );

                    outcome = tokio::select! {
                        _ = cancel.cancelled() => {
                            session.reasoning.abandon();
                            Err(AppError::Cancelled)
                        }
                        _ = tokio::time::sleep(delay) => session.reasoning.retry(cancel).await,
                    };
                }
                outcome => {
                    let errors = if session.state() == SessionState::Failed {
                        session.pending_extraction_errors.clone()
                    } else {
                        std::mem::take(&mut session.pending_extraction_errors)
                    };
                    return finish(session, request_id, outcome, errors);
                }
            }
        }
    }

    fn observe(&self, started: Instant, template: TemplateKind, result: &AnalysisResult) {
        let status = status_label(&result.status);
        record_analysis(started.elapsed(), template_label(template), status);
        info!(
            request_id = %result.request_id,
            status,
            chunks = result.per_chunk_results.len(),
            extraction_errors = result.extraction_errors.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Analysis finished"
        );
    }
}

/// Map a drive outcome to a result. Reasoner failures become placeholder
/// results; other errors propagate.
fn finish(
    session: &mut Session,
    request_id: Uuid,
    outcome: Result<Vec<String>>,
    extraction_errors: Vec<ExtractionFailure>,
) -> Result<AnalysisResult> {
    let result = match outcome {
        Ok(answers) => {
            let result = collect(request_id, answers);
            record(&mut session.reasoning, &result);
            result
        }
        Err(AppError::ReasonerRejected { reason }) => {
            AnalysisResult::placeholder(request_id, AnalysisStatus::Rejected { reason })
        }
        Err(AppError::ReasonerUnavailable { message }) => {
            AnalysisResult::placeholder(request_id, AnalysisStatus::Unavailable { message })
        }
        Err(AppError::Cancelled) => AnalysisResult::placeholder(request_id, AnalysisStatus::Cancelled),
        Err(e) => return Err(e),
    };

    Ok(result.with_extraction_errors(extraction_errors))
}

fn prompts_for(chunks: &[Chunk], template: TemplateKind, request: &AnalysisRequest) -> Vec<String> {
    let total = chunks.len();
    chunks
        .iter()
        .map(|c| {
            let sections = c.sections();
            compose(
                template,
                &PromptInput {
                    context: &c.text,
                    sections: &sections,
                    part: Some((c.index + 1, total)),
                    subject: request.subject_context.as_ref(),
                    question: request.user_question.as_deref(),
                },
            )
        })
        .collect()
}

fn template_label(kind: TemplateKind) -> &'static str {
    match kind {
        TemplateKind::InitialAnalysis => "initial_analysis",
        TemplateKind::ContextualQuestion => "contextual_question",
        TemplateKind::ImageAnalysis => "image_analysis",
        TemplateKind::ResearchPaper => "research_paper",
    }
}

fn status_label(status: &AnalysisStatus) -> &'static str {
    match status {
        AnalysisStatus::Completed => "completed",
        AnalysisStatus::NothingToAnalyze => "nothing_to_analyze",
        AnalysisStatus::Rejected { .. } => "rejected",
        AnalysisStatus::Unavailable { .. } => "unavailable",
        AnalysisStatus::Cancelled => "cancelled",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinicheck_common::config::ChunkPolicy;
    use clinicheck_common::models::{Gender, Role};
    use clinicheck_common::reasoner::{MockReasoner, MockReply, MockRequestKind};
    use clinicheck_ingestion::{DocumentDecoder, IngestionError};

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];

    /// Decodes the bytes as UTF-8 pages separated by form feeds; `%BAD` fails
    struct PlainPages;

    impl DocumentDecoder for PlainPages {
        fn decode_pages(&self, source_id: &str, bytes: &[u8]) -> std::result::Result<Vec<String>, IngestionError> {
            let text = String::from_utf8_lossy(bytes);
            if text.starts_with("%BAD") {
                return Err(IngestionError::PdfParse {
                    source_id: source_id.to_string(),
                    message: "corrupt".to_string(),
                });
            }
            Ok(text.split('\x0C').map(str::to_string).collect())
        }
    }

    fn config(max_chunk_length: usize, max_retries: u32) -> AppConfig {
        let mut config = AppConfig::default();
        config.pipeline.max_chunk_length = max_chunk_length;
        config.pipeline.lookback_window = max_chunk_length / 4;
        config.pipeline.chunk_policy = ChunkPolicy::Fixed;
        config.reasoner.max_retries = max_retries;
        config.reasoner.retry_backoff_ms = 10;
        config
    }

    fn setup(replies: Vec<MockReply>, config: &AppConfig) -> (Arc<MockReasoner>, Analyzer, Session) {
        let mock = Arc::new(MockReasoner::new(replies));
        let extractor = TextExtractor::with_decoder(Arc::new(PlainPages), mock.clone(), IMAGE_DESCRIPTION_DIRECTIVE);
        let analyzer = Analyzer::with_extractor(extractor, config);
        let session = Session::new_session(mock.clone(), Duration::from_secs(5));
        (mock, analyzer, session)
    }

    fn text(replies: &[&str]) -> Vec<MockReply> {
        replies.iter().map(|r| MockReply::Text(r.to_string())).collect()
    }

    fn pdf(name: &str, content: &str) -> SourceDocument {
        SourceDocument::new(name, content.as_bytes().to_vec()).with_mime("application/pdf")
    }

    #[tokio::test]
    async fn test_no_files_is_invalid_input() {
        let (mock, analyzer, mut session) = setup(Vec::new(), &config(1000, 0));
        let err = analyzer
            .analyze(&mut session, Vec::new(), None, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::InvalidInput { .. }));
        assert_eq!(mock.request_count(), 0);
    }

    #[tokio::test]
    async fn test_required_subject_missing() {
        let mut cfg = config(1000, 0);
        cfg.pipeline.require_subject_context = true;
        let (_, analyzer, mut session) = setup(Vec::new(), &cfg);

        let err = analyzer
            .analyze(&mut session, vec![pdf("a.pdf", "Hb 13")], None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn test_three_chunks_called_in_order() {
        let (mock, analyzer, mut session) = setup(text(&["r1", "r2", "r3"]), &config(10, 0));
        let subject = SubjectContext::Gender(Gender::Female);

        let result = analyzer
            .analyze(
                &mut session,
                vec![pdf("labs.pdf", "aaaaaaaaaabbbbbbbbbbcccccccccc")],
                Some(subject),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(result.is_completed());
        assert_eq!(result.text, "r1\nr2\nr3");

        let requests = mock.requests();
        assert_eq!(requests.len(), 3);
        for (i, request) in requests.iter().enumerate() {
            assert!(request.prompt.contains(&format!("Document section {} of 3", i + 1)));
            assert!(request.prompt.contains("The subject is female."));
        }
        assert!(requests[0].prompt.contains("aaaaaaaaaa"));
        assert!(requests[2].prompt.contains("cccccccccc"));

        assert_eq!(session.history().len(), 2);
        assert_eq!(session.history()[1].role, Role::Assistant);
        assert_eq!(session.history()[1].text, "r1\nr2\nr3");
    }

    #[tokio::test]
    async fn test_partial_extraction_failure_recorded() {
        let (_, analyzer, mut session) = setup(text(&["fine"]), &config(1000, 0));

        let result = analyzer
            .analyze(
                &mut session,
                vec![pdf("broken.pdf", "%BAD"), pdf("good.pdf", "Glucose 5.1 mmol/L")],
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.text, "fine");
        assert_eq!(result.extraction_errors.len(), 1);
        assert_eq!(result.extraction_errors[0].source_id, "broken.pdf");
    }

    #[tokio::test]
    async fn test_all_sources_failing_is_extraction_error() {
        let (mock, analyzer, mut session) = setup(Vec::new(), &config(1000, 0));

        let err = analyzer
            .analyze(&mut session, vec![pdf("broken.pdf", "%BAD")], None, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Extraction { ref source_id, .. } if source_id == "broken.pdf"));
        assert_eq!(mock.request_count(), 0);
    }

    #[tokio::test]
    async fn test_blank_document_is_nothing_to_analyze() {
        let (mock, analyzer, mut session) = setup(Vec::new(), &config(1000, 0));

        let result = analyzer
            .analyze(&mut session, vec![pdf("blank.pdf", " \x0C \n ")], None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.status, AnalysisStatus::NothingToAnalyze);
        assert_eq!(mock.request_count(), 0);
        assert!(session.history().is_empty());
    }

    #[tokio::test]
    async fn test_rejection_on_first_chunk() {
        let (mock, analyzer, mut session) = setup(
            vec![MockReply::Reject("SAFETY".to_string()), MockReply::Text("never".to_string())],
            &config(10, 3),
        );

        let result = analyzer
            .analyze(
                &mut session,
                vec![pdf("labs.pdf", "aaaaaaaaaabbbbbbbbbb")],
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(result.is_rejected());
        assert!(result.text.is_empty());
        assert!(session.history().is_empty());
        assert_eq!(session.state(), SessionState::Failed);
        // Rejections are never retried automatically
        assert_eq!(mock.request_count(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_retried_automatically() {
        let (mock, analyzer, mut session) = setup(
            vec![MockReply::Unavailable("503".to_string()), MockReply::Text("ok".to_string())],
            &config(1000, 2),
        );

        let result = analyzer
            .analyze(&mut session, vec![pdf("a.pdf", "Hb 13")], None, &CancellationToken::new())
            .await
            .unwrap();

        assert!(result.is_completed());
        assert_eq!(mock.request_count(), 2);
        assert_eq!(session.history().len(), 2);
    }

    #[tokio::test]
    async fn test_manual_retry_after_unavailable() {
        let (_, analyzer, mut session) = setup(
            vec![MockReply::Unavailable("quota".to_string()), MockReply::Text("ok".to_string())],
            &config(1000, 0),
        );
        let cancel = CancellationToken::new();

        let first = analyzer
            .analyze(&mut session, vec![pdf("a.pdf", "Hb 13")], None, &cancel)
            .await
            .unwrap();
        assert!(matches!(first.status, AnalysisStatus::Unavailable { .. }));

        let second = analyzer.retry(&mut session, &cancel).await.unwrap();
        assert_eq!(second.request_id, first.request_id);
        assert_eq!(second.text, "ok");
        assert_eq!(session.history().len(), 2);
    }

    #[tokio::test]
    async fn test_retry_without_failure() {
        let (_, analyzer, mut session) = setup(Vec::new(), &config(1000, 0));
        let err = analyzer
            .retry(&mut session, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn test_image_only_bundle_uses_image_template() {
        let (mock, analyzer, mut session) = setup(
            text(&["A wrist x-ray showing a hairline fracture.", "analysis"]),
            &config(1000, 0),
        );

        analyzer
            .analyze(
                &mut session,
                vec![SourceDocument::new("wrist.png", PNG_MAGIC.to_vec())],
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let requests = mock.requests();
        assert_eq!(requests[0].kind, MockRequestKind::Image);
        assert!(requests[1].prompt.contains("Image Descriptions:"));
    }

    #[tokio::test]
    async fn test_ask_uses_last_bundle_and_history() {
        let (mock, analyzer, mut session) = setup(text(&["analysis", "answer"]), &config(1000, 0));
        let cancel = CancellationToken::new();

        analyzer
            .analyze(&mut session, vec![pdf("a.pdf", "LDL 190 mg/dL")], None, &cancel)
            .await
            .unwrap();
        let result = analyzer
            .ask(&mut session, "Is my LDL too high?", None, &cancel)
            .await
            .unwrap();

        assert_eq!(result.text, "answer");
        let requests = mock.requests();
        assert!(requests[1].prompt.contains("LDL 190 mg/dL"));
        assert!(requests[1].prompt.contains("Question: Is my LDL too high?"));
        assert_eq!(requests[1].history.len(), 2);
        assert_eq!(session.history().len(), 4);
    }

    #[tokio::test]
    async fn test_ask_without_evidence_and_blank_question() {
        let (mock, analyzer, mut session) = setup(text(&["general answer"]), &config(1000, 0));
        let cancel = CancellationToken::new();

        let err = analyzer.ask(&mut session, "   ", None, &cancel).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput { .. }));

        let result = analyzer
            .ask(&mut session, "What does HbA1c measure?", None, &cancel)
            .await
            .unwrap();
        assert_eq!(result.text, "general answer");
        assert!(mock.requests()[0].prompt.contains("general health question"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let (mock, analyzer, mut session) = setup(text(&["unused"]), &config(1000, 0));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = analyzer
            .analyze(&mut session, vec![pdf("a.pdf", "Hb 13")], None, &cancel)
            .await
            .unwrap();

        assert_eq!(result.status, AnalysisStatus::Cancelled);
        assert_eq!(mock.request_count(), 0);
        assert!(session.history().is_empty());
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_reset_forgets_evidence() {
        let (_, analyzer, mut session) = setup(text(&["analysis"]), &config(1000, 0));
        analyzer
            .analyze(&mut session, vec![pdf("a.pdf", "Hb 13")], None, &CancellationToken::new())
            .await
            .unwrap();

        session.reset();
        assert!(session.last_bundle().is_none());
        assert!(session.history().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_image_description() {
        let (mock, analyzer, mut session) = setup(
            vec![MockReply::Delayed(
                Duration::from_secs(600),
                Box::new(MockReply::Text("too late".to_string())),
            )],
            &config(1000, 0),
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = tokio::time::Instant::now();
        let result = analyzer
            .analyze(
                &mut session,
                vec![SourceDocument::new("wrist.png", PNG_MAGIC.to_vec())],
                None,
                &cancel,
            )
            .await
            .unwrap();

        assert_eq!(result.status, AnalysisStatus::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(mock.request_count(), 1);
        assert!(session.history().is_empty());
        assert!(session.last_bundle().is_none());
    }

    #[tokio::test]
    async fn test_mixed_upload_labels_each_modality() {
        let (mock, analyzer, mut session) = setup(
            text(&["A chest x-ray with clear lung fields.", "analysis"]),
            &config(1000, 0),
        );

        analyzer
            .analyze(
                &mut session,
                vec![
                    pdf("labs.pdf", "Hb 11 g/dL"),
                    SourceDocument::new("chest.png", PNG_MAGIC.to_vec()),
                ],
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let prompt = &mock.requests()[1].prompt;
        assert!(prompt.contains("Report Text:\nHb 11 g/dL\n"));
        assert!(prompt.contains("Image Descriptions:\nA chest x-ray with clear lung fields.\n"));
    }

    #[tokio::test]
    async fn test_empty_upload_keeps_previous_evidence() {
        let (mock, analyzer, mut session) = setup(text(&["analysis", "answer"]), &config(1000, 0));
        let cancel = CancellationToken::new();

        analyzer
            .analyze(&mut session, vec![pdf("a.pdf", "LDL 190 mg/dL")], None, &cancel)
            .await
            .unwrap();
        let blank = analyzer
            .analyze(&mut session, vec![pdf("blank.pdf", "  ")], None, &cancel)
            .await
            .unwrap();
        assert_eq!(blank.status, AnalysisStatus::NothingToAnalyze);
        assert_eq!(session.last_bundle().map(|b| b.len()), Some(1));

        analyzer
            .ask(&mut session, "Is my LDL too high?", None, &cancel)
            .await
            .unwrap();
        assert!(mock.requests()[1].prompt.contains("LDL 190 mg/dL"));
    }

    #[tokio::test]
    async fn test_follow_up_keeps_subject_context() {
        let (mock, analyzer, mut session) = setup(text(&["analysis", "answer"]), &config(1000, 0));
        let cancel = CancellationToken::new();

        analyzer
            .analyze(
                &mut session,
                vec![pdf("a.pdf", "Ferritin 12 ng/mL")],
                Some(SubjectContext::Gender(Gender::Female)),
                &cancel,
            )
            .await
            .unwrap();
        analyzer
            .ask(&mut session, "Is my ferritin low?", None, &cancel)
            .await
            .unwrap();

        assert!(mock.requests()[1].prompt.contains("The subject is female."));
    }
}
