use std::sync::Arc;

use anyhow::Result;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::directory::ClientDirectory;
use crate::metrics::{self, Metrics};
use crate::narrative::{self, NarrativeTranslator, StrategyGenerator, TrendsProvider};
use crate::nlu::{ParseOutcome, QuestionParser};
use crate::resolve::{self, Mode, Resolution, SessionMemory, FALLBACK_SLUG};
use crate::retrieve::{DataRetriever, RetrieveError};

/// Shown when a narrative stage fails; the run aborts but the user still gets
/// a reply instead of a transport error.
pub const APOLOGY: &str =
    "Sorry, I hit a snag putting your answer together. Please try again in a moment.";

/// Industry handed to the trends stage when no client was identified.
const FALLBACK_INDUSTRY: &str = "general business";

/// The only failure that reaches the transport layer. Identity resolved but
/// the data is stale or missing; must not be conflated with "unknown client".
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no fresh report data for client `{0}`")]
    DataUnavailable(String),
}

enum RunError {
    DataUnavailable(String),
    Stage(anyhow::Error),
}

/// Sequences one question through identity resolution, data retrieval,
/// metrics, and the narrative stages. One synchronous pass per question; all
/// I/O is delegated to the injected collaborators.
pub struct Pipeline {
    directory: Arc<ClientDirectory>,
    sessions: Arc<SessionMemory>,
    parser: Arc<dyn QuestionParser>,
    retriever: Arc<dyn DataRetriever>,
    trends: Arc<dyn TrendsProvider>,
    strategy: Arc<dyn StrategyGenerator>,
    translator: Arc<dyn NarrativeTranslator>,
}

impl Pipeline {
    pub fn new(
        directory: Arc<ClientDirectory>,
        sessions: Arc<SessionMemory>,
        parser: Arc<dyn QuestionParser>,
        retriever: Arc<dyn DataRetriever>,
        trends: Arc<dyn TrendsProvider>,
        strategy: Arc<dyn StrategyGenerator>,
        translator: Arc<dyn NarrativeTranslator>,
    ) -> Self {
        Self {
            directory,
            sessions,
            parser,
            retriever,
            trends,
            strategy,
            translator,
        }
    }

    /// Answer one question. `Err` only for the data-unavailable axis; every
    /// other internal failure is logged and surfaced as the apology text.
    pub async fn answer(
        &self,
        question: &str,
        user_id: Option<u64>,
    ) -> Result<String, PipelineError> {
        match self.run(question, user_id).await {
            Ok(text) => Ok(text),
            Err(RunError::DataUnavailable(slug)) => {
                warn!(slug, "Run aborted: no fresh data");
                Err(PipelineError::DataUnavailable(slug))
            }
            Err(RunError::Stage(err)) => {
                error!(%err, "Pipeline stage failed");
                Ok(APOLOGY.to_string())
            }
        }
    }

    async fn run(&self, question: &str, user_id: Option<u64>) -> Result<String, RunError> {
        let resolution = self
            .resolve_identity(question, user_id)
            .await
            .map_err(RunError::Stage)?;
        info!(slug = %resolution.slug, mode = ?resolution.mode, "Identity resolved");

        let outcome = self.parser.parse(question, &resolution.slug).await;
        if let ParseOutcome::Degraded { raw, .. } = &outcome {
            warn!(raw = %raw, "NLU degraded, continuing with unknown intent");
        }
        let mut context = outcome.into_context();
        context.user_id = user_id;

        let (metrics, industry) = match resolution.mode {
            Mode::Full => {
                let raw = self.retriever.collect(&resolution.slug).await.map_err(|e| {
                    match e {
                        RetrieveError::NoFreshData { slug, .. } => RunError::DataUnavailable(slug),
                        RetrieveError::Other(err) => RunError::Stage(err),
                    }
                })?;
                info!(
                    ads_rows = raw.current_ads.len(),
                    ga_rows = raw.current_ga.len(),
                    industry = %raw.industry,
                    "Raw data retrieved"
                );
                let metrics = metrics::compute(&raw);
                (metrics, raw.industry)
            }
            Mode::Fallback => (Metrics::absent(), FALLBACK_INDUSTRY.to_string()),
        };

        let trends = self
            .trends
            .summarize(&industry)
            .await
            .map_err(RunError::Stage)?;
        let strategy = self
            .strategy
            .generate(&metrics, &trends, &context)
            .await
            .map_err(RunError::Stage)?;
        let narrative = self
            .translator
            .translate(&strategy, &context)
            .await
            .map_err(RunError::Stage)?;

        Ok(narrative::polish(&narrative, &metrics, &context))
    }

    /// Text match first, session memory second, sentinel last.
    ///
    /// Any successful resolution is written back to session memory so a
    /// memory-sourced match refreshes its own recency.
    async fn resolve_identity(
        &self,
        question: &str,
        user_id: Option<u64>,
    ) -> Result<Resolution> {
        let directory = self.directory.load().await?;

        let mut slug = resolve::match_slug(question, &directory).map(str::to_string);
        if slug.is_none() {
            if let Some(uid) = user_id {
                slug = self.sessions.get(uid).await;
            }
        }

        match slug {
            Some(slug) => {
                if let Some(uid) = user_id {
                    self.sessions.put(uid, &slug).await;
                }
                Ok(Resolution {
                    slug,
                    mode: Mode::Full,
                })
            }
            None => Ok(Resolution {
                slug: FALLBACK_SLUG.to_string(),
                mode: Mode::Fallback,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::anyhow;
    use async_trait::async_trait;

    use crate::directory::{Client, ClientDirectoryProvider};
    use crate::metrics::{RawDataset, Table, CONVERSIONS_COLUMN, CONV_RATE_COLUMN, COST_COLUMN};
    use crate::nlu::QuestionContext;

    struct FixtureProvider(Vec<Client>);

    #[async_trait]
    impl ClientDirectoryProvider for FixtureProvider {
        async fn fetch_all(&self) -> Result<Vec<Client>> {
            Ok(self.0.clone())
        }
    }

    struct StubParser;

    #[async_trait]
    impl QuestionParser for StubParser {
        async fn parse(&self, question: &str, slug: &str) -> ParseOutcome {
            ParseOutcome::Parsed(QuestionContext {
                question: question.to_string(),
                slug: slug.to_string(),
                intent: "performance_review".to_string(),
                entities: vec![],
                user_id: None,
            })
        }
    }

    struct DegradedParser;

    #[async_trait]
    impl QuestionParser for DegradedParser {
        async fn parse(&self, question: &str, slug: &str) -> ParseOutcome {
            ParseOutcome::Degraded {
                context: QuestionContext::unknown(question, slug),
                raw: "not json at all".to_string(),
            }
        }
    }

    struct StubRetriever {
        dataset: Option<RawDataset>,
        calls: AtomicUsize,
    }

    impl StubRetriever {
        fn with_dataset() -> Self {
            let ads = Table::new(vec![HashMap::from([
                (COST_COLUMN.to_string(), "1000".to_string()),
                (CONVERSIONS_COLUMN.to_string(), "10".to_string()),
                (CONV_RATE_COLUMN.to_string(), "5%".to_string()),
            ])]);
            Self {
                dataset: Some(RawDataset {
                    current_ads: ads,
                    current_ga: Table::default(),
                    previous_ads: None,
                    previous_ga: None,
                    industry: "roofing".to_string(),
                    benchmark_cpl: 300.0,
                }),
                calls: AtomicUsize::new(0),
            }
        }

        fn stale() -> Self {
            Self {
                dataset: None,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl DataRetriever for StubRetriever {
        async fn collect(&self, slug: &str) -> Result<RawDataset, RetrieveError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.dataset {
                Some(dataset) => Ok(dataset.clone()),
                None => Err(RetrieveError::NoFreshData {
                    slug: slug.to_string(),
                    window_days: 7,
                }),
            }
        }
    }

    struct StubStages;

    #[async_trait]
    impl TrendsProvider for StubStages {
        async fn summarize(&self, industry: &str) -> Result<String> {
            Ok(format!("trends[{industry}]"))
        }
    }

    #[async_trait]
    impl StrategyGenerator for StubStages {
        async fn generate(
            &self,
            _metrics: &Metrics,
            trends: &str,
            context: &QuestionContext,
        ) -> Result<String> {
            Ok(format!(
                "strategy[{} uid={:?} {trends}]",
                context.slug, context.user_id
            ))
        }
    }

    #[async_trait]
    impl NarrativeTranslator for StubStages {
        async fn translate(&self, strategy: &str, _context: &QuestionContext) -> Result<String> {
            Ok(strategy.to_string())
        }
    }

    struct FailingStrategy;

    #[async_trait]
    impl TrendsProvider for FailingStrategy {
        async fn summarize(&self, _industry: &str) -> Result<String> {
            Ok("trends".to_string())
        }
    }

    #[async_trait]
    impl StrategyGenerator for FailingStrategy {
        async fn generate(
            &self,
            _metrics: &Metrics,
            _trends: &str,
            _context: &QuestionContext,
        ) -> Result<String> {
            Err(anyhow!("model endpoint exploded"))
        }
    }

    #[async_trait]
    impl NarrativeTranslator for FailingStrategy {
        async fn translate(&self, strategy: &str, _context: &QuestionContext) -> Result<String> {
            Ok(strategy.to_string())
        }
    }

    fn directory() -> Arc<ClientDirectory> {
        Arc::new(ClientDirectory::new(Arc::new(FixtureProvider(vec![
            Client {
                name: "acme roofing".to_string(),
                slug: "acme-roofing".to_string(),
            },
            Client {
                name: "weathercheck".to_string(),
                slug: "weathercheck".to_string(),
            },
        ]))))
    }

    struct Harness {
        pipeline: Pipeline,
        sessions: Arc<SessionMemory>,
        retriever: Arc<StubRetriever>,
    }

    fn harness(retriever: StubRetriever) -> Harness {
        let sessions = Arc::new(SessionMemory::new(16));
        let retriever = Arc::new(retriever);
        let stages = Arc::new(StubStages);
        let pipeline = Pipeline::new(
            directory(),
            sessions.clone(),
            Arc::new(StubParser),
            retriever.clone(),
            stages.clone(),
            stages.clone(),
            stages,
        );
        Harness {
            pipeline,
            sessions,
            retriever,
        }
    }

    #[tokio::test]
    async fn full_mode_resolves_from_question_text() {
        let h = harness(StubRetriever::with_dataset());
        let text = h
            .pipeline
            .answer("What's going on with Acme Roofing ads?", Some(42))
            .await
            .unwrap();

        assert!(text.contains("strategy[acme-roofing uid=Some(42) trends[roofing]]"));
        assert!(text.contains("- CPL: $100.00 vs. Benchmark: $300.00"));
        assert_eq!(h.retriever.calls.load(Ordering::SeqCst), 1);
        // Resolution is remembered for the next question.
        assert_eq!(
            h.sessions.get(42).await.as_deref(),
            Some("acme-roofing")
        );
    }

    #[tokio::test]
    async fn fallback_mode_skips_retrieval_and_blanks_metrics() {
        let h = harness(StubRetriever::with_dataset());
        let text = h
            .pipeline
            .answer("How's my business doing?", Some(7))
            .await
            .unwrap();

        assert!(text.contains("strategy[general uid=Some(7) trends[general business]]"));
        assert!(text.contains("- Ad Spend: N/A"));
        assert!(text.contains("- CPL: N/A vs. Benchmark: N/A"));
        assert_eq!(h.retriever.calls.load(Ordering::SeqCst), 0);
        // The sentinel is never written to session memory.
        assert_eq!(h.sessions.get(7).await, None);
    }

    #[tokio::test]
    async fn session_memory_resolves_follow_up_questions() {
        let h = harness(StubRetriever::with_dataset());
        h.sessions.put(42, "acme-roofing").await;

        let text = h.pipeline.answer("any updates?", Some(42)).await.unwrap();

        assert!(text.contains("strategy[acme-roofing"));
        assert_eq!(h.retriever.calls.load(Ordering::SeqCst), 1);
        // Memory-sourced matches re-affirm the entry.
        assert_eq!(
            h.sessions.get(42).await.as_deref(),
            Some("acme-roofing")
        );
    }

    #[tokio::test]
    async fn no_user_id_and_no_match_falls_back() {
        let h = harness(StubRetriever::with_dataset());
        let text = h.pipeline.answer("any updates?", None).await.unwrap();
        assert!(text.contains("strategy[general"));
        assert_eq!(h.retriever.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stale_data_is_fatal_not_fallback() {
        let h = harness(StubRetriever::stale());
        let err = h
            .pipeline
            .answer("how is acme roofing?", Some(42))
            .await
            .unwrap_err();
        let PipelineError::DataUnavailable(slug) = err;
        assert_eq!(slug, "acme-roofing");
    }

    #[tokio::test]
    async fn degraded_parse_still_produces_an_answer() {
        let sessions = Arc::new(SessionMemory::new(16));
        let stages = Arc::new(StubStages);
        let pipeline = Pipeline::new(
            directory(),
            sessions,
            Arc::new(DegradedParser),
            Arc::new(StubRetriever::with_dataset()),
            stages.clone(),
            stages.clone(),
            stages,
        );

        let text = pipeline
            .answer("tell me about acme roofing", None)
            .await
            .unwrap();
        assert!(text.contains("strategy[acme-roofing"));
    }

    #[tokio::test]
    async fn narrative_failure_becomes_apology() {
        let sessions = Arc::new(SessionMemory::new(16));
        let failing = Arc::new(FailingStrategy);
        let pipeline = Pipeline::new(
            directory(),
            sessions,
            Arc::new(StubParser),
            Arc::new(StubRetriever::with_dataset()),
            failing.clone(),
            failing.clone(),
            failing,
        );

        let text = pipeline
            .answer("how is acme roofing?", None)
            .await
            .unwrap();
        assert_eq!(text, APOLOGY);
    }
}
