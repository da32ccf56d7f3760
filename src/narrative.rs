use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::llm::LlmClient;
use crate::metrics::{fmt_count, fmt_delta, fmt_money, fmt_rate, Metrics};
use crate::nlu::QuestionContext;
use crate::prompts;

/// One-shot industry trend summary.
#[async_trait]
pub trait TrendsProvider: Send + Sync {
    async fn summarize(&self, industry: &str) -> Result<String>;
}

/// Turns metrics + trends + question context into a strategic insight.
#[async_trait]
pub trait StrategyGenerator: Send + Sync {
    async fn generate(
        &self,
        metrics: &Metrics,
        trends: &str,
        context: &QuestionContext,
    ) -> Result<String>;
}

/// Rewrites a raw strategy into client-facing language.
#[async_trait]
pub trait NarrativeTranslator: Send + Sync {
    async fn translate(&self, strategy: &str, context: &QuestionContext) -> Result<String>;
}

/// LLM-backed implementation of the three narrative stages.
pub struct LlmStages {
    llm: Arc<LlmClient>,
}

impl LlmStages {
    pub fn new(llm: Arc<LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl TrendsProvider for LlmStages {
    async fn summarize(&self, industry: &str) -> Result<String> {
        self.llm.complete(&prompts::trends(industry)).await
    }
}

#[async_trait]
impl StrategyGenerator for LlmStages {
    async fn generate(
        &self,
        metrics: &Metrics,
        trends: &str,
        context: &QuestionContext,
    ) -> Result<String> {
        self.llm
            .complete(&prompts::strategy(metrics, trends, context))
            .await
    }
}

#[async_trait]
impl NarrativeTranslator for LlmStages {
    async fn translate(&self, strategy: &str, context: &QuestionContext) -> Result<String> {
        self.llm
            .complete(&prompts::translate(strategy, context))
            .await
    }
}

/// Final formatting pass: narrative plus a key-metrics block.
///
/// Every metric field is rendered; absent values print as "N/A" instead of
/// being dropped, so the reply shape is stable across full and fallback runs.
pub fn polish(narrative: &str, metrics: &Metrics, _context: &QuestionContext) -> String {
    let lines = [
        format!("{narrative}\n"),
        "📊 *Key Metrics:*".to_string(),
        format!("- Ad Spend: {}", fmt_money(metrics.total_cost)),
        format!("- Conversions: {}", fmt_count(metrics.total_conversions)),
        format!("- Conversion Rate: {}", fmt_rate(metrics.conversion_rate)),
        format!(
            "- CPL: {} vs. Benchmark: {}",
            fmt_money(metrics.cpl),
            fmt_money(metrics.benchmark_cpl)
        ),
        format!("- CPL Change: {}", fmt_delta(metrics.cpl_change)),
        format!("- Leads Change: {}", fmt_delta(metrics.lead_change)),
        format!(
            "- Conversion Rate Change: {}",
            fmt_delta(metrics.conversion_rate_change)
        ),
        format!(
            "- GA Users: {} ({})",
            fmt_count(metrics.ga_users),
            fmt_delta(metrics.user_change)
        ),
    ];
    lines.join("\n")
}
