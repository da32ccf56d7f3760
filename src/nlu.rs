use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::llm::LlmClient;
use crate::prompts;

/// Parsed question context handed to every downstream stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionContext {
    pub question: String,
    pub slug: String,
    pub intent: String,
    pub entities: Vec<String>,
    pub user_id: Option<u64>,
}

impl QuestionContext {
    /// Context used when the parser output is unusable.
    pub fn unknown(question: &str, slug: &str) -> Self {
        Self {
            question: question.to_string(),
            slug: slug.to_string(),
            intent: "unknown".to_string(),
            entities: Vec::new(),
            user_id: None,
        }
    }
}

/// Outcome of question parsing. Degraded keeps the raw model output so
/// callers can tell success from fallback without string-sniffing.
#[derive(Debug, Clone)]
pub enum ParseOutcome {
    Parsed(QuestionContext),
    Degraded { context: QuestionContext, raw: String },
}

impl ParseOutcome {
    pub fn into_context(self) -> QuestionContext {
        match self {
            ParseOutcome::Parsed(context) => context,
            ParseOutcome::Degraded { context, .. } => context,
        }
    }
}

/// Best-effort intent/entity extraction. Never fails: unusable service output
/// degrades to an `unknown` context instead.
#[async_trait]
pub trait QuestionParser: Send + Sync {
    async fn parse(&self, question: &str, slug: &str) -> ParseOutcome;
}

pub struct LlmQuestionParser {
    llm: Arc<LlmClient>,
}

impl LlmQuestionParser {
    pub fn new(llm: Arc<LlmClient>) -> Self {
        Self { llm }
    }
}

#[derive(Debug, Deserialize)]
struct ParsedReply {
    intent: String,
    #[serde(default)]
    entities: Vec<String>,
    #[serde(default)]
    slug: Option<String>,
}

/// Strip a Markdown code fence if the model wrapped its JSON in one.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

pub fn interpret_reply(question: &str, slug: &str, reply: &str) -> ParseOutcome {
    match serde_json::from_str::<ParsedReply>(strip_code_fence(reply)) {
        Ok(parsed) => ParseOutcome::Parsed(QuestionContext {
            question: question.to_string(),
            slug: parsed.slug.unwrap_or_else(|| slug.to_string()),
            intent: parsed.intent,
            entities: parsed.entities,
            user_id: None,
        }),
        Err(err) => {
            warn!(%err, "NLU reply was not valid JSON, degrading");
            ParseOutcome::Degraded {
                context: QuestionContext::unknown(question, slug),
                raw: reply.to_string(),
            }
        }
    }
}

#[async_trait]
impl QuestionParser for LlmQuestionParser {
    async fn parse(&self, question: &str, slug: &str) -> ParseOutcome {
        let prompt = prompts::nlu(question, slug);
        match self.llm.complete(&prompt).await {
            Ok(reply) => interpret_reply(question, slug, &reply),
            Err(err) => {
                warn!(%err, "NLU request failed, degrading");
                ParseOutcome::Degraded {
                    context: QuestionContext::unknown(question, slug),
                    raw: err.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_json_parses() {
        let outcome = interpret_reply(
            "how are my ads?",
            "acme-roofing",
            r#"{"intent": "performance_review", "entities": ["ads"], "slug": "acme-roofing"}"#,
        );
        let ParseOutcome::Parsed(context) = outcome else {
            panic!("expected parsed outcome");
        };
        assert_eq!(context.intent, "performance_review");
        assert_eq!(context.entities, vec!["ads"]);
        assert_eq!(context.slug, "acme-roofing");
        assert_eq!(context.user_id, None);
    }

    #[test]
    fn fenced_json_parses() {
        let reply = "```json\n{\"intent\": \"budget_optimization\"}\n```";
        let context = interpret_reply("q", "acme-roofing", reply).into_context();
        assert_eq!(context.intent, "budget_optimization");
        assert!(context.entities.is_empty());
        // Missing slug falls back to the resolved one.
        assert_eq!(context.slug, "acme-roofing");
    }

    #[test]
    fn malformed_reply_degrades_and_keeps_raw() {
        let outcome = interpret_reply("q", "general", "Sure! Here is my analysis...");
        let ParseOutcome::Degraded { context, raw } = outcome else {
            panic!("expected degraded outcome");
        };
        assert_eq!(context.intent, "unknown");
        assert!(context.entities.is_empty());
        assert_eq!(context.slug, "general");
        assert_eq!(raw, "Sure! Here is my analysis...");
    }
}
