use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;

use crate::completion::{CompletionModel, Message};

/// Post-processing annotations generated after a document reaches READY.
#[derive(Debug, Clone)]
pub struct Briefing {
    pub summary: String,
    pub key_topics: Vec<String>,
    pub suggested_questions: Vec<String>,
}

#[derive(Deserialize)]
struct BriefingPayload {
    summary: String,
    #[serde(default)]
    key_topics: Vec<String>,
    #[serde(default)]
    suggested_questions: Vec<String>,
}

/// Best-effort briefing generation through the completion model.
///
/// Briefing is degraded functionality, never a failure: when the model is
/// unavailable or returns garbage, a fallback derived from a text preview
/// is substituted and the document stays READY.
pub struct BriefingGenerator {
    completion_model: Arc<dyn CompletionModel>,
    max_input_chars: usize,
}

impl BriefingGenerator {
    pub fn new(completion_model: Arc<dyn CompletionModel>, max_input_chars: usize) -> Self {
        Self {
            completion_model,
            max_input_chars,
        }
    }

    /// Generate a briefing for a document. Never errors.
    pub async fn generate(&self, filename: &str, text: &str) -> Briefing {
        let excerpt = truncate_chars(text, self.max_input_chars);
        let messages = vec![
            Message {
                role: "system".to_string(),
                content: "You summarize documents for a project knowledge base. \
                          Respond with a JSON object containing: summary (2-3 sentences), \
                          key_topics (3-5 short strings), suggested_questions (3 questions \
                          the document can answer). Respond with JSON only."
                    .to_string(),
            },
            Message {
                role: "user".to_string(),
                content: format!("Document \"{filename}\":\n\n{excerpt}"),
            },
        ];

        match self.completion_model.complete(&messages, None, None).await {
            Ok(result) => match parse_briefing(&result.content) {
                Some(briefing) => briefing,
                None => {
                    warn!("Briefing response for {filename} was not valid JSON, using fallback");
                    fallback_briefing(filename, text)
                }
            },
            Err(e) => {
                warn!("Briefing generation for {filename} failed, using fallback: {e}");
                fallback_briefing(filename, text)
            }
        }
    }
}

/// Parse the model response, tolerating markdown code fences.
fn parse_briefing(content: &str) -> Option<Briefing> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|s| s.trim_end_matches("```"))
        .unwrap_or(trimmed);

    let payload: BriefingPayload = serde_json::from_str(body.trim()).ok()?;
    if payload.summary.trim().is_empty() {
        return None;
    }
    Some(Briefing {
        summary: payload.summary,
        key_topics: payload.key_topics,
        suggested_questions: payload.suggested_questions,
    })
}

/// Fallback briefing built from a preview of the document text.
pub fn fallback_briefing(filename: &str, text: &str) -> Briefing {
    let preview = truncate_chars(text.trim(), 280);
    let summary = if preview.is_empty() {
        format!("\"{filename}\" was ingested but no preview is available.")
    } else {
        format!("Automatic summary unavailable. \"{filename}\" begins: {preview}")
    };
    Briefing {
        summary,
        key_topics: vec!["(summary unavailable)".to_string()],
        suggested_questions: vec![format!("What does \"{filename}\" cover?")],
    }
}

/// Truncate at a char boundary without splitting a code point.
fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::CompletionResult;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct StubCompletion {
        response: String,
        fail: AtomicBool,
    }

    #[async_trait]
    impl CompletionModel for StubCompletion {
        async fn complete(
            &self,
            _messages: &[Message],
            _max_tokens: Option<u32>,
            _temperature: Option<f64>,
        ) -> anyhow::Result<CompletionResult> {
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("model unavailable");
            }
            Ok(CompletionResult {
                content: self.response.clone(),
                usage: None,
            })
        }
    }

    #[test]
    fn test_parse_briefing_plain_json() {
        let briefing = parse_briefing(
            r#"{"summary": "A doc.", "key_topics": ["a"], "suggested_questions": ["q?"]}"#,
        )
        .unwrap();
        assert_eq!(briefing.summary, "A doc.");
        assert_eq!(briefing.key_topics, vec!["a"]);
    }

    #[test]
    fn test_parse_briefing_with_code_fence() {
        let content = "```json\n{\"summary\": \"Fenced.\"}\n```";
        let briefing = parse_briefing(content).unwrap();
        assert_eq!(briefing.summary, "Fenced.");
        assert!(briefing.key_topics.is_empty());
    }

    #[test]
    fn test_parse_briefing_rejects_garbage() {
        assert!(parse_briefing("not json at all").is_none());
        assert!(parse_briefing(r#"{"summary": "  "}"#).is_none());
    }

    #[test]
    fn test_fallback_contains_preview() {
        let briefing = fallback_briefing("notes.txt", "The quick brown fox.");
        assert!(briefing.summary.contains("The quick brown fox."));
        assert!(briefing.summary.contains("unavailable"));
        assert!(!briefing.key_topics.is_empty());
        assert!(!briefing.suggested_questions.is_empty());
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let text = "héllo wörld";
        let truncated = truncate_chars(text, 4);
        assert_eq!(truncated, "héll");
    }

    #[tokio::test]
    async fn test_generate_uses_model_response() {
        let model = Arc::new(StubCompletion {
            response: r#"{"summary": "From the model.", "key_topics": ["x"], "suggested_questions": []}"#.to_string(),
            fail: AtomicBool::new(false),
        });
        let generator = BriefingGenerator::new(model, 1000);
        let briefing = generator.generate("doc.txt", "body text").await;
        assert_eq!(briefing.summary, "From the model.");
    }

    #[tokio::test]
    async fn test_generate_falls_back_on_model_failure() {
        let model = Arc::new(StubCompletion {
            response: String::new(),
            fail: AtomicBool::new(true),
        });
        let generator = BriefingGenerator::new(model, 1000);
        let briefing = generator.generate("doc.txt", "body text").await;
        assert!(briefing.summary.contains("unavailable"));
    }
}
