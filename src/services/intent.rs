//! Intent parser: normalizes heterogeneous resume values (free text,
//! button actions, JSON commands, questionnaire answers) onto the fixed
//! intent set.
//!
//! Canonical intent strings parse with confidence 1.0. Everything else
//! goes through keyword matching, then optional model classification,
//! then an approve fallback for short ambiguous input.

use std::sync::Arc;
use tracing::debug;

use crate::domain::models::interrupt::{Intent, ParsedIntent, ResumeValue};
use crate::domain::ports::{ChatModel, ChatRequest};
use crate::services::output;

/// Keyword tables checked in order; the order matters because several
/// rejection phrases contain approval substrings ("不同意" vs "同意").
const KEYWORD_TABLE: [(Intent, &[&str]); 6] = [
    (Intent::Skip, &["skip", "跳过", "略过", "不用问"]),
    (Intent::Reject, &["reject", "拒绝", "不同意", "否决", "不行"]),
    (Intent::Revise, &["revise", "重新分析", "重做", "推倒重来"]),
    (Intent::Add, &["add", "补充", "添加", "增加", "加上"]),
    (Intent::Modify, &["modify", "修改", "调整", "改成", "变更"]),
    (
        Intent::Approve,
        &["approve", "确认", "同意", "没问题", "可以", "好的", "继续", "ok", "yes"],
    ),
];

/// Inputs at or below this length with no keyword hit are treated as a
/// low-confidence approve.
const SHORT_AMBIGUOUS_CHARS: usize = 6;

pub struct IntentParser {
    model: Option<Arc<dyn ChatModel>>,
}

impl IntentParser {
    pub fn new() -> Self {
        Self { model: None }
    }

    pub fn with_model(model: Arc<dyn ChatModel>) -> Self {
        Self { model: Some(model) }
    }

    /// Normalize a resume value to a parsed intent.
    pub async fn parse(&self, value: &ResumeValue) -> ParsedIntent {
        match value {
            ResumeValue::Command(cmd) => {
                let mut parsed = self.parse_text(cmd.intent_text().unwrap_or("approve")).await;
                parsed.command = Some(cmd.clone());
                parsed
            }
            // Answer lists carry no intent of their own; submitting answers
            // is an implicit approve of the questionnaire gate.
            ResumeValue::Answers(_) => ParsedIntent {
                intent: Intent::Approve,
                confidence: 1.0,
                content: None,
                command: None,
            },
            ResumeValue::Text(text) => self.parse_text(text).await,
        }
    }

    /// Parse a plain string to intent plus residual content.
    pub async fn parse_text(&self, text: &str) -> ParsedIntent {
        let normalized = text.trim().to_lowercase();

        if let Some(intent) = Intent::parse_exact(&normalized) {
            return ParsedIntent {
                intent,
                confidence: 1.0,
                content: None,
                command: None,
            };
        }

        for (intent, keywords) in KEYWORD_TABLE {
            if keywords.iter().any(|k| normalized.contains(k)) {
                return ParsedIntent {
                    intent,
                    confidence: 0.8,
                    content: Some(text.trim().to_string()),
                    command: None,
                };
            }
        }

        if let Some(model) = &self.model {
            if let Some(intent) = classify_with_model(model.as_ref(), text).await {
                return ParsedIntent {
                    intent,
                    confidence: 0.7,
                    content: Some(text.trim().to_string()),
                    command: None,
                };
            }
        }

        if normalized.chars().count() <= SHORT_AMBIGUOUS_CHARS {
            debug!(input = %text, "short ambiguous input, defaulting to approve");
            return ParsedIntent {
                intent: Intent::Approve,
                confidence: 0.5,
                content: None,
                command: None,
            };
        }

        // Substantive free text with no recognizable action keyword is
        // treated as a modification request carrying the text.
        ParsedIntent {
            intent: Intent::Modify,
            confidence: 0.5,
            content: Some(text.trim().to_string()),
            command: None,
        }
    }
}

impl Default for IntentParser {
    fn default() -> Self {
        Self::new()
    }
}

async fn classify_with_model(model: &dyn ChatModel, text: &str) -> Option<Intent> {
    let request = ChatRequest::new(
        "把用户回复归类为以下意图之一，只输出 JSON：{\"intent\": \"approve|modify|add|skip|revise|reject\"}",
        text,
    )
    .with_max_tokens(64);

    let response = model.complete(request).await.ok()?;
    let value = output::extract_json(&response.content)?;
    Intent::parse_exact(value.get("intent")?.as_str()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::interrupt::ResumeCommand;

    #[tokio::test]
    async fn test_canonical_strings_have_full_confidence() {
        let parser = IntentParser::new();
        for (text, intent) in [
            ("approve", Intent::Approve),
            ("modify", Intent::Modify),
            ("add", Intent::Add),
            ("skip", Intent::Skip),
            ("revise", Intent::Revise),
            ("reject", Intent::Reject),
        ] {
            let parsed = parser.parse_text(text).await;
            assert_eq!(parsed.intent, intent);
            assert!((parsed.confidence - 1.0).abs() < f64::EPSILON);
        }
    }

    #[tokio::test]
    async fn test_rejection_wins_over_embedded_approval_keyword() {
        let parser = IntentParser::new();
        let parsed = parser.parse_text("我不同意这个方案").await;
        assert_eq!(parsed.intent, Intent::Reject);
    }

    #[tokio::test]
    async fn test_chinese_confirmation_keywords() {
        let parser = IntentParser::new();
        assert_eq!(parser.parse_text("确认，开始吧").await.intent, Intent::Approve);
        assert_eq!(parser.parse_text("帮我修改一下预算部分").await.intent, Intent::Modify);
        assert_eq!(parser.parse_text("跳过问卷").await.intent, Intent::Skip);
    }

    #[tokio::test]
    async fn test_short_ambiguous_defaults_to_approve() {
        let parser = IntentParser::new();
        let parsed = parser.parse_text("嗯嗯").await;
        assert_eq!(parsed.intent, Intent::Approve);
        assert!(parsed.confidence < 1.0);
    }

    #[tokio::test]
    async fn test_long_unmatched_text_becomes_modify_with_content() {
        let parser = IntentParser::new();
        let parsed = parser
            .parse_text("其实我们家还有一只大型犬，活动空间要留出来")
            .await;
        assert_eq!(parsed.intent, Intent::Modify);
        assert!(parsed.content.is_some());
    }

    #[tokio::test]
    async fn test_command_action_wins() {
        let parser = IntentParser::new();
        let cmd = ResumeCommand {
            action: Some("approve".to_string()),
            ..Default::default()
        };
        let parsed = parser.parse(&ResumeValue::Command(cmd)).await;
        assert_eq!(parsed.intent, Intent::Approve);
        assert!(parsed.command.is_some());
    }

    #[tokio::test]
    async fn test_answer_list_is_implicit_approve() {
        let parser = IntentParser::new();
        let parsed = parser.parse(&ResumeValue::Answers(Vec::new())).await;
        assert_eq!(parsed.intent, Intent::Approve);
    }
}
