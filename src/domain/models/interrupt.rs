//! The interrupt/resume wire contract.
//!
//! A suspension emits an `InterruptPayload`; the next invocation for the
//! same session carries a `ResumeValue`, which the intent parser normalizes
//! into one of six canonical intents.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::domain::models::questionnaire::QuestionAnswer;

/// The decision being requested from the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionType {
    RequirementsConfirmation,
    CalibrationQuestionnaire,
    RoleAndTaskUnifiedReview,
    QualityPreflightWarning,
    AnalysisReview,
    UserQuestion,
}

/// Payload returned to the caller when the session suspends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterruptPayload {
    pub interaction_type: InteractionType,

    /// Human-readable prompt.
    pub message: String,

    /// Type-specific body, e.g. `requirements_summary`, `questionnaire`,
    /// `role_selection` + `task_assignment` + `tool_settings`.
    #[serde(default)]
    pub body: serde_json::Value,

    /// Option-key to label map; the actions the client UI must offer.
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl InterruptPayload {
    pub fn new(interaction_type: InteractionType, message: impl Into<String>) -> Self {
        Self {
            interaction_type,
            message: message.into(),
            body: serde_json::Value::Null,
            options: BTreeMap::new(),
        }
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = body;
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, label: impl Into<String>) -> Self {
        self.options.insert(key.into(), label.into());
        self
    }
}

/// Structured resume command body (JSON-object form).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ResumeCommand {
    /// `action` and `intent` are accepted interchangeably.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modifications: Option<BTreeMap<String, serde_json::Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_info: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answers: Option<Vec<QuestionAnswer>>,

    /// Per-role tool enablement adjustments from the unified review gate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_settings: Option<BTreeMap<String, bool>>,
}

impl ResumeCommand {
    /// `action` wins over `intent` when both are present.
    pub fn intent_text(&self) -> Option<&str> {
        self.action.as_deref().or(self.intent.as_deref())
    }
}

/// Heterogeneous resume value, normalized by the intent parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResumeValue {
    /// List of questionnaire answers.
    Answers(Vec<QuestionAnswer>),
    /// JSON-object command.
    Command(ResumeCommand),
    /// Plain string: a canonical intent word or free text.
    Text(String),
}

impl ResumeValue {
    pub fn text(s: impl Into<String>) -> Self {
        ResumeValue::Text(s.into())
    }

    pub fn approve() -> Self {
        ResumeValue::Text("approve".to_string())
    }
}

/// The fixed intent set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Approve,
    Modify,
    Add,
    Skip,
    Revise,
    Reject,
}

impl Intent {
    pub fn as_str(self) -> &'static str {
        match self {
            Intent::Approve => "approve",
            Intent::Modify => "modify",
            Intent::Add => "add",
            Intent::Skip => "skip",
            Intent::Revise => "revise",
            Intent::Reject => "reject",
        }
    }

    pub fn parse_exact(s: &str) -> Option<Self> {
        match s {
            "approve" => Some(Intent::Approve),
            "modify" => Some(Intent::Modify),
            "add" => Some(Intent::Add),
            "skip" => Some(Intent::Skip),
            "revise" => Some(Intent::Revise),
            "reject" => Some(Intent::Reject),
            _ => None,
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parser output: intent plus residual free-text content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedIntent {
    pub intent: Intent,
    /// 1.0 for canonical strings; lower for heuristic matches.
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<ResumeCommand>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::questionnaire::AnswerValue;

    #[test]
    fn test_resume_value_untagged_parsing() {
        let v: ResumeValue = serde_json::from_str("\"approve\"").unwrap();
        assert_eq!(v, ResumeValue::Text("approve".to_string()));

        let v: ResumeValue =
            serde_json::from_str(r#"{"action": "modify", "feedback": "更紧凑"}"#).unwrap();
        match v {
            ResumeValue::Command(cmd) => {
                assert_eq!(cmd.intent_text(), Some("modify"));
                assert_eq!(cmd.feedback.as_deref(), Some("更紧凑"));
            }
            other => panic!("expected command, got {other:?}"),
        }

        let v: ResumeValue =
            serde_json::from_str(r#"[{"question_id": "q1", "answer": "现代极简"}]"#).unwrap();
        match v {
            ResumeValue::Answers(answers) => {
                assert_eq!(answers.len(), 1);
                assert_eq!(answers[0].answer, AnswerValue::Text("现代极简".into()));
            }
            other => panic!("expected answers, got {other:?}"),
        }
    }

    #[test]
    fn test_intent_round_trip_strings() {
        for s in ["approve", "modify", "add", "skip", "revise", "reject"] {
            let intent = Intent::parse_exact(s).unwrap();
            assert_eq!(intent.as_str(), s);
        }
    }

    #[test]
    fn test_action_wins_over_intent() {
        let cmd = ResumeCommand {
            action: Some("approve".into()),
            intent: Some("reject".into()),
            ..Default::default()
        };
        assert_eq!(cmd.intent_text(), Some("approve"));
    }
}
