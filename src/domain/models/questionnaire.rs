//! Calibration questionnaire models.

use serde::{Deserialize, Serialize};

use crate::domain::models::feasibility::ConflictSeverity;

/// Question answer shape. Final questionnaire ordering is all single-choice
/// first, then multiple-choice, then open-ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    SingleChoice,
    MultipleChoice,
    OpenEnded,
}

impl QuestionType {
    /// Ordering rank for the type-ordering invariant.
    pub fn order_rank(self) -> u8 {
        match self {
            QuestionType::SingleChoice => 0,
            QuestionType::MultipleChoice => 1,
            QuestionType::OpenEnded => 2,
        }
    }
}

/// Question provenance class, used for the dynamic-trimming priority score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QuestionClass {
    /// Base question generated from the brief.
    #[default]
    Core,
    /// Derived from `design_challenge` / `core_tension` spectrum.
    Philosophy,
    /// Injected when the scenario classifies as a bidding strategy.
    Bidding,
    /// Derived from conflict detection; carries the conflict severity.
    Conflict(ConflictSeverity),
    /// Approach-level question.
    Approach,
    /// Exploratory question.
    Exploration,
}

impl QuestionClass {
    /// Trimming priority: critical conflict > high conflict > philosophy >
    /// approach > medium conflict > exploration. Higher keeps longer.
    pub fn priority_score(self) -> u8 {
        match self {
            QuestionClass::Conflict(ConflictSeverity::Critical) => 100,
            QuestionClass::Conflict(ConflictSeverity::High) => 90,
            QuestionClass::Bidding => 85,
            QuestionClass::Philosophy => 80,
            QuestionClass::Approach => 70,
            QuestionClass::Conflict(ConflictSeverity::Medium) => 60,
            QuestionClass::Conflict(ConflictSeverity::Low) => 55,
            QuestionClass::Core => 75,
            QuestionClass::Exploration => 50,
        }
    }
}

/// One questionnaire item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub text: String,
    pub question_type: QuestionType,

    /// Choice options; empty for open-ended questions.
    #[serde(default)]
    pub options: Vec<String>,

    #[serde(default)]
    pub class: QuestionClass,

    /// Keyword-overlap relevance against the original user input, 0..1.
    #[serde(default)]
    pub relevance: f64,
}

impl Question {
    pub fn open(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            question_type: QuestionType::OpenEnded,
            options: Vec::new(),
            class: QuestionClass::Core,
            relevance: 1.0,
        }
    }

    pub fn single_choice(
        id: impl Into<String>,
        text: impl Into<String>,
        options: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            question_type: QuestionType::SingleChoice,
            options,
            class: QuestionClass::Core,
            relevance: 1.0,
        }
    }

    pub fn multiple_choice(
        id: impl Into<String>,
        text: impl Into<String>,
        options: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            question_type: QuestionType::MultipleChoice,
            options,
            class: QuestionClass::Core,
            relevance: 1.0,
        }
    }

    pub fn with_class(mut self, class: QuestionClass) -> Self {
        self.class = class;
        self
    }
}

/// The generated calibration questionnaire, 7-10 items after trimming.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Questionnaire {
    #[serde(default)]
    pub introduction: String,

    pub questions: Vec<Question>,

    #[serde(default)]
    pub note: String,

    #[serde(default)]
    pub generation_rationale: String,
}

impl Questionnaire {
    /// Checks the type-ordering invariant: single < multiple < open across
    /// the question list.
    pub fn is_type_ordered(&self) -> bool {
        self.questions
            .windows(2)
            .all(|w| w[0].question_type.order_rank() <= w[1].question_type.order_rank())
    }
}

/// Normalized answer value. Multi-choice answers normalize to a list of
/// strings, single-choice to one string, open-ended to free text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Multi(Vec<String>),
    Text(String),
}

impl AnswerValue {
    pub fn as_text(&self) -> String {
        match self {
            AnswerValue::Multi(items) => items.join("、"),
            AnswerValue::Text(s) => s.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            AnswerValue::Multi(items) => items.iter().all(|s| s.trim().is_empty()),
            AnswerValue::Text(s) => s.trim().is_empty(),
        }
    }
}

/// One answered question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionAnswer {
    pub question_id: String,
    pub answer: AnswerValue,
}

/// Summary of the calibration round carried through the rest of the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct QuestionnaireSummary {
    pub answers: Vec<QuestionAnswer>,

    /// True when the user skipped the questionnaire.
    #[serde(default)]
    pub skipped: bool,

    #[serde(default)]
    pub summary_text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_ordering_invariant() {
        let q = Questionnaire {
            questions: vec![
                Question::single_choice("q1", "a?", vec!["x".into()]),
                Question::multiple_choice("q2", "b?", vec!["y".into()]),
                Question::open("q3", "c?"),
            ],
            ..Default::default()
        };
        assert!(q.is_type_ordered());

        let bad = Questionnaire {
            questions: vec![
                Question::open("q1", "a?"),
                Question::single_choice("q2", "b?", vec!["x".into()]),
            ],
            ..Default::default()
        };
        assert!(!bad.is_type_ordered());
    }

    #[test]
    fn test_priority_score_ordering() {
        assert!(
            QuestionClass::Conflict(ConflictSeverity::Critical).priority_score()
                > QuestionClass::Conflict(ConflictSeverity::High).priority_score()
        );
        assert!(
            QuestionClass::Conflict(ConflictSeverity::High).priority_score()
                > QuestionClass::Philosophy.priority_score()
        );
        assert!(
            QuestionClass::Philosophy.priority_score() > QuestionClass::Approach.priority_score()
        );
        assert!(
            QuestionClass::Approach.priority_score()
                > QuestionClass::Conflict(ConflictSeverity::Medium).priority_score()
        );
        assert!(
            QuestionClass::Conflict(ConflictSeverity::Medium).priority_score()
                > QuestionClass::Exploration.priority_score()
        );
    }

    #[test]
    fn test_answer_value_normalization() {
        let multi = AnswerValue::Multi(vec!["a".into(), "b".into()]);
        assert_eq!(multi.as_text(), "a、b");
        assert!(!multi.is_empty());
        assert!(AnswerValue::Text("  ".into()).is_empty());
    }
}
