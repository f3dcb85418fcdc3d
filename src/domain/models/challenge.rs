//! Challenge flags and their closure records.
//!
//! Experts may formally contest a prior stage's assumption by emitting a
//! `challenge_flags` entry. Every detected challenge closes through exactly
//! one of three paths: accept (reinterpret), synthesize (competing
//! frameworks), or escalate to the user.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A challenge emitted by an expert inside its output protocol block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChallengeFlag {
    /// Role id of the challenging expert.
    #[serde(default)]
    pub expert_role: String,

    /// The prior-stage assumption being contested.
    pub challenged_item: String,

    #[serde(default)]
    pub rationale: String,

    /// The expert's proposed reinterpretation.
    #[serde(default)]
    pub reinterpretation: String,

    #[serde(default)]
    pub design_impact: String,
}

impl ChallengeFlag {
    /// Heuristic: does the stated impact read as high/fundamental? Drives
    /// the feedback-loop routing for accepted reinterpretations.
    pub fn is_high_impact(&self) -> bool {
        let text = self.design_impact.to_lowercase();
        ["high", "fundamental", "重大", "根本", "核心"]
            .iter()
            .any(|m| text.contains(m))
    }
}

/// Classification of a challenge; first match wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeClass {
    /// Default: accepted as an expert-driven insight.
    Reinterpret,
    /// A user-facing interpretation is contested with uncertainty markers.
    ContestPersona,
    /// Two or more experts contest the same item with divergent frames.
    CompetingFramework,
    /// The expert disclaims competence; a product decision for the client.
    OutOfScopeForClient,
}

/// Accepted reinterpretation, keyed by challenged item in session state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptedInsight {
    pub accepted_from: String,
    pub expert_reinterpretation: String,
    pub design_impact: String,
    pub timestamp: DateTime<Utc>,
}

/// One competing frame inside a synthesis record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompetingFrame {
    pub expert_role: String,
    pub reinterpretation: String,
    #[serde(default)]
    pub rationale: String,
}

/// Synthesis of divergent frames on the same challenged item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameworkSynthesis {
    pub challenged_item: String,
    pub frames: Vec<CompetingFrame>,
    pub synthesis: String,
    #[serde(default)]
    pub recommendation: String,
    pub timestamp: DateTime<Utc>,
}

/// A challenge routed to the user for a ruling at the review stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalatedChallenge {
    pub flag: ChallengeFlag,
    pub class: ChallengeClass,
    /// Filled in once the user rules on the escalation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ruling: Option<String>,
}

/// Append-only log entry recording an insight write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightUpdate {
    pub challenged_item: String,
    pub source_expert: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_high_impact_heuristic() {
        let flag = ChallengeFlag {
            expert_role: "V4_研究员_4-1".into(),
            challenged_item: "核心场景优先级".into(),
            rationale: String::new(),
            reinterpretation: "以家庭聚会为核心".into(),
            design_impact: "对空间布局有重大影响".into(),
        };
        assert!(flag.is_high_impact());

        let mild = ChallengeFlag {
            design_impact: "局部材质微调".into(),
            ..flag
        };
        assert!(!mild.is_high_impact());
    }
}
