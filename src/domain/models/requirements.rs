//! Structured requirements extracted from the raw design brief.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Two extreme poles of the design challenge plus intermediate stances the
/// calibration questionnaire offers the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DesignChallengeSpectrum {
    #[serde(default)]
    pub pole_a: String,
    #[serde(default)]
    pub pole_b: String,
    #[serde(default)]
    pub intermediate_stances: Vec<String>,
}

/// Handoff block the requirements analyst prepares for downstream experts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ExpertHandoff {
    #[serde(default)]
    pub design_challenge_spectrum: DesignChallengeSpectrum,

    /// Critical questions keyed by expert role family; experts' answers land
    /// in `expert_handoff_response.critical_questions_responses`.
    #[serde(default)]
    pub critical_questions_for_experts: BTreeMap<String, Vec<String>>,
}

/// The structured brief produced by the requirements analyst.
///
/// The analyst re-produces the full structure whenever the user amends the
/// brief at the confirmation gate; partial updates are not supported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StructuredRequirements {
    #[serde(default)]
    pub project_task: String,

    #[serde(default)]
    pub project_type: String,

    #[serde(default)]
    pub project_overview: String,

    #[serde(default)]
    pub core_objectives: Vec<String>,

    #[serde(default)]
    pub narrative_characters: Vec<String>,

    #[serde(default)]
    pub physical_contexts: Vec<String>,

    #[serde(default)]
    pub design_challenge: String,

    #[serde(default)]
    pub core_tension: String,

    #[serde(default)]
    pub resource_constraints: Vec<String>,

    #[serde(default)]
    pub constraints_opportunities: Vec<String>,

    #[serde(default)]
    pub expert_handoff: ExpertHandoff,
}

impl StructuredRequirements {
    /// Short project scope tag used to filter the role catalog.
    pub fn project_scope(&self) -> &str {
        if self.project_type.is_empty() {
            "general"
        } else {
            &self.project_type
        }
    }

    /// A compact one-paragraph summary used in prompts and confirmation
    /// payloads.
    pub fn summary(&self) -> String {
        let mut parts = vec![self.project_task.clone()];
        if !self.design_challenge.is_empty() {
            parts.push(format!("挑战: {}", self.design_challenge));
        }
        if !self.core_tension.is_empty() {
            parts.push(format!("张力: {}", self.core_tension));
        }
        if !self.core_objectives.is_empty() {
            parts.push(format!("目标: {}", self.core_objectives.join("、")));
        }
        parts.retain(|p| !p.is_empty());
        parts.join(" | ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_scope_defaults_to_general() {
        let req = StructuredRequirements::default();
        assert_eq!(req.project_scope(), "general");
    }

    #[test]
    fn test_summary_skips_empty_sections() {
        let req = StructuredRequirements {
            project_task: "200㎡住宅设计".to_string(),
            core_tension: "预算与品质".to_string(),
            ..Default::default()
        };
        let s = req.summary();
        assert!(s.contains("200㎡住宅设计"));
        assert!(s.contains("预算与品质"));
        assert!(!s.contains("目标"));
    }
}
