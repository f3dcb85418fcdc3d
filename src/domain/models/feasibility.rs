//! Feasibility assessment models: conflict detection, priority matrix, and
//! adjustment recommendations.

use serde::{Deserialize, Serialize};

/// Overall feasibility verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FeasibilityLevel {
    High,
    #[default]
    Medium,
    Low,
}

/// Conflict severity grading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictSeverity {
    Critical,
    High,
    Medium,
    Low,
}

/// Constraint domain a conflict belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictDomain {
    Budget,
    Timeline,
    Space,
}

impl ConflictDomain {
    pub fn all() -> &'static [ConflictDomain] {
        &[
            ConflictDomain::Budget,
            ConflictDomain::Timeline,
            ConflictDomain::Space,
        ]
    }
}

/// A detected conflict within one constraint domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub detected: bool,
    pub severity: ConflictSeverity,
    pub description: String,
    #[serde(default)]
    pub details: String,
}

/// Conflicts grouped per constraint domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ConflictDetection {
    #[serde(default)]
    pub budget_conflicts: Vec<Conflict>,
    #[serde(default)]
    pub timeline_conflicts: Vec<Conflict>,
    #[serde(default)]
    pub space_conflicts: Vec<Conflict>,
}

impl ConflictDetection {
    pub fn domain(&self, domain: ConflictDomain) -> &[Conflict] {
        match domain {
            ConflictDomain::Budget => &self.budget_conflicts,
            ConflictDomain::Timeline => &self.timeline_conflicts,
            ConflictDomain::Space => &self.space_conflicts,
        }
    }

    pub fn domain_mut(&mut self, domain: ConflictDomain) -> &mut Vec<Conflict> {
        match domain {
            ConflictDomain::Budget => &mut self.budget_conflicts,
            ConflictDomain::Timeline => &mut self.timeline_conflicts,
            ConflictDomain::Space => &mut self.space_conflicts,
        }
    }

    /// Iterator over `(domain, conflict)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (ConflictDomain, &Conflict)> {
        ConflictDomain::all()
            .iter()
            .flat_map(move |d| self.domain(*d).iter().map(move |c| (*d, c)))
    }

    pub fn has_critical(&self) -> bool {
        self.iter()
            .any(|(_, c)| c.detected && c.severity == ConflictSeverity::Critical)
    }
}

/// One row of the priority matrix, sorted descending by `priority_score`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityEntry {
    pub requirement: String,
    /// Normalized 0..1 priority.
    pub priority_score: f64,
    #[serde(default)]
    pub estimated_cost: String,
}

/// One adjustment recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub name: String,
    pub strategy: String,
    #[serde(default)]
    pub adjustments: Vec<String>,
    #[serde(default)]
    pub recommended: bool,
}

/// Feasibility analyst output. Never fails the pipeline; a missing knowledge
/// base yields `FeasibilityAssessment::empty()` plus a logged warning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FeasibilityAssessment {
    #[serde(default)]
    pub overall_feasibility: FeasibilityLevel,

    #[serde(default)]
    pub critical_issues: Vec<String>,

    #[serde(default)]
    pub conflict_detection: ConflictDetection,

    #[serde(default)]
    pub priority_matrix: Vec<PriorityEntry>,

    #[serde(default)]
    pub recommendations: Vec<Recommendation>,
}

impl FeasibilityAssessment {
    /// Empty assessment used when the industry-standards table is missing.
    pub fn empty() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_iteration_covers_all_domains() {
        let mut detection = ConflictDetection::default();
        detection.budget_conflicts.push(Conflict {
            detected: true,
            severity: ConflictSeverity::High,
            description: "budget gap".into(),
            details: String::new(),
        });
        detection.space_conflicts.push(Conflict {
            detected: true,
            severity: ConflictSeverity::Critical,
            description: "space too small".into(),
            details: String::new(),
        });

        let pairs: Vec<_> = detection.iter().collect();
        assert_eq!(pairs.len(), 2);
        assert!(detection.has_critical());
    }

    #[test]
    fn test_severity_serde() {
        let s: ConflictSeverity = serde_json::from_str("\"critical\"").unwrap();
        assert_eq!(s, ConflictSeverity::Critical);
    }
}
