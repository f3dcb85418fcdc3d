//! Role and task-instruction models.
//!
//! A role is one expert slot in the catalog. Its `base_type` (V2..V6) drives
//! the fixed dependency DAG used by the batch scheduler, and its
//! `task_instruction` carries the deliverables the project director assigned.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed role-family tag driving the dependency class.
///
/// V4 = research, V5 = scenario, V3 = narrative, V2 = design director,
/// V6 = chief engineer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BaseType {
    V2,
    V3,
    V4,
    V5,
    V6,
}

impl BaseType {
    /// Base types this family depends on, per the client contract:
    /// `V4 -> {}`, `V5 -> {V4}`, `V3 -> {V4, V5}`, `V2 -> {V3, V4, V5}`,
    /// `V6 -> {V2}`.
    pub fn dependencies(self) -> &'static [BaseType] {
        match self {
            BaseType::V4 => &[],
            BaseType::V5 => &[BaseType::V4],
            BaseType::V3 => &[BaseType::V4, BaseType::V5],
            BaseType::V2 => &[BaseType::V3, BaseType::V4, BaseType::V5],
            BaseType::V6 => &[BaseType::V2],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BaseType::V2 => "V2",
            BaseType::V3 => "V3",
            BaseType::V4 => "V4",
            BaseType::V5 => "V5",
            BaseType::V6 => "V6",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "V2" => Some(BaseType::V2),
            "V3" => Some(BaseType::V3),
            "V4" => Some(BaseType::V4),
            "V5" => Some(BaseType::V5),
            "V6" => Some(BaseType::V6),
            _ => None,
        }
    }

    /// All base types, in catalog order.
    pub fn all() -> &'static [BaseType] {
        &[
            BaseType::V2,
            BaseType::V3,
            BaseType::V4,
            BaseType::V5,
            BaseType::V6,
        ]
    }

    /// Extract the base type from a full role id such as `V2_设计总监_2-1`.
    pub fn from_role_id(role_id: &str) -> Option<Self> {
        role_id.split('_').next().and_then(Self::parse)
    }
}

impl fmt::Display for BaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deliverable priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

/// One output item assigned to exactly one role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliverableSpec {
    /// Deliverable identifier; normalizes to short form (`2-1`) for
    /// cross-referencing with search queries and concept-image configs.
    pub id: String,

    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Output format: `analysis`, `narrative`, `strategy`, ...
    #[serde(default = "default_format")]
    pub format: String,

    #[serde(default)]
    pub priority: Priority,

    #[serde(default)]
    pub success_criteria: Vec<String>,

    /// Optional hint from the requirements analyst about who should own this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deliverable_owner_suggestion: Option<String>,

    /// Anti-pattern rules declared inline by the requirements analyst.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub anti_patterns: Vec<String>,

    /// Set by the capability boundary service when the deliverable type is
    /// outside the declared allowlist. The deliverable stays assigned.
    #[serde(default)]
    pub capability_limited: bool,

    /// Transformation note attached alongside `capability_limited`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability_note: Option<String>,
}

fn default_format() -> String {
    "analysis".to_string()
}

impl DeliverableSpec {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            format: default_format(),
            priority: Priority::Medium,
            success_criteria: Vec::new(),
            deliverable_owner_suggestion: None,
            anti_patterns: Vec::new(),
            capability_limited: false,
            capability_note: None,
        }
    }

    /// Short form of the deliverable id: `V2_设计总监_2-1` and `2-1` both
    /// normalize to `2-1`.
    pub fn short_id(&self) -> String {
        short_deliverable_id(&self.id)
    }
}

/// Normalize a deliverable or role id to its trailing catalog slot (`2-1`).
pub fn short_deliverable_id(id: &str) -> String {
    id.rsplit('_').next().unwrap_or(id).to_string()
}

/// The task package one role carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TaskInstruction {
    #[serde(default)]
    pub objective: String,

    #[serde(default)]
    pub deliverables: Vec<DeliverableSpec>,

    #[serde(default)]
    pub success_criteria: Vec<String>,

    #[serde(default)]
    pub constraints: Vec<String>,

    #[serde(default)]
    pub context_requirements: Vec<String>,

    #[serde(default)]
    pub is_creative_narrative: bool,
}

/// An expert role as declared in the on-disk catalog plus any dynamic
/// adjustments made by the project director.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    /// Full role id of the form `<base_type>_<human_name>_<n-m>`.
    pub role_id: String,

    pub base_type: BaseType,

    pub role_name: String,

    /// Project-specific name the director gave this instance.
    #[serde(default)]
    pub dynamic_role_name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub keywords: Vec<String>,

    /// Project scopes this role applies to; empty means unrestricted.
    #[serde(default)]
    pub applicable_scope: Vec<String>,

    #[serde(default)]
    pub system_prompt: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_instruction: Option<TaskInstruction>,
}

impl Role {
    /// Catalog slot suffix (`2-1`) of this role's id.
    pub fn slot(&self) -> String {
        short_deliverable_id(&self.role_id)
    }

    /// Number of deliverables currently assigned.
    pub fn deliverable_count(&self) -> usize {
        self.task_instruction
            .as_ref()
            .map_or(0, |t| t.deliverables.len())
    }

    /// Whether this role applies to the given project scope. An empty
    /// `applicable_scope` list means the role is unrestricted.
    pub fn applies_to(&self, project_scope: &str) -> bool {
        self.applicable_scope.is_empty()
            || self
                .applicable_scope
                .iter()
                .any(|s| s == project_scope || project_scope.contains(s.as_str()))
    }
}

/// Output of the project director's selection step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RoleSelection {
    pub selected_roles: Vec<Role>,
    #[serde(default)]
    pub reasoning: String,
}

impl RoleSelection {
    pub fn role_ids(&self) -> Vec<String> {
        self.selected_roles.iter().map(|r| r.role_id.clone()).collect()
    }

    pub fn has_base_type(&self, base: BaseType) -> bool {
        self.selected_roles.iter().any(|r| r.base_type == base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_type_dependencies() {
        assert!(BaseType::V4.dependencies().is_empty());
        assert_eq!(BaseType::V5.dependencies(), &[BaseType::V4]);
        assert_eq!(BaseType::V6.dependencies(), &[BaseType::V2]);
        assert_eq!(
            BaseType::V2.dependencies(),
            &[BaseType::V3, BaseType::V4, BaseType::V5]
        );
    }

    #[test]
    fn test_base_type_from_role_id() {
        assert_eq!(BaseType::from_role_id("V2_设计总监_2-1"), Some(BaseType::V2));
        assert_eq!(BaseType::from_role_id("V4_研究员_4-2"), Some(BaseType::V4));
        assert_eq!(BaseType::from_role_id("bogus"), None);
    }

    #[test]
    fn test_short_deliverable_id() {
        assert_eq!(short_deliverable_id("V2_设计总监_2-1"), "2-1");
        assert_eq!(short_deliverable_id("2-1"), "2-1");
    }

    #[test]
    fn test_role_applies_to_scope() {
        let mut role = Role {
            role_id: "V4_研究员_4-1".to_string(),
            base_type: BaseType::V4,
            role_name: "研究员".to_string(),
            dynamic_role_name: String::new(),
            description: String::new(),
            keywords: vec![],
            applicable_scope: vec![],
            system_prompt: String::new(),
            task_instruction: None,
        };
        assert!(role.applies_to("residential"));

        role.applicable_scope = vec!["hospitality".to_string()];
        assert!(!role.applies_to("residential"));
        assert!(role.applies_to("hospitality"));
    }

    #[test]
    fn test_priority_serde_lowercase() {
        let p: Priority = serde_json::from_str("\"high\"").unwrap();
        assert_eq!(p, Priority::High);
        assert_eq!(serde_json::to_string(&Priority::Low).unwrap(), "\"low\"");
    }
}
