//! Allocation constraint catalog.
//!
//! Per-deliverable-type rules loaded from YAML: `must_include` /
//! `must_exclude` role prefixes are hard errors, oversize role counts are
//! warnings. Anti-pattern arrays declared inline on a deliverable are
//! applied against the deliverable's owner.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::role::{DeliverableSpec, Role};

/// Rule for one deliverable type.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AllocationRule {
    /// Role-id prefixes that must be present in the selection.
    #[serde(default)]
    pub must_include: Vec<String>,

    /// Role-id prefixes that must not appear in the selection.
    #[serde(default)]
    pub must_exclude: Vec<String>,

    #[serde(default)]
    pub optional: Vec<String>,

    #[serde(default)]
    pub reason: String,
}

/// Result of an allocation validation pass.
#[derive(Debug, Clone, Default)]
pub struct AllocationCheck {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl AllocationCheck {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Maximum role count before the oversize warning fires.
const MAX_ROLES_BEFORE_WARNING: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConstraintCatalog {
    /// Rules keyed by deliverable type (the `format` field).
    #[serde(default)]
    pub rules: BTreeMap<String, AllocationRule>,
}

impl ConstraintCatalog {
    pub fn load_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            EngineError::ContractViolation(format!(
                "cannot read constraint catalog {}: {e}",
                path.display()
            ))
        })?;
        serde_yaml::from_str(&text).map_err(|e| {
            EngineError::ContractViolation(format!(
                "corrupt constraint catalog {}: {e}",
                path.display()
            ))
        })
    }

    /// Built-in defaults for tests and the no-config fallback.
    pub fn builtin() -> Self {
        let mut rules = BTreeMap::new();
        rules.insert(
            "analysis".to_string(),
            AllocationRule {
                must_include: vec!["V4".to_string()],
                reason: "分析类交付物需要研究支撑".to_string(),
                ..Default::default()
            },
        );
        rules.insert(
            "narrative".to_string(),
            AllocationRule {
                must_exclude: vec!["V6".to_string()],
                reason: "叙事类交付物不由工程角色承接".to_string(),
                ..Default::default()
            },
        );
        Self { rules }
    }

    /// Validate a deliverable allocation against the rule set.
    ///
    /// `deliverables` pairs each spec with its owner role id.
    pub fn validate_allocation(
        &self,
        deliverables: &[(DeliverableSpec, String)],
        selected_roles: &[Role],
    ) -> AllocationCheck {
        let mut check = AllocationCheck::default();
        let selected_ids: Vec<&str> = selected_roles.iter().map(|r| r.role_id.as_str()).collect();

        for (spec, owner) in deliverables {
            if let Some(rule) = self.rules.get(&spec.format) {
                for prefix in &rule.must_include {
                    if !selected_ids.iter().any(|id| id.starts_with(prefix.as_str())) {
                        check.errors.push(format!(
                            "deliverable {} ({}) requires a {}* role: {}",
                            spec.short_id(),
                            spec.format,
                            prefix,
                            rule.reason
                        ));
                    }
                }
                for prefix in &rule.must_exclude {
                    if selected_ids.iter().any(|id| id.starts_with(prefix.as_str())) {
                        check.errors.push(format!(
                            "deliverable {} ({}) forbids {}* roles in the selection: {}",
                            spec.short_id(),
                            spec.format,
                            prefix,
                            rule.reason
                        ));
                    }
                }
            }

            // Inline anti-patterns bind the owner role.
            for pattern in &spec.anti_patterns {
                if owner.starts_with(pattern.as_str()) {
                    check.errors.push(format!(
                        "deliverable {} owner {} matches anti-pattern {}",
                        spec.short_id(),
                        owner,
                        pattern
                    ));
                }
            }
        }

        if selected_roles.len() > MAX_ROLES_BEFORE_WARNING {
            check.warnings.push(format!(
                "selection has {} roles (> {MAX_ROLES_BEFORE_WARNING})",
                selected_roles.len()
            ));
        }

        check
    }
}
