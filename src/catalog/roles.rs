//! Role catalog: the immutable pool of expert roles, one YAML file per
//! role family, validated at boot.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::role::{short_deliverable_id, BaseType, Role};

/// On-disk shape of one role-family file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RoleFamilyFile {
    roles: Vec<Role>,
}

/// The loaded role catalog.
#[derive(Debug, Clone)]
pub struct RoleCatalog {
    roles: Vec<Role>,
}

impl RoleCatalog {
    /// Load every YAML file in `dir` and concatenate the role lists.
    pub fn load_dir(dir: impl AsRef<Path>) -> EngineResult<Self> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir).map_err(|e| {
            EngineError::ContractViolation(format!(
                "cannot read role catalog dir {}: {e}",
                dir.display()
            ))
        })?;

        let mut roles = Vec::new();
        for entry in entries {
            let entry = entry
                .map_err(|e| EngineError::ContractViolation(format!("role catalog read error: {e}")))?;
            let path = entry.path();
            let is_yaml = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e == "yaml" || e == "yml");
            if !is_yaml {
                continue;
            }
            let text = std::fs::read_to_string(&path).map_err(|e| {
                EngineError::ContractViolation(format!(
                    "cannot read role file {}: {e}",
                    path.display()
                ))
            })?;
            let family: RoleFamilyFile = serde_yaml::from_str(&text).map_err(|e| {
                EngineError::ContractViolation(format!("corrupt role file {}: {e}", path.display()))
            })?;
            roles.extend(family.roles);
        }

        let catalog = Self { roles };
        catalog.validate()?;
        debug!(count = catalog.roles.len(), "role catalog loaded");
        Ok(catalog)
    }

    /// Built-in default catalog used by tests and the no-config fallback.
    pub fn builtin() -> Self {
        fn role(
            role_id: &str,
            base: BaseType,
            name: &str,
            description: &str,
            keywords: &[&str],
        ) -> Role {
            Role {
                role_id: role_id.to_string(),
                base_type: base,
                role_name: name.to_string(),
                dynamic_role_name: String::new(),
                description: description.to_string(),
                keywords: keywords.iter().map(|s| (*s).to_string()).collect(),
                applicable_scope: Vec::new(),
                system_prompt: format!(
                    "你是{name}。针对以下项目给出专业分析。{{user_specific_request}}"
                ),
                task_instruction: None,
            }
        }

        Self {
            roles: vec![
                role(
                    "V2_设计总监_2-1",
                    BaseType::V2,
                    "设计总监",
                    "统筹空间概念与整体设计语言",
                    &["设计", "风格", "概念", "空间"],
                ),
                role(
                    "V2_软装设计师_2-2",
                    BaseType::V2,
                    "软装设计师",
                    "家具、材质与陈设方案",
                    &["软装", "家具", "材质", "陈设"],
                ),
                role(
                    "V3_叙事策划_3-1",
                    BaseType::V3,
                    "叙事策划",
                    "居住者故事线与场景叙事",
                    &["叙事", "故事", "生活方式"],
                ),
                role(
                    "V4_行业研究员_4-1",
                    BaseType::V4,
                    "行业研究员",
                    "行业标准、案例与趋势研究",
                    &["研究", "案例", "趋势", "标准"],
                ),
                role(
                    "V4_用户研究员_4-2",
                    BaseType::V4,
                    "用户研究员",
                    "居住者画像与需求洞察",
                    &["用户", "画像", "家庭", "需求"],
                ),
                role(
                    "V5_场景规划师_5-1",
                    BaseType::V5,
                    "场景规划师",
                    "核心使用场景与动线规划",
                    &["场景", "动线", "功能分区"],
                ),
                role(
                    "V6_总工程师_6-1",
                    BaseType::V6,
                    "总工程师",
                    "结构、机电与施工可行性",
                    &["结构", "施工", "机电", "预算"],
                ),
            ],
        }
    }

    /// Boot validation: every role id prefix must parse as a base type and
    /// match the declared one; slots must be unique.
    pub fn validate(&self) -> EngineResult<()> {
        let mut seen = std::collections::HashSet::new();
        for role in &self.roles {
            match BaseType::from_role_id(&role.role_id) {
                Some(prefix) if prefix == role.base_type => {}
                _ => {
                    return Err(EngineError::ContractViolation(format!(
                        "role {} id prefix does not match base_type {}",
                        role.role_id, role.base_type
                    )))
                }
            }
            if !seen.insert(role.slot()) {
                return Err(EngineError::ContractViolation(format!(
                    "duplicate role catalog slot: {}",
                    role.slot()
                )));
            }
        }
        Ok(())
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    /// Roles applicable to a project scope.
    pub fn for_scope(&self, project_scope: &str) -> Vec<&Role> {
        self.roles.iter().filter(|r| r.applies_to(project_scope)).collect()
    }

    pub fn by_id(&self, role_id: &str) -> Option<&Role> {
        self.roles.iter().find(|r| r.role_id == role_id)
    }

    /// First catalog role of a base type, used for the fallback selection.
    pub fn first_of(&self, base: BaseType) -> Option<&Role> {
        self.roles.iter().find(|r| r.base_type == base)
    }

    /// Normalize a short role id (`2-1`) to the full catalog form
    /// (`V2_设计总监_2-1`). Full ids pass through when known.
    pub fn normalize_role_id(&self, id: &str) -> Option<String> {
        if self.by_id(id).is_some() {
            return Some(id.to_string());
        }
        let slot = short_deliverable_id(id);
        self.roles
            .iter()
            .find(|r| r.slot() == slot)
            .map(|r| r.role_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_validates() {
        let catalog = RoleCatalog::builtin();
        assert!(catalog.validate().is_ok());
        assert!(catalog.roles().len() >= 5);
    }

    #[test]
    fn test_normalize_short_role_id() {
        let catalog = RoleCatalog::builtin();
        assert_eq!(
            catalog.normalize_role_id("2-1").as_deref(),
            Some("V2_设计总监_2-1")
        );
        assert_eq!(
            catalog.normalize_role_id("V4_行业研究员_4-1").as_deref(),
            Some("V4_行业研究员_4-1")
        );
        assert!(catalog.normalize_role_id("9-9").is_none());
    }

    #[test]
    fn test_first_of_base_type() {
        let catalog = RoleCatalog::builtin();
        assert_eq!(
            catalog.first_of(BaseType::V4).map(|r| r.role_id.as_str()),
            Some("V4_行业研究员_4-1")
        );
    }

    #[test]
    fn test_mismatched_prefix_rejected() {
        let mut catalog = RoleCatalog::builtin();
        catalog.roles[0].base_type = BaseType::V6;
        assert!(catalog.validate().is_err());
    }

    #[test]
    fn test_load_dir_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let family = RoleFamilyFile {
            roles: vec![RoleCatalog::builtin().roles()[0].clone()],
        };
        std::fs::write(
            dir.path().join("v2.yaml"),
            serde_yaml::to_string(&family).unwrap(),
        )
        .unwrap();

        let catalog = RoleCatalog::load_dir(dir.path()).unwrap();
        assert_eq!(catalog.roles().len(), 1);
        assert_eq!(catalog.roles()[0].role_id, "V2_设计总监_2-1");
    }
}
