//! Role-weight configuration: per-category base weights plus tag rules
//! with triggering keyword clusters and per-category modifiers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::role::BaseType;

/// One tag rule: a named keyword cluster with per-category weight
/// modifiers applied when the cluster matches the brief.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagRule {
    pub name: String,
    pub keywords: Vec<String>,
    /// Modifier per base-type name (`V2`..`V6`).
    pub modifiers: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightsConfig {
    /// Base weight per base-type name.
    pub base_weights: BTreeMap<String, f64>,
    #[serde(default)]
    pub tags: Vec<TagRule>,
}

impl WeightsConfig {
    pub fn load_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            EngineError::ContractViolation(format!(
                "cannot read weights config {}: {e}",
                path.display()
            ))
        })?;
        let config: WeightsConfig = serde_yaml::from_str(&text).map_err(|e| {
            EngineError::ContractViolation(format!(
                "corrupt weights config {}: {e}",
                path.display()
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn builtin() -> Self {
        let mut base_weights = BTreeMap::new();
        for base in BaseType::all() {
            base_weights.insert(base.as_str().to_string(), 1.0);
        }

        let tag = |name: &str, keywords: &[&str], mods: &[(&str, f64)]| TagRule {
            name: name.to_string(),
            keywords: keywords.iter().map(|s| (*s).to_string()).collect(),
            modifiers: mods.iter().map(|(k, v)| ((*k).to_string(), *v)).collect(),
        };

        Self {
            base_weights,
            tags: vec![
                tag(
                    "luxury_residential",
                    &["大平层", "豪宅", "别墅", "luxury"],
                    &[("V2", 0.4), ("V5", 0.2)],
                ),
                tag(
                    "family_living",
                    &["家庭", "孩子", "三口", "四口", "老人"],
                    &[("V4", 0.3), ("V5", 0.3), ("V3", 0.2)],
                ),
                tag(
                    "renovation",
                    &["改造", "翻新", "旧房", "老房"],
                    &[("V6", 0.5), ("V4", 0.2)],
                ),
                tag(
                    "bidding",
                    &["竞标", "投标", "中标", "bidding"],
                    &[("V2", 0.3), ("V4", 0.4)],
                ),
                tag(
                    "narrative_driven",
                    &["故事", "叙事", "体验", "氛围"],
                    &[("V3", 0.5)],
                ),
                tag(
                    "budget_sensitive",
                    &["预算", "性价比", "控制成本"],
                    &[("V6", 0.3), ("V4", 0.2)],
                ),
            ],
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        for base in BaseType::all() {
            if !self.base_weights.contains_key(base.as_str()) {
                return Err(EngineError::ContractViolation(format!(
                    "weights config missing base weight for {base}"
                )));
            }
        }
        for tag in &self.tags {
            if tag.keywords.is_empty() {
                return Err(EngineError::ContractViolation(format!(
                    "weights tag {} has no keywords",
                    tag.name
                )));
            }
            for key in tag.modifiers.keys() {
                if BaseType::parse(key).is_none() {
                    return Err(EngineError::ContractViolation(format!(
                        "weights tag {} references unknown category {key}",
                        tag.name
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_validates() {
        assert!(WeightsConfig::builtin().validate().is_ok());
    }

    #[test]
    fn test_unknown_category_rejected() {
        let mut config = WeightsConfig::builtin();
        config.tags[0]
            .modifiers
            .insert("V9".to_string(), 1.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.yaml");
        std::fs::write(&path, serde_yaml::to_string(&WeightsConfig::builtin()).unwrap()).unwrap();
        let loaded = WeightsConfig::load_file(&path).unwrap();
        assert_eq!(loaded.tags.len(), WeightsConfig::builtin().tags.len());
    }
}
