//! Industry-standards knowledge base backing the feasibility analysis.
//!
//! Benchmarks are keyword-matched against the structured brief; a missing
//! or unreadable file is not fatal, the feasibility stage degrades to an
//! empty assessment.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

use crate::domain::errors::{EngineError, EngineResult};

/// Per-project-type budget benchmark, CNY per square metre.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetBenchmark {
    pub project_type: String,
    pub keywords: Vec<String>,
    /// Below this the budget conflict is critical.
    pub floor_per_sqm: f64,
    /// Below this (but above the floor) the conflict is high/medium.
    pub comfortable_per_sqm: f64,
}

/// Minimum schedule expectation for a project type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineBenchmark {
    pub project_type: String,
    pub keywords: Vec<String>,
    pub min_weeks: u32,
}

/// Minimum area for one functional zone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpaceBenchmark {
    pub function: String,
    pub keywords: Vec<String>,
    pub min_area_sqm: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StandardsCatalog {
    #[serde(default)]
    pub budget: Vec<BudgetBenchmark>,
    #[serde(default)]
    pub timeline: Vec<TimelineBenchmark>,
    #[serde(default)]
    pub space: Vec<SpaceBenchmark>,
}

impl StandardsCatalog {
    pub fn load_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            EngineError::ContractViolation(format!(
                "cannot read standards file {}: {e}",
                path.display()
            ))
        })?;
        serde_yaml::from_str(&text).map_err(|e| {
            EngineError::ContractViolation(format!(
                "corrupt standards file {}: {e}",
                path.display()
            ))
        })
    }

    /// Load the knowledge base, degrading to `None` with a warning when
    /// the file is missing or unreadable.
    pub fn load_or_warn(path: impl AsRef<Path>) -> Option<Self> {
        match Self::load_file(path.as_ref()) {
            Ok(catalog) => Some(catalog),
            Err(e) => {
                warn!(
                    path = %path.as_ref().display(),
                    error = %e,
                    "industry standards knowledge base unavailable, feasibility will be empty"
                );
                None
            }
        }
    }

    pub fn builtin() -> Self {
        fn kw(words: &[&str]) -> Vec<String> {
            words.iter().map(|s| (*s).to_string()).collect()
        }

        Self {
            budget: vec![
                BudgetBenchmark {
                    project_type: "住宅精装".to_string(),
                    keywords: kw(&["住宅", "公寓", "apartment", "大平层"]),
                    floor_per_sqm: 3000.0,
                    comfortable_per_sqm: 8000.0,
                },
                BudgetBenchmark {
                    project_type: "别墅".to_string(),
                    keywords: kw(&["别墅", "villa"]),
                    floor_per_sqm: 5000.0,
                    comfortable_per_sqm: 12000.0,
                },
                BudgetBenchmark {
                    project_type: "商业空间".to_string(),
                    keywords: kw(&["商业", "办公", "酒店", "餐饮"]),
                    floor_per_sqm: 4000.0,
                    comfortable_per_sqm: 10000.0,
                },
            ],
            timeline: vec![
                TimelineBenchmark {
                    project_type: "住宅精装".to_string(),
                    keywords: kw(&["住宅", "公寓", "apartment", "大平层"]),
                    min_weeks: 12,
                },
                TimelineBenchmark {
                    project_type: "改造翻新".to_string(),
                    keywords: kw(&["改造", "翻新", "旧房"]),
                    min_weeks: 16,
                },
            ],
            space: vec![
                SpaceBenchmark {
                    function: "主卧".to_string(),
                    keywords: kw(&["主卧", "卧室"]),
                    min_area_sqm: 12.0,
                },
                SpaceBenchmark {
                    function: "客厅".to_string(),
                    keywords: kw(&["客厅", "起居"]),
                    min_area_sqm: 20.0,
                },
                SpaceBenchmark {
                    function: "书房".to_string(),
                    keywords: kw(&["书房", "工作室", "办公区"]),
                    min_area_sqm: 6.0,
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_has_all_domains() {
        let kb = StandardsCatalog::builtin();
        assert!(!kb.budget.is_empty());
        assert!(!kb.timeline.is_empty());
        assert!(!kb.space.is_empty());
    }

    #[test]
    fn test_missing_file_degrades_to_none() {
        assert!(StandardsCatalog::load_or_warn("/nonexistent/standards.yaml").is_none());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("standards.yaml");
        std::fs::write(&path, serde_yaml::to_string(&StandardsCatalog::builtin()).unwrap())
            .unwrap();
        let kb = StandardsCatalog::load_file(&path).unwrap();
        assert_eq!(kb.budget.len(), StandardsCatalog::builtin().budget.len());
    }
}
