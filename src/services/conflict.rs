//! Shared conflict detection over the industry-standards knowledge base.
//!
//! Used twice: the calibration questionnaire injects conflict questions for
//! domains the user's own input mentions, and the feasibility analyst folds
//! the full detection into its assessment.

use std::collections::BTreeSet;

use crate::catalog::standards::StandardsCatalog;
use crate::domain::models::feasibility::{
    Conflict, ConflictDetection, ConflictDomain, ConflictSeverity,
};
use crate::domain::models::requirements::StructuredRequirements;

pub struct ConflictService {
    standards: Option<StandardsCatalog>,
}

impl ConflictService {
    pub fn new(standards: Option<StandardsCatalog>) -> Self {
        Self { standards }
    }

    pub fn has_knowledge_base(&self) -> bool {
        self.standards.is_some()
    }

    /// Which constraint domains the user's own input mentions. Conflict
    /// questions are only generated for mentioned domains.
    pub fn mentioned_domains(raw_input: &str) -> BTreeSet<ConflictDomain> {
        let mut domains = BTreeSet::new();
        let lower = raw_input.to_lowercase();
        if ["预算", "budget", "万", "成本", "费用"].iter().any(|k| lower.contains(k)) {
            domains.insert(ConflictDomain::Budget);
        }
        if ["工期", "时间", "周期", "月内", "deadline", "timeline", "交付时间"]
            .iter()
            .any(|k| lower.contains(k))
        {
            domains.insert(ConflictDomain::Timeline);
        }
        if ["㎡", "平米", "平方米", "面积", "空间不够", "太小"].iter().any(|k| lower.contains(k)) {
            domains.insert(ConflictDomain::Space);
        }
        domains
    }

    /// Run detection across all three domains. With no knowledge base the
    /// result is empty.
    pub fn detect(&self, brief: &StructuredRequirements, raw_input: &str) -> ConflictDetection {
        let Some(standards) = &self.standards else {
            return ConflictDetection::default();
        };

        let corpus = format!(
            "{raw_input} {} {} {}",
            brief.project_task,
            brief.project_type,
            brief.resource_constraints.join(" ")
        );

        let mut detection = ConflictDetection::default();
        let budget = extract_budget_cny(&corpus);
        let area = extract_area_sqm(&corpus);
        let weeks = extract_weeks(&corpus);

        if let (Some(budget), Some(area)) = (budget, area) {
            if let Some(benchmark) = standards
                .budget
                .iter()
                .find(|b| b.keywords.iter().any(|k| corpus.contains(k.as_str())))
            {
                let per_sqm = budget / area;
                if per_sqm < benchmark.floor_per_sqm {
                    detection.budget_conflicts.push(Conflict {
                        detected: true,
                        severity: ConflictSeverity::Critical,
                        description: format!(
                            "预算折合 {per_sqm:.0} 元/㎡，低于{}类项目的底线 {:.0} 元/㎡",
                            benchmark.project_type, benchmark.floor_per_sqm
                        ),
                        details: format!("预算 {budget:.0} 元，面积 {area:.0}㎡"),
                    });
                } else if per_sqm < benchmark.comfortable_per_sqm {
                    detection.budget_conflicts.push(Conflict {
                        detected: true,
                        severity: ConflictSeverity::Medium,
                        description: format!(
                            "预算折合 {per_sqm:.0} 元/㎡，低于{}类项目的舒适区间 {:.0} 元/㎡，需要取舍",
                            benchmark.project_type, benchmark.comfortable_per_sqm
                        ),
                        details: format!("预算 {budget:.0} 元，面积 {area:.0}㎡"),
                    });
                }
            }
        }

        if let Some(weeks) = weeks {
            if let Some(benchmark) = standards
                .timeline
                .iter()
                .find(|b| b.keywords.iter().any(|k| corpus.contains(k.as_str())))
            {
                if weeks < f64::from(benchmark.min_weeks) {
                    let severity = if weeks < f64::from(benchmark.min_weeks) * 0.5 {
                        ConflictSeverity::Critical
                    } else {
                        ConflictSeverity::High
                    };
                    detection.timeline_conflicts.push(Conflict {
                        detected: true,
                        severity,
                        description: format!(
                            "期望工期约 {weeks:.0} 周，低于{}类项目的最短周期 {} 周",
                            benchmark.project_type, benchmark.min_weeks
                        ),
                        details: String::new(),
                    });
                }
            }
        }

        if let Some(area) = area {
            let required: f64 = standards
                .space
                .iter()
                .filter(|b| b.keywords.iter().any(|k| corpus.contains(k.as_str())))
                .map(|b| b.min_area_sqm)
                .sum();
            // Functional zones plus circulation should fit in the shell.
            if required > 0.0 && required * 1.5 > area {
                detection.space_conflicts.push(Conflict {
                    detected: true,
                    severity: ConflictSeverity::High,
                    description: format!(
                        "提及的功能分区至少需要 {required:.0}㎡（含动线约 {:.0}㎡），总面积仅 {area:.0}㎡",
                        required * 1.5
                    ),
                    details: String::new(),
                });
            }
        }

        detection
    }
}

/// Extract a budget figure in CNY: `300万` / `3M` / `3000000元`.
pub fn extract_budget_cny(text: &str) -> Option<f64> {
    scan_numbers(text)
        .into_iter()
        .filter_map(|(value, suffix)| match suffix.as_str() {
            s if s.starts_with('万') => Some(value * 10_000.0),
            s if s.starts_with('M') || s.starts_with('m') => Some(value * 1_000_000.0),
            s if s.starts_with('元') => Some(value),
            _ => None,
        })
        .fold(None, |max, v| Some(max.map_or(v, |m: f64| m.max(v))))
}

/// Extract a floor area in square metres: `200㎡` / `200平米` / `200平`.
pub fn extract_area_sqm(text: &str) -> Option<f64> {
    scan_numbers(text).into_iter().find_map(|(value, suffix)| {
        if suffix.starts_with('㎡') || suffix.starts_with('平') {
            Some(value)
        } else {
            None
        }
    })
}

/// Extract an expected schedule in weeks: `8周` / `3个月` / `90天`.
pub fn extract_weeks(text: &str) -> Option<f64> {
    scan_numbers(text).into_iter().find_map(|(value, suffix)| {
        if suffix.starts_with('周') {
            Some(value)
        } else if suffix.starts_with("个月") || suffix.starts_with('月') {
            Some(value * 4.3)
        } else if suffix.starts_with('天') {
            Some(value / 7.0)
        } else {
            None
        }
    })
}

/// Scan numbers with their immediately following text (up to two chars).
fn scan_numbers(text: &str) -> Vec<(f64, String)> {
    let chars: Vec<char> = text.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        if chars[i].is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let number: String = chars[start..i].iter().collect();
            if let Ok(value) = number.parse::<f64>() {
                let suffix: String = chars[i..chars.len().min(i + 2)].iter().collect();
                out.push((value, suffix));
            }
        } else {
            i += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_extraction_variants() {
        assert_eq!(extract_budget_cny("预算300万"), Some(3_000_000.0));
        assert_eq!(extract_budget_cny("budget 3M CNY"), Some(3_000_000.0));
        assert_eq!(extract_budget_cny("总价2000000元"), Some(2_000_000.0));
        assert_eq!(extract_budget_cny("没有数字"), None);
    }

    #[test]
    fn test_area_and_weeks_extraction() {
        assert_eq!(extract_area_sqm("深圳200㎡大平层"), Some(200.0));
        assert_eq!(extract_area_sqm("约150平米"), Some(150.0));
        assert_eq!(extract_weeks("工期8周"), Some(8.0));
        assert!(extract_weeks("3个月内入住").unwrap() > 12.0);
    }

    #[test]
    fn test_mentioned_domains() {
        let domains = ConflictService::mentioned_domains("预算300万，3个月的工期，200㎡");
        assert!(domains.contains(&ConflictDomain::Budget));
        assert!(domains.contains(&ConflictDomain::Timeline));
        assert!(domains.contains(&ConflictDomain::Space));
        assert!(ConflictService::mentioned_domains("现代极简风格").is_empty());
    }

    #[test]
    fn test_low_budget_is_critical() {
        let service = ConflictService::new(Some(StandardsCatalog::builtin()));
        let detection = service.detect(
            &StructuredRequirements::default(),
            "深圳200㎡住宅，预算40万",
        );
        assert_eq!(detection.budget_conflicts.len(), 1);
        assert_eq!(
            detection.budget_conflicts[0].severity,
            ConflictSeverity::Critical
        );
    }

    #[test]
    fn test_comfortable_budget_no_conflict() {
        let service = ConflictService::new(Some(StandardsCatalog::builtin()));
        let detection = service.detect(
            &StructuredRequirements::default(),
            "深圳200㎡住宅，预算300万",
        );
        assert!(detection.budget_conflicts.is_empty());
    }

    #[test]
    fn test_missing_knowledge_base_yields_empty() {
        let service = ConflictService::new(None);
        let detection =
            service.detect(&StructuredRequirements::default(), "预算40万，200㎡住宅");
        assert_eq!(detection.iter().count(), 0);
    }

    #[test]
    fn test_tight_timeline_detected() {
        let service = ConflictService::new(Some(StandardsCatalog::builtin()));
        let detection = service.detect(
            &StructuredRequirements::default(),
            "住宅改造，工期4周，面积90㎡，预算100万",
        );
        assert!(!detection.timeline_conflicts.is_empty());
    }
}
