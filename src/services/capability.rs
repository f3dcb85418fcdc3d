//! Capability boundary checks.
//!
//! Pre-assignment: deliverable formats outside the allowlist are annotated
//! `capability_limited` with a transformation note but never removed.
//! Post-modification: user task edits at the review gate are diffed and
//! newly introduced out-of-capability deliverables are flagged.

use std::collections::BTreeSet;
use tracing::warn;

use crate::domain::models::session::StrategicAnalysis;

/// Deliverable formats the system can produce natively.
pub const CAPABILITY_ALLOWLIST: [&str; 8] = [
    "analysis",
    "narrative",
    "report",
    "plan",
    "strategy",
    "recommendation",
    "checklist",
    "research",
];

/// Deliverable-name keywords that signal visual/production work outside
/// the text-analysis capability boundary.
const OUT_OF_CAPABILITY_KEYWORDS: [&str; 7] =
    ["效果图", "渲染", "3d", "vr", "视频", "施工图", "render"];

pub struct CapabilityBoundaryService;

impl CapabilityBoundaryService {
    /// Annotate out-of-allowlist deliverables in place. Returns the ids of
    /// limited deliverables for logging.
    pub fn annotate(analysis: &mut StrategicAnalysis) -> Vec<String> {
        let mut limited = Vec::new();
        for task in analysis.task_distribution.values_mut() {
            for deliverable in &mut task.deliverables {
                let format = deliverable.format.to_lowercase();
                if CAPABILITY_ALLOWLIST.contains(&format.as_str()) {
                    continue;
                }
                deliverable.capability_limited = true;
                deliverable.capability_note = Some(format!(
                    "交付形式「{}」超出文本分析能力，将转化为文字方案描述",
                    deliverable.format
                ));
                limited.push(deliverable.id.clone());
            }
        }
        if !limited.is_empty() {
            warn!(deliverables = ?limited, "capability-limited deliverables annotated");
        }
        limited
    }

    /// Diff a user-modified task set against the original; flag newly
    /// introduced deliverables whose name or format crosses the boundary.
    pub fn diff_modifications(
        original: &StrategicAnalysis,
        modified: &StrategicAnalysis,
    ) -> Vec<String> {
        let known: BTreeSet<&str> = original
            .task_distribution
            .values()
            .flat_map(|t| t.deliverables.iter().map(|d| d.id.as_str()))
            .collect();

        let mut flags = Vec::new();
        for (role_id, task) in &modified.task_distribution {
            for deliverable in &task.deliverables {
                if known.contains(deliverable.id.as_str()) {
                    continue;
                }
                let haystack = format!(
                    "{} {} {}",
                    deliverable.name.to_lowercase(),
                    deliverable.description.to_lowercase(),
                    deliverable.format.to_lowercase()
                );
                let out_of_list = !CAPABILITY_ALLOWLIST
                    .contains(&deliverable.format.to_lowercase().as_str());
                let keyword_hit = OUT_OF_CAPABILITY_KEYWORDS
                    .iter()
                    .any(|k| haystack.contains(k));
                if out_of_list || keyword_hit {
                    flags.push(format!(
                        "{role_id}: 新增交付物「{}」超出系统能力范围",
                        deliverable.name
                    ));
                }
            }
        }
        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::role::{DeliverableSpec, TaskInstruction};

    fn analysis_with(deliverables: Vec<DeliverableSpec>) -> StrategicAnalysis {
        let mut analysis = StrategicAnalysis::default();
        analysis.task_distribution.insert(
            "V2_设计总监_2-1".to_string(),
            TaskInstruction {
                deliverables,
                ..Default::default()
            },
        );
        analysis
    }

    #[test]
    fn test_out_of_allowlist_annotated_not_removed() {
        let mut d = DeliverableSpec::new("2-1", "概念渲染");
        d.format = "rendering".to_string();
        let mut analysis = analysis_with(vec![d]);

        let limited = CapabilityBoundaryService::annotate(&mut analysis);
        assert_eq!(limited, vec!["2-1".to_string()]);

        let task = &analysis.task_distribution["V2_设计总监_2-1"];
        assert_eq!(task.deliverables.len(), 1);
        assert!(task.deliverables[0].capability_limited);
        assert!(task.deliverables[0].capability_note.is_some());
    }

    #[test]
    fn test_allowlisted_format_untouched() {
        let mut analysis = analysis_with(vec![DeliverableSpec::new("2-1", "概念分析")]);
        let limited = CapabilityBoundaryService::annotate(&mut analysis);
        assert!(limited.is_empty());
        assert!(!analysis.task_distribution["V2_设计总监_2-1"].deliverables[0].capability_limited);
    }

    #[test]
    fn test_modification_diff_flags_new_rendering_deliverable() {
        let original = analysis_with(vec![DeliverableSpec::new("2-1", "概念分析")]);
        let mut added = DeliverableSpec::new("2-9", "客厅3D效果图");
        added.format = "analysis".to_string();
        let modified = analysis_with(vec![DeliverableSpec::new("2-1", "概念分析"), added]);

        let flags = CapabilityBoundaryService::diff_modifications(&original, &modified);
        assert_eq!(flags.len(), 1);
        assert!(flags[0].contains("3D效果图"));
    }

    #[test]
    fn test_modification_diff_ignores_existing_deliverables() {
        let original = analysis_with(vec![DeliverableSpec::new("2-1", "概念分析")]);
        let flags = CapabilityBoundaryService::diff_modifications(&original, &original);
        assert!(flags.is_empty());
    }
}
