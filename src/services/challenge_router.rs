//! Challenge classification and closure routing.
//!
//! Every challenge flag detected in a batch closes through exactly one
//! path: accept (expert-driven insight), synthesize (competing
//! frameworks), or escalate to the user at the review stage.

use chrono::Utc;
use std::collections::BTreeMap;
use tracing::info;

use crate::domain::models::challenge::{
    AcceptedInsight, ChallengeClass, ChallengeFlag, CompetingFrame, EscalatedChallenge,
    FrameworkSynthesis, InsightUpdate,
};

/// Phrases signalling the challenge contests a user-facing interpretation.
const PERSONA_MARKERS: [&str; 6] = ["用户", "居住者", "客户", "画像", "人物", "persona"];

/// Uncertainty markers required for a `contest_persona` classification.
const UNCERTAINTY_MARKERS: [&str; 6] = ["可能", "也许", "不确定", "假设", "perhaps", "might"];

/// Competence disclaimers that route a challenge to the client.
const OUT_OF_SCOPE_MARKERS: [&str; 4] =
    ["strategic decision", "超出我的评估范围", "商业决策", "战略决策"];

/// Everything a closed batch of challenges writes back into session state.
#[derive(Debug, Clone, Default)]
pub struct ChallengeClosure {
    pub insights: BTreeMap<String, AcceptedInsight>,
    pub insight_updates: Vec<InsightUpdate>,
    pub syntheses: BTreeMap<String, FrameworkSynthesis>,
    pub escalations: Vec<EscalatedChallenge>,
    pub total_detected: u64,
    /// Any accepted reinterpretation with a high/fundamental impact; drives
    /// the feedback-loop routing back to the requirements analyst.
    pub high_impact_accepted: bool,
}

impl ChallengeClosure {
    pub fn has_escalations(&self) -> bool {
        !self.escalations.is_empty()
    }

    pub fn has_syntheses(&self) -> bool {
        !self.syntheses.is_empty()
    }
}

pub struct ChallengeRouter;

impl ChallengeRouter {
    /// Classify each flag; first match wins.
    pub fn classify(flags: &[ChallengeFlag]) -> Vec<(ChallengeFlag, ChallengeClass)> {
        flags
            .iter()
            .map(|flag| {
                let class = if is_contest_persona(flag) {
                    ChallengeClass::ContestPersona
                } else if has_competing_frames(flag, flags) {
                    ChallengeClass::CompetingFramework
                } else if is_out_of_scope(flag) {
                    ChallengeClass::OutOfScopeForClient
                } else {
                    ChallengeClass::Reinterpret
                };
                (flag.clone(), class)
            })
            .collect()
    }

    /// Close a batch of flags into insight / synthesis / escalation records.
    pub fn close(flags: Vec<ChallengeFlag>) -> ChallengeClosure {
        let classified = Self::classify(&flags);
        let now = Utc::now();
        let mut closure = ChallengeClosure {
            total_detected: classified.len() as u64,
            ..Default::default()
        };

        for (flag, class) in classified {
            match class {
                ChallengeClass::Reinterpret => {
                    if flag.is_high_impact() {
                        closure.high_impact_accepted = true;
                    }
                    closure.insight_updates.push(InsightUpdate {
                        challenged_item: flag.challenged_item.clone(),
                        source_expert: flag.expert_role.clone(),
                        timestamp: now,
                    });
                    closure.insights.insert(
                        flag.challenged_item.clone(),
                        AcceptedInsight {
                            accepted_from: flag.expert_role,
                            expert_reinterpretation: flag.reinterpretation,
                            design_impact: flag.design_impact,
                            timestamp: now,
                        },
                    );
                }
                ChallengeClass::CompetingFramework => {
                    let entry = closure
                        .syntheses
                        .entry(flag.challenged_item.clone())
                        .or_insert_with(|| FrameworkSynthesis {
                            challenged_item: flag.challenged_item.clone(),
                            frames: Vec::new(),
                            synthesis: String::new(),
                            recommendation: String::new(),
                            timestamp: now,
                        });
                    entry.frames.push(CompetingFrame {
                        expert_role: flag.expert_role,
                        reinterpretation: flag.reinterpretation,
                        rationale: flag.rationale,
                    });
                }
                ChallengeClass::ContestPersona | ChallengeClass::OutOfScopeForClient => {
                    closure.escalations.push(EscalatedChallenge {
                        flag,
                        class,
                        ruling: None,
                    });
                }
            }
        }

        for synthesis in closure.syntheses.values_mut() {
            let views: Vec<String> = synthesis
                .frames
                .iter()
                .map(|f| format!("{}：{}", f.expert_role, f.reinterpretation))
                .collect();
            synthesis.synthesis = format!(
                "围绕「{}」存在 {} 种专业视角：{}",
                synthesis.challenged_item,
                synthesis.frames.len(),
                views.join("；")
            );
            synthesis.recommendation =
                "保留各视角的核心诉求，在方案层面分区呼应，由最终评审确认侧重".to_string();
        }

        info!(
            detected = closure.total_detected,
            accepted = closure.insights.len(),
            synthesized = closure.syntheses.len(),
            escalated = closure.escalations.len(),
            "challenge batch closed"
        );
        closure
    }
}

fn is_contest_persona(flag: &ChallengeFlag) -> bool {
    let subject = format!("{} {}", flag.challenged_item, flag.rationale);
    let persona = PERSONA_MARKERS.iter().any(|m| subject.contains(m));
    let uncertain = UNCERTAINTY_MARKERS
        .iter()
        .any(|m| flag.rationale.contains(m) || flag.reinterpretation.contains(m));
    persona && uncertain
}

fn has_competing_frames(flag: &ChallengeFlag, all: &[ChallengeFlag]) -> bool {
    all.iter().any(|other| {
        other.expert_role != flag.expert_role
            && other.challenged_item == flag.challenged_item
            && other.reinterpretation.trim() != flag.reinterpretation.trim()
    })
}

fn is_out_of_scope(flag: &ChallengeFlag) -> bool {
    let text = format!("{} {}", flag.rationale, flag.reinterpretation).to_lowercase();
    OUT_OF_SCOPE_MARKERS.iter().any(|m| text.contains(m))
}
