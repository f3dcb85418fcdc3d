//! Calibration questionnaire agent.
//!
//! Generation pipeline: LLM base generation, relevance check against the raw
//! brief (one regeneration with keyword injection when relevance is poor),
//! then injection of philosophy / bidding / conflict questions, dynamic
//! trimming by priority, and type ordering. Generation never fails the
//! pipeline; a transport failure falls back to a baseline questionnaire.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::agents::{AgentNode, NodeOutcome};
use crate::catalog::prompts::PromptCatalog;
use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::interrupt::{InteractionType, Intent, InterruptPayload, ResumeValue};
use crate::domain::models::questionnaire::{
    AnswerValue, Question, QuestionAnswer, QuestionClass, Questionnaire, QuestionnaireSummary,
};
use crate::domain::models::requirements::StructuredRequirements;
use crate::domain::models::session::{
    AnalysisStage, InteractionEntry, SessionState, StateDelta, WorkflowStage,
};
use crate::domain::ports::{ChatModel, ChatRequest};
use crate::services::conflict::ConflictService;
use crate::services::intent::IntentParser;
use crate::services::output::extract_as;
use crate::services::retry::RetryPolicy;

/// A question counts as on-topic above this keyword-overlap score.
const RELEVANCE_FLOOR: f64 = 0.3;

/// A calibration questionnaire carries at least this many questions; short
/// generations are topped up from the baseline pool.
const QUESTION_FLOOR: usize = 7;

const BIDDING_KEYWORDS: [&str; 4] = ["竞标", "投标", "标书", "bidding"];

pub struct CalibrationQuestionnaireAgent {
    model: Arc<dyn ChatModel>,
    prompts: Arc<PromptCatalog>,
    conflicts: ConflictService,
    intent: IntentParser,
    retry: RetryPolicy,
}

impl CalibrationQuestionnaireAgent {
    pub fn new(
        model: Arc<dyn ChatModel>,
        prompts: Arc<PromptCatalog>,
        conflicts: ConflictService,
        intent: IntentParser,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            model,
            prompts,
            conflicts,
            intent,
            retry,
        }
    }

    async fn generate(&self, state: &SessionState) -> EngineResult<Questionnaire> {
        let brief = state
            .structured_requirements
            .as_ref()
            .ok_or(EngineError::MissingState("structured_requirements"))?;

        let keywords = brief_keywords(&state.user_input);
        let mut questionnaire = match self.generate_base(brief, &state.user_input, None).await {
            Ok(q) => q,
            Err(e) => {
                warn!(error = %e, "questionnaire generation degraded to baseline");
                baseline_questionnaire()
            }
        };
        score_relevance(&mut questionnaire, &keywords);

        let coverage = coverage(&questionnaire);
        let average = average_relevance(&questionnaire);
        if average < RELEVANCE_FLOOR && !keywords.is_empty() {
            info!(coverage, average, "regenerating questionnaire with keyword injection");
            if let Ok(mut regenerated) = self
                .generate_base(brief, &state.user_input, Some(&keywords))
                .await
            {
                score_relevance(&mut regenerated, &keywords);
                if average_relevance(&regenerated) > average {
                    questionnaire = regenerated;
                }
            }
        } else if coverage < RELEVANCE_FLOOR {
            warn!(coverage, "most generated questions ignore the brief");
        }

        self.inject(&mut questionnaire, brief, &state.user_input);
        trim_by_priority(&mut questionnaire);
        ensure_question_floor(&mut questionnaire);
        order_by_type(&mut questionnaire);
        Ok(questionnaire)
    }

    async fn generate_base(
        &self,
        brief: &StructuredRequirements,
        raw_input: &str,
        inject_keywords: Option<&[String]>,
    ) -> Result<Questionnaire, EngineError> {
        let config = self.prompts.get("questionnaire_agent")?;
        let mut user = format!(
            "原始需求：{raw_input}\n\n结构化简报：{}",
            serde_json::to_string_pretty(brief)?
        );
        if let Some(keywords) = inject_keywords {
            user.push_str(&format!(
                "\n\n问卷问题必须紧扣以下关键词：{}",
                keywords.join("、")
            ));
        }
        let request = ChatRequest::new(config.effective_prompt().unwrap_or_default(), user);
        let response = self
            .retry
            .execute(|| self.model.complete(request.clone()))
            .await?;
        extract_as::<Questionnaire>(&response.content)
            .filter(|q| !q.questions.is_empty())
            .ok_or_else(|| {
                EngineError::ValidationFailed("questionnaire response not parseable".to_string())
            })
    }

    /// Philosophy, bidding, and conflict questions that the base generation
    /// cannot know about.
    fn inject(
        &self,
        questionnaire: &mut Questionnaire,
        brief: &StructuredRequirements,
        raw_input: &str,
    ) {
        let spectrum = &brief.expert_handoff.design_challenge_spectrum;
        let has_philosophy = questionnaire
            .questions
            .iter()
            .any(|q| q.class == QuestionClass::Philosophy);
        if !has_philosophy && !spectrum.pole_a.is_empty() && !spectrum.pole_b.is_empty() {
            let mut options = vec![spectrum.pole_a.clone()];
            options.extend(spectrum.intermediate_stances.iter().cloned());
            options.push(spectrum.pole_b.clone());
            questionnaire.questions.push(
                Question::single_choice(
                    "philosophy_1",
                    format!(
                        "在「{}」与「{}」之间，您更倾向哪种立场？",
                        spectrum.pole_a, spectrum.pole_b
                    ),
                    options,
                )
                .with_class(QuestionClass::Philosophy),
            );
        }

        let lower = raw_input.to_lowercase();
        if BIDDING_KEYWORDS.iter().any(|k| lower.contains(k)) {
            questionnaire.questions.push(
                Question::single_choice(
                    "bidding_1",
                    "本次竞标中，您认为最能打动评审的是哪一点？",
                    vec![
                        "概念叙事的感染力".to_string(),
                        "落地性与成本控制".to_string(),
                        "差异化的空间策略".to_string(),
                        "甲方业务诉求的精准回应".to_string(),
                    ],
                )
                .with_class(QuestionClass::Bidding),
            );
        }

        // Conflict questions only for domains the user's own input mentions.
        let mentioned = ConflictService::mentioned_domains(raw_input);
        let detection = self.conflicts.detect(brief, raw_input);
        for (i, (_, conflict)) in detection
            .iter()
            .filter(|(domain, _)| mentioned.contains(domain))
            .enumerate()
        {
            questionnaire.questions.push(
                Question::single_choice(
                    format!("conflict_{i}"),
                    format!("{}。您倾向如何处理？", conflict.description),
                    vec![
                        "调整预期，接受专业建议".to_string(),
                        "缩减范围，保住核心诉求".to_string(),
                        "维持原计划，先看完整方案再说".to_string(),
                    ],
                )
                .with_class(QuestionClass::Conflict(conflict.severity)),
            );
        }
    }

    fn summarize(questionnaire: &Questionnaire, answers: &[QuestionAnswer]) -> String {
        answers
            .iter()
            .map(|a| {
                let text = questionnaire
                    .questions
                    .iter()
                    .find(|q| q.id == a.question_id)
                    .map_or(a.question_id.as_str(), |q| q.text.as_str());
                format!("{text}：{}", a.answer.as_text())
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn completed_delta(summary: QuestionnaireSummary) -> StateDelta {
        let mut delta = StateDelta::stamp(WorkflowStage::CalibrationQuestionnaire);
        delta.analysis_stage = Some(AnalysisStage::Calibration);
        delta.calibration_processed = true;
        delta.questionnaire_summary = Some(summary);
        delta
    }
}

#[async_trait]
impl AgentNode for CalibrationQuestionnaireAgent {
    fn id(&self) -> WorkflowStage {
        WorkflowStage::CalibrationQuestionnaire
    }

    async fn run(
        &self,
        state: &SessionState,
        resume: Option<&ResumeValue>,
    ) -> EngineResult<NodeOutcome> {
        if state.calibration_processed {
            return Ok(NodeOutcome::advance(
                StateDelta::default(),
                WorkflowStage::FeasibilityAnalyst,
            ));
        }

        if state.skip_questionnaire {
            info!(session = %state.session_id, "calibration questionnaire skipped by configuration");
            return Ok(NodeOutcome::advance(
                Self::completed_delta(QuestionnaireSummary {
                    skipped: true,
                    ..Default::default()
                }),
                WorkflowStage::FeasibilityAnalyst,
            ));
        }

        let Some(resume) = resume else {
            let questionnaire = match &state.calibration_questionnaire {
                Some(existing) => existing.clone(),
                None => self.generate(state).await?,
            };
            let mut delta = StateDelta::default().with_log(InteractionEntry::now(
                "system",
                "suspend",
                format!("校准问卷已生成，共 {} 题", questionnaire.questions.len()),
            ));
            delta.calibration_questionnaire = Some(questionnaire.clone());
            return Ok(NodeOutcome::suspend(
                delta,
                InterruptPayload::new(
                    InteractionType::CalibrationQuestionnaire,
                    "请回答校准问卷，或回复 skip 跳过",
                )
                .with_body(json!({ "questionnaire": questionnaire }))
                .with_option("submit", "提交答案")
                .with_option("skip", "跳过问卷"),
            ));
        };

        let questionnaire = state
            .calibration_questionnaire
            .as_ref()
            .ok_or(EngineError::MissingState("calibration_questionnaire"))?;

        let raw_answers: Option<Vec<QuestionAnswer>> = match resume {
            ResumeValue::Answers(answers) => Some(answers.clone()),
            ResumeValue::Command(cmd) => cmd.answers.clone(),
            ResumeValue::Text(_) => None,
        };

        if let Some(raw) = raw_answers {
            let answers = normalize_answers(questionnaire, raw);
            if answers.is_empty() {
                warn!(session = %state.session_id, "calibration answers all empty, re-asking");
                return Ok(NodeOutcome::suspend(
                    StateDelta::default(),
                    InterruptPayload::new(
                        InteractionType::CalibrationQuestionnaire,
                        "提交的答案为空。请回答问卷，或回复 skip 跳过",
                    )
                    .with_body(json!({ "questionnaire": questionnaire }))
                    .with_option("submit", "提交答案")
                    .with_option("skip", "跳过问卷"),
                ));
            }
            let summary_text = Self::summarize(questionnaire, &answers);
            return Ok(NodeOutcome::advance(
                Self::completed_delta(QuestionnaireSummary {
                    answers,
                    skipped: false,
                    summary_text,
                })
                .with_log(InteractionEntry::now("user", "resume", "问卷已提交")),
                WorkflowStage::FeasibilityAnalyst,
            ));
        }

        let parsed = self.intent.parse(resume).await;
        if parsed.intent == Intent::Skip {
            return Ok(NodeOutcome::advance(
                Self::completed_delta(QuestionnaireSummary {
                    skipped: true,
                    ..Default::default()
                })
                .with_log(InteractionEntry::now("user", "resume", "用户跳过问卷")),
                WorkflowStage::FeasibilityAnalyst,
            ));
        }

        // Free text stands in for the whole questionnaire.
        let content = parsed.content.unwrap_or_default();
        if content.trim().is_empty() {
            return Ok(NodeOutcome::suspend(
                StateDelta::default(),
                InterruptPayload::new(
                    InteractionType::CalibrationQuestionnaire,
                    "未能识别答案。请回答问卷，或回复 skip 跳过",
                )
                .with_body(json!({ "questionnaire": questionnaire }))
                .with_option("submit", "提交答案")
                .with_option("skip", "跳过问卷"),
            ));
        }
        Ok(NodeOutcome::advance(
            Self::completed_delta(QuestionnaireSummary {
                answers: Vec::new(),
                skipped: false,
                summary_text: content,
            })
            .with_log(InteractionEntry::now("user", "resume", "问卷以自由文本作答")),
            WorkflowStage::FeasibilityAnalyst,
        ))
    }
}

/// Content keywords from the raw brief: punctuation-split fragments of at
/// least two chars.
fn brief_keywords(raw_input: &str) -> Vec<String> {
    raw_input
        .split(|c: char| c.is_whitespace() || "，。、；：,.;:!?！？（）()".contains(c))
        .filter(|f| f.chars().count() >= 2)
        .map(str::to_string)
        .collect()
}

fn score_relevance(questionnaire: &mut Questionnaire, keywords: &[String]) {
    for question in &mut questionnaire.questions {
        let haystack = format!("{} {}", question.text, question.options.join(" "));
        let matches = keywords.iter().filter(|k| haystack.contains(k.as_str())).count();
        // Three keyword hits saturate the score.
        question.relevance = (matches as f64 / 3.0).min(1.0);
    }
}

fn coverage(questionnaire: &Questionnaire) -> f64 {
    if questionnaire.questions.is_empty() {
        return 0.0;
    }
    let on_topic = questionnaire
        .questions
        .iter()
        .filter(|q| q.relevance > 0.0)
        .count();
    on_topic as f64 / questionnaire.questions.len() as f64
}

fn average_relevance(questionnaire: &Questionnaire) -> f64 {
    if questionnaire.questions.is_empty() {
        return 0.0;
    }
    questionnaire.questions.iter().map(|q| q.relevance).sum::<f64>()
        / questionnaire.questions.len() as f64
}

/// Dynamic trimming: the longer the questionnaire, the harder it is cut.
/// Up to 7 questions survive untouched; 8-10 keep 80%, 11-13 keep 60%,
/// beyond that 40%. Highest priority survives.
fn trim_by_priority(questionnaire: &mut Questionnaire) {
    let len = questionnaire.questions.len();
    let ratio = match len {
        0..=7 => return,
        8..=10 => 0.8,
        11..=13 => 0.6,
        _ => 0.4,
    };
    let keep = ((len as f64 * ratio).ceil() as usize).max(7);

    let mut indices: Vec<usize> = (0..len).collect();
    indices.sort_by(|&a, &b| {
        let qa = &questionnaire.questions[a];
        let qb = &questionnaire.questions[b];
        qb.class
            .priority_score()
            .cmp(&qa.class.priority_score())
            .then_with(|| {
                qb.relevance
                    .partial_cmp(&qa.relevance)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then(a.cmp(&b))
    });
    let mut kept: Vec<usize> = indices.into_iter().take(keep).collect();
    kept.sort_unstable();

    let mut i = 0;
    questionnaire.questions.retain(|_| {
        let keep_this = kept.contains(&i);
        i += 1;
        keep_this
    });
}

/// Single-choice first, then multiple-choice, then open-ended. Stable within
/// each type.
fn order_by_type(questionnaire: &mut Questionnaire) {
    questionnaire
        .questions
        .sort_by_key(|q| q.question_type.order_rank());
}

/// Drop answers with unknown question ids or empty values; single-choice
/// answers arriving as one-element lists collapse to text.
fn normalize_answers(
    questionnaire: &Questionnaire,
    raw: Vec<QuestionAnswer>,
) -> Vec<QuestionAnswer> {
    raw.into_iter()
        .filter_map(|mut a| {
            if !questionnaire.questions.iter().any(|q| q.id == a.question_id) {
                warn!(question_id = %a.question_id, "answer to unknown question dropped");
                return None;
            }
            if a.answer.is_empty() {
                return None;
            }
            if let AnswerValue::Multi(items) = &a.answer {
                if items.len() == 1 {
                    a.answer = AnswerValue::Text(items[0].clone());
                }
            }
            Some(a)
        })
        .collect()
}

/// Short generations get topped up from the baseline pool; baseline ids
/// never collide with generated ones.
fn ensure_question_floor(questionnaire: &mut Questionnaire) {
    if questionnaire.questions.len() >= QUESTION_FLOOR {
        return;
    }
    for question in baseline_questions() {
        if questionnaire.questions.len() >= QUESTION_FLOOR {
            break;
        }
        if questionnaire.questions.iter().any(|q| q.id == question.id) {
            continue;
        }
        questionnaire.questions.push(question);
    }
}

fn baseline_questions() -> Vec<Question> {
    vec![
        Question::single_choice(
            "base_style",
            "您更偏好哪种整体风格方向？",
            vec![
                "现代极简".to_string(),
                "温润木质".to_string(),
                "轻奢质感".to_string(),
                "没有固定偏好".to_string(),
            ],
        ),
        Question::single_choice(
            "base_budget_split",
            "预算分配上，您更倾向于哪种思路？",
            vec![
                "硬装优先，软装从简".to_string(),
                "硬装软装均衡投入".to_string(),
                "软装出彩，硬装克制".to_string(),
            ],
        ),
        Question::single_choice(
            "base_maintenance",
            "日常维护上，您能接受的打理成本是？",
            vec![
                "越省心越好".to_string(),
                "为效果可以接受适度打理".to_string(),
                "愿意精心维护".to_string(),
            ],
        ),
        Question::single_choice(
            "base_lighting",
            "您更喜欢哪种光环境氛围？",
            vec![
                "明亮通透".to_string(),
                "柔和温暖".to_string(),
                "分区分层的情景照明".to_string(),
            ],
        ),
        Question::multiple_choice(
            "base_functions",
            "以下哪些功能对您最重要？",
            vec![
                "充足收纳".to_string(),
                "独立书房".to_string(),
                "开放厨房".to_string(),
                "儿童活动区".to_string(),
                "会客展示".to_string(),
            ],
        ),
        Question::multiple_choice(
            "base_materials",
            "以下哪些材质是您希望在家中出现的？",
            vec![
                "原木".to_string(),
                "石材".to_string(),
                "金属".to_string(),
                "布艺".to_string(),
                "微水泥".to_string(),
            ],
        ),
        Question::open("base_scene", "请描述一个您理想中的居家场景。"),
        Question::open("base_dislike", "过往居住经历中，最想避免重演的问题是什么？"),
    ]
}

/// Baseline questionnaire used when generation is unavailable.
fn baseline_questionnaire() -> Questionnaire {
    Questionnaire {
        introduction: "为了校准设计方向，请回答以下问题。".to_string(),
        questions: baseline_questions(),
        note: "问卷为通用版本，建议补充具体偏好。".to_string(),
        generation_rationale: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::llm::mock::MockChatModel;
    use crate::catalog::standards::StandardsCatalog;
    use crate::domain::models::requirements::DesignChallengeSpectrum;

    fn agent_with(model: MockChatModel) -> CalibrationQuestionnaireAgent {
        CalibrationQuestionnaireAgent::new(
            Arc::new(model),
            Arc::new(PromptCatalog::builtin()),
            ConflictService::new(Some(StandardsCatalog::builtin())),
            IntentParser::new(),
            RetryPolicy::new(1, 1, 2),
        )
    }

    fn base_response() -> String {
        serde_json::to_string(&json!({
            "introduction": "为了校准设计方向，请回答以下问题。",
            "questions": [
                {"id": "q1", "text": "您偏好现代极简还是温润木质？", "question_type": "single_choice",
                 "options": ["现代极简", "温润木质"]},
                {"id": "q2", "text": "住宅中哪些功能最重要？", "question_type": "multiple_choice",
                 "options": ["收纳", "书房", "茶室"]},
                {"id": "q3", "text": "描述一个理想的周末居家场景。", "question_type": "open_ended"}
            ]
        }))
        .unwrap()
    }

    fn state_with_brief(raw: &str) -> SessionState {
        let mut state = SessionState::new(raw);
        let mut brief = StructuredRequirements {
            project_task: "住宅设计".to_string(),
            ..Default::default()
        };
        brief.expert_handoff.design_challenge_spectrum = DesignChallengeSpectrum {
            pole_a: "极致展示".to_string(),
            pole_b: "生活便利".to_string(),
            intermediate_stances: vec!["七分展示三分实用".to_string()],
        };
        state.structured_requirements = Some(brief);
        state
    }

    #[tokio::test]
    async fn test_generation_injects_philosophy_and_conflict() {
        let agent = agent_with(MockChatModel::scripted(vec![base_response()]));
        // Budget mentioned and clearly below the residential floor.
        let state = state_with_brief("深圳200㎡住宅，预算40万");

        let outcome = agent.run(&state, None).await.unwrap();
        match outcome {
            NodeOutcome::Suspend { delta, interrupt } => {
                let q = delta.calibration_questionnaire.unwrap();
                assert!(q.questions.iter().any(|x| x.class == QuestionClass::Philosophy));
                assert!(q
                    .questions
                    .iter()
                    .any(|x| matches!(x.class, QuestionClass::Conflict(_))));
                assert!(q.is_type_ordered());
                assert_eq!(
                    interrupt.interaction_type,
                    InteractionType::CalibrationQuestionnaire
                );
            }
            other => panic!("expected suspend, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_no_conflict_question_for_unmentioned_domain() {
        let agent = agent_with(MockChatModel::scripted(vec![base_response()]));
        // No budget/timeline/space mention in the raw input.
        let state = state_with_brief("为年轻夫妇设计现代住宅");

        let outcome = agent.run(&state, None).await.unwrap();
        match outcome {
            NodeOutcome::Suspend { delta, .. } => {
                let q = delta.calibration_questionnaire.unwrap();
                assert!(!q
                    .questions
                    .iter()
                    .any(|x| matches!(x.class, QuestionClass::Conflict(_))));
            }
            other => panic!("expected suspend, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_transport_failure_falls_back_to_baseline() {
        let agent = agent_with(MockChatModel::failing());
        let state = state_with_brief("住宅设计");

        let outcome = agent.run(&state, None).await.unwrap();
        match outcome {
            NodeOutcome::Suspend { delta, .. } => {
                let q = delta.calibration_questionnaire.unwrap();
                assert!((7..=10).contains(&q.questions.len()));
                assert!(q.is_type_ordered());
            }
            other => panic!("expected suspend, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_short_generation_topped_up_to_question_floor() {
        // base_response carries only three questions; the emitted
        // questionnaire still lands in the 7-10 band, keeping the
        // generated ones.
        let agent = agent_with(MockChatModel::scripted(vec![base_response()]));
        let state = state_with_brief("为年轻夫妇设计现代住宅");

        let outcome = agent.run(&state, None).await.unwrap();
        match outcome {
            NodeOutcome::Suspend { delta, .. } => {
                let q = delta.calibration_questionnaire.unwrap();
                assert!((7..=10).contains(&q.questions.len()));
                for id in ["q1", "q2", "q3"] {
                    assert!(q.questions.iter().any(|x| x.id == id), "missing {id}");
                }
                assert!(q.is_type_ordered());
            }
            other => panic!("expected suspend, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_answers_produce_summary_and_advance() {
        let agent = agent_with(MockChatModel::scripted(vec![]));
        let mut state = state_with_brief("住宅设计");
        state.calibration_questionnaire = Some(Questionnaire {
            questions: vec![Question::single_choice(
                "q1",
                "您偏好哪种风格？",
                vec!["现代极简".into(), "温润木质".into()],
            )],
            ..Default::default()
        });

        let resume = ResumeValue::Answers(vec![QuestionAnswer {
            question_id: "q1".to_string(),
            answer: AnswerValue::Text("现代极简".to_string()),
        }]);
        let outcome = agent.run(&state, Some(&resume)).await.unwrap();
        match outcome {
            NodeOutcome::Advance { delta, goto } => {
                assert_eq!(goto, WorkflowStage::FeasibilityAnalyst);
                assert!(delta.calibration_processed);
                let summary = delta.questionnaire_summary.unwrap();
                assert!(!summary.skipped);
                assert!(summary.summary_text.contains("现代极简"));
            }
            other => panic!("expected advance, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_answers_resuspend() {
        let agent = agent_with(MockChatModel::scripted(vec![]));
        let mut state = state_with_brief("住宅设计");
        state.calibration_questionnaire = Some(Questionnaire {
            questions: vec![Question::open("q1", "理想场景？")],
            ..Default::default()
        });

        let resume = ResumeValue::Answers(vec![QuestionAnswer {
            question_id: "q1".to_string(),
            answer: AnswerValue::Text("   ".to_string()),
        }]);
        let outcome = agent.run(&state, Some(&resume)).await.unwrap();
        match outcome {
            NodeOutcome::Suspend { interrupt, .. } => {
                assert!(interrupt.message.contains("答案为空"));
            }
            other => panic!("expected suspend, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_skip_marks_summary_skipped() {
        let agent = agent_with(MockChatModel::scripted(vec![]));
        let mut state = state_with_brief("住宅设计");
        state.calibration_questionnaire = Some(Questionnaire::default());

        let outcome = agent
            .run(&state, Some(&ResumeValue::text("skip")))
            .await
            .unwrap();
        match outcome {
            NodeOutcome::Advance { delta, goto } => {
                assert_eq!(goto, WorkflowStage::FeasibilityAnalyst);
                assert!(delta.questionnaire_summary.unwrap().skipped);
            }
            other => panic!("expected advance, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_processed_flag_short_circuits() {
        let agent = agent_with(MockChatModel::scripted(vec![]));
        let mut state = state_with_brief("住宅设计");
        state.calibration_processed = true;

        let outcome = agent.run(&state, None).await.unwrap();
        assert!(matches!(
            outcome,
            NodeOutcome::Advance {
                goto: WorkflowStage::FeasibilityAnalyst,
                ..
            }
        ));
    }

    #[test]
    fn test_trimming_keeps_high_priority() {
        let mut q = Questionnaire::default();
        for i in 0..15 {
            q.questions
                .push(Question::open(format!("core_{i}"), format!("问题{i}")));
        }
        q.questions.push(
            Question::single_choice("conflict_0", "预算冲突？", vec!["a".into()])
                .with_class(QuestionClass::Conflict(
                    crate::domain::models::feasibility::ConflictSeverity::Critical,
                )),
        );
        trim_by_priority(&mut q);
        assert!(q.questions.len() < 16);
        assert!(q.questions.iter().any(|x| x.id == "conflict_0"));
    }

    #[test]
    fn test_order_by_type_is_stable() {
        let mut q = Questionnaire {
            questions: vec![
                Question::open("o1", "open"),
                Question::single_choice("s1", "single", vec!["x".into()]),
                Question::multiple_choice("m1", "multi", vec!["y".into()]),
                Question::single_choice("s2", "single2", vec!["z".into()]),
            ],
            ..Default::default()
        };
        order_by_type(&mut q);
        let ids: Vec<&str> = q.questions.iter().map(|x| x.id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "s2", "m1", "o1"]);
    }

    #[test]
    fn test_normalize_collapses_single_element_multi() {
        let q = Questionnaire {
            questions: vec![Question::single_choice("q1", "风格？", vec!["极简".into()])],
            ..Default::default()
        };
        let normalized = normalize_answers(
            &q,
            vec![
                QuestionAnswer {
                    question_id: "q1".into(),
                    answer: AnswerValue::Multi(vec!["极简".into()]),
                },
                QuestionAnswer {
                    question_id: "ghost".into(),
                    answer: AnswerValue::Text("x".into()),
                },
            ],
        );
        assert_eq!(normalized.len(), 1);
        assert_eq!(normalized[0].answer, AnswerValue::Text("极简".into()));
    }
}
