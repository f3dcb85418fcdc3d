//! Prompt catalog: immutable prompt templates loaded from on-disk YAML.
//!
//! One file per agent prompt. Required top-level keys per file: `version`,
//! `description`, and `system_prompt` (or `prompt`); optional
//! `task_description_template`, `output_example`, `business_config`.
//! The four core configs are validated at boot; missing any is fatal.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use tracing::debug;

use crate::domain::errors::{EngineError, EngineResult};

/// Prompt configs that must exist for the engine to boot.
pub const CORE_PROMPT_CONFIGS: [&str; 4] = [
    "requirements_analyst_lite",
    "review_agents",
    "result_aggregator",
    "dynamic_project_director_v2",
];

/// One prompt file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    pub version: String,
    pub description: String,

    #[serde(default)]
    pub system_prompt: Option<String>,

    /// Legacy alias for `system_prompt`.
    #[serde(default)]
    pub prompt: Option<String>,

    #[serde(default)]
    pub task_description_template: Option<String>,

    #[serde(default)]
    pub output_example: Option<String>,

    #[serde(default)]
    pub business_config: Option<serde_json::Value>,
}

impl PromptConfig {
    /// The effective system prompt; `system_prompt` wins over `prompt`.
    pub fn effective_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref().or(self.prompt.as_deref())
    }
}

/// Immutable, boot-validated prompt catalog.
#[derive(Debug, Clone)]
pub struct PromptCatalog {
    configs: HashMap<String, PromptConfig>,
}

impl PromptCatalog {
    /// Load every `*.yaml`/`*.yml` file in `dir`, keyed by file stem.
    pub fn load_dir(dir: impl AsRef<Path>) -> EngineResult<Self> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir).map_err(|e| {
            EngineError::ContractViolation(format!(
                "cannot read prompt catalog dir {}: {e}",
                dir.display()
            ))
        })?;

        let mut configs = HashMap::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                EngineError::ContractViolation(format!("prompt catalog read error: {e}"))
            })?;
            let path = entry.path();
            let is_yaml = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e == "yaml" || e == "yml");
            if !is_yaml {
                continue;
            }
            let name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            let text = std::fs::read_to_string(&path).map_err(|e| {
                EngineError::ContractViolation(format!(
                    "cannot read prompt file {}: {e}",
                    path.display()
                ))
            })?;
            let config: PromptConfig = serde_yaml::from_str(&text).map_err(|e| {
                EngineError::ContractViolation(format!(
                    "corrupt prompt file {}: {e}",
                    path.display()
                ))
            })?;
            if config.effective_prompt().is_none() {
                return Err(EngineError::ContractViolation(format!(
                    "prompt file {} has neither `system_prompt` nor `prompt`",
                    path.display()
                )));
            }
            debug!(prompt = %name, version = %config.version, "loaded prompt config");
            configs.insert(name, config);
        }

        let catalog = Self { configs };
        catalog.validate_core()?;
        Ok(catalog)
    }

    /// Built-in defaults, used by tests and as a no-config fallback.
    pub fn builtin() -> Self {
        let mut configs = HashMap::new();
        let mut add = |name: &str, description: &str, prompt: &str| {
            configs.insert(
                name.to_string(),
                PromptConfig {
                    version: "builtin-1".to_string(),
                    description: description.to_string(),
                    system_prompt: Some(prompt.to_string()),
                    prompt: None,
                    task_description_template: None,
                    output_example: None,
                    business_config: None,
                },
            );
        };

        add(
            "requirements_analyst_lite",
            "Structure a raw design brief",
            "你是资深室内设计需求分析师。把用户的原始需求整理为结构化简报，\
             输出 JSON：project_task, project_type, project_overview, core_objectives, \
             narrative_characters, physical_contexts, design_challenge, core_tension, \
             resource_constraints, constraints_opportunities, expert_handoff。\
             用户需求：{user_specific_request}",
        );
        add(
            "questionnaire_agent",
            "Generate the calibration questionnaire",
            "你是设计调研顾问。基于结构化简报生成 7-10 个校准问题，\
             输出 JSON：{\"questions\": [...], \"generation_rationale\": \"...\"}。\
             每个问题含 id, text, question_type(single_choice|multiple_choice|open_ended), options。",
        );
        add(
            "dynamic_project_director_v2",
            "Select the expert team and distribute tasks",
            "你是项目总监。根据结构化简报与角色目录选择 3-8 位专家并分配交付物，\
             输出 JSON：{\"selected_roles\": [...], \"task_distribution\": {...}, \"reasoning\": \"...\"}。\
             必须包含至少一个 V4 研究类角色。",
        );
        add(
            "quality_preflight",
            "Per-expert execution risk assessment",
            "你是质量预检员。评估该专家任务的执行风险，输出 JSON：\
             {\"risk_assessment\": {\"requirement_clarity\": ..., \"task_complexity\": ..., \
             \"data_dependency\": ..., \"overall_risk_score\": 0-100}, \"risk_points\": [...], \
             \"quality_checklist\": [...], \"capability_gaps\": [...], \"mitigation_suggestions\": [...]}",
        );
        add(
            "review_agents",
            "Red team, blue team, and client review prompts",
            "评审三方协作。红队找问题，蓝队过滤误报，客户代表做最终裁决。\
             红队输出 {\"improvements\": [{issue_id, agent_id, issue, expected, priority}]}；\
             蓝队输出 {\"validations\": [{issue_id, stance, reasoning, improvement_suggestion}], \"strengths\": [...]}；\
             客户输出 {\"accepted_improvements\": [...], \"rejected_improvements\": [...], \"final_decision\": \"...\"}",
        );
        add(
            "result_aggregator",
            "Fold all outputs into the final report",
            "你是报告撰写人。把专家产出、评审结论与质疑闭环汇总为最终报告，\
             输出 JSON：{\"executive_summary\": ..., \"role_deliverables\": {...}, \
             \"final_ruling\": ..., \"confidence\": 0-1}",
        );
        add(
            "user_question",
            "Post-completion Q&A over the final report",
            "基于已生成的最终报告回答用户的追问，引用报告内容，不新增分析。",
        );

        Self { configs }
    }

    /// Fatal-at-boot check that the four core configs are present.
    pub fn validate_core(&self) -> EngineResult<()> {
        for name in CORE_PROMPT_CONFIGS {
            if !self.configs.contains_key(name) {
                return Err(EngineError::ContractViolation(format!(
                    "missing required core prompt config: {name}"
                )));
            }
        }
        Ok(())
    }

    /// Fatal-at-first-use lookup.
    pub fn get(&self, name: &str) -> EngineResult<&PromptConfig> {
        self.configs.get(name).ok_or_else(|| {
            EngineError::ContractViolation(format!("unknown prompt config: {name}"))
        })
    }

    pub fn names(&self) -> Vec<&str> {
        self.configs.keys().map(String::as_str).collect()
    }
}

/// Process-wide registry: one `PromptCatalog` instance per config path.
/// Protects against concurrent double-init the way the source kept a
/// per-path singleton.
static REGISTRY: OnceLock<Mutex<HashMap<PathBuf, Arc<PromptCatalog>>>> = OnceLock::new();

/// Load (or return the cached) catalog for a config path.
pub fn shared_catalog(dir: impl AsRef<Path>) -> EngineResult<Arc<PromptCatalog>> {
    let dir = dir.as_ref().to_path_buf();
    let registry = REGISTRY.get_or_init(|| Mutex::new(HashMap::new()));
    let mut guard = registry
        .lock()
        .map_err(|_| EngineError::Internal("prompt registry poisoned".to_string()))?;
    if let Some(existing) = guard.get(&dir) {
        return Ok(Arc::clone(existing));
    }
    let catalog = Arc::new(PromptCatalog::load_dir(&dir)?);
    guard.insert(dir, Arc::clone(&catalog));
    Ok(catalog)
}
