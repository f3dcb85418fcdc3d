//! Atelier CLI: start, resume, and inspect analysis sessions.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use crate::adapters::checkpoint::SqliteCheckpointStore;
use crate::adapters::llm::anthropic::{AnthropicChatModel, AnthropicConfig};
use crate::adapters::search::recorder::ToolCallRecorder;
use crate::agents::expert::ExpertExecutor;
use crate::catalog::constraints::ConstraintCatalog;
use crate::catalog::prompts::PromptCatalog;
use crate::catalog::roles::RoleCatalog;
use crate::catalog::standards::StandardsCatalog;
use crate::catalog::weights::WeightsConfig;
use crate::domain::models::interrupt::{InterruptPayload, ResumeValue};
use crate::domain::ports::{ChatModel, Checkpoint};
use crate::infrastructure::config::EngineConfig;
use crate::infrastructure::fallback::FallbackRecorder;
use crate::orchestrator::{
    standard_graph, AnalysisEngine, GraphDependencies, SessionOptions, SessionOutcome,
};
use crate::services::retry::RetryPolicy;

#[derive(Parser, Debug)]
#[command(
    name = "atelier",
    version,
    about = "Multi-agent analysis engine for interior design project briefs"
)]
pub struct Cli {
    /// Emit machine-readable JSON instead of human-readable text
    #[arg(long, global = true)]
    pub json: bool,

    /// Config file path; defaults to the .atelier/ hierarchy
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a new analysis session from a project brief
    Analyze {
        /// Brief text; read from stdin when omitted
        brief: Option<String>,

        /// Skip the calibration questionnaire
        #[arg(long)]
        skip_questionnaire: bool,

        /// Skip the red/blue review rounds
        #[arg(long)]
        skip_review: bool,
    },
    /// Resume a suspended session with a response
    Resume {
        /// Session ID
        id: Uuid,

        /// Free-text response, e.g. "approve" or a modification note
        #[arg(short, long, conflicts_with = "payload")]
        text: Option<String>,

        /// JSON resume payload (answers array or command object); prefix
        /// with @ to read from a file
        #[arg(short, long)]
        payload: Option<String>,
    },
    /// Show the latest checkpoint of a session
    Show {
        /// Session ID
        id: Uuid,
    },
}

pub async fn execute(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => EngineConfig::load_from_file(path)?,
        None => EngineConfig::load()?,
    };
    let engine = build_engine(&config).await?;

    match cli.command {
        Commands::Analyze {
            brief,
            skip_questionnaire,
            skip_review,
        } => {
            let brief = match brief {
                Some(text) => text,
                None => read_stdin()?,
            };
            if brief.trim().is_empty() {
                bail!("the project brief is empty");
            }
            let handle = engine
                .start_session_with(
                    brief,
                    SessionOptions {
                        skip_questionnaire,
                        skip_review,
                    },
                )
                .await?;
            render_outcome(handle.session_id, &handle.outcome, cli.json)
        }
        Commands::Resume { id, text, payload } => {
            let resume = parse_resume(text, payload)?;
            let handle = engine.resume_session(id, resume).await?;
            render_outcome(handle.session_id, &handle.outcome, cli.json)
        }
        Commands::Show { id } => {
            let checkpoint = engine.session(id).await?;
            render_checkpoint(&checkpoint, cli.json)
        }
    }
}

async fn build_engine(config: &EngineConfig) -> Result<AnalysisEngine> {
    let model: Arc<dyn ChatModel> = Arc::new(AnthropicChatModel::new(AnthropicConfig {
        api_key: config.llm.api_key.clone(),
        model: config.llm.model.clone(),
        base_url: config.llm.base_url.clone(),
        timeout_secs: config.llm.timeout_secs,
    })?);

    let prompts = Arc::new(match &config.catalog.prompts_dir {
        Some(dir) => PromptCatalog::load_dir(dir)?,
        None => PromptCatalog::builtin(),
    });
    let roles = match &config.catalog.roles_dir {
        Some(dir) => RoleCatalog::load_dir(dir)?,
        None => RoleCatalog::builtin(),
    };
    roles.validate()?;
    let constraints = match &config.catalog.constraints_file {
        Some(path) => ConstraintCatalog::load_file(path)?,
        None => ConstraintCatalog::builtin(),
    };
    let weights = match &config.catalog.weights_file {
        Some(path) => WeightsConfig::load_file(path)?,
        None => WeightsConfig::builtin(),
    };
    let standards = match &config.catalog.standards_file {
        Some(path) => StandardsCatalog::load_or_warn(path),
        None => Some(StandardsCatalog::builtin()),
    };

    let retry = RetryPolicy::new(
        config.retry.max_retries,
        config.retry.initial_backoff_ms,
        config.retry.max_backoff_ms,
    );
    let graph = standard_graph(GraphDependencies {
        model: model.clone(),
        prompts,
        roles: Arc::new(roles),
        constraints: Arc::new(constraints),
        weights,
        standards,
        fallback: Arc::new(FallbackRecorder::new(config.fallback_log_dir.clone())),
        retry: retry.clone(),
    });

    let recorder = Arc::new(ToolCallRecorder::new(config.tool_call_log.clone()));
    let executor = Arc::new(ExpertExecutor::new(model, None, recorder, retry));
    let checkpoints = Arc::new(SqliteCheckpointStore::connect(&config.database.url).await?);

    Ok(AnalysisEngine::new(
        graph,
        executor,
        checkpoints,
        config.executor.max_parallel,
    ))
}

fn read_stdin() -> Result<String> {
    let mut buf = String::new();
    std::io::stdin()
        .read_to_string(&mut buf)
        .context("failed to read the brief from stdin")?;
    Ok(buf)
}

/// Build a resume value from `--text` or `--payload`. Payloads are JSON:
/// a questionnaire answer array, a command object, or a bare string.
fn parse_resume(text: Option<String>, payload: Option<String>) -> Result<ResumeValue> {
    if let Some(text) = text {
        return Ok(ResumeValue::text(text));
    }
    let Some(payload) = payload else {
        bail!("provide a response via --text or --payload");
    };
    let raw = if let Some(path) = payload.strip_prefix('@') {
        std::fs::read_to_string(path).with_context(|| format!("failed to read {path}"))?
    } else {
        payload
    };
    serde_json::from_str(&raw).context("resume payload is not valid JSON")
}

fn render_outcome(session_id: Uuid, outcome: &SessionOutcome, json: bool) -> Result<()> {
    match outcome {
        SessionOutcome::Suspended(interrupt) => {
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "session_id": session_id,
                        "status": "suspended",
                        "interrupt": interrupt,
                    }))?
                );
            } else {
                print_interrupt(session_id, interrupt);
            }
        }
        SessionOutcome::Completed(report) => {
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "session_id": session_id,
                        "status": "completed",
                        "report": report,
                    }))?
                );
            } else {
                println!("会话 {session_id} 分析完成\n");
                println!("{}", report.executive_summary);
                if !report.role_deliverables.is_empty() {
                    println!();
                    for (role_id, deliverable) in &report.role_deliverables {
                        println!("── {role_id}\n{deliverable}\n");
                    }
                }
                if report.partial {
                    println!("（注意：聚合未完全成功，以上为部分报告）");
                }
            }
        }
    }
    Ok(())
}

fn print_interrupt(session_id: Uuid, interrupt: &InterruptPayload) {
    println!(
        "会话 {session_id} 等待输入（{:?}）",
        interrupt.interaction_type
    );
    println!("\n{}\n", interrupt.message);
    if !interrupt.body.is_null() {
        if let Ok(body) = serde_json::to_string_pretty(&interrupt.body) {
            println!("{body}\n");
        }
    }
    if !interrupt.options.is_empty() {
        println!("可选操作：");
        for (key, label) in &interrupt.options {
            println!("  {key} — {label}");
        }
    }
    println!("\n使用 `atelier resume {session_id} --text <回复>` 继续");
}

fn render_checkpoint(checkpoint: &Checkpoint, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(checkpoint)?);
        return Ok(());
    }
    let state = &checkpoint.state;
    println!("会话 {}", state.session_id);
    println!("  当前阶段：{}", state.current_stage);
    println!("  生命周期：{:?}", state.analysis_stage);
    println!("  更新时间：{}", state.updated_at);
    if let Some(analysis) = &state.strategic_analysis {
        println!("  已选专家：{}", analysis.role_ids().join("、"));
    }
    if state.total_batches > 0 {
        println!(
            "  批次进度：{}/{}",
            state.completed_batches, state.total_batches
        );
    }
    if let Some(interrupt) = &checkpoint.pending_interrupt {
        println!("  等待输入：{}", interrupt.message);
    }
    if let Some(error) = &state.error {
        println!("  最近错误：{error}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::interrupt::ResumeCommand;

    #[test]
    fn test_parse_resume_prefers_text() {
        let value = parse_resume(Some("approve".to_string()), None).unwrap();
        assert_eq!(value, ResumeValue::Text("approve".to_string()));
    }

    #[test]
    fn test_parse_resume_command_payload() {
        let value = parse_resume(
            None,
            Some(r#"{"action": "modify", "feedback": "增加收纳"}"#.to_string()),
        )
        .unwrap();
        match value {
            ResumeValue::Command(ResumeCommand { action, feedback, .. }) => {
                assert_eq!(action.as_deref(), Some("modify"));
                assert_eq!(feedback.as_deref(), Some("增加收纳"));
            }
            other => panic!("expected command, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_resume_answers_payload() {
        let value = parse_resume(
            None,
            Some(r#"[{"question_id": "base_style", "answer": "现代简约"}]"#.to_string()),
        )
        .unwrap();
        assert!(matches!(value, ResumeValue::Answers(ref a) if a.len() == 1));
    }

    #[test]
    fn test_parse_resume_requires_input() {
        assert!(parse_resume(None, None).is_err());
    }

    #[test]
    fn test_cli_parses_analyze_flags() {
        let cli = Cli::parse_from([
            "atelier",
            "analyze",
            "老破小改造",
            "--skip-questionnaire",
        ]);
        match cli.command {
            Commands::Analyze {
                brief,
                skip_questionnaire,
                skip_review,
            } => {
                assert_eq!(brief.as_deref(), Some("老破小改造"));
                assert!(skip_questionnaire);
                assert!(!skip_review);
            }
            other => panic!("expected analyze, got {other:?}"),
        }
    }
}
