//! Weft CLI binary: run, resume, validate, and inspect sessions.
//!
//! Subcommands: `run` (execute a workflow document), `resume` (answer a
//! pending manual gate), `validate` (capability gate only), `sessions`
//! (list/show/delete/clean). Exit codes follow the engine's deterministic
//! mapping; 20 signals an orderly HITL pause, not a failure.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use cli::{load_stub_factory, EventPrinter};
use weft::agent::runtime::ResolvedRuntime;
use weft::engine::{Engine, RunOutcome};
use weft::error::{EngineError, EXIT_PAUSED};
use weft::llm::{ModelClient, ModelError, ModelFactory};
use weft::session::{ResumeDecision, SessionStatus, SessionStore};
use weft::spec::load;

#[derive(Parser, Debug)]
#[command(name = "weft")]
#[command(about = "Weft — declarative agentic workflows")]
struct Args {
    #[command(subcommand)]
    cmd: Command,

    /// Emit events and results as JSON lines
    #[arg(long, global = true)]
    json: bool,

    /// Log node-level progress at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Session store root (default: .weft)
    #[arg(long, global = true, value_name = "DIR")]
    sessions_root: Option<PathBuf>,

    /// Artifact output directory (default: artifacts)
    #[arg(long, global = true, value_name = "DIR")]
    output_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute a workflow document
    Run {
        spec: PathBuf,
        /// Input overrides as key=value (repeatable)
        #[arg(short = 'i', long = "input", value_name = "KEY=VALUE")]
        inputs: Vec<String>,
        /// Deterministic stub model script (offline runs)
        #[arg(long, value_name = "FILE")]
        stub: Option<PathBuf>,
        /// Overwrite existing artifacts
        #[arg(long)]
        force: bool,
    },
    /// Resume a paused session with a gate decision
    Resume {
        session_id: String,
        #[arg(long, conflicts_with_all = ["reject", "modify"])]
        approve: bool,
        #[arg(long, conflicts_with = "modify")]
        reject: bool,
        #[arg(long)]
        modify: bool,
        /// Feedback for reject (optional) or modify (required)
        #[arg(long, value_name = "TEXT")]
        feedback: Option<String>,
        #[arg(long, value_name = "FILE")]
        stub: Option<PathBuf>,
        #[arg(long)]
        force: bool,
    },
    /// Parse a document and run the capability gate only
    Validate { spec: PathBuf },
    /// Inspect and manage stored sessions
    Sessions {
        #[command(subcommand)]
        cmd: SessionsCmd,
    },
}

#[derive(Subcommand, Debug)]
enum SessionsCmd {
    /// List sessions, newest first
    List {
        /// Filter: running | paused | completed | failed
        #[arg(long)]
        status: Option<String>,
    },
    /// Show one session's metadata and pending interrupt
    Show { session_id: String },
    /// Delete one session
    Delete { session_id: String },
    /// Remove sessions not updated within the given number of days
    Clean {
        #[arg(long = "older-than-days", value_name = "DAYS")]
        older_than_days: i64,
        /// Preserve completed sessions regardless of age
        #[arg(long)]
        keep_completed: bool,
    },
}

/// Factory used when no stub is given: fails at first client build with a
/// pointer at the embedding story.
struct NoTransportFactory;

impl ModelFactory for NoTransportFactory {
    fn build(&self, runtime: &ResolvedRuntime) -> Result<Arc<dyn ModelClient>, ModelError> {
        Err(ModelError::Unavailable(format!(
            "{} {} (this binary bundles no provider transports; embed weft with a ModelFactory or pass --stub)",
            runtime.provider.as_str(),
            runtime.model_id
        )))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let _ = env_config::load_and_apply("weft", None);
    cli::logging::init(args.verbose);

    let code = match dispatch(&args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {}", e);
            e.exit_code()
        }
    };
    ExitCode::from(code.clamp(0, 255) as u8)
}

async fn dispatch(args: &Args) -> Result<i32, EngineError> {
    match &args.cmd {
        Command::Run {
            spec,
            inputs,
            stub,
            force,
        } => {
            let (parsed, snapshot) = load::from_path(spec)?;
            let engine = build_engine(args, stub.as_deref(), *force)?;
            let overrides = parse_inputs(inputs)?;
            let outcome = engine.run(parsed, snapshot, &overrides).await?;
            Ok(report_outcome(args, outcome))
        }
        Command::Resume {
            session_id,
            approve,
            reject,
            modify,
            feedback,
            stub,
            force,
        } => {
            let decision = decision_from_flags(*approve, *reject, *modify, feedback.clone())?;
            let engine = build_engine(args, stub.as_deref(), *force)?;
            let outcome = engine.resume(session_id, decision).await?;
            Ok(report_outcome(args, outcome))
        }
        Command::Validate { spec } => {
            let (parsed, _) = load::from_path(spec)?;
            let engine = build_engine(args, None, false)?;
            let report = engine.validate(&parsed);
            if report.is_fatal() {
                return Err(EngineError::Unsupported(report));
            }
            print!("{}", report);
            println!("ok: {} is runnable", spec.display());
            Ok(0)
        }
        Command::Sessions { cmd } => {
            let engine = build_engine(args, None, false)?;
            sessions_cmd(args, engine.store(), cmd).await
        }
    }
}

fn build_engine(
    args: &Args,
    stub: Option<&std::path::Path>,
    force: bool,
) -> Result<Engine, EngineError> {
    let factory: Arc<dyn ModelFactory> = match stub {
        Some(path) => Arc::new(
            load_stub_factory(path).map_err(|e| EngineError::Usage(e.to_string()))?,
        ),
        None => Arc::new(NoTransportFactory),
    };
    let mut builder = Engine::builder()
        .model_factory(factory)
        .force_artifacts(force)
        .subscribe(Arc::new(EventPrinter::new(args.json)));
    if let Some(root) = &args.sessions_root {
        builder = builder.session_root(root);
    }
    if let Some(dir) = &args.output_dir {
        builder = builder.output_dir(dir);
    }
    builder.build()
}

fn parse_inputs(raw: &[String]) -> Result<Vec<(String, String)>, EngineError> {
    raw.iter().map(|s| load::parse_override(s)).collect()
}

fn decision_from_flags(
    approve: bool,
    reject: bool,
    modify: bool,
    feedback: Option<String>,
) -> Result<ResumeDecision, EngineError> {
    match (approve, reject, modify) {
        (true, false, false) => Ok(ResumeDecision::Approve),
        (false, true, false) => Ok(ResumeDecision::Reject { feedback }),
        (false, false, true) => match feedback {
            Some(feedback) => Ok(ResumeDecision::Modify { feedback }),
            None => Err(EngineError::Usage(
                "--modify needs --feedback".to_string(),
            )),
        },
        _ => Err(EngineError::Usage(
            "pass exactly one of --approve, --reject, --modify".to_string(),
        )),
    }
}

fn report_outcome(args: &Args, outcome: RunOutcome) -> i32 {
    match outcome {
        RunOutcome::Completed {
            session_id,
            last_response,
            artifacts,
        } => {
            if args.json {
                println!(
                    "{}",
                    serde_json::json!({
                        "result": "completed",
                        "session_id": session_id,
                        "last_response": last_response,
                        "artifacts": artifacts,
                    })
                );
            } else {
                println!("{}", last_response);
            }
            0
        }
        RunOutcome::Paused {
            session_id,
            interrupt,
        } => {
            if args.json {
                println!(
                    "{}",
                    serde_json::json!({
                        "result": "paused",
                        "session_id": session_id,
                        "gate_id": interrupt.gate_id,
                        "prompt": interrupt.prompt,
                    })
                );
            } else {
                println!(
                    "paused at gate {:?}: {}\nresume with: weft resume {} --approve",
                    interrupt.gate_id, interrupt.prompt, session_id
                );
            }
            EXIT_PAUSED
        }
    }
}

async fn sessions_cmd(
    args: &Args,
    store: &Arc<dyn SessionStore>,
    cmd: &SessionsCmd,
) -> Result<i32, EngineError> {
    match cmd {
        SessionsCmd::List { status } => {
            let filter = match status {
                Some(s) => Some(SessionStatus::parse(s).ok_or_else(|| {
                    EngineError::Usage(format!(
                        "unknown status {:?} (running, paused, completed, failed)",
                        s
                    ))
                })?),
                None => None,
            };
            let sessions = store.list(filter).await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&sessions).unwrap_or_default());
            } else {
                for s in sessions {
                    println!(
                        "{}  {:9}  {}  {} tokens  updated {}",
                        s.session_id,
                        s.metadata.status.as_str(),
                        s.metadata.workflow_name,
                        s.token_usage.total,
                        s.metadata.updated_at.to_rfc3339(),
                    );
                }
            }
            Ok(0)
        }
        SessionsCmd::Show { session_id } => {
            let session = store.load(session_id).await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&session).unwrap_or_default());
            } else {
                println!("session   {}", session.session_id);
                println!("workflow  {} ({})", session.metadata.workflow_name, session.metadata.pattern_type);
                println!("status    {}", session.metadata.status.as_str());
                println!("tokens    {}", session.token_usage.total);
                println!("updated   {}", session.metadata.updated_at.to_rfc3339());
                if let Some(reason) = &session.metadata.failure_reason {
                    println!("failure   {}", reason);
                }
                if let Some(interrupt) = &session.metadata.interrupt {
                    if interrupt.response.is_none() {
                        println!(
                            "interrupt_pending  gate {:?}: {}",
                            interrupt.gate_id, interrupt.prompt
                        );
                    }
                }
                for artifact in &session.artifacts_written {
                    println!("artifact  {}", artifact);
                }
            }
            Ok(0)
        }
        SessionsCmd::Delete { session_id } => {
            store.delete(session_id).await?;
            println!("deleted {}", session_id);
            Ok(0)
        }
        SessionsCmd::Clean {
            older_than_days,
            keep_completed,
        } => {
            let removed = store
                .cleanup(chrono::Duration::days(*older_than_days), *keep_completed)
                .await?;
            println!("removed {} session(s)", removed);
            Ok(0)
        }
    }
}
