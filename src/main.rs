//! openagi: run built-in tools from the command line behind the permission gate.
//!
//! Config: `~/.openagi/config.toml` (or `$OPENAGI_CONFIG_DIR`; a temp dir when
//! `OPENAGI_ENV`/`NODE_ENV` is `test`). Logs: stderr, `RUST_LOG`.

use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use openagi::auth::{self, ApiKeyStatus};
use openagi::config::{self, ConfigStore};
use openagi::logging;
use openagi::session::{RunEnv, SessionContext};
use openagi::tools::{
    ApprovalCallback, ExecutionEngine, PermissionGate, StaticApproval, TerminalApproval,
    ToolRegistry, build_default_registry,
};

#[derive(Parser, Debug)]
#[command(name = "openagi", version, about = "Permission-gated tool runner")]
struct Cli {
    /// Debug logging for this crate (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    debug: bool,
    /// Non-interactive: deny approval prompts, print only the final result.
    #[arg(short, long, global = true)]
    print: bool,
    /// Working directory for file and shell tools.
    #[arg(long, global = true, value_name = "PATH")]
    dir: Option<PathBuf>,
    #[arg(long, global = true)]
    verbose: bool,
    /// Model for this run instead of the configured `model-name`.
    #[arg(long, global = true, value_name = "MODEL")]
    model: Option<String>,
    /// Approve every tool invocation without asking.
    #[arg(long, global = true)]
    dangerously_skip_permissions: bool,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List enabled tools.
    Tools,
    /// Invoke one tool with a JSON input object.
    Run {
        tool: String,
        #[arg(value_name = "JSON")]
        input: Option<String>,
    },
    /// Show the stored config (API key masked).
    Config,
    /// Clear the onboarding flag; everything else is kept.
    ResetOnboarding,
    /// Approve the custom key in ANTHROPIC_API_KEY.
    ApproveKey,
    /// Reject the custom key in ANTHROPIC_API_KEY.
    RejectKey,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.debug);
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {}", auth::redact_secrets(&e.to_string()));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, Box<dyn Error>> {
    let env = RunEnv::from_env();
    let store = Arc::new(ConfigStore::open_for(&env));
    debug!(path = %store.path().display(), test = env.is_test(), "config store");

    if let Some(key) = &env.api_key {
        auth::register_secret(key);
    }
    if let Some(key) = &store.load().api_key {
        auth::register_secret(key);
    }

    match store.record_startup() {
        Ok(c) => debug!(num_startups = c.num_startups, "startup recorded"),
        Err(e) => warn!(error = %e, "could not record startup"),
    }
    let key_status = auth::auto_approve_api_key(
        &store,
        env.api_key.as_deref(),
        env.trusts_custom_api_key(),
    )?;
    if key_status == ApiKeyStatus::Pending {
        info!("custom API key is pending approval; run `openagi approve-key`");
    }

    let registry = Arc::new(build_default_registry(&env)?);

    match cli.command.as_ref().unwrap_or(&Command::Tools) {
        Command::Tools => {
            for line in registry.summaries() {
                println!("{line}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Run { tool, input } => {
            run_tool(&cli, &env, &store, registry, tool, input.as_deref()).await
        }
        Command::Config => {
            show_config(&store, &env)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::ResetOnboarding => {
            store.reset_onboarding()?;
            println!("onboarding reset");
            Ok(ExitCode::SUCCESS)
        }
        cmd @ (Command::ApproveKey | Command::RejectKey) => {
            let key = env
                .api_key
                .as_deref()
                .ok_or("ANTHROPIC_API_KEY is not set")?;
            let approve = matches!(cmd, Command::ApproveKey);
            let status = auth::record_api_key_decision(&store, key, approve)?;
            println!("…{}: {status}", auth::normalize_api_key(key));
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_tool(
    cli: &Cli,
    env: &RunEnv,
    store: &ConfigStore,
    registry: Arc<ToolRegistry>,
    tool: &str,
    input: Option<&str>,
) -> Result<ExitCode, Box<dyn Error>> {
    let input: Value = match input {
        Some(raw) => serde_json::from_str(raw)?,
        None => json!({}),
    };

    let cwd = match &cli.dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };
    let mut session =
        SessionContext::new(cwd.clone(), &store.load(), config::memory_dir_for(env));
    session.set_cwd(&cwd)?;
    if cli.verbose {
        session.set_verbose(true);
    }
    if let Some(model) = &cli.model {
        session.set_model(model.as_str());
    }
    debug!(model = session.model(), "session ready");

    let approver: Arc<dyn ApprovalCallback> = if cli.print {
        Arc::new(StaticApproval(false))
    } else {
        Arc::new(TerminalApproval::stdio())
    };
    let gate = if cli.dangerously_skip_permissions {
        PermissionGate::skipping_permissions()
    } else {
        PermissionGate::new()
    };
    let engine = ExecutionEngine::new(registry).with_gate(gate);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut ctx = session.tool_use_context(engine.registry(), approver);
    if !cli.print {
        ctx = ctx.with_progress(tx);
    } else {
        drop(tx);
    }
    let printer = tokio::spawn(async move {
        while let Some(p) = rx.recv().await {
            eprintln!("[{} #{}] {}", p.tool, p.seq, p.item.for_llm);
        }
    });

    let cancel = ctx.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let result = engine.invoke(tool, input, &ctx).await;
    drop(ctx);
    let _ = printer.await;

    match result {
        Ok(result) => {
            println!("{}", result.for_llm);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("error: {}", auth::redact_secrets(&e.to_string()));
            Ok(ExitCode::FAILURE)
        }
    }
}

fn show_config(store: &ConfigStore, env: &RunEnv) -> Result<(), Box<dyn Error>> {
    let mut shown = store.load();
    if let Some(key) = shown.api_key.as_mut() {
        *key = format!("…{}", auth::normalize_api_key(key));
    }
    println!("# {}", store.path().display());
    print!("{}", toml::to_string_pretty(&shown)?);
    let status = auth::api_key_status(store, env.api_key.as_deref());
    println!("# custom api key: {status}");
    Ok(())
}
