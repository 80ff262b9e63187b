use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;

use quill_core::{
    AgentLoop, ApprovalMode, Config, ContextTracker, CostTracker, EventKind, StopReason, channel,
};
use quill_llm::{AnyProvider, ClaudeProvider, CompatibleProvider, ProviderManager};
use quill_tools::{
    BashTool, CommandFilter, HttpRequestTool, ListDirectoryTool, PathRestrictions, ReadFileTool,
    SandboxExecutor, SearchFilesTool, ToolRegistry, WriteFileTool,
};

#[derive(Debug, Parser)]
#[command(name = "quill", version, about = "A sandboxed tool-using CLI agent")]
struct Cli {
    /// The task or question for the agent.
    query: Vec<String>,

    /// Path to the config file.
    #[arg(long, default_value = "quill.toml")]
    config: PathBuf,

    /// Override the configured approval mode.
    #[arg(long, value_enum)]
    approval_mode: Option<ApprovalModeArg>,

    /// Override the configured iteration cap.
    #[arg(long)]
    max_iterations: Option<usize>,

    /// Suppress per-iteration progress output.
    #[arg(long, short)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ApprovalModeArg {
    Auto,
    Manual,
    Disabled,
}

impl From<ApprovalModeArg> for ApprovalMode {
    fn from(arg: ApprovalModeArg) -> Self {
        match arg {
            ApprovalModeArg::Auto => Self::Auto,
            ApprovalModeArg::Manual => Self::Manual,
            ApprovalModeArg::Disabled => Self::Disabled,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_subscriber();

    let cli = Cli::parse();
    if cli.query.is_empty() {
        bail!("no query given; try `quill \"list the files in this directory\"`");
    }
    let query = cli.query.join(" ");

    let mut config = load_config(&cli.config)?;
    if let Some(mode) = cli.approval_mode {
        config.agent.approval_mode = mode.into();
    }
    if let Some(n) = cli.max_iterations {
        config.agent.max_iterations = n;
    }

    let providers = create_providers(&config)?;
    if providers.is_empty() {
        bail!(
            "no providers configured; add a [[providers]] table to {}",
            cli.config.display()
        );
    }
    let manager = ProviderManager::new(providers);
    tracing::info!(chain = ?manager.provider_names(), "provider chain ready");

    let sandbox = Arc::new(SandboxExecutor::new(
        CommandFilter::new(
            &config.security.whitelist,
            &config.security.blacklist,
            config.security.filter_mode,
        ),
        PathRestrictions::new(
            &config.security.no_access_paths,
            &config.security.read_only_paths,
        ),
    ));
    let registry = build_registry(&sandbox)?;

    let context = ContextTracker::new("")
        .with_max_tokens(manager.primary_context_window().unwrap_or(8192))
        .with_thresholds(
            config.context.compact_threshold,
            config.context.handoff_threshold,
        );
    let cost = CostTracker::new(config.cost.enabled, config.cost.max_daily_cents);

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received shutdown signal");
            signal_cancel.cancel();
        }
    });

    let (event_tx, mut event_rx) = channel();
    let quiet = cli.quiet;
    let printer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            if quiet {
                continue;
            }
            match event.kind {
                EventKind::IterationStart => {
                    eprintln!("[iteration {}]", event.iteration);
                }
                EventKind::ToolCall => {
                    eprintln!("  -> {}", event.tool_name.as_deref().unwrap_or("?"));
                }
                EventKind::ToolDenied => {
                    eprintln!(
                        "  !! {} denied: {}",
                        event.tool_name.as_deref().unwrap_or("?"),
                        event.message.as_deref().unwrap_or("")
                    );
                }
                EventKind::ProviderFallback => {
                    eprintln!("  ~~ {}", event.message.as_deref().unwrap_or("fallback"));
                }
                EventKind::ContextWarning => {
                    eprintln!("  ** {}", event.message.as_deref().unwrap_or(""));
                }
                EventKind::Error => {
                    eprintln!("  error: {}", event.message.as_deref().unwrap_or(""));
                }
                _ => {}
            }
        }
    });

    let mut agent = AgentLoop::new(manager, registry, config.agent.clone())
        .with_system_prompt(system_prompt())
        .with_context(context)
        .with_cost_tracker(cost)
        .with_events(event_tx)
        .with_approval(Box::new(prompt_for_approval))
        .with_cancellation(cancel);

    let outcome = agent.run(&query).await;
    drop(agent);
    let _ = printer.await;

    if let Some(text) = &outcome.final_response {
        println!("{text}");
    }
    match outcome.stop_reason {
        StopReason::Completed => Ok(()),
        reason => {
            let detail = outcome.error.unwrap_or_else(|| format!("{reason:?}"));
            bail!("agent stopped without a final answer: {detail}");
        }
    }
}

fn init_subscriber() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: &Path) -> anyhow::Result<Config> {
    if path.exists() {
        Config::load(path).with_context(|| format!("failed to load {}", path.display()))
    } else {
        Ok(Config::default())
    }
}

fn create_providers(config: &Config) -> anyhow::Result<Vec<AnyProvider>> {
    let mut providers = Vec::with_capacity(config.providers.len());
    for entry in &config.providers {
        let api_key = Config::resolve_api_key(entry)?;
        let provider = match entry.kind {
            quill_core::ProviderKind::Claude => {
                let key = api_key.context("claude provider requires api_key_env")?;
                AnyProvider::Claude(ClaudeProvider::new(
                    key,
                    entry.model.clone(),
                    entry.max_tokens,
                ))
            }
            quill_core::ProviderKind::Compatible => {
                let base_url = entry
                    .base_url
                    .clone()
                    .context("compatible provider requires base_url")?;
                let name = entry.name.clone().unwrap_or_else(|| "compatible".into());
                let mut provider = CompatibleProvider::new(
                    name,
                    base_url,
                    api_key,
                    entry.model.clone(),
                    entry.max_tokens,
                );
                if let Some(window) = entry.context_window {
                    provider = provider.with_context_window(window);
                }
                AnyProvider::Compatible(provider)
            }
        };
        providers.push(provider);
    }
    Ok(providers)
}

fn build_registry(sandbox: &Arc<SandboxExecutor>) -> anyhow::Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(BashTool::new(sandbox.clone())))?;
    registry.register(Box::new(ReadFileTool::new(sandbox.clone())))?;
    registry.register(Box::new(WriteFileTool::new(sandbox.clone())))?;
    registry.register(Box::new(ListDirectoryTool::new(sandbox.clone())))?;
    registry.register(Box::new(SearchFilesTool::new(sandbox.clone())))?;
    registry.register(Box::new(HttpRequestTool::new()))?;
    Ok(registry)
}

fn prompt_for_approval(call: &quill_tools::ToolCall) -> bool {
    let input = serde_json::Value::Object(call.input.clone());
    eprintln!("approval required: {} {input}", call.name);
    eprint!("allow? [y/N] ");
    let _ = std::io::stderr().flush();
    // The stdin read blocks until a keypress; hand this worker thread back
    // to the runtime while we wait.
    let line = tokio::task::block_in_place(|| {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).map(|_| line)
    });
    line.as_deref().is_ok_and(is_affirmative)
}

fn is_affirmative(line: &str) -> bool {
    matches!(line.trim(), "y" | "Y" | "yes")
}

fn system_prompt() -> String {
    format!(
        "You are quill v{}, a command-line agent. You can run shell commands, \
         read and write files, search the filesystem, and make HTTP requests \
         through the tools provided. Use tools when the task needs them, and \
         reply with a final plain-text answer when you are done. Be concise.",
        env!("CARGO_PKG_VERSION")
    )
}

#[cfg(test)]
mod tests {
    use super::is_affirmative;

    #[test]
    fn approval_accepts_only_yes_answers() {
        assert!(is_affirmative("y\n"));
        assert!(is_affirmative("Y\n"));
        assert!(is_affirmative("yes\n"));
        assert!(!is_affirmative("\n"));
        assert!(!is_affirmative("n\n"));
        assert!(!is_affirmative("yep\n"));
    }
}
