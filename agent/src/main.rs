use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use open_agent::agent::event_channel;
use open_agent::cli::{Cli, Commands, EventPrinter, Repl};
use open_agent::config::Settings;
use open_agent::conversation::{Arguments, ToolCallRequest, Turn};
use open_agent::llm::{synthesize_call_id, ProviderKind};
use open_agent::runtime::{AgentOptions, Runtime};
use open_agent::session::{open_store, replay};
use open_agent::tools;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load()?;
    init_tracing(&settings.logging.level, cli.verbose, cli.log_json);

    match cli.command {
        Commands::Chat {
            message,
            provider,
            model,
            system,
            mcp,
            session,
        } => {
            let options = AgentOptions {
                provider: provider.as_deref().map(str::parse::<ProviderKind>).transpose()?,
                model,
                system_prompt: system,
                session_id: session,
            };
            run_chat(settings, options, message, mcp, cli.verbose > 0).await?;
        }
        Commands::Tools { server, mcp } => {
            run_tools(settings, server, mcp).await?;
        }
        Commands::Call { tool, args, mcp } => {
            run_call_tool(settings, &tool, args, mcp).await?;
        }
        Commands::Config => {
            run_config(&settings)?;
        }
        Commands::Sessions { id, verify } => {
            run_sessions(&settings, id, verify)?;
        }
    }

    Ok(())
}

/// RUST_LOG wins; otherwise -v flags, then the configured level
fn init_tracing(level: &str, verbose: u8, json: bool) {
    let level = match verbose {
        0 => level,
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

async fn run_chat(
    settings: Settings,
    options: AgentOptions,
    message: Option<String>,
    enable_mcp: bool,
    verbose: bool,
) -> Result<()> {
    let runtime = Runtime::start(settings, enable_mcp).await?;

    let (tx, rx) = event_channel();
    let printer = tokio::spawn(EventPrinter::auto(verbose).drain(rx));

    let mut agent = runtime.agent(options, Some(tx)).await?;
    let result = match message {
        Some(msg) => {
            let outcome = agent.chat(&msg).await;
            outcome.map(|o| println!("{}", o.text)).map_err(anyhow::Error::from)
        }
        None => Repl::new(&mut agent).run().await,
    };

    // Dropping the agent closes the event channel
    drop(agent);
    let _ = printer.await;
    runtime.shutdown().await;
    result
}

async fn run_tools(settings: Settings, server: Option<String>, enable_mcp: bool) -> Result<()> {
    let runtime = Runtime::start(settings, enable_mcp).await?;

    for (name, status) in runtime.mcp_status().await {
        println!("MCP {}: {}", name, status);
    }

    let mut tools = runtime.registry().read().await.list();
    if let Some(server) = &server {
        tools.retain(|t| t.capability.server() == Some(server.as_str()));
    }

    println!("Available tools ({}):\n", tools.len());
    for tool in tools {
        println!("  {} [{}]", tool.name, tool.capability);
        println!("    {}", tool.description);
    }

    runtime.shutdown().await;
    Ok(())
}

async fn run_call_tool(settings: Settings, tool: &str, args: Option<String>, enable_mcp: bool) -> Result<()> {
    let arguments: Arguments = match args {
        Some(s) => serde_json::from_str(&s).context("--args must be a JSON object")?,
        None => Arguments::new(),
    };

    let timeout = Duration::from_secs(settings.agent.tool_timeout_secs);
    let runtime = Runtime::start(settings, enable_mcp).await?;

    let call = ToolCallRequest::new(synthesize_call_id(), tool, arguments);
    let result = tools::dispatch(runtime.registry(), &call, timeout).await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    runtime.shutdown().await;
    if !result.success {
        anyhow::bail!("Tool {} failed", tool);
    }
    Ok(())
}

fn run_config(settings: &Settings) -> Result<()> {
    println!("Provider:  {}", settings.llm.provider);
    match settings.preferred_provider() {
        Ok(kind) => println!("Effective: {} ({})", kind, settings.model_for(kind)),
        Err(e) => println!("Effective: none ({})", e),
    }
    println!("Timeout:   {}s, max rounds {}", settings.llm.timeout_secs, settings.agent.max_rounds);

    println!("\nKeys:");
    for key in settings.key_status() {
        println!("  {:<10} {}", key.service, if key.present { "set" } else { "missing" });
    }

    println!("\nTools:");
    println!(
        "  code_execution  {} ({})",
        if settings.code_execution.enabled { "enabled" } else { "disabled" },
        settings.code_execution.allowed_types.join(", ")
    );
    println!("  terminal        {} in {}", settings.terminal.shell, settings.terminal.working_dir);
    println!(
        "  web_search      {}",
        if settings.keys.exa.is_some() { "ready" } else { "no EXA_API_KEY" }
    );
    println!(
        "  mcp             {} (browser: {})",
        if settings.mcp.enabled { "enabled" } else { "off unless --mcp" },
        settings.mcp.browser_server
    );

    println!(
        "\nSession logs: {}",
        if settings.logging.enabled {
            format!("{:?} in {}", settings.logging.store, settings.logging.session_dir)
        } else {
            "disabled".to_string()
        }
    );
    Ok(())
}

fn run_sessions(settings: &Settings, id: Option<String>, verify: bool) -> Result<()> {
    let store = open_store(&settings.logging)?.context("Session logging is disabled (ENABLE_LOGGING=false)")?;

    let Some(id) = id else {
        let sessions = store.list_sessions()?;
        if sessions.is_empty() {
            println!("No sessions logged in {}", settings.logging.session_dir);
        }
        for session in sessions {
            println!("{}", session);
        }
        return Ok(());
    };

    let records = store.load(&id)?;
    if let Some(first) = records.first() {
        println!("Session {} ({}/{})\n", id, first.provider, first.model);
    }
    for record in &records {
        match (&record.turn, &record.failure) {
            (Some(turn), _) => println!("[{}] {}", record.seq, describe_turn(turn)),
            (None, Some(failure)) => println!("[{}] failed ({}): {}", record.seq, failure.kind, failure.message),
            (None, None) => {}
        }
    }

    if verify {
        replay(&records)
            .validate()
            .with_context(|| format!("Session {} has unpaired tool calls", id))?;
        println!("\nSession {} is consistent", id);
    }
    Ok(())
}

fn describe_turn(turn: &Turn) -> String {
    match turn {
        Turn::User { text } => format!("user: {}", text),
        Turn::Assistant { text, tool_calls } if tool_calls.is_empty() => format!("assistant: {}", text),
        Turn::Assistant { text, tool_calls } => {
            let names: Vec<String> = tool_calls.iter().map(|c| format!("{}({})", c.name, c.id)).collect();
            format!("assistant: {} -> {}", text, names.join(", "))
        }
        Turn::ToolResult {
            call_id,
            tool_name,
            result,
        } => format!(
            "tool {}({}): {}",
            tool_name,
            call_id,
            if result.success { "ok" } else { "error" }
        ),
    }
}
