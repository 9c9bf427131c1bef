//! CLI argument definitions
//!
//! Contains the main CLI struct and Commands enum for clap parsing.

use clap::{ArgAction, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "open-agent")]
#[command(about = "Tool-using chat agent for Anthropic, OpenAI, Gemini and Ollama with MCP support")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug, -vvv trace). Default comes from LOG_LEVEL.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Chat with the agent (interactive when no message is given)
    Chat {
        /// Message to send
        message: Option<String>,
        /// Model provider: anthropic, openai, gemini or ollama
        #[arg(long, short)]
        provider: Option<String>,
        /// Model name (default: per provider, or DEFAULT_MODEL_NAME)
        #[arg(long, short)]
        model: Option<String>,
        /// System prompt for the agent
        #[arg(long, short)]
        system: Option<String>,
        /// Connect MCP servers and enable browser automation
        #[arg(long)]
        mcp: bool,
        /// Resume (or name) a logged session
        #[arg(long)]
        session: Option<String>,
    },
    /// List registered tools
    Tools {
        /// Only list tools from a specific MCP server
        #[arg(long)]
        server: Option<String>,
        /// Connect MCP servers first
        #[arg(long)]
        mcp: bool,
    },
    /// Call a tool directly
    Call {
        /// Tool name
        tool: String,
        /// Arguments as a JSON object
        #[arg(long, short)]
        args: Option<String>,
        /// Connect MCP servers first
        #[arg(long)]
        mcp: bool,
    },
    /// Show the effective configuration and which keys are present
    Config,
    /// List logged sessions, or show one
    Sessions {
        /// Session to show
        id: Option<String>,
        /// Check that every tool call in the session has its result
        #[arg(long)]
        verify: bool,
    },
}
