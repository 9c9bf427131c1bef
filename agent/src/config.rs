//! Configuration loading
//!
//! Settings come from `.agent.toml` (searched like the MCP config), then
//! environment variables override individual fields. A `.env` file in the
//! working directory is loaded into the environment first.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::llm::ProviderKind;

const APP_DIR: &str = "open-agent";

/// Find a config file by walking up the directory tree, then checking global config.
///
/// Search order:
/// 1. Current directory and parent directories (walking up to root)
/// 2. Global config at ~/.config/open-agent/
///
/// Returns the path if found, None otherwise.
fn find_config_file(filename: &str) -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let candidate = current.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break,
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global_path = config_dir.join(APP_DIR).join(filename);
        if global_path.exists() {
            return Some(global_path);
        }
    }

    None
}

// ============================================================================
// MCP Server Configuration (.mcp.json)
// ============================================================================

/// MCP server configuration (from .mcp.json)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct McpConfig {
    #[serde(rename = "mcpServers", default)]
    pub mcp_servers: BTreeMap<String, McpServerConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct McpServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Disabled servers are known but never spawned
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl McpServerConfig {
    fn new(command: &str, args: &[&str]) -> Self {
        Self {
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: HashMap::new(),
            enabled: true,
        }
    }
}

/// Browser automation servers known out of the box
pub const BROWSER_SERVERS: [&str; 3] = ["browser_use", "puppeteer", "playwright"];

impl McpConfig {
    /// Load MCP config from .mcp.json
    ///
    /// Search order:
    /// 1. Walk up directory tree from cwd looking for .mcp.json
    /// 2. Check ~/.config/open-agent/.mcp.json (global fallback)
    pub fn load() -> Result<Option<Self>> {
        if let Some(config_path) = find_config_file(".mcp.json") {
            tracing::debug!("Loading MCP config from: {}", config_path.display());
            return Self::load_from_path(&config_path).map(Some);
        }

        tracing::debug!("No .mcp.json found");
        Ok(None)
    }

    /// Load from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: McpConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Built-in browser server definitions
    ///
    /// Only the preferred server starts enabled; the others are fallbacks
    /// that can be switched on from `.mcp.json`.
    pub fn browser_defaults(preferred: &str) -> Self {
        let mut servers = BTreeMap::new();
        servers.insert(
            "browser_use".to_string(),
            McpServerConfig::new("npx", &["@co-browser/browser-use-mcp"]),
        );
        servers.insert(
            "puppeteer".to_string(),
            McpServerConfig::new("npx", &["@modelcontextprotocol/server-puppeteer"]),
        );
        servers.insert(
            "playwright".to_string(),
            McpServerConfig::new("node", &["playwright-mcp-server.js"]),
        );
        for (name, server) in servers.iter_mut() {
            server.enabled = name == preferred;
        }
        Self { mcp_servers: servers }
    }

    /// Overlay `other` on top of `self`; servers in `other` win
    pub fn merged(mut self, other: McpConfig) -> Self {
        self.mcp_servers.extend(other.mcp_servers);
        self
    }

    pub fn enabled(&self) -> impl Iterator<Item = (&String, &McpServerConfig)> {
        self.mcp_servers.iter().filter(|(_, s)| s.enabled)
    }
}

// ============================================================================
// Agent Settings (.agent.toml)
// ============================================================================

/// Top-level settings (from .agent.toml plus environment)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub keys: ApiKeys,
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub code_execution: CodeExecutionSettings,
    #[serde(default)]
    pub terminal: TerminalSettings,
    #[serde(default)]
    pub web: WebSettings,
    #[serde(default)]
    pub mcp: McpSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Model provider section
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSettings {
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Model name; each provider has its own default when unset
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: Option<u32>,
    #[serde(default = "default_model_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,
}

/// Provider and service credentials
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiKeys {
    #[serde(default)]
    pub anthropic: Option<String>,
    #[serde(default)]
    pub openai: Option<String>,
    #[serde(default)]
    pub gemini: Option<String>,
    #[serde(default)]
    pub exa: Option<String>,
}

/// Agent loop section
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CodeExecutionSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_code_types")]
    pub allowed_types: Vec<String>,
    #[serde(default = "default_code_timeout")]
    pub timeout_secs: u64,
    /// Output cap per stream, in bytes
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TerminalSettings {
    #[serde(default = "default_shell")]
    pub shell: String,
    #[serde(default = "default_working_dir")]
    pub working_dir: String,
    #[serde(default = "default_terminal_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebSettings {
    #[serde(default = "default_search_url")]
    pub search_url: String,
    #[serde(default = "default_contents_url")]
    pub contents_url: String,
    /// Results whose URL contains any of these are dropped
    #[serde(default = "default_filter_keywords")]
    pub filter_keywords: Vec<String>,
    #[serde(default = "default_snippet_chars")]
    pub snippet_chars: usize,
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct McpSettings {
    #[serde(default)]
    pub enabled: bool,
    /// Browser server enabled by default when no .mcp.json overrides it
    #[serde(default = "default_browser_server")]
    pub browser_server: String,
    #[serde(default = "default_mcp_startup_timeout")]
    pub startup_timeout_secs: u64,
    #[serde(default = "default_mcp_call_timeout")]
    pub call_timeout_secs: u64,
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,
    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: u64,
}

/// Which session store backs the log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Jsonl,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_session_dir")]
    pub session_dir: String,
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub store: StoreKind,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_provider() -> String {
    "anthropic".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> Option<u32> {
    Some(4096)
}

fn default_model_timeout() -> u64 {
    60
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_max_rounds() -> usize {
    10
}

fn default_tool_timeout() -> u64 {
    120
}

fn default_code_types() -> Vec<String> {
    vec!["python".to_string(), "bash".to_string(), "r".to_string()]
}

fn default_code_timeout() -> u64 {
    60
}

fn default_max_output_bytes() -> usize {
    1_048_576
}

fn default_shell() -> String {
    "bash".to_string()
}

fn default_working_dir() -> String {
    "./workspace".to_string()
}

fn default_terminal_timeout_ms() -> u64 {
    10_000
}

fn default_search_url() -> String {
    "https://api.exa.ai/search".to_string()
}

fn default_contents_url() -> String {
    "https://api.exa.ai/contents".to_string()
}

fn default_filter_keywords() -> Vec<String> {
    vec!["gaia".to_string(), "huggingface".to_string()]
}

fn default_snippet_chars() -> usize {
    500
}

fn default_http_timeout() -> u64 {
    30
}

fn default_browser_server() -> String {
    "browser_use".to_string()
}

fn default_mcp_startup_timeout() -> u64 {
    30
}

fn default_mcp_call_timeout() -> u64 {
    60
}

fn default_reconnect_attempts() -> u32 {
    3
}

fn default_reconnect_backoff_ms() -> u64 {
    500
}

fn default_session_dir() -> String {
    "./logs".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_model_timeout(),
            ollama_url: default_ollama_url(),
        }
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            tool_timeout_secs: default_tool_timeout(),
            system_prompt: None,
        }
    }
}

impl Default for CodeExecutionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_types: default_code_types(),
            timeout_secs: default_code_timeout(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

impl Default for TerminalSettings {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            working_dir: default_working_dir(),
            timeout_ms: default_terminal_timeout_ms(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

impl Default for WebSettings {
    fn default() -> Self {
        Self {
            search_url: default_search_url(),
            contents_url: default_contents_url(),
            filter_keywords: default_filter_keywords(),
            snippet_chars: default_snippet_chars(),
            timeout_secs: default_http_timeout(),
        }
    }
}

impl Default for McpSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            browser_server: default_browser_server(),
            startup_timeout_secs: default_mcp_startup_timeout(),
            call_timeout_secs: default_mcp_call_timeout(),
            reconnect_attempts: default_reconnect_attempts(),
            reconnect_backoff_ms: default_reconnect_backoff_ms(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            session_dir: default_session_dir(),
            level: default_log_level(),
            store: StoreKind::default(),
        }
    }
}

impl McpSettings {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

/// Presence of each credential, in display order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyStatus {
    pub service: &'static str,
    pub present: bool,
}

impl Settings {
    /// Load settings: `.env`, then `.agent.toml`, then environment overrides
    ///
    /// Search order for `.agent.toml`:
    /// 1. Walk up directory tree from cwd
    /// 2. Check ~/.config/open-agent/.agent.toml (global fallback)
    /// 3. Fall back to defaults
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut settings = match find_config_file(".agent.toml") {
            Some(config_path) => {
                tracing::debug!("Loading config from: {}", config_path.display());
                Self::load_from_path(&config_path)?
            }
            None => {
                tracing::debug!("No .agent.toml found, using defaults");
                Self::default()
            }
        };

        settings.apply_env(|key| std::env::var(key).ok());
        Ok(settings)
    }

    /// Load from a specific path (no environment overrides)
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let settings: Settings = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(settings)
    }

    /// Apply environment overrides through `lookup`
    ///
    /// Unparseable numeric or boolean values are ignored with a warning.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("ANTHROPIC_API_KEY") {
            self.keys.anthropic = Some(v);
        }
        if let Some(v) = get("OPENAI_API_KEY") {
            self.keys.openai = Some(v);
        }
        if let Some(v) = get("GEMINI_API_KEY") {
            self.keys.gemini = Some(v);
        }
        if let Some(v) = get("EXA_API_KEY") {
            self.keys.exa = Some(v);
        }

        if let Some(v) = get("DEFAULT_MODEL_PROVIDER") {
            self.llm.provider = v;
        }
        if let Some(v) = get("DEFAULT_MODEL_NAME") {
            self.llm.model = Some(v);
        }
        if let Some(v) = get("OLLAMA_URL") {
            self.llm.ollama_url = v;
        }
        set_parsed(&get, "DEFAULT_TEMPERATURE", &mut self.llm.temperature);
        if let Some(v) = get("DEFAULT_MAX_TOKENS") {
            match v.parse() {
                Ok(n) => self.llm.max_tokens = Some(n),
                Err(_) => tracing::warn!("Ignoring invalid DEFAULT_MAX_TOKENS={}", v),
            }
        }
        set_parsed(&get, "DEFAULT_TIMEOUT", &mut self.llm.timeout_secs);

        set_parsed(&get, "MAX_ROUNDS", &mut self.agent.max_rounds);
        set_parsed(&get, "TOOL_TIMEOUT", &mut self.agent.tool_timeout_secs);

        set_bool(&get, "ENABLE_CODE_EXECUTION", &mut self.code_execution.enabled);
        set_parsed(&get, "CODE_EXECUTION_TIMEOUT", &mut self.code_execution.timeout_secs);
        if let Some(v) = get("ALLOWED_CODE_TYPES") {
            self.code_execution.allowed_types = v
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect();
        }

        if let Some(v) = get("TERMINAL_SHELL") {
            self.terminal.shell = v;
        }
        if let Some(v) = get("TERMINAL_WORKING_DIR") {
            self.terminal.working_dir = v;
        }
        set_parsed(&get, "TERMINAL_TIMEOUT", &mut self.terminal.timeout_ms);

        set_bool(&get, "ENABLE_MCP", &mut self.mcp.enabled);
        if let Some(v) = get("MCP_BROWSER_SERVER") {
            self.mcp.browser_server = v;
        }

        set_bool(&get, "ENABLE_LOGGING", &mut self.logging.enabled);
        if let Some(v) = get("SESSION_LOG_DIR") {
            self.logging.session_dir = v;
        }
        if let Some(v) = get("LOG_LEVEL") {
            self.logging.level = v.to_lowercase();
        }
    }

    /// Configured provider, parsed
    pub fn provider_kind(&self) -> Result<ProviderKind> {
        self.llm.provider.parse()
    }

    pub fn api_key(&self, kind: ProviderKind) -> Option<&str> {
        match kind {
            ProviderKind::Anthropic => self.keys.anthropic.as_deref(),
            ProviderKind::OpenAi => self.keys.openai.as_deref(),
            ProviderKind::Gemini => self.keys.gemini.as_deref(),
            ProviderKind::Ollama => None,
        }
    }

    pub fn key_status(&self) -> Vec<KeyStatus> {
        vec![
            KeyStatus {
                service: "anthropic",
                present: self.keys.anthropic.is_some(),
            },
            KeyStatus {
                service: "openai",
                present: self.keys.openai.is_some(),
            },
            KeyStatus {
                service: "gemini",
                present: self.keys.gemini.is_some(),
            },
            KeyStatus {
                service: "exa",
                present: self.keys.exa.is_some(),
            },
        ]
    }

    pub fn missing_keys(&self) -> Vec<&'static str> {
        self.key_status()
            .into_iter()
            .filter(|k| !k.present)
            .map(|k| k.service)
            .collect()
    }

    /// Hosted providers with a configured key
    pub fn available_providers(&self) -> Vec<ProviderKind> {
        [ProviderKind::Anthropic, ProviderKind::OpenAi, ProviderKind::Gemini]
            .into_iter()
            .filter(|k| self.api_key(*k).is_some())
            .collect()
    }

    /// The configured provider if usable, else the first provider with a key
    pub fn preferred_provider(&self) -> Result<ProviderKind> {
        let configured = self.provider_kind()?;
        if !configured.requires_key() || self.api_key(configured).is_some() {
            return Ok(configured);
        }

        match self.available_providers().first() {
            Some(kind) => {
                tracing::warn!(
                    "No API key for '{}', falling back to '{}'",
                    configured,
                    kind
                );
                Ok(*kind)
            }
            None => anyhow::bail!("No valid API keys found for any provider"),
        }
    }

    /// Model name for `kind`, honoring the configured override
    pub fn model_for(&self, kind: ProviderKind) -> String {
        self.llm
            .model
            .clone()
            .unwrap_or_else(|| kind.default_model().to_string())
    }
}

fn set_parsed<G, T>(get: &G, key: &str, target: &mut T)
where
    G: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(v) = get(key) {
        match v.parse() {
            Ok(parsed) => *target = parsed,
            Err(_) => tracing::warn!("Ignoring invalid {}={}", key, v),
        }
    }
}

fn set_bool<G>(get: &G, key: &str, target: &mut bool)
where
    G: Fn(&str) -> Option<String>,
{
    if let Some(v) = get(key) {
        *target = v.eq_ignore_ascii_case("true") || v == "1";
    }
}
