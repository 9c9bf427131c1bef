//! Tool-using chat agent for Anthropic, OpenAI, Gemini and Ollama with MCP support

pub mod agent;
pub mod cli;
pub mod config;
pub mod conversation;
pub mod error;
pub mod llm;
pub mod mcp;
pub mod runtime;
pub mod session;
pub mod tools;
