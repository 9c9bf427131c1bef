//! Interactive chat loop

use std::io::{self, BufRead, Write};

use anyhow::Result;

use crate::agent::Agent;

const HELP: &str = "\
Commands:
  help    Show this help
  tools   List available tools
  info    Show session details
  clear   Clear history and start a new session
  quit    Exit (also: exit)
Press Ctrl-C while the agent works to cancel the request.";

/// What a line of input asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Quit,
    Help,
    Tools,
    Info,
    Clear,
    Empty,
    Message(String),
}

impl ReplCommand {
    pub fn parse(line: &str) -> Self {
        let input = line.trim();
        match input.to_lowercase().as_str() {
            "" => Self::Empty,
            "quit" | "exit" => Self::Quit,
            "help" => Self::Help,
            "tools" => Self::Tools,
            "info" => Self::Info,
            "clear" => Self::Clear,
            _ => Self::Message(input.to_string()),
        }
    }
}

pub struct Repl<'a> {
    agent: &'a mut Agent,
}

impl<'a> Repl<'a> {
    pub fn new(agent: &'a mut Agent) -> Self {
        Self { agent }
    }

    pub async fn run(&mut self) -> Result<()> {
        println!(
            "Interactive mode ({}/{}). Type 'help' for commands, 'quit' to exit.",
            self.agent.provider_name(),
            self.agent.model()
        );

        let stdin = io::stdin();
        let mut stdout = io::stdout();

        loop {
            print!("agent> ");
            stdout.flush()?;

            let mut input = String::new();
            if stdin.lock().read_line(&mut input)? == 0 {
                // EOF
                break;
            }

            match ReplCommand::parse(&input) {
                ReplCommand::Empty => continue,
                ReplCommand::Quit => break,
                ReplCommand::Help => println!("{}", HELP),
                ReplCommand::Tools => {
                    for tool in self.agent.tool_descriptors().await {
                        println!("  {} [{}] - {}", tool.name, tool.capability, tool.description);
                    }
                }
                ReplCommand::Info => {
                    let info = self.agent.session_info().await;
                    println!("Session:  {}", info.session_id);
                    println!("Provider: {} ({})", info.provider, info.model);
                    println!("Turns:    {}", info.turns);
                    println!("Tools:    {}", info.tools.join(", "));
                    println!("Logging:  {}", if info.logging { "on" } else { "off" });
                }
                ReplCommand::Clear => {
                    self.agent.clear_history();
                    println!("History cleared. New session: {}", self.agent.session_id());
                }
                ReplCommand::Message(text) => self.handle_chat(&text).await,
            }
        }

        Ok(())
    }

    async fn handle_chat(&mut self, input: &str) {
        let token = self.agent.arm_cancellation();
        let watcher = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                token.cancel();
            }
        });

        let result = self.agent.chat(input).await;
        watcher.abort();

        match result {
            Ok(outcome) => println!("\n{}\n", outcome.text),
            Err(e) => eprintln!("Error: {}\n", e),
        }
    }
}
