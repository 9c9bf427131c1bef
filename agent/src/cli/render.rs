//! Terminal rendering of agent events
//!
//! Progress goes to stderr so stdout carries only the answer.

use serde_json::Value;

use crate::agent::{AgentEvent, EventReceiver};

// ANSI color codes
const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const GRAY: &str = "\x1b[90m";

const ARGS_PREVIEW: usize = 80;
const RESULT_PREVIEW: usize = 100;

pub struct EventPrinter {
    use_colors: bool,
    verbose: bool,
}

impl EventPrinter {
    /// Colors when stderr is a terminal
    pub fn auto(verbose: bool) -> Self {
        Self {
            use_colors: atty::is(atty::Stream::Stderr),
            verbose,
        }
    }

    pub fn plain(verbose: bool) -> Self {
        Self {
            use_colors: false,
            verbose,
        }
    }

    fn color(&self, codes: &[&str], text: &str) -> String {
        if self.use_colors {
            format!("{}{}{}", codes.concat(), text, RESET)
        } else {
            text.to_string()
        }
    }

    /// One display line per event; `None` for events not shown
    pub fn render(&self, event: &AgentEvent) -> Option<String> {
        match event {
            AgentEvent::ProcessingStart { .. } => None,
            AgentEvent::Iteration { number, tool_calls } => self.verbose.then(|| {
                self.color(&[GRAY], &format!("  round {}: {} tool call(s)", number, tool_calls))
            }),
            AgentEvent::ToolStart { name, arguments, .. } => {
                let args = preview_args(arguments);
                let name = self.color(&[BOLD, CYAN], name);
                if args.is_empty() {
                    Some(format!("  {} {}", self.color(&[GRAY], "->"), name))
                } else {
                    Some(format!("  {} {} {}", self.color(&[GRAY], "->"), name, self.color(&[GRAY], &args)))
                }
            }
            AgentEvent::ToolComplete {
                name,
                result,
                duration,
                is_error,
                ..
            } => {
                let status = if *is_error {
                    self.color(&[RED], "x")
                } else {
                    self.color(&[GREEN], "ok")
                };
                let time = self.color(&[GRAY], &format!("({}ms)", duration.as_millis()));
                if self.verbose || *is_error {
                    let preview = preview(result, RESULT_PREVIEW);
                    let preview = self.color(if *is_error { &[RED] } else { &[GRAY] }, &preview);
                    Some(format!("  {} {} {} {}", status, name, time, preview))
                } else {
                    Some(format!("  {} {} {}", status, name, time))
                }
            }
            AgentEvent::ResponseComplete {
                rounds, total_duration, ..
            } => self.verbose.then(|| {
                self.color(
                    &[GRAY],
                    &format!("  done in {} round(s), {:.1}s", rounds, total_duration.as_secs_f64()),
                )
            }),
            AgentEvent::Error { kind, message } => {
                Some(self.color(&[YELLOW], &format!("  [{}] {}", kind, message)))
            }
        }
    }

    /// Print events until every sender is gone
    pub async fn drain(self, mut events: EventReceiver) {
        while let Some(event) = events.recv().await {
            if let Some(line) = self.render(&event) {
                eprintln!("{}", line);
            }
        }
    }
}

fn preview(text: &str, max: usize) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() <= max {
        return flat;
    }
    let cut: String = flat.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", cut)
}

fn preview_args(args: &Value) -> String {
    match args {
        Value::Object(map) if map.is_empty() => String::new(),
        Value::Null => String::new(),
        _ => preview(&args.to_string(), ARGS_PREVIEW),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_tool_lines() {
        let printer = EventPrinter::plain(false);
        let start = AgentEvent::ToolStart {
            call_id: "c1".into(),
            name: "terminal".into(),
            arguments: json!({"command": "ls"}),
        };
        assert_eq!(printer.render(&start).unwrap(), r#"  -> terminal {"command":"ls"}"#);

        let done = AgentEvent::ToolComplete {
            call_id: "c1".into(),
            name: "terminal".into(),
            result: "a\nb".into(),
            duration: Duration::from_millis(12),
            is_error: false,
        };
        assert_eq!(printer.render(&done).unwrap(), "  ok terminal (12ms)");
    }

    #[test]
    fn test_errors_show_result_preview() {
        let printer = EventPrinter::plain(false);
        let done = AgentEvent::ToolComplete {
            call_id: "c1".into(),
            name: "web_search".into(),
            result: "Error: Exa API key not configured".into(),
            duration: Duration::from_millis(3),
            is_error: true,
        };
        assert!(printer.render(&done).unwrap().ends_with("Exa API key not configured"));
    }

    #[test]
    fn test_quiet_events_need_verbose() {
        let event = AgentEvent::Iteration { number: 1, tool_calls: 2 };
        assert!(EventPrinter::plain(false).render(&event).is_none());
        assert!(EventPrinter::plain(true).render(&event).is_some());
    }

    #[test]
    fn test_preview_truncates() {
        let long = "y".repeat(200);
        let p = preview(&long, 10);
        assert_eq!(p.chars().count(), 10);
        assert!(p.ends_with("..."));
    }
}
