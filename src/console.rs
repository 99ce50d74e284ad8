//! Line-oriented interactive front end.
//!
//! Reads stdin, renders client notifications, and issues commands through
//! the handle. Purely an observer: all state lives in the client runtime,
//! and log output goes to stderr so it never interleaves with the
//! conversation on stdout.

use std::io::Write;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use crate::client::{ClientEvent, ClientHandle};
use crate::config::ClientConfig;
use crate::session::{Message, Role};

const PROMPT: &str = "you ▸ ";

/// What one line of input asks for.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Submit(String),
    Cancel,
    ListTimelines,
    ShowTimeline(String),
    Quit,
    Help,
    Nothing,
}

fn parse_line(line: &str) -> Input {
    let line = line.trim();
    match line {
        "" => Input::Nothing,
        "/quit" | "/exit" => Input::Quit,
        // Stopping an idle session is a no-op, so a fresh conversation is
        // the same full reset.
        "/cancel" | "/new" => Input::Cancel,
        "/timeline" => Input::ListTimelines,
        "/help" => Input::Help,
        _ => {
            if let Some(id) = line.strip_prefix("/timeline ") {
                Input::ShowTimeline(id.trim().to_string())
            } else if line.starts_with('/') {
                Input::Help
            } else {
                Input::Submit(line.to_string())
            }
        }
    }
}

pub struct Console {
    handle: ClientHandle,
    /// Conversation as last broadcast; read-only mirror for rendering.
    messages: Vec<Message>,
    loading: bool,
}

impl Console {
    pub fn new(handle: ClientHandle) -> Self {
        Self {
            handle,
            messages: Vec::new(),
            loading: false,
        }
    }

    /// Run until stdin closes or the user quits.
    pub async fn run(mut self, config: &ClientConfig) -> std::io::Result<()> {
        println!("sporos research console");
        println!("connected to {}", config.api_url);
        println!("/help for commands");
        println!();

        let mut events = self.handle.subscribe();
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        prompt()?;

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else { break };
                    if !self.handle_line(&line).await? {
                        break;
                    }
                }
                event = events.recv() => match event {
                    Ok(event) => self.render(&event)?,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "console lagged behind client events");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        Ok(())
    }

    /// Returns false when the user asked to quit.
    async fn handle_line(&mut self, line: &str) -> std::io::Result<bool> {
        match parse_line(line) {
            Input::Quit => return Ok(false),
            Input::Nothing => prompt()?,
            Input::Submit(text) => {
                if self.loading {
                    println!("a turn is in flight; /cancel to interrupt it first");
                    prompt()?;
                } else {
                    self.handle.submit(text).await;
                }
            }
            Input::Cancel => self.handle.cancel().await,
            Input::ListTimelines => {
                let live = self.handle.timeline();
                if !live.is_empty() {
                    println!("current turn:");
                    for step in &live {
                        println!("  · {} — {}", step.title, step.data);
                    }
                }
                let state = self.handle.state();
                if state.archive.is_empty() {
                    println!("no archived timelines yet");
                } else {
                    let mut ids: Vec<_> = state.archive.iter().collect();
                    ids.sort_by(|a, b| a.0.cmp(b.0));
                    for (id, steps) in ids {
                        println!("  {id}  ({} steps)", steps.len());
                    }
                }
                prompt()?;
            }
            Input::ShowTimeline(id) => {
                match self.handle.archived(&id) {
                    Some(steps) => {
                        for step in steps {
                            println!("  · {} — {}", step.title, step.data);
                        }
                    }
                    None => println!("no archived timeline for {id}"),
                }
                prompt()?;
            }
            Input::Help => {
                println!("  /cancel    stop the in-flight turn and reset the conversation");
                println!("  /new       start a fresh conversation (same reset)");
                println!("  /timeline  list archived research timelines");
                println!("  /timeline <id>  print one archived timeline");
                println!("  /quit      exit");
                prompt()?;
            }
        }
        Ok(true)
    }

    fn render(&mut self, event: &ClientEvent) -> std::io::Result<()> {
        match event {
            ClientEvent::Step { step } => {
                println!("  · {} — {}", step.title, step.data);
            }
            ClientEvent::Messages { messages } => {
                self.messages.clone_from(messages);
            }
            ClientEvent::Loading { loading } => {
                if self.loading && !*loading {
                    self.print_answer();
                    prompt()?;
                }
                self.loading = *loading;
            }
            ClientEvent::TurnArchived { message_id } => {
                println!("  (timeline archived; /timeline {message_id} to revisit)");
            }
            ClientEvent::SessionReset => {
                self.messages.clear();
                self.loading = false;
                println!("conversation reset");
                prompt()?;
            }
            ClientEvent::Error { message } => {
                println!("! {message}");
            }
        }
        Ok(())
    }

    fn print_answer(&self) {
        let answer = self
            .messages
            .iter()
            .rev()
            .find(|message| message.role == Role::Ai);
        match answer {
            Some(message) => {
                println!();
                println!("{}", message.content);
                println!();
            }
            None => println!("(the run ended without an answer)"),
        }
    }
}

fn prompt() -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    write!(stdout, "{PROMPT}")?;
    stdout.flush()
}
