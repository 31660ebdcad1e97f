//! Line-based interactive chat on top of [`Conversation`].

use std::error::Error;
use std::io::{self, Write};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::cli::{report_error, Session};
use crate::core::app::{ChatStatus, Conversation, ConversationState};
use crate::core::errors::ApiError;
use crate::core::message::ChatMessage;

enum Turn {
    Send(String),
    Reload,
    Retry,
}

pub async fn run_chat(session: Session) -> Result<(), Box<dyn Error>> {
    let settings = session.conversation_settings();
    let system_prompt = session.config.system_prompt().map(str::to_string);
    let conversation = Conversation::new(Arc::new(session.client), settings);
    conversation.set_system_prompt(system_prompt);

    println!("disa · {} · /quit zum Beenden", session.model);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    print_prompt()?;

    while let Some(line) = lines.next_line().await? {
        let turn = match line.trim() {
            "" => {
                print_prompt()?;
                continue;
            }
            "/quit" | "/exit" => break,
            "/reset" => {
                conversation.reset();
                println!("Neue Unterhaltung.");
                print_prompt()?;
                continue;
            }
            "/reload" => Turn::Reload,
            "/retry" => Turn::Retry,
            text => Turn::Send(text.to_string()),
        };

        drive_turn(&conversation, turn).await?;
        print_prompt()?;
    }

    conversation.stop();
    Ok(())
}

/// Run one turn to completion, printing the reply as it streams. Ctrl+C
/// stops the turn without leaving the chat.
async fn drive_turn(conversation: &Conversation, turn: Turn) -> Result<(), Box<dyn Error>> {
    let mut updates = conversation.subscribe();
    let worker = conversation.clone();
    let mut task = tokio::spawn(async move {
        match turn {
            Turn::Send(text) => worker.append(text).await,
            Turn::Reload => worker.reload().await,
            Turn::Retry => {
                let last_reply = worker
                    .state()
                    .messages
                    .iter()
                    .rev()
                    .find(|message| message.is_assistant())
                    .map(|message| message.id.clone());
                match last_reply {
                    Some(id) => worker.retry(&id).await,
                    None => worker.reload().await,
                }
            }
        }
    });

    let mut printer = ReplyPrinter::default();
    let joined = loop {
        tokio::select! {
            joined = &mut task => break joined,
            changed = updates.changed() => {
                if changed.is_ok() {
                    let state = updates.borrow_and_update().clone();
                    printer.render(&state)?;
                }
            }
            _ = tokio::signal::ctrl_c() => conversation.stop(),
        }
    };

    finish_turn(&mut printer, joined?, conversation.state().status)
}

fn finish_turn(
    printer: &mut ReplyPrinter,
    result: Result<Option<ChatMessage>, ApiError>,
    status: ChatStatus,
) -> Result<(), Box<dyn Error>> {
    match result {
        Ok(Some(message)) => {
            printer.finish(&message)?;
            println!();
        }
        Ok(None) if printer.printed > 0 => println!("\n(abgebrochen)"),
        Ok(None) => println!("(nichts zu senden)"),
        Err(err) => {
            if printer.printed > 0 {
                println!();
            }
            report_error(&err);
            if status == ChatStatus::MissingKey {
                eprintln!("Setze OPENROUTER_API_KEY oder hinterlege einen Schlüssel im Schlüsselbund.");
            }
        }
    }
    Ok(())
}

fn print_prompt() -> io::Result<()> {
    print!("> ");
    io::stdout().flush()
}

/// Prints the streaming assistant message incrementally.
#[derive(Default)]
struct ReplyPrinter {
    /// Position of the assistant message created by this turn.
    target: Option<usize>,
    printed: usize,
}

impl ReplyPrinter {
    fn render(&mut self, state: &ConversationState) -> io::Result<()> {
        if state.is_streaming() && self.target.is_none() {
            self.target = state.messages.len().checked_sub(1);
        }
        let Some(message) = self.target.and_then(|index| state.messages.get(index)) else {
            return Ok(());
        };
        if message.is_assistant() {
            self.write_from(&message.content)?;
        }
        Ok(())
    }

    fn finish(&mut self, message: &ChatMessage) -> io::Result<()> {
        self.write_from(&message.content)
    }

    fn write_from(&mut self, content: &str) -> io::Result<()> {
        let Some(fresh) = content.get(self.printed..) else {
            return Ok(());
        };
        if !fresh.is_empty() {
            let mut stdout = io::stdout();
            stdout.write_all(fresh.as_bytes())?;
            stdout.flush()?;
            self.printed = content.len();
        }
        Ok(())
    }
}
