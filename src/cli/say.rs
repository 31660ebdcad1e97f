//! Stream a single prompt to stdout.

use std::error::Error;
use std::io::{self, Write};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::cli::{report_error, Session};
use crate::core::chat_stream::{ChatStreamService, StreamEvent, StreamParams};

pub async fn run_say(session: Session, prompt: String) -> Result<(), Box<dyn Error>> {
    let request = session.request(&prompt);
    let cancel_token = CancellationToken::new();

    let (stream_service, mut rx) = ChatStreamService::new();
    let handle = stream_service.spawn_stream(StreamParams {
        transport: Arc::new(session.client),
        request,
        cancel_token: cancel_token.clone(),
        stream_id: 1,
    });

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some((StreamEvent::Delta { text, .. }, _)) => {
                    print!("{text}");
                    io::stdout().flush()?;
                }
                Some((StreamEvent::Done(_), _)) => {
                    println!();
                    break;
                }
                Some((StreamEvent::Failed(err), _)) => {
                    println!();
                    report_error(&err);
                    std::process::exit(1);
                }
                Some(_) => {}
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                cancel_token.cancel();
                println!();
                break;
            }
        }
    }

    handle.await?;
    Ok(())
}
