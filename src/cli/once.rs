//! Non-streaming completion for a single prompt.

use std::error::Error;

use tokio_util::sync::CancellationToken;

use crate::cli::{report_error, Session};

pub async fn run_once(session: Session, prompt: String) -> Result<(), Box<dyn Error>> {
    let request = session.request(&prompt);
    let cancel_token = CancellationToken::new();

    let result = tokio::select! {
        result = session.client.chat_once(&request, &cancel_token) => result,
        _ = tokio::signal::ctrl_c() => {
            cancel_token.cancel();
            return Ok(());
        }
    };

    match result {
        Ok(response) => {
            println!("{}", response.text);
            Ok(())
        }
        Err(err) => {
            report_error(&err);
            std::process::exit(1);
        }
    }
}
