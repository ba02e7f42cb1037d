//! Console front end: prints controller events and reads commands from stdin.

pub mod commands;
pub mod error;
pub mod events;
pub mod state;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};

use commands::Command;
use error::ConsoleError;
use state::AppState;

use crate::domain::error::ControllerError;

pub async fn run_console(state: AppState) -> anyhow::Result<()> {
    let forwarder = events::start_event_forwarder(state.event_bus.clone());
    println!("{}", commands::HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };

        let command = match Command::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };
        if command == Command::Quit {
            break;
        }

        match commands::execute(&state, command).await {
            Ok(text) if text.is_empty() => {}
            Ok(text) => println!("{}", text),
            Err(ConsoleError::Controller(ControllerError::SessionInvalid)) => {
                println!("Session expired. Update the token and restart.");
                break;
            }
            Err(e) => println!("error: {}", String::from(e)),
        }
    }

    state.controller.shutdown().await;
    if let Err(e) = forwarder.await {
        tracing::warn!("Event forwarder ended abnormally: {}", e);
    }
    Ok(())
}
