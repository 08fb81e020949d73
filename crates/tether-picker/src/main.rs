//! tether-picker
//!
//! File picker plugin. Speaks the tether message protocol on stdin/stdout,
//! logs to stderr and asks the user on the terminal.

mod prompt;

use std::collections::HashMap;
use std::env;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::Result;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use tether::message::{
    MESSAGE_CLASS_BASE, MESSAGE_CLASS_BASE_VERSION, MESSAGE_CLASS_BASIC,
    MESSAGE_CLASS_BASIC_VERSION, Message,
};

use prompt::{Answer, OpenKind, OpenRequest};

/// Spawn a background task that reads frames from stdin
fn spawn_stdin_reader() -> mpsc::Receiver<Message> {
    let (tx, rx) = mpsc::channel::<Message>(32);

    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match Message::from_frame(line.as_bytes()) {
                        Ok(message) => {
                            if tx.send(message).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("Dropping malformed frame from host: {}", e),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!("Error reading from host: {}", e);
                    break;
                }
            }
        }
    });

    rx
}

/// Write one frame to stdout
fn write_message(message: &Message) -> Result<()> {
    let frame = message.to_frame()?;
    let mut stdout = io::stdout().lock();
    stdout.write_all(&frame)?;
    stdout.flush()?;
    Ok(())
}

fn open_request(message: &Message) -> Option<OpenRequest> {
    let kind = OpenKind::parse(message.value_str("type")?)?;
    Some(OpenRequest {
        kind,
        filter: message.value_str("filter").unwrap_or("all").to_string(),
        default: message.value_str("default").map(String::from),
        folder: PathBuf::from(message.value_str("folder").unwrap_or(".")),
    })
}

async fn handle_open(request: OpenRequest, dictionary: HashMap<String, String>) -> Result<()> {
    info!("Opening {:?} dialog in {}", request.kind, request.folder.display());
    let answer = tokio::task::spawn_blocking(move || prompt::ask(&request, &dictionary)).await?;

    let reply = match answer {
        Ok(Answer::Done(filenames)) => Message::new(MESSAGE_CLASS_BASIC, "done")
            .with_value("perseus", "unblock")
            .with_value("filenames", json!(filenames)),
        Ok(Answer::Canceled) => {
            Message::new(MESSAGE_CLASS_BASIC, "canceled").with_value("perseus", "unblock")
        }
        Err(e) => {
            error!("Cannot prompt on the terminal: {}", e);
            Message::new(MESSAGE_CLASS_BASIC, "canceled").with_value("perseus", "unblock")
        }
    };
    write_message(&reply)
}

fn main() -> Result<()> {
    // Initialize tracing to stderr (stdout is for IPC)
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    if let Some(plugin_file) = env::args().nth(1) {
        debug!("Started as {}", plugin_file);
    }

    let rt = tokio::runtime::Builder::new_current_thread().enable_all().build()?;

    rt.block_on(async {
        let mut rx = spawn_stdin_reader();
        let mut dictionary = HashMap::new();

        while let Some(message) = rx.recv().await {
            match (message.class.as_str(), message.name.as_str()) {
                (MESSAGE_CLASS_BASE, "init") => {
                    let response = Message::new(MESSAGE_CLASS_BASE, "init_response")
                        .with_value(
                            "versions",
                            json!({
                                MESSAGE_CLASS_BASE: MESSAGE_CLASS_BASE_VERSION,
                                MESSAGE_CLASS_BASIC: MESSAGE_CLASS_BASIC_VERSION,
                            }),
                        )
                        .with_value("plugin_version", env!("CARGO_PKG_VERSION"));
                    write_message(&response)?;
                }
                (MESSAGE_CLASS_BASE, "idle") => {
                    write_message(&Message::new(MESSAGE_CLASS_BASE, "heartbeat"))?;
                }
                (MESSAGE_CLASS_BASE, "cleanup") => {
                    info!("Host asked for cleanup");
                    break;
                }
                (MESSAGE_CLASS_BASIC, "initialization") => {
                    dictionary = message.parse_value("dictionary").unwrap_or_default();
                    if let Some(window_id) = message.value_str("window_id") {
                        debug!("Dialogs would be transient for window {}", window_id);
                    }
                }
                (MESSAGE_CLASS_BASIC, "set_priority") => {
                    debug!("Priority set to {}", message.value_str("priority").unwrap_or("?"));
                }
                (MESSAGE_CLASS_BASIC, "open") => {
                    match open_request(&message) {
                        Some(request) => handle_open(request, dictionary.clone()).await?,
                        None => {
                            warn!("Ignoring open request without a valid type");
                            continue;
                        }
                    }
                    // We're done. Exit the whole application.
                    write_message(&Message::new(MESSAGE_CLASS_BASE, "shutdown"))?;
                    break;
                }
                (class, name) => {
                    warn!("Unknown {} class message: {}", class, name);
                }
            }
        }

        Ok::<_, anyhow::Error>(())
    })?;

    // The stdin reader may still be parked in a blocking read.
    rt.shutdown_background();
    Ok(())
}
