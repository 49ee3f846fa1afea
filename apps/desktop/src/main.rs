use std::{future::Future, sync::Arc};

use anyhow::{bail, Context, Result};
use clap::Parser;
use client_core::{
    toast_text, ClientError, DocumentBackend, InMemoryBackend, RemoteBackend, TaskListController,
    TaskListView,
};
use shared::domain::{is_valid_collection_name, CollectionQuery};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{parse_command, Command, HELP};

#[derive(Parser, Debug)]
#[command(about = "Realtime task list in the terminal")]
struct Args {
    /// Document server to sync with, e.g. http://127.0.0.1:8080
    #[arg(long, conflicts_with = "offline")]
    server_url: Option<String>,
    /// Keep tasks in memory for this session only.
    #[arg(long)]
    offline: bool,
    #[arg(long)]
    collection: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let args = Args::parse();
    let mut settings = config::load_settings();
    if let Some(server_url) = args.server_url {
        settings.server_url = Some(server_url);
    }
    if let Some(collection) = args.collection {
        settings.collection = collection;
    }
    if !is_valid_collection_name(&settings.collection) {
        bail!(
            "invalid collection name '{}': use 1-64 letters, digits, '-' or '_'",
            settings.collection
        );
    }

    let backend: Arc<dyn DocumentBackend> = match settings.server_url.as_deref() {
        Some(server_url) if !args.offline => {
            info!(%server_url, collection = %settings.collection, "using document server");
            Arc::new(
                RemoteBackend::new(server_url)
                    .with_context(|| format!("invalid server url '{server_url}'"))?,
            )
        }
        _ => {
            info!(collection = %settings.collection, "running offline with an in-memory collection");
            Arc::new(InMemoryBackend::new())
        }
    };

    let controller = Arc::new(
        TaskListController::start(backend, CollectionQuery::new(settings.collection.clone()))
            .await
            .context("failed to subscribe to the task list")?,
    );

    let mut state_rx = controller.watch_state();
    let render = tokio::spawn(async move {
        loop {
            let view = TaskListView::from_state(&state_rx.borrow_and_update());
            print!("\n{view}");
            if state_rx.changed().await.is_err() {
                break;
            }
        }
    });

    let mut events = controller.subscribe_events();
    let toasts = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => eprintln!("! {}", toast_text(&event)),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "dropped queued notices"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let command = match parse_command(&line) {
            Ok(command) => command,
            Err(message) => {
                eprintln!("{message}");
                continue;
            }
        };

        let c = Arc::clone(&controller);
        match command {
            Command::Quit => break,
            Command::Help => println!("{HELP}"),
            Command::List => print!("\n{}", TaskListView::from_state(&controller.state())),
            Command::Draft(text) => controller.set_draft_title(text),
            Command::Add(title) => fire(async move { c.add_task(&title).await.map(drop) }),
            Command::Submit => fire(async move { c.submit_draft().await.map(drop) }),
            Command::Toggle(row) => fire(async move { c.toggle_row(row - 1).await }),
            Command::Delete(row) => fire(async move { c.delete_row(row - 1).await }),
        }
    }

    controller.shutdown().await;
    render.abort();
    toasts.abort();
    Ok(())
}

/// Runs a command without waiting for it. Backend failures already arrive as
/// toasts, so only local errors are printed here.
fn fire<F>(command: F)
where
    F: Future<Output = Result<(), ClientError>> + Send + 'static,
{
    tokio::spawn(async move {
        match command.await {
            Ok(()) => {}
            Err(ClientError::Backend(err)) => debug!(%err, "command failed"),
            Err(err) => eprintln!("{err}"),
        }
    });
}
