use anyhow::{bail, Result};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use shared::{
    domain::{is_valid_collection_name, SortDirection, DEFAULT_COLLECTION},
    protocol::{NewTask, MAX_TITLE_CHARS},
};
use storage::Storage;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/tasks.db")]
    database_url: String,
    #[arg(long, default_value = DEFAULT_COLLECTION)]
    collection: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the collection newest first.
    List,
    /// Insert one open task per title, in the order given.
    Seed {
        #[arg(required = true)]
        titles: Vec<String>,
    },
    /// Remove every task in the collection.
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if !is_valid_collection_name(&cli.collection) {
        bail!("invalid collection name '{}'", cli.collection);
    }
    let storage = Storage::new(&cli.database_url).await?;

    match cli.command {
        Command::List => {
            let tasks = storage
                .list_tasks(&cli.collection, SortDirection::Desc)
                .await?;
            for task in &tasks {
                let mark = if task.completed { 'x' } else { ' ' };
                println!(
                    "[{mark}] {} {} ({})",
                    task.id,
                    task.title,
                    task.created_at.to_rfc3339()
                );
            }
            println!("{} task(s) in '{}'", tasks.len(), cli.collection);
        }
        Command::Seed { titles } => {
            let base = Utc::now();
            for (offset, title) in titles.iter().enumerate() {
                let title = title.trim();
                if title.is_empty() || title.chars().count() > MAX_TITLE_CHARS {
                    bail!("title must be 1..={MAX_TITLE_CHARS} characters: '{title}'");
                }
                // Distinct timestamps keep the given order stable when listed.
                let created_at = base + Duration::milliseconds(offset as i64);
                let id = storage
                    .insert_task(&cli.collection, &NewTask::pending(title, created_at))
                    .await?;
                println!("created task id={id}");
            }
        }
        Command::Clear => {
            let removed = storage.clear_collection(&cli.collection).await?;
            println!("removed {removed} task(s) from '{}'", cli.collection);
        }
    }

    Ok(())
}
