use clap::{Parser, Subcommand};
use focuslist_client::{
    ClientResult, KeyValueStore, MemoryStore, NetworkMonitor, SqliteStore, SyncConfig, SyncEngine,
};
use focuslist_core::{Priority, TaskId};
use std::str::FromStr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "focuslist", about = "Offline-first task list")]
struct Cli {
    /// Remote task store; omit to stay in guest mode
    #[arg(long, env = "FOCUSLIST_SERVER_URL")]
    server_url: Option<String>,

    #[arg(long, env = "FOCUSLIST_DATABASE_URL")]
    database_url: Option<String>,

    #[arg(long, env = "FOCUSLIST_SESSION_TOKEN")]
    session_token: Option<String>,

    /// Treat the network as unavailable; writes are queued
    #[arg(long)]
    offline: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    List,
    Add {
        text: String,
        #[arg(long, default_value = "medium", value_parser = Priority::from_str)]
        priority: Priority,
    },
    Toggle {
        #[arg(value_parser = TaskId::from_str)]
        id: TaskId,
    },
    Delete {
        #[arg(value_parser = TaskId::from_str)]
        id: TaskId,
    },
    /// Push pending mutations and pull the remote list
    Sync,
    Status,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("focuslist_client=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        tracing::error!(%e, "focuslist failed");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> ClientResult<()> {
    let mut config = SyncConfig::from_env()?;
    if cli.server_url.is_some() {
        config.server_url = cli.server_url;
    }
    if let Some(database_url) = cli.database_url {
        config.database_url = database_url;
    }
    if cli.session_token.is_some() {
        config.session_token = cli.session_token;
    }

    let backend: Arc<dyn KeyValueStore> = match SqliteStore::open(&config.database_url).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::error!(%e, "Failed to open {}, changes will not persist", config.database_url);
            Arc::new(MemoryStore::new())
        }
    };

    let remote = config.build_remote()?;
    let (monitor, _signals) = NetworkMonitor::new(!cli.offline);
    let engine = SyncEngine::new(config, backend, remote, monitor).await;

    if !cli.offline {
        engine.start().await;
    }

    match cli.command {
        Command::List | Command::Status => {}
        Command::Add { text, priority } => {
            let task = engine.add_task(&text, priority).await;
            println!("added {}", task.id);
        }
        Command::Toggle { id } => {
            let task = engine.toggle_task(&id).await?;
            println!("{} is now {}", task.id, if task.completed { "done" } else { "open" });
        }
        Command::Delete { id } => {
            engine.delete_task(&id).await;
            println!("deleted {}", id);
        }
        Command::Sync => {
            let (drained, refreshed) = engine.sync_now().await;
            println!("drain: {:?}, refresh: {:?}", drained, refreshed);
        }
    }

    // Direct calls are skipped while a backlog exists; push it before exiting.
    if !cli.offline {
        engine.process_queue().await;
    }

    for task in engine.tasks().await {
        println!(
            "[{}] {:<6} {}  ({})",
            if task.completed { "x" } else { " " },
            task.priority,
            task.text,
            task.id
        );
    }
    println!(
        "state: {}, pending: {}",
        engine.sync_state().await,
        engine.pending_mutations().await.len()
    );
    if engine.is_storage_degraded() {
        println!("warning: durable store unavailable");
    }
    Ok(())
}
