use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use metrics_chat::config::Settings;
use metrics_chat::db::{connection, SqliteCheckpointStore, SqliteHistoryStore};
use metrics_chat::execution::{PostgresEngine, QueryEngine, SqliteEngine};
use metrics_chat::llm::OpenAiClient;
use metrics_chat::render::{ActionKind, Block};
use metrics_chat::service::{ChatReply, ChatService};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "metrics-chat")]
#[command(about = "Ask questions about app portfolio metrics in plain English")]
struct Args {
    /// Conversation thread the command applies to
    #[arg(short, long, default_value = "cli")]
    thread: String,

    /// Model name (overrides AI_MODEL)
    #[arg(long, global = true)]
    model: Option<String>,

    /// Retry bound for generation (overrides MAX_RETRIES)
    #[arg(long, global = true)]
    max_retries: Option<u32>,

    /// Conversation state database (overrides STATE_DB_PATH)
    #[arg(long, global = true)]
    state_db: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ask a question
    Ask {
        question: String,

        /// Write a CSV export to this directory when one is produced
        #[arg(long, default_value = ".")]
        export_dir: PathBuf,
    },
    /// Click an action button from an earlier answer
    Action {
        /// export or show_query
        kind: ActionKind,
        token: String,

        #[arg(long, default_value = ".")]
        export_dir: PathBuf,
    },
    /// Print the thread's recent turns
    History {
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
    /// Print the thread's latest checkpointed state as JSON
    Resume,
    /// Delete turns past the retention window
    Cleanup,
}

async fn build_engine(settings: &Settings) -> Result<Arc<dyn QueryEngine>> {
    if let Some(url) = &settings.database_url {
        let pool = connection::init_pool(url).await?;
        info!("Using Postgres metrics store");
        return Ok(Arc::new(PostgresEngine::new(pool, settings.statement_timeout)));
    }
    let path = settings
        .metrics_sqlite_path
        .as_deref()
        .context("Set DATABASE_URL or METRICS_SQLITE_PATH")?;
    info!(path, "Using SQLite metrics store");
    Ok(Arc::new(SqliteEngine::open(path)?))
}

fn print_reply(reply: &ChatReply, export_dir: &Path) -> Result<()> {
    for block in &reply.blocks {
        match block {
            Block::Actions { elements } => {
                for e in elements {
                    println!("[{}] metrics-chat --thread {} action {} {}", e.label, reply.thread_id, e.kind, e.token);
                }
            }
            other => {
                if let Some(text) = other.text() {
                    println!("{}\n", text);
                }
            }
        }
    }
    if let Some(export) = &reply.export {
        let path = export_dir.join(&export.filename);
        std::fs::write(&path, &export.content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("Saved {}", path.display());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut settings = Settings::from_env()?;
    if let Some(model) = args.model.clone() {
        settings.model = model;
    }
    if let Some(max_retries) = args.max_retries {
        settings.max_retries = max_retries;
    }
    if let Some(path) = args.state_db.clone() {
        settings.state_db_path = path;
    }

    let history = Arc::new(SqliteHistoryStore::open(&settings.state_db_path)?);
    let checkpoints = Arc::new(SqliteCheckpointStore::open(&settings.state_db_path)?);
    let llm = Arc::new(OpenAiClient::with_base_url(
        settings.openai_api_key.clone(),
        settings.model.clone(),
        settings.openai_base_url.clone(),
    ));
    info!(model = llm.model(), "Language model configured");

    // Only commands that may run the pipeline need the gateway and engine.
    let needs_pipeline = matches!(args.command, Command::Ask { .. } | Command::Action { .. });
    if needs_pipeline {
        settings.require_api_key()?;
    }
    let engine: Arc<dyn QueryEngine> = if needs_pipeline {
        build_engine(&settings).await?
    } else {
        Arc::new(SqliteEngine::from_connection(rusqlite::Connection::open_in_memory()?)?)
    };

    let service = ChatService::new(settings, llm, engine, history, checkpoints);

    match args.command {
        Command::Ask {
            question,
            export_dir,
        } => {
            let reply = service.ask(&args.thread, &question).await?;
            print_reply(&reply, &export_dir)?;
        }
        Command::Action {
            kind,
            token,
            export_dir,
        } => {
            let reply = service.handle_action(&args.thread, kind, &token).await?;
            print_reply(&reply, &export_dir)?;
        }
        Command::History { limit } => {
            for turn in service.recent_turns(&args.thread, limit).await? {
                println!("[{}] User: {}", turn.created_at.to_rfc3339(), turn.user_message);
                println!("Bot: {}\n", turn.bot_response);
            }
        }
        Command::Resume => match service.resume(&args.thread).await? {
            Some(state) => println!("{}", serde_json::to_string_pretty(&state)?),
            None => println!("No checkpoint for thread '{}'", args.thread),
        },
        Command::Cleanup => {
            let removed = service.cleanup().await?;
            println!("Removed {} turns", removed);
        }
    }

    Ok(())
}
