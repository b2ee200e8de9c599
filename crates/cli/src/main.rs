//! Taskforge operator CLI: a thin wrapper over the `Producer` API,
//! talking to Redis directly rather than through a server process (the
//! daemon owns the worker/scheduler loops; this binary only enqueues and
//! administers).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tabled::{Table, Tabled};

use taskforge_core::application::Producer;
use taskforge_core::domain::{JobOptions, JobState};
use taskforge_core::keys::QueueRef;
use taskforge_core::port::{QueueStore, SystemTimeProvider, TimeProvider};
use taskforge_redis::RedisStore;

const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
const DEFAULT_PREFIX: &str = "taskforge";

#[derive(Parser)]
#[command(name = "taskforge")]
#[command(about = "Taskforge operator CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Redis connection URL
    #[arg(long, env = "TASKFORGE_REDIS_URL", default_value = DEFAULT_REDIS_URL)]
    redis_url: String,

    /// Key prefix the target daemon was started with
    #[arg(long, env = "TASKFORGE_PREFIX", default_value = DEFAULT_PREFIX)]
    prefix: String,

    /// Queue name to operate against
    #[arg(short, long, default_value = "default")]
    queue: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Enqueue a new job
    Add {
        /// Job name
        name: String,

        /// Payload as a JSON string
        #[arg(long, default_value = "{}")]
        data: String,

        /// Priority (1 = most urgent). Omit for FIFO/LIFO ordering.
        #[arg(long)]
        priority: Option<u32>,

        /// Delay, in milliseconds, before the job becomes runnable
        #[arg(long, default_value = "0")]
        delay_ms: i64,

        /// Maximum attempts before the job is considered permanently failed
        #[arg(long, default_value = "1")]
        attempts: u32,
    },

    /// Remove a job by id
    Remove { job_id: String },

    /// Stop handing out new jobs from this queue
    Pause,

    /// Resume handing out jobs from this queue
    Resume,

    /// Report whether the queue is paused
    IsPaused,

    /// Print job counts per state
    Counts,

    /// Remove every id from wait/delayed, leaving active untouched
    Drain,

    /// Delete every key under this queue's namespace
    Obliterate {
        /// Proceed even if jobs are currently active
        #[arg(long)]
        force: bool,
    },
}

#[derive(Tabled)]
struct CountRow {
    state: String,
    count: i64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let store = RedisStore::connect(&cli.redis_url)
        .await
        .context("failed to connect to redis")?;
    let queue = QueueRef::with_prefix(cli.prefix.clone(), cli.queue.clone());
    let time_provider: std::sync::Arc<dyn TimeProvider> = std::sync::Arc::new(SystemTimeProvider);
    let producer = Producer::new(store.clone(), queue.clone(), time_provider);

    match cli.command {
        Commands::Add {
            name,
            data,
            priority,
            delay_ms,
            attempts,
        } => {
            let payload: serde_json::Value = serde_json::from_str(&data).context("invalid JSON payload")?;
            let opts = JobOptions {
                priority,
                delay: delay_ms,
                attempts: attempts.max(1),
                ..JobOptions::default()
            };
            let job_id = producer.add(&name, payload, opts).await?;
            println!("{} job {}", "added".green().bold(), job_id);
        }

        Commands::Remove { job_id } => {
            producer.remove(&job_id).await?;
            println!("{} job {}", "removed".green().bold(), job_id);
        }

        Commands::Pause => {
            producer.pause().await?;
            println!("{}", format!("queue {} paused", cli.queue).yellow().bold());
        }

        Commands::Resume => {
            producer.resume().await?;
            println!("{}", format!("queue {} resumed", cli.queue).green().bold());
        }

        Commands::IsPaused => {
            let paused = producer.is_paused().await?;
            println!("{}", if paused { "paused".yellow() } else { "running".green() });
        }

        Commands::Counts => {
            let states = [
                JobState::Waiting,
                JobState::Active,
                JobState::Delayed,
                JobState::WaitingChildren,
                JobState::Completed,
                JobState::Failed,
            ];
            let counts = store.get_job_counts(&queue, &states).await?;
            let rows: Vec<CountRow> = states
                .iter()
                .map(|s| CountRow {
                    state: s.to_string(),
                    count: *counts.get(&s.to_string()).unwrap_or(&0),
                })
                .collect();
            println!("{}", Table::new(rows));
        }

        Commands::Drain => {
            producer.drain().await?;
            println!("{}", format!("queue {} drained", cli.queue).green().bold());
        }

        Commands::Obliterate { force } => {
            producer.obliterate(force).await?;
            println!("{}", format!("queue {} obliterated", cli.queue).red().bold());
        }
    }

    Ok(())
}
