//! Operator entry point for the cascade engine.
//!
//! # Responsibility
//! - Load configuration, initialize logging and open the database.
//! - Publish author cascade requests and run the consumer, either once until
//!   the queue is drained or as a background worker until stdin closes.

use clap::{Parser, Subcommand};
use docgraph_core::messaging::queue::MessageStatus;
use docgraph_core::messaging::{sqlite_consumer, ConsumerSettings, DeliveryOutcome};
use docgraph_core::{
    core_version, init_from_config, open_db, AppConfig, AuthorId, AuthorService, CascadeProducer,
    ConsumerWorker, SqliteMessageQueue, Topic,
};
use log::{error, info};
use std::error::Error;
use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

type CliResult<T> = Result<T, Box<dyn Error>>;

const STDIN_THREAD_NAME: &str = "docgraph-stdin-watch";

/// docgraph CLI
#[derive(Parser)]
#[command(name = "docgraph")]
#[command(about = "Reference-graph cascade engine", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "DOCGRAPH_CONFIG")]
    config: Option<PathBuf>,

    /// Database path; overrides `database_path` from the config file
    #[arg(long, env = "DOCGRAPH_DATABASE")]
    database: Option<PathBuf>,

    /// Log level; overrides `[logging] level`
    #[arg(long, env = "DOCGRAPH_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create or migrate the database
    Init,
    /// Publish a cascade delete request for an author
    Publish {
        #[arg(long)]
        author_id: AuthorId,
    },
    /// Consume cascade requests
    Consume {
        /// Keep consuming on a background worker until stdin is closed
        #[arg(long)]
        follow: bool,
    },
    /// Show queue state for the configured topic
    Status,
    /// Print the core version
    Version,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("event=cli_exit module=cli status=error error={err}");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> CliResult<()> {
    if let Command::Version = cli.command {
        println!("docgraph_core version={}", core_version());
        return Ok(());
    }

    let config = load_config(&cli)?;
    init_from_config(&config.logging)?;

    match cli.command {
        Command::Init => init(&config),
        Command::Publish { author_id } => publish(&config, author_id),
        Command::Consume { follow: false } => consume_once(&config),
        Command::Consume { follow: true } => consume_follow(&config),
        Command::Status => status(&config),
        Command::Version => Ok(()),
    }
}

fn load_config(cli: &Cli) -> CliResult<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    if let Some(database) = &cli.database {
        config.database_path = database.clone();
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    config.validate()?;
    Ok(config)
}

fn init(config: &AppConfig) -> CliResult<()> {
    open_db(&config.database_path)?;
    println!("initialized {}", config.database_path.display());
    Ok(())
}

fn publish(config: &AppConfig, author_id: AuthorId) -> CliResult<()> {
    let conn = open_db(&config.database_path)?;
    let topic = Topic::new(&config.messaging.topic)?;
    let producer = CascadeProducer::new(SqliteMessageQueue::try_new(&conn)?, topic);
    let authors = AuthorService::try_new(&conn)?;
    let message_id = authors.request_author_cascade(&producer, author_id)?;
    println!("published message_id={message_id} author_id={author_id}");
    Ok(())
}

fn consume_once(config: &AppConfig) -> CliResult<()> {
    let conn = open_db(&config.database_path)?;
    let consumer = sqlite_consumer(&conn, ConsumerSettings::from_config(&config.messaging)?)?;
    let outcomes = consumer.drain()?;
    for outcome in &outcomes {
        println!("{}", describe_outcome(outcome));
    }
    println!("processed={}", outcomes.len());
    Ok(())
}

fn consume_follow(config: &AppConfig) -> CliResult<()> {
    let worker = ConsumerWorker::spawn(&config.database_path, &config.messaging)?;
    info!(
        "event=cli_follow module=cli status=start topic={}",
        config.messaging.topic
    );
    println!("consuming `{}`; close stdin to stop", config.messaging.topic);

    let input_closed = watch_stdin()?;
    let exit = wait_for_stop(&input_closed, config.messaging.poll_interval(), || {
        worker.is_running()
    });

    let stats = worker.shutdown()?;
    println!(
        "completed={} already_removed={} retried={} dead_lettered={} transport_errors={}",
        stats.completed,
        stats.already_removed,
        stats.retried,
        stats.dead_lettered,
        stats.transport_errors
    );
    match exit {
        FollowExit::InputClosed => Ok(()),
        FollowExit::WorkerStopped => {
            error!("event=cli_follow module=cli status=error reason=worker_stopped");
            Err("consumer worker stopped unexpectedly".into())
        }
    }
}

/// Why `consume --follow` stopped waiting.
#[derive(Debug, PartialEq, Eq)]
enum FollowExit {
    InputClosed,
    WorkerStopped,
}

/// Blocks until `input_closed` fires or `is_running` turns false, checking
/// the worker every `check_every`.
fn wait_for_stop(
    input_closed: &Receiver<()>,
    check_every: Duration,
    is_running: impl Fn() -> bool,
) -> FollowExit {
    loop {
        match input_closed.recv_timeout(check_every) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return FollowExit::InputClosed,
            Err(RecvTimeoutError::Timeout) => {
                if !is_running() {
                    return FollowExit::WorkerStopped;
                }
            }
        }
    }
}

/// Reads stdin on its own thread and signals once it ends or fails.
fn watch_stdin() -> CliResult<Receiver<()>> {
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name(STDIN_THREAD_NAME.to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                if line.is_err() {
                    break;
                }
            }
            let _ = tx.send(());
        })?;
    Ok(rx)
}

fn status(config: &AppConfig) -> CliResult<()> {
    let conn = open_db(&config.database_path)?;
    let queue = SqliteMessageQueue::try_new(&conn)?;
    let topic = Topic::new(&config.messaging.topic)?;
    let counts = [
        MessageStatus::Pending,
        MessageStatus::InFlight,
        MessageStatus::Acked,
        MessageStatus::Dead,
    ]
    .into_iter()
    .map(|status| Ok(format!("{}={}", status.as_str(), queue.count(&topic, status)?)))
    .collect::<CliResult<Vec<_>>>()?;
    println!("topic={} {}", topic, counts.join(" "));
    Ok(())
}

fn describe_outcome(outcome: &DeliveryOutcome) -> String {
    match outcome {
        DeliveryOutcome::Completed { message_id, report } => format!(
            "completed message_id={} author_id={} affected={} edges_removed={}",
            message_id,
            report.author_id,
            report.affected.len(),
            report.edges_removed
        ),
        DeliveryOutcome::AlreadyRemoved {
            message_id,
            author_id,
        } => format!(
            "skipped message_id={message_id} author_id={author_id} reason=author_not_found"
        ),
        DeliveryOutcome::Retrying {
            message_id,
            attempts,
            error_kind,
        } => format!(
            "retrying message_id={} attempts={} error_kind={}",
            message_id,
            attempts,
            error_kind.as_str()
        ),
        DeliveryOutcome::DeadLettered { message_id, reason } => {
            format!("dead_lettered message_id={message_id} reason={reason}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{wait_for_stop, FollowExit};
    use std::cell::Cell;
    use std::sync::mpsc;
    use std::time::Duration;

    const TICK: Duration = Duration::from_millis(5);

    #[test]
    fn stopped_worker_ends_wait_while_stdin_stays_open() {
        let (_tx, rx) = mpsc::channel::<()>();
        let checks = Cell::new(0);

        let exit = wait_for_stop(&rx, TICK, || {
            checks.set(checks.get() + 1);
            checks.get() < 3
        });

        assert_eq!(exit, FollowExit::WorkerStopped);
        assert_eq!(checks.get(), 3);
    }

    #[test]
    fn closed_input_ends_wait() {
        let (tx, rx) = mpsc::channel();
        tx.send(()).unwrap();
        assert_eq!(wait_for_stop(&rx, TICK, || true), FollowExit::InputClosed);

        let (tx, rx) = mpsc::channel::<()>();
        drop(tx);
        assert_eq!(wait_for_stop(&rx, TICK, || true), FollowExit::InputClosed);
    }
}
