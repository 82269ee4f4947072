use anyhow::Context;
use anyhow::Result;
use clap::Args;
use clap::Subcommand;
use docflow_workflow::Asset;
use docflow_workflow::ChannelConfig;
use docflow_workflow::ChannelError;
use docflow_workflow::ChannelVocabulary;
use docflow_workflow::ExecutionId;
use docflow_workflow::ExecutionRecord;
use docflow_workflow::ExecutionSnapshot;
use docflow_workflow::ExecutionStatus;
use docflow_workflow::Handlers;
use docflow_workflow::HttpStatusSource;
use docflow_workflow::LogEntry;
use docflow_workflow::StatusSource;
use docflow_workflow::Subscription;
use docflow_workflow::TranscriptLayout;
use docflow_workflow::TransportError;
use docflow_workflow::connect_channel;
use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::info;
use tracing::warn;

const WRAP_WIDTH: usize = 100;

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Follow one or more executions until they finish or fail.
    Watch(WatchArgs),
    /// Fetch the current status and assets of an execution once.
    Status(StatusArgs),
    /// Show a transcript saved by `watch`.
    History(HistoryArgs),
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Execution ids to follow.
    #[arg(value_name = "ID", required = true, num_args = 1..)]
    pub ids: Vec<String>,

    /// Use the case-era event names (`join_case` / `case_update`).
    #[arg(long)]
    pub legacy: bool,

    /// Directory to store one transcript (record.json, progress.log) per
    /// execution.
    #[arg(long = "transcript-dir", value_name = "DIR")]
    pub transcript_dir: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    #[arg(value_name = "ID")]
    pub id: String,
}

#[derive(Debug, Args)]
pub struct HistoryArgs {
    #[arg(value_name = "ID")]
    pub id: String,

    /// Directory the transcripts were written to.
    #[arg(long = "transcript-dir", value_name = "DIR")]
    pub transcript_dir: PathBuf,
}

pub async fn execute(command: Command, config: ChannelConfig) -> Result<()> {
    match command {
        Command::Watch(args) => watch(args, config).await,
        Command::Status(args) => status(args, config).await,
        Command::History(args) => history(args),
    }
}

enum WatchEvent {
    Log(ExecutionId, LogEntry),
    Status(ExecutionId, ExecutionStatus),
    Finished(ExecutionId),
    Failed {
        execution_id: ExecutionId,
        message: String,
        fatal: bool,
    },
}

struct Watched {
    record: ExecutionRecord,
    settled: bool,
    subscription: Subscription,
}

fn watch_handlers(execution_id: &ExecutionId, events: &UnboundedSender<WatchEvent>) -> Handlers {
    let (log_id, log_tx) = (execution_id.clone(), events.clone());
    let (status_id, status_tx) = (execution_id.clone(), events.clone());
    let (finish_id, finish_tx) = (execution_id.clone(), events.clone());
    let (error_id, error_tx) = (execution_id.clone(), events.clone());
    Handlers::new()
        .on_log(move |entry| {
            let _ = log_tx.send(WatchEvent::Log(log_id.clone(), entry.clone()));
        })
        .on_status_change(move |status| {
            let _ = status_tx.send(WatchEvent::Status(status_id.clone(), status.clone()));
        })
        .on_finish(move || {
            let _ = finish_tx.send(WatchEvent::Finished(finish_id));
        })
        .on_error(move |err| {
            let fatal = matches!(err, ChannelError::Transport(TransportError::GaveUp { .. }));
            let _ = error_tx.send(WatchEvent::Failed {
                execution_id: error_id.clone(),
                message: err.to_string(),
                fatal,
            });
        })
}

async fn watch(args: WatchArgs, mut config: ChannelConfig) -> Result<()> {
    if args.legacy {
        config.vocabulary = ChannelVocabulary::Legacy;
    }
    let layout = args.transcript_dir.map(TranscriptLayout::new);
    let channel = connect_channel(&config)?;
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();

    let mut watched: BTreeMap<String, Watched> = BTreeMap::new();
    for id in args.ids {
        if watched.contains_key(&id) {
            continue;
        }
        let execution_id = ExecutionId::new(id.clone());
        let subscription = channel
            .open(execution_id.clone(), watch_handlers(&execution_id, &events_tx))
            .with_context(|| format!("failed to watch execution {id}"))?;
        watched.insert(
            id,
            Watched {
                record: ExecutionRecord::new(execution_id),
                settled: false,
                subscription,
            },
        );
    }
    drop(events_tx);
    info!(executions = watched.len(), socket_url = %config.socket_url(), "watching executions");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;
    while watched.values().any(|entry| !entry.settled) {
        let event = tokio::select! {
            event = events_rx.recv() => event,
            _ = &mut ctrl_c => {
                interrupted = true;
                break;
            }
        };
        let Some(event) = event else {
            break;
        };
        apply_event(&mut watched, event);
    }

    for (id, entry) in &mut watched {
        entry.subscription.close();
        if entry.record.workflow_name.is_none() {
            entry.record.workflow_name = entry
                .subscription
                .snapshot()
                .and_then(|snapshot| snapshot.workflow_name);
        }
        if !entry.settled {
            let note = if interrupted {
                "watch interrupted before the execution finished"
            } else {
                "watch ended before the execution finished"
            };
            entry.record.mark_interrupted(note);
            println!("[{id}] {note}");
        }
        if let Some(layout) = &layout {
            persist(layout, &entry.record)?;
        }
    }
    Ok(())
}

fn apply_event(watched: &mut BTreeMap<String, Watched>, event: WatchEvent) {
    match event {
        WatchEvent::Log(execution_id, entry) => {
            if let Some(message) = entry.agent_message() {
                print_line(&execution_id, &format!("agent: {message}"));
            } else {
                print_line(&execution_id, entry.text());
            }
            if let Some(watched) = watched.get_mut(execution_id.as_str()) {
                watched.record.push_log(entry);
            }
        }
        WatchEvent::Status(execution_id, status) => {
            print_line(&execution_id, &format!("status: {status}"));
            if let Some(watched) = watched.get_mut(execution_id.as_str()) {
                if status.is_failure() {
                    watched.settled = true;
                }
                watched.record.set_status(status);
            }
        }
        WatchEvent::Finished(execution_id) => {
            print_line(&execution_id, "finished");
            if let Some(watched) = watched.get_mut(execution_id.as_str()) {
                watched.settled = true;
            }
        }
        WatchEvent::Failed {
            execution_id,
            message,
            fatal,
        } => {
            warn!(execution_id = %execution_id, "{message}");
            if !fatal {
                return;
            }
            if let Some(watched) = watched.get_mut(execution_id.as_str()) {
                watched.settled = true;
                watched.record.mark_interrupted(message);
            }
        }
    }
}

fn persist(layout: &TranscriptLayout, record: &ExecutionRecord) -> Result<()> {
    let execution_id = &record.execution_id;
    layout.ensure_execution_dir(execution_id)?;
    record.save(&layout.record_path(execution_id))?;
    record.write_progress_log(&layout.progress_log_path(execution_id))?;
    Ok(())
}

async fn status(args: StatusArgs, config: ChannelConfig) -> Result<()> {
    let source = HttpStatusSource::new(
        config.api_base_url.clone(),
        config.account.clone(),
        config.request_timeout(),
    )?;
    let execution_id = ExecutionId::new(args.id);
    let snapshot = source
        .fetch(&execution_id)
        .await
        .with_context(|| format!("failed to fetch status of execution {execution_id}"))?;
    print_snapshot(&execution_id, &snapshot);
    Ok(())
}

fn history(args: HistoryArgs) -> Result<()> {
    let layout = TranscriptLayout::new(args.transcript_dir);
    let execution_id = ExecutionId::new(args.id);
    let path = layout.record_path(&execution_id);
    if !path.exists() {
        println!(
            "No transcript found for execution {execution_id} in {}",
            layout.root().display()
        );
        return Ok(());
    }
    let record = ExecutionRecord::load(&path)?;
    print_record(&record, &path);
    Ok(())
}

fn print_line(execution_id: &ExecutionId, text: &str) {
    let prefix = format!("[{execution_id}] ");
    let indent = " ".repeat(prefix.len());
    let options = textwrap::Options::new(WRAP_WIDTH)
        .initial_indent(&prefix)
        .subsequent_indent(&indent);
    for line in textwrap::wrap(text, options) {
        println!("{line}");
    }
}

fn print_snapshot(execution_id: &ExecutionId, snapshot: &ExecutionSnapshot) {
    println!("Execution: {execution_id}");
    if let Some(name) = &snapshot.workflow_name {
        println!("Workflow: {name}");
    }
    match (&snapshot.status, &snapshot.legacy) {
        (Some(status), _) => println!("Status: {status}"),
        (None, Some(flags)) => println!(
            "Case: demands {}, agreements {}",
            yes_no(flags.has_demands),
            yes_no(flags.has_agreements)
        ),
        (None, None) => println!("Status: unknown"),
    }
    print_assets("Uploaded", &snapshot.uploaded);
    print_assets("Generated", &snapshot.generated);
}

fn print_assets(label: &str, assets: &[Asset]) {
    println!("{label} ({}):", assets.len());
    for asset in assets {
        println!(
            "- {:<12} {:<30} {}",
            asset.id,
            asset.name,
            asset
                .kind
                .as_deref()
                .or(asset.format.as_deref())
                .unwrap_or("-")
        );
    }
}

fn print_record(record: &ExecutionRecord, path: &Path) {
    println!("Execution: {}", record.execution_id);
    println!("Record file: {}", path.display());
    if let Some(name) = &record.workflow_name {
        println!("Workflow: {name}");
    }
    println!(
        "Status: {}",
        record
            .status
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "unknown".to_string())
    );
    println!("Started: {}", record.started_at.to_rfc3339());
    if let Some(finished_at) = record.finished_at {
        println!("Finished: {}", finished_at.to_rfc3339());
    }
    if let Some(note) = &record.note {
        println!("Note: {note}");
    }
    println!("Log ({} lines):", record.logs.len());
    for entry in &record.logs {
        println!("  {entry}");
    }
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
