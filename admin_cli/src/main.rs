//! Operator tool for the pipeline: queue introspection and repair, meeting
//! inspection, phase resets, and the reconcile sweep. Exit code 0 on success,
//! 1 on invalid arguments or runtime failure.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use cv_queue::{Job, JobQueue, JobState};
use cv_store::{MeetingStore, RedisMeetingStore};
use cv_types::{Meeting, MeetingPatch, Phase};
use cv_workflow::{Orchestrator, QueueSet, QUEUE_NAMES};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
struct Config {
    redis_url: String,
}

/// civicast-admin - operate the meeting pipeline
#[derive(Parser, Debug)]
#[command(name = "civicast-admin")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List jobs in a queue by state
    List {
        queue: String,

        #[arg(default_value = "waiting")]
        state: String,

        #[arg(default_value_t = 20)]
        limit: usize,
    },

    /// Show waiting/active/completed/failed/delayed counts for a queue
    /// (or `all`)
    Stats { queue: String },

    /// Enqueue a job for a meeting (deduplicated)
    Add { queue: String, meeting_id: String },

    /// Move a failed job back to waiting with attempts reset
    Retry { queue: String, job_id: String },

    /// Remove a job from its queue entirely
    Remove { queue: String, job_id: String },

    /// Drop jobs in a state older than the age threshold
    Clean {
        queue: String,
        state: String,

        /// Minimum age in seconds
        #[arg(long, default_value_t = 3600)]
        min_age: u64,
    },

    /// Drop all jobs in a state regardless of age
    Clear { queue: String, state: String },

    /// Show a meeting's record and its job on every queue
    Meeting { meeting_id: String },

    /// List meetings, optionally restricted to one phase
    Meetings { phase: Option<String> },

    /// Reset a meeting to a phase and reseed that phase's job
    Restart { meeting_id: String, phase: String },

    /// Force a meeting's phase without touching any queue
    SetState { meeting_id: String, phase: String },

    /// Seed missing jobs for non-terminal meetings
    Reconcile,
}

#[tokio::main]
async fn main() {
    cv_app::init_tracing();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn parse_state(s: &str) -> Result<JobState, String> {
    JobState::parse(s).ok_or_else(|| format!("unknown job state: {s} (waiting|active|completed|failed|delayed)"))
}

fn parse_phase(s: &str) -> Result<Phase, String> {
    Phase::parse(s).ok_or_else(|| format!("unknown phase: {s}"))
}

fn print_job(job: &Job) {
    println!(
        "{:<28} {:<10} attempts {}/{} updated {}{}",
        job.id,
        job.state,
        job.attempts,
        job.max_attempts,
        job.last_updated.format("%Y-%m-%d %H:%M:%S"),
        job.error.as_deref().map(|e| format!("  error: {e}")).unwrap_or_default()
    );
}

fn print_meeting(meeting: &Meeting) {
    println!("{:<14} {:<12} {:<18} {}", meeting.id, meeting.phase, meeting.date, meeting.title);
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config: Config = cv_app::load_config()?;
    let store: Arc<dyn MeetingStore> = Arc::new(RedisMeetingStore::connect(&config.redis_url).await?);
    let queues = QueueSet::connect_redis(&config.redis_url).await?;

    let queue_by_name = |name: &str| -> Result<Arc<dyn JobQueue>, String> {
        queues
            .by_name(name)
            .cloned()
            .ok_or_else(|| format!("unknown queue: {name} ({})", QUEUE_NAMES.join("|")))
    };

    match cli.command {
        Commands::List { queue, state, limit } => {
            let queue = queue_by_name(&queue)?;
            let state = parse_state(&state)?;
            let jobs = queue.jobs(state, limit).await?;
            if jobs.is_empty() {
                println!("no {state} jobs in {}", queue.name());
            }
            for job in &jobs {
                print_job(job);
            }
        }

        Commands::Stats { queue } => {
            let targets: Vec<Arc<dyn JobQueue>> = if queue == "all" {
                queues.iter().cloned().collect()
            } else {
                vec![queue_by_name(&queue)?]
            };
            for queue in targets {
                let counts = queue.counts().await?;
                println!("queue {}", queue.name());
                println!("  waiting:   {}", counts.waiting);
                println!("  active:    {}", counts.active);
                println!("  delayed:   {}", counts.delayed);
                println!("  completed: {}", counts.completed);
                println!("  failed:    {}", counts.failed);
            }
        }

        Commands::Add { queue, meeting_id } => {
            let queue = queue_by_name(&queue)?;
            match queue.enqueue(&meeting_id).await? {
                cv_queue::EnqueueOutcome::Enqueued => println!("enqueued {}", cv_queue::job_id(queue.name(), &meeting_id)),
                cv_queue::EnqueueOutcome::Deduplicated => println!("already pending, nothing to do"),
            }
        }

        Commands::Retry { queue, job_id } => {
            let queue = queue_by_name(&queue)?;
            if queue.retry(&job_id).await? {
                println!("moved {job_id} back to waiting");
            } else {
                return Err(format!("{job_id} is not a failed job on {}", queue.name()).into());
            }
        }

        Commands::Remove { queue, job_id } => {
            let queue = queue_by_name(&queue)?;
            if queue.remove(&job_id).await? {
                println!("removed {job_id}");
            } else {
                return Err(format!("{job_id} not found on {}", queue.name()).into());
            }
        }

        Commands::Clean { queue, state, min_age } => {
            let queue = queue_by_name(&queue)?;
            let state = parse_state(&state)?;
            let removed = queue.clean(state, Duration::from_secs(min_age)).await?;
            println!("removed {removed} {state} jobs older than {min_age}s");
        }

        Commands::Clear { queue, state } => {
            let queue = queue_by_name(&queue)?;
            let state = parse_state(&state)?;
            let removed = queue.clear(state).await?;
            println!("removed {removed} {state} jobs");
        }

        Commands::Meeting { meeting_id } => {
            let meeting = store
                .get(&meeting_id)
                .await?
                .ok_or_else(|| format!("meeting {meeting_id} not found"))?;

            println!("meeting {}", meeting.id);
            println!("  title:     {}", meeting.title);
            println!("  date:      {}", meeting.date);
            println!("  phase:     {}", meeting.phase);
            println!("  source:    {}", meeting.source_url);
            if let Some(url) = &meeting.published_url {
                println!("  published: {url}");
            }
            for (label, path) in [
                ("raw video", &meeting.raw_video_path),
                ("chapters", &meeting.chapters_path),
                ("metadata", &meeting.metadata_path),
                ("audio", &meeting.audio_path),
                ("diarized", &meeting.diarized_path),
            ] {
                if let Some(path) = path {
                    println!("  {label:<9}  {path}");
                }
            }
            if let Some(error) = &meeting.error_message {
                let at = meeting
                    .failed_at_phase
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "?".to_string());
                println!("  failed at {at}: {error}");
            }

            println!("jobs:");
            for queue in queues.iter() {
                let id = cv_queue::job_id(queue.name(), &meeting.id);
                match queue.job(&id).await? {
                    Some(job) => print_job(&job),
                    None => println!("{id:<28} -"),
                }
            }
        }

        Commands::Meetings { phase } => {
            let meetings = match phase {
                Some(phase) => store.get_by_phase(parse_phase(&phase)?).await?,
                None => store.get_all().await?,
            };
            if meetings.is_empty() {
                println!("no meetings");
            }
            for meeting in &meetings {
                print_meeting(meeting);
            }
        }

        Commands::Restart { meeting_id, phase } => {
            let phase = parse_phase(&phase)?;
            let orchestrator = Orchestrator::new(store, queues);
            orchestrator.restart(&meeting_id, phase).await?;
            println!("reset {meeting_id} to {phase} and reseeded its job");
        }

        Commands::SetState { meeting_id, phase } => {
            let phase = parse_phase(&phase)?;
            store.update(&meeting_id, phase, &MeetingPatch::default()).await?;
            println!("set {meeting_id} to {phase}");
        }

        Commands::Reconcile => {
            let orchestrator = Orchestrator::new(store, queues);
            let seeded = orchestrator.reconcile().await?;
            println!("seeded {seeded} missing jobs");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn states_and_phases_parse() {
        assert!(parse_state("waiting").is_ok());
        assert!(parse_state("nope").is_err());
        assert!(parse_phase("DOWNLOADED").is_ok());
        assert!(parse_phase("downloaded").is_ok());
        assert!(parse_phase("nope").is_err());
    }
}
