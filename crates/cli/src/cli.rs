use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use stepwise_core::{
    Clock, EpisodeState, FrameCapture, HostBudget, JobParams, ManifestSpec, SystemClock,
};
use stepwise_engine::{EngineConfig, EpisodeCoordinator, FsObjectStore};
use tracing::{info, warn};

use crate::processor::ArtifactStat;

#[derive(Debug, Parser)]
#[command(name = "stepwise", about = "Resumable, time-boxed batch jobs over local artifacts")]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Write the initial episode state for a new job
    Init(InitArgs),
    /// Run exactly one invocation and write the next state
    Invoke(RunArgs),
    /// Invoke repeatedly until the episode is terminal
    Drive(DriveArgs),
    /// Print a summary of an episode state
    Status(StatusArgs),
}

#[derive(Debug, Args, Clone)]
struct InitArgs {
    /// Episode state file to create
    #[arg(long)]
    state: PathBuf,
    /// Work kind, used in storage keys
    #[arg(long, default_value = "artifact_stat")]
    kind: String,
    #[arg(long, default_value = "stepwise")]
    output_prefix: String,
    /// External concurrency quota
    #[arg(long)]
    quota: Option<usize>,
    /// Overwrite an existing state file
    #[arg(long)]
    force: bool,
    #[command(subcommand)]
    source: Source,
}

#[derive(Debug, Subcommand, Clone)]
enum Source {
    /// Frame captures under a prefix
    Frames(FramesArgs),
    /// Rendered document pages
    Pages(PagesArgs),
}

#[derive(Debug, Args, Clone)]
struct FramesArgs {
    #[arg(long)]
    prefix: String,
    #[arg(long)]
    framerate: f64,
    #[arg(long, default_value_t = 1)]
    numerator: u32,
    #[arg(long, default_value_t = 1)]
    denominator: u32,
    /// Number of captures; when omitted the captures are listed from storage
    #[arg(long)]
    num_frames: Option<usize>,
}

#[derive(Debug, Args, Clone)]
struct PagesArgs {
    #[arg(long)]
    num_pages: u32,
}

#[derive(Debug, Args, Clone)]
struct RunArgs {
    #[arg(long)]
    state: PathBuf,
    /// Root directory of the object store
    #[arg(long, default_value = ".")]
    root: PathBuf,
    /// Wall-clock budget of each invocation, in seconds
    #[arg(long, default_value_t = 900)]
    budget_secs: u64,
    /// Prefix of rendered page artifacts
    #[arg(long, default_value = "pages")]
    pages_prefix: String,
}

#[derive(Debug, Args, Clone)]
struct DriveArgs {
    #[command(flatten)]
    run: RunArgs,
    /// Give up after this many invocations
    #[arg(long, default_value_t = 1000)]
    max_invocations: u32,
}

#[derive(Debug, Args, Clone)]
struct StatusArgs {
    #[arg(long)]
    state: PathBuf,
}

impl Cli {
    pub fn run(self) -> Result<()> {
        match self.command {
            Command::Init(args) => init(&args),
            Command::Invoke(args) => {
                let state = invoke(&args)?;
                print_summary(&state)
            }
            Command::Drive(args) => {
                let state = drive(&args)?;
                print_summary(&state)
            }
            Command::Status(args) => print_summary(&read_state(&args.state)?),
        }
    }
}

fn init(args: &InitArgs) -> Result<()> {
    if args.state.exists() && !args.force {
        bail!(
            "state file {} already exists (use --force to overwrite)",
            args.state.display()
        );
    }

    let manifest = match &args.source {
        Source::Frames(frames) => match frames.num_frames {
            Some(num_frames) => ManifestSpec::Frames(FrameCapture {
                prefix: frames.prefix.clone(),
                num_frames,
                framerate: frames.framerate,
                numerator: frames.numerator,
                denominator: frames.denominator,
            }),
            None => ManifestSpec::FrameListing {
                prefix: frames.prefix.clone(),
                framerate: frames.framerate,
                numerator: frames.numerator,
                denominator: frames.denominator,
            },
        },
        Source::Pages(pages) => ManifestSpec::Pages {
            num_pages: pages.num_pages,
        },
    };

    let mut params = JobParams::new(args.kind.clone(), manifest, args.output_prefix.clone());
    params.concurrency_quota = args.quota;
    params.validate().context("invalid job parameters")?;

    let state = EpisodeState::new(params);
    write_state(&args.state, &state)?;
    info!(job_id = %state.params.job_id, state = %args.state.display(), "episode initialized");
    Ok(())
}

fn invoke(args: &RunArgs) -> Result<EpisodeState> {
    let state = read_state(&args.state)?;
    let coordinator = coordinator(args)?;
    invoke_once(&coordinator, state, args)
}

fn drive(args: &DriveArgs) -> Result<EpisodeState> {
    let coordinator = coordinator(&args.run)?;
    let mut state = read_state(&args.run.state)?;

    for _ in 0..args.max_invocations {
        if state.is_terminal() {
            return Ok(state);
        }
        state = invoke_once(&coordinator, state, &args.run)?;
    }

    if !state.is_terminal() {
        warn!(
            job_id = %state.params.job_id,
            invocations = args.max_invocations,
            "episode still running after the invocation limit"
        );
    }
    Ok(state)
}

type LocalCoordinator = EpisodeCoordinator<FsObjectStore, ArtifactStat<FsObjectStore>>;

fn coordinator(args: &RunArgs) -> Result<LocalCoordinator> {
    let config = EngineConfig::from_env().context("invalid STEPWISE_* configuration")?;
    let store = Arc::new(FsObjectStore::new(&args.root));
    let processor = ArtifactStat::new(store.clone(), args.pages_prefix.clone());
    Ok(EpisodeCoordinator::new(store, processor).with_config(config))
}

/// Run one invocation and persist whatever state it produced, faulted or not.
fn invoke_once(coordinator: &LocalCoordinator, state: EpisodeState, args: &RunArgs) -> Result<EpisodeState> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let host = HostBudget::new(clock, Duration::from_secs(args.budget_secs));

    match coordinator.invoke(state, &host) {
        Ok(next) => {
            write_state(&args.state, &next)?;
            Ok(next)
        }
        Err(fault) => {
            write_state(&args.state, &fault.state)?;
            Err(fault.error).context("episode failed")
        }
    }
}

fn read_state(path: &Path) -> Result<EpisodeState> {
    let body = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&body).with_context(|| format!("{} is not an episode state", path.display()))
}

fn write_state(path: &Path, state: &EpisodeState) -> Result<()> {
    let body = serde_json::to_vec_pretty(state).context("failed to encode episode state")?;
    fs::write(path, body).with_context(|| format!("failed to write {}", path.display()))
}

fn print_summary(state: &EpisodeState) -> Result<()> {
    let summary = json!({
        "job_id": state.params.job_id,
        "kind": state.params.kind,
        "status": state.status,
        "cursor": state.cursor,
        "total": state.total,
        "progress": state.progress,
        "output_ref": state.output_ref,
        "invocations": state.metrics.invocations,
        "error": state.error,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
