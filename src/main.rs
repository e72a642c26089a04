use std::collections::hash_map::{Entry, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use video_clipper::{
    config::Config,
    pipeline::{
        export_file, split_file, ExportManifest, ExportRequest, JobOutcome, JobRunner, OutputLayout,
        SequenceAllocator, SplitJob,
    },
    video::{
        probe, EncodedClip, FfmpegEncoder, FrameSource, ImageSequenceSource, Region, VideoMetadata,
    },
};

type Job<T> = Box<dyn FnOnce() -> video_clipper::Result<T> + Send>;

#[derive(Parser)]
#[command(
    name = "video-clipper",
    version,
    about = "Cut training clips out of raw recordings",
    long_about = "Video-Clipper splits recordings into sub-clips at black frames, or exports labeled time ranges into a per-action folder tree, decimating to a lower frame rate and optionally masking regions."
)]
struct Cli {
    /// Configuration file (optional)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Split recordings into clips at black frames
    Split {
        /// Videos (or image directories) to split
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Output frame rate
        #[arg(long)]
        fps: Option<f64>,

        /// Mean channel value (0-255 scale) at or below which a frame is black
        #[arg(long)]
        threshold: Option<f64>,

        /// Directory for the numbered clips
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Clip file name prefix
        #[arg(short, long)]
        prefix: Option<String>,
    },

    /// Export a labeled time range, or every range in a manifest
    Export(ExportArgs),

    /// Print the metadata of a video
    Probe {
        input: PathBuf,
    },
}

#[derive(Args)]
struct ExportArgs {
    /// Source video
    #[arg(required_unless_present = "manifest")]
    source: Option<PathBuf>,

    /// Range start in seconds
    #[arg(long, required_unless_present = "manifest")]
    start: Option<f64>,

    /// Range end in seconds (exclusive)
    #[arg(long, required_unless_present = "manifest")]
    end: Option<f64>,

    /// Action label, also the output folder
    #[arg(long, required_unless_present = "manifest")]
    action: Option<String>,

    /// File name prefix (overrides export.default_prefix)
    #[arg(long)]
    prefix: Option<String>,

    /// Region to black out, repeatable
    #[arg(long = "mask", value_name = "X1,Y1,X2,Y2")]
    masks: Vec<Region>,

    /// Output frame rate
    #[arg(long)]
    fps: Option<f64>,

    /// Clip id instead of the next free one
    #[arg(long)]
    id: Option<u64>,

    /// TOML file with [[clips]] entries
    #[arg(long, conflicts_with_all = ["source", "start", "end", "action", "prefix", "masks", "id"])]
    manifest: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting Video-Clipper v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = match &cli.config {
        Some(config_path) => {
            info!("Loading configuration from {:?}", config_path);
            Config::from_file(config_path)?
        }
        None => {
            info!("Using default configuration");
            Config::default()
        }
    };

    let failed = match cli.command {
        Command::Split {
            inputs,
            fps,
            threshold,
            output_dir,
            prefix,
        } => {
            let mut config = config;
            if let Some(fps) = fps {
                config.split.target_fps = fps;
            }
            if let Some(threshold) = threshold {
                config.split.black_threshold = threshold;
            }
            if let Some(dir) = output_dir {
                config.split.output_dir = dir;
            }
            if let Some(prefix) = prefix {
                config.split.clip_prefix = prefix;
            }
            config.validate()?;
            run_split(config, inputs).await
        }
        Command::Export(args) => {
            let mut config = config;
            if let Some(fps) = args.fps {
                config.export.target_fps = fps;
            }
            config.validate()?;
            match args.manifest.clone() {
                Some(manifest) => run_manifest(config, &manifest).await?,
                None => run_single_export(config, args).await?,
            }
        }
        Command::Probe { input } => {
            print_metadata(&input, &probe_input(&input, &config)?);
            0
        }
    };

    if failed > 0 {
        anyhow::bail!("{} job(s) failed", failed);
    }
    Ok(())
}

async fn run_split(config: Config, inputs: Vec<PathBuf>) -> usize {
    let config = Arc::new(config);
    let encoder = Arc::new(FfmpegEncoder::new(config.encoder.clone()));
    let shared_output = inputs.len() == 1;

    let jobs: Vec<(String, Job<usize>)> = inputs
        .into_iter()
        .map(|input| {
            let mut job = SplitJob::from_config(&input, &config);
            // several inputs would all number their clips from 0
            if !shared_output {
                if let Some(stem) = input.file_stem() {
                    job.output_dir = job.output_dir.join(stem);
                }
            }
            let config = Arc::clone(&config);
            let encoder = Arc::clone(&encoder);
            let run: Job<usize> = Box::new(move || {
                let report = split_file(&job, &config, encoder.as_ref())?;
                Ok(report.clips.len())
            });
            (input.display().to_string(), run)
        })
        .collect();

    let outcomes = JobRunner::new(config.runtime.max_parallel_jobs).run_all(jobs).await;
    for outcome in outcomes.iter() {
        if let Ok(clips) = &outcome.result {
            info!("{}: {} clips", outcome.name, clips);
        }
    }
    count_failures(&outcomes)
}

async fn run_single_export(config: Config, args: ExportArgs) -> Result<usize> {
    let (Some(source), Some(start), Some(end), Some(action)) =
        (args.source, args.start, args.end, args.action)
    else {
        anyhow::bail!("export needs SOURCE, --start, --end and --action, or --manifest");
    };

    let request = ExportRequest {
        source,
        start,
        end,
        action,
        prefix: args.prefix,
        save_with_mask: !args.masks.is_empty(),
        regions: args.masks,
    };

    let layout = layout_for(&config);
    let job = match args.id {
        Some(id) => request.into_job(&config.export, &layout, id)?,
        None => {
            request.validate(&config.export)?;
            let ids = SequenceAllocator::seeded_from_dir(layout.action_dir(&request.action))?;
            request.into_numbered_job(&config.export, &layout, &ids)?
        }
    };

    let name = job.output.display().to_string();
    let encoder = FfmpegEncoder::new(config.encoder.clone());
    let run: Job<Option<EncodedClip>> = Box::new(move || export_file(&job, &config, &encoder));

    let outcomes = JobRunner::new(1).run_all(vec![(name, run)]).await;
    report_exports(&outcomes);
    Ok(count_failures(&outcomes))
}

async fn run_manifest(config: Config, manifest: &Path) -> Result<usize> {
    let manifest = ExportManifest::from_file(manifest)?;
    info!("Loaded {} clip requests", manifest.clips.len());

    let config = Arc::new(config);
    let encoder = Arc::new(FfmpegEncoder::new(config.encoder.clone()));
    let layout = layout_for(&config);
    let mut allocators: HashMap<String, SequenceAllocator> = HashMap::new();
    let mut rejected = 0;

    let mut jobs: Vec<(String, Job<Option<EncodedClip>>)> = Vec::new();
    for request in manifest.clips {
        let label = format!("{} [{}s, {}s)", request.source.display(), request.start, request.end);
        if let Err(e) = request.validate(&config.export) {
            error!("Skipping {}: {}", label, e.user_message());
            rejected += 1;
            continue;
        }

        let ids = match allocators.entry(request.action.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let dir = layout.action_dir(&request.action);
                entry.insert(SequenceAllocator::seeded_from_dir(dir)?)
            }
        };
        let job = match request.into_numbered_job(&config.export, &layout, ids) {
            Ok(job) => job,
            Err(e) => {
                error!("Skipping {}: {}", label, e.user_message());
                rejected += 1;
                continue;
            }
        };

        let config = Arc::clone(&config);
        let encoder = Arc::clone(&encoder);
        let run: Job<Option<EncodedClip>> =
            Box::new(move || export_file(&job, &config, encoder.as_ref()));
        jobs.push((label, run));
    }

    let outcomes = JobRunner::new(config.runtime.max_parallel_jobs).run_all(jobs).await;
    report_exports(&outcomes);
    Ok(rejected + count_failures(&outcomes))
}

fn layout_for(config: &Config) -> OutputLayout {
    OutputLayout::new(
        &config.export.output_root,
        config.export.target_fps,
        config.encoder.extension.clone(),
    )
}

fn report_exports(outcomes: &[JobOutcome<Option<EncodedClip>>]) {
    for outcome in outcomes {
        match &outcome.result {
            Ok(Some(clip)) => info!(
                "Saved {} ({} frames at {} fps, {:.2}s)",
                clip.path.display(),
                clip.frame_count,
                clip.fps,
                clip.duration
            ),
            Ok(None) => warn!("{}: range held no frames, nothing written", outcome.name),
            Err(_) => {}
        }
    }
}

fn count_failures<T>(outcomes: &[JobOutcome<T>]) -> usize {
    outcomes.iter().filter(|o| o.result.is_err()).count()
}

fn probe_input(input: &Path, config: &Config) -> video_clipper::Result<VideoMetadata> {
    if input.is_dir() {
        let source = ImageSequenceSource::open_dir(input, config.decoder.image_sequence_fps)?;
        Ok(source.metadata().clone())
    } else {
        probe(input, &config.decoder.ffprobe_program)
    }
}

fn print_metadata(input: &Path, metadata: &VideoMetadata) {
    println!("{}", input.display());
    println!("  codec:      {}", metadata.codec);
    println!("  resolution: {}x{}", metadata.width, metadata.height);
    println!("  fps:        {:.3}", metadata.fps);
    println!("  frames:     {}", metadata.frame_count);
    println!("  duration:   {:.2}s", metadata.duration);
}
