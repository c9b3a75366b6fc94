//! Transcode CLI - Command-line front end for the frame pipeline.

use anyhow::Context;
use clap::Parser;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};
use transcode::{
    AudioConfig, InputConfig, OutputConfig, PixelFormat, Progress, RunControl, TranscodeOptions, TranscodeStats,
    Transcoder, VideoConfig,
};

/// Output mode for the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    /// Normal output with progress bar.
    Normal,
    /// JSON lines for programmatic parsing.
    Json,
    /// Quiet mode with minimal output.
    Quiet,
    /// Verbose mode with per-stage occupancy.
    Verbose,
}

/// JSON progress line.
#[derive(Debug, Clone, Serialize)]
struct JsonProgressOutput<'a> {
    #[serde(rename = "type")]
    msg_type: &'static str,
    #[serde(flatten)]
    progress: &'a Progress,
}

/// JSON completion line.
#[derive(Debug, Clone, Serialize)]
struct JsonCompleteOutput<'a> {
    #[serde(rename = "type")]
    msg_type: &'static str,
    success: bool,
    stats: &'a TranscodeStats,
}

/// Command-line arguments for the transcode tool.
#[derive(Parser, Debug)]
#[command(name = "transcode")]
#[command(version)]
#[command(about = "Raw video and audio transcoding through a multi-threaded frame pipeline")]
#[command(long_about = "Transcode reads raw frames into a bounded ring, runs them through\n\
    parallel filter workers and writes them out in input order.\n\n\
    EXAMPLES:\n    \
    transcode -i input.yuv -o output.yuv -s 1920x1080\n    \
    transcode -i input.yuv -o output.yuv --vf invert --vf skip=10 -t 4\n    \
    transcode --sequence 'part*.yuv' -o joined.yuv\n    \
    transcode -i input.yuv -o output.yuv --ranges 100-200 --json")]
struct Args {
    /// Input file path
    #[arg(short, long, required_unless_present_any = ["sequence", "options"])]
    input: Option<PathBuf>,

    /// Read every file matching a glob pattern, in sorted order, as one stream
    #[arg(long, conflicts_with = "input")]
    sequence: Option<String>,

    /// Output file path
    #[arg(short, long, required_unless_present = "options")]
    output: Option<PathBuf>,

    /// Raw PCM input played alongside the video
    #[arg(long)]
    audio_input: Option<PathBuf>,

    /// Raw PCM output (audio is discarded without it)
    #[arg(long, requires = "audio_input")]
    audio_output: Option<PathBuf>,

    /// Load options from a JSON file; other flags override it
    #[arg(long)]
    options: Option<PathBuf>,

    /// Picture size as WIDTHxHEIGHT
    #[arg(short = 's', long, value_parser = parse_size)]
    size: Option<(u32, u32)>,

    /// Pixel format (yuv420p, yuv422p, yuv444p, nv12, rgb24, bgr24, rgba, gray8)
    #[arg(long, value_parser = parse_format)]
    pix_fmt: Option<PixelFormat>,

    /// Frames per second
    #[arg(long)]
    fps: Option<f64>,

    /// Audio sample rate in Hz
    #[arg(long)]
    sample_rate: Option<u32>,

    /// Audio channel count
    #[arg(long)]
    channels: Option<u16>,

    /// Audio bits per sample
    #[arg(long)]
    sample_bits: Option<u16>,

    /// Number of video filter workers (0 filters on the export thread)
    #[arg(short = 't', long)]
    threads: Option<usize>,

    /// Number of audio filter workers
    #[arg(long)]
    audio_threads: Option<usize>,

    /// Frames held in each ring
    #[arg(long)]
    frame_buffer: Option<usize>,

    /// Grace period for import threads at shutdown, in milliseconds
    #[arg(long)]
    cooldown: Option<u64>,

    /// Video filter (e.g. "invert", "skip=10", "clone=5", "invert=range=100-200"), repeatable
    #[arg(short = 'F', long = "vf")]
    video_filters: Vec<String>,

    /// Audio filter, repeatable
    #[arg(long = "af")]
    audio_filters: Vec<String>,

    /// Only process input frames in these ranges (e.g. "0-99,200-")
    #[arg(long)]
    ranges: Option<String>,

    /// First output frame to encode
    #[arg(long)]
    first: Option<u64>,

    /// Last output frame to encode
    #[arg(long)]
    last: Option<u64>,

    /// Encode every n-th output frame
    #[arg(long)]
    interval: Option<u64>,

    /// Overwrite output file if it exists
    #[arg(short = 'y', long)]
    overwrite: bool,

    /// Disable progress bar
    #[arg(long)]
    no_progress: bool,

    /// Verbose output (show per-stage occupancy during transcoding)
    #[arg(short, long, conflicts_with = "quiet", conflicts_with = "json")]
    verbose: bool,

    /// Quiet mode (minimal output, only print output path on success)
    #[arg(short, long, conflicts_with = "verbose", conflicts_with = "json")]
    quiet: bool,

    /// JSON output mode for programmatic parsing
    #[arg(long, conflicts_with = "verbose", conflicts_with = "quiet")]
    json: bool,

    /// Progress update interval in milliseconds
    #[arg(long, default_value = "500")]
    progress_interval: u64,
}

impl Args {
    /// Determine the output mode based on flags.
    fn output_mode(&self) -> OutputMode {
        if self.json {
            OutputMode::Json
        } else if self.quiet {
            OutputMode::Quiet
        } else if self.verbose {
            OutputMode::Verbose
        } else {
            OutputMode::Normal
        }
    }

    /// Fold the flags over the base options.
    fn options(&self) -> anyhow::Result<TranscodeOptions> {
        let mut options = match &self.options {
            Some(path) => TranscodeOptions::from_file(path)
                .with_context(|| format!("failed to load options from {}", path.display()))?,
            None => TranscodeOptions::new(),
        };

        if let Some(input) = &self.input {
            options = options.input(input);
        }
        if let Some(pattern) = &self.sequence {
            options = options.input_config(InputConfig::new(pattern).sequential(true));
        }
        if let Some(audio) = &self.audio_input {
            options = options.audio_input(audio);
        }
        if let Some(output) = &self.output {
            let mut config = OutputConfig::new(output);
            if let Some(audio) = &self.audio_output {
                config = config.audio(audio);
            }
            options = options.output_config(config);
        }

        let video = VideoConfig {
            width: self.size.map_or(options.video.width, |(w, _)| w),
            height: self.size.map_or(options.video.height, |(_, h)| h),
            format: self.pix_fmt.unwrap_or(options.video.format),
            fps: self.fps.unwrap_or(options.video.fps),
        };
        let audio = AudioConfig {
            sample_rate: self.sample_rate.unwrap_or(options.audio.sample_rate),
            channels: self.channels.unwrap_or(options.audio.channels),
            bits: self.sample_bits.unwrap_or(options.audio.bits),
        };
        options = options.video_config(video).audio_config(audio);

        if let Some(threads) = self.threads {
            options = options.threads(threads);
        }
        if let Some(threads) = self.audio_threads {
            options = options.audio_threads(threads);
        }
        if let Some(frames) = self.frame_buffer {
            options = options.frame_buffer(frames);
        }
        if let Some(ms) = self.cooldown {
            options = options.cooldown(Duration::from_millis(ms));
        }
        for spec in &self.video_filters {
            options = options.filter(spec);
        }
        for spec in &self.audio_filters {
            options = options.audio_filter(spec);
        }
        if let Some(ranges) = &self.ranges {
            options = options.ranges(ranges);
        }
        if self.first.is_some() || self.last.is_some() {
            let first = self.first.unwrap_or(options.first_frame);
            let last = self.last.or(options.last_frame);
            options = options.frame_range(first, last);
        }
        if let Some(interval) = self.interval {
            options = options.frame_interval(interval);
        }
        if self.overwrite {
            options = options.overwrite(true);
        }
        Ok(options)
    }
}

fn parse_size(value: &str) -> Result<(u32, u32), String> {
    let (w, h) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", value))?;
    let width = w.parse().map_err(|_| format!("invalid width '{}'", w))?;
    let height = h.parse().map_err(|_| format!("invalid height '{}'", h))?;
    Ok((width, height))
}

fn parse_format(value: &str) -> Result<PixelFormat, String> {
    PixelFormat::from_name(value).ok_or_else(|| format!("unknown pixel format '{}'", value))
}

/// Create the progress bar style.
fn create_progress_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {pos} frames | {per_sec} | {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// Format the progress message for the progress bar.
fn format_progress_message(progress: &Progress, verbose: bool) -> String {
    let counters = progress.counters;
    if verbose {
        let mut msg = format!(
            "video import/filter/export {}/{}/{}",
            progress.video.import, progress.video.filter, progress.video.export
        );
        if let Some(audio) = progress.audio {
            msg.push_str(&format!(" | audio {}/{}/{}", audio.import, audio.filter, audio.export));
        }
        msg.push_str(&format!(
            " | skipped {} cloned {} dropped {}",
            counters.skipped, counters.cloned, counters.dropped
        ));
        msg
    } else {
        format!("skipped {} | cloned {}", counters.skipped, counters.cloned)
    }
}

/// Format bytes as human-readable size.
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format duration in seconds as human-readable string.
fn format_duration(seconds: f64) -> String {
    let total_seconds = seconds as u64;
    if total_seconds >= 3600 {
        format!("{}h{}m{}s", total_seconds / 3600, (total_seconds % 3600) / 60, total_seconds % 60)
    } else if total_seconds >= 60 {
        format!("{}m{}s", total_seconds / 60, total_seconds % 60)
    } else {
        format!("{:.1}s", seconds)
    }
}

/// Interrupt the run on Ctrl-C.
fn watch_ctrl_c(control: RunControl) {
    let spawned = thread::Builder::new()
        .name("ctrl-c".into())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(runtime) => runtime,
                Err(e) => {
                    warn!("Ctrl-C handling unavailable: {}", e);
                    return;
                }
            };
            runtime.block_on(async {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupted, shutting down");
                    control.interrupt();
                }
            });
        });
    if let Err(e) = spawned {
        warn!("failed to spawn signal thread: {}", e);
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let output_mode = args.output_mode();

    // Initialize logging (not in JSON or quiet mode)
    if output_mode != OutputMode::Json && output_mode != OutputMode::Quiet {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(if args.verbose {
                tracing::Level::DEBUG
            } else {
                tracing::Level::INFO
            })
            .with_target(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }

    if output_mode == OutputMode::Normal || output_mode == OutputMode::Verbose {
        print_header();
    }

    let options = args.options()?;
    debug!(options = ?options, "resolved options");
    let output_path = options.output.as_ref().map(|o| o.path.clone());

    let mut transcoder = Transcoder::new(options)?.progress_interval(Duration::from_millis(args.progress_interval));
    watch_ctrl_c(transcoder.run_control());

    let progress_bar = match output_mode {
        OutputMode::Normal | OutputMode::Verbose if !args.no_progress => {
            let pb = ProgressBar::new_spinner();
            pb.set_style(create_progress_style());
            pb.enable_steady_tick(Duration::from_millis(100));
            Some(pb)
        }
        _ => None,
    };

    if let Some(pb) = &progress_bar {
        let pb = pb.clone();
        let verbose = output_mode == OutputMode::Verbose;
        transcoder = transcoder.on_progress(move |progress| {
            pb.set_position(progress.counters.encoded);
            pb.set_message(format_progress_message(progress, verbose));
        });
    } else if output_mode == OutputMode::Json {
        transcoder = transcoder.on_progress(|progress| {
            let line = JsonProgressOutput {
                msg_type: "progress",
                progress,
            };
            if let Ok(json) = serde_json::to_string(&line) {
                println!("{}", json);
            }
        });
    }

    let result = transcoder.run();
    if let Some(pb) = &progress_bar {
        pb.finish_and_clear();
    }

    let stats = match result {
        Ok(stats) => stats,
        Err(e) => {
            if output_mode == OutputMode::Json {
                println!("{}", serde_json::json!({ "type": "error", "message": e.to_string() }));
            } else {
                eprintln!("{} {}", style("Error:").red().bold(), e);
            }
            std::process::exit(1);
        }
    };

    match output_mode {
        OutputMode::Json => {
            let line = JsonCompleteOutput {
                msg_type: "complete",
                success: stats.is_success(),
                stats: &stats,
            };
            println!("{}", serde_json::to_string(&line)?);
        }
        OutputMode::Quiet => {
            if stats.is_success() {
                if let Some(path) = &output_path {
                    println!("{}", path.display());
                }
            }
        }
        OutputMode::Normal | OutputMode::Verbose => print_summary(&stats, output_path.as_deref(), output_mode),
    }

    if !stats.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

fn print_header() {
    println!(
        "{} {}",
        style("transcode").cyan().bold(),
        style(transcode::version()).dim()
    );
    println!();
}

fn print_summary(stats: &TranscodeStats, output: Option<&std::path::Path>, mode: OutputMode) {
    let report = &stats.report;
    if stats.is_success() {
        println!("{}", style("Transcoding complete").green().bold());
    } else {
        println!("{}", style("Transcoding stopped").yellow().bold());
    }

    println!("  {} {}", style("Frames encoded:").bold(), stats.frames_encoded);
    if stats.frames_skipped > 0 || stats.frames_cloned > 0 {
        println!(
            "  {} {} skipped, {} cloned",
            style("Filters:").bold(),
            stats.frames_skipped,
            stats.frames_cloned
        );
    }
    if stats.frames_dropped > 0 {
        println!("  {} {}", style("Frames dropped:").bold(), stats.frames_dropped);
    }
    println!(
        "  {} {} ({:.1} fps)",
        style("Time:").bold(),
        format_duration(stats.elapsed_ms as f64 / 1000.0),
        stats.speed_fps
    );
    if let Some(path) = output {
        let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        println!("  {} {} ({})", style("Output:").bold(), path.display(), format_size(size));
    }

    if mode == OutputMode::Verbose || !stats.is_success() {
        println!("  {} {}", style("Video import:").bold(), report.video_status);
        if let Some(audio) = report.audio_status {
            println!("  {} {}", style("Audio import:").bold(), audio);
        }
        println!("  {} {:?}", style("Export:").bold(), report.export);
    }
}
