//! pointillist-bench: CLI tool for sampling parameter experimentation and
//! generation reports.
//!
//! Runs the full generation (analysis, sampling, assembly) on a given
//! image file with configurable parameters, printing a per-stage report.
//! Useful for:
//!
//! - Comparing sampling strategies and quality tiers
//! - Tuning the importance threshold
//! - Measuring per-stage durations, with and without the result cache
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin pointillist-bench -- [OPTIONS] <IMAGE_PATH>
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use pointillist_cache::ResultCache;
use pointillist_engine::{
    AspectFitAssembler, GenerationCoordinator, GenerationReport, GenerationStage, ScreenSize,
};
use pointillist_pipeline::{
    DisplayMode, DownsampleFilter, ImageAnalyzer, ParticleGenerationConfig, PixelBuffer,
    QualityTier, SamplingStrategy,
};

/// Sampling parameter experimentation and generation reports.
///
/// Turns an image into particles with configurable parameters and prints
/// per-stage timing and count details.
#[derive(Parser)]
#[command(name = "pointillist-bench", version)]
struct Cli {
    /// Path to the input image (PNG, JPEG, BMP, WebP).
    image_path: PathBuf,

    /// Sampling strategy.
    #[arg(long, value_enum, default_value_t = Strategy::Hybrid)]
    strategy: Strategy,

    /// Quality tier.
    #[arg(long, value_enum, default_value_t = Quality::Standard)]
    quality: Quality,

    /// Target particle count.
    #[arg(long, default_value_t = ParticleGenerationConfig::DEFAULT_TARGET_PARTICLE_COUNT)]
    count: usize,

    /// Importance threshold (0.0-1.0).
    #[arg(long, default_value_t = ParticleGenerationConfig::DEFAULT_IMPORTANCE_THRESHOLD)]
    threshold: f32,

    /// How the image is placed on the screen.
    #[arg(long, value_enum, default_value_t = Display::Fit)]
    display: Display,

    /// Screen size as WIDTHxHEIGHT.
    #[arg(long, default_value = "1920x1080", value_parser = parse_screen)]
    screen: ScreenSize,

    /// Longest axis scanned by the analyzer; larger images are downsampled.
    #[arg(long, default_value_t = ImageAnalyzer::DEFAULT_MAX_DIMENSION, value_parser = clap::builder::RangedU64ValueParser::<u32>::new().range(1..))]
    analysis_resolution: u32,

    /// Downsample filter used by the analyzer.
    #[arg(long, value_enum, default_value_t = Filter::Triangle)]
    downsample_filter: Filter,

    /// Directory for a persistent result cache. Without it, every run
    /// regenerates from scratch.
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Number of runs for averaging. With `--cache-dir`, runs after the
    /// first are served from the cache.
    #[arg(long, default_value_t = 1, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    runs: usize,

    /// Output reports as JSON instead of human-readable tables.
    #[arg(long)]
    json: bool,

    /// Full generation config as a JSON string.
    ///
    /// When provided, all other generation parameter flags are ignored.
    /// The JSON must be a valid `ParticleGenerationConfig` serialization;
    /// missing fields take their defaults.
    #[arg(long)]
    config_json: Option<String>,

    /// Only analyze the image and print the descriptor.
    #[arg(long)]
    analyze_only: bool,
}

/// Sampling strategy selection.
#[derive(Clone, Copy, ValueEnum)]
enum Strategy {
    /// Regular grid.
    Uniform,
    /// Highest-scoring candidates plus a uniform remainder.
    Importance,
    /// Tiles weighted by edge strength.
    Adaptive,
    /// Uniform baseline plus importance-weighted detail.
    Hybrid,
    /// Horizontal bands weighted by brightness.
    Stratified,
}

/// Quality tier selection.
#[derive(Clone, Copy, ValueEnum)]
enum Quality {
    /// Fastest.
    Draft,
    /// Balanced.
    Standard,
    /// More detail.
    High,
    /// Most detail.
    Ultra,
}

/// Display mode selection.
#[derive(Clone, Copy, ValueEnum)]
enum Display {
    /// Letterbox the whole image.
    Fit,
    /// Cover the screen, cropping overflow.
    Fill,
    /// Scale each axis independently.
    Stretch,
}

/// Downsample resampling filter selection.
#[derive(Clone, Copy, ValueEnum)]
enum Filter {
    /// Disabled: always analyze at full resolution.
    Disabled,
    /// Nearest-neighbor (fastest, blocky).
    Nearest,
    /// Bilinear interpolation (fast, decent quality).
    Triangle,
    /// Bicubic Catmull-Rom (moderate, good quality).
    CatmullRom,
    /// Lanczos with 3 lobes (slowest, sharpest).
    Lanczos3,
}

/// Parse `WIDTHxHEIGHT` into a [`ScreenSize`].
fn parse_screen(s: &str) -> Result<ScreenSize, String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {s:?}"))?;
    let width: f32 = w.trim().parse().map_err(|e| format!("bad width {w:?}: {e}"))?;
    let height: f32 = h.trim().parse().map_err(|e| format!("bad height {h:?}: {e}"))?;
    let screen = ScreenSize::new(width, height);
    if !screen.is_valid() {
        return Err(format!("screen size must be positive, got {s:?}"));
    }
    Ok(screen)
}

/// Build a [`ParticleGenerationConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and all
/// individual parameter flags are ignored. Otherwise, a config is
/// assembled from the individual flags.
fn config_from_cli(cli: &Cli) -> Result<ParticleGenerationConfig, String> {
    if let Some(ref json) = cli.config_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"));
    }

    Ok(ParticleGenerationConfig {
        sampling_strategy: match cli.strategy {
            Strategy::Uniform => SamplingStrategy::Uniform,
            Strategy::Importance => SamplingStrategy::Importance,
            Strategy::Adaptive => SamplingStrategy::Adaptive,
            Strategy::Hybrid => SamplingStrategy::Hybrid,
            Strategy::Stratified => SamplingStrategy::Stratified,
        },
        quality_tier: match cli.quality {
            Quality::Draft => QualityTier::Draft,
            Quality::Standard => QualityTier::Standard,
            Quality::High => QualityTier::High,
            Quality::Ultra => QualityTier::Ultra,
        },
        importance_threshold: cli.threshold,
        target_particle_count: cli.count,
        display_mode: match cli.display {
            Display::Fit => DisplayMode::Fit,
            Display::Fill => DisplayMode::Fill,
            Display::Stretch => DisplayMode::Stretch,
        },
        enable_caching: cli.cache_dir.is_some(),
        ..ParticleGenerationConfig::default()
    })
}

fn analyzer_from_cli(cli: &Cli) -> ImageAnalyzer {
    ImageAnalyzer {
        max_dimension: cli.analysis_resolution,
        filter: match cli.downsample_filter {
            Filter::Disabled => DownsampleFilter::Disabled,
            Filter::Nearest => DownsampleFilter::Nearest,
            Filter::Triangle => DownsampleFilter::Triangle,
            Filter::CatmullRom => DownsampleFilter::CatmullRom,
            Filter::Lanczos3 => DownsampleFilter::Lanczos3,
        },
        ..ImageAnalyzer::default()
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let config = match config_from_cli(&cli) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };
    let analyzer = analyzer_from_cli(&cli);

    let image_bytes = match std::fs::read(&cli.image_path) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("Error reading {}: {e}", cli.image_path.display());
            return ExitCode::FAILURE;
        }
    };
    let buffer = match PixelBuffer::decode(&image_bytes) {
        Ok(buffer) => Arc::new(buffer),
        Err(e) => {
            eprintln!("Error decoding {}: {e}", cli.image_path.display());
            return ExitCode::FAILURE;
        }
    };

    eprintln!(
        "Image: {} ({} bytes, {}x{})",
        cli.image_path.display(),
        image_bytes.len(),
        buffer.width(),
        buffer.height(),
    );

    if cli.analyze_only {
        return analyze_only(&analyzer, &buffer, cli.json);
    }

    eprintln!("Config: {config:#?}");
    eprintln!("Runs: {}", cli.runs);
    eprintln!();

    let cache = match cli.cache_dir {
        Some(ref dir) => match ResultCache::open(dir, config.cache_size_limit_bytes) {
            Ok(cache) => Some(Arc::new(cache)),
            Err(e) => {
                eprintln!("Error opening cache at {}: {e}", dir.display());
                return ExitCode::FAILURE;
            }
        },
        None => None,
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error starting runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let coordinator =
        GenerationCoordinator::new(Arc::new(AspectFitAssembler), cache).with_analyzer(analyzer);
    let on_progress = |progress: f32, stage: GenerationStage| {
        log::debug!("progress {:>5.1}% ({stage})", progress * 100.0);
    };

    let mut all_reports = Vec::with_capacity(cli.runs);

    for run in 0..cli.runs {
        if cli.runs > 1 {
            eprintln!("--- Run {}/{} ---", run + 1, cli.runs);
        }

        let result = runtime.block_on(coordinator.generate_with_report(
            Arc::clone(&buffer),
            &config,
            cli.screen,
            &on_progress,
        ));
        match result {
            Ok(output) => {
                if cli.json {
                    match serde_json::to_string_pretty(&output.report) {
                        Ok(json) => println!("{json}"),
                        Err(e) => {
                            eprintln!("Error serializing report: {e}");
                            return ExitCode::FAILURE;
                        }
                    }
                } else {
                    println!("{}", output.report.report());
                }
                all_reports.push(output.report);
            }
            Err(e) => {
                eprintln!("Generation error: {e}");
                return ExitCode::FAILURE;
            }
        }

        if cli.runs > 1 {
            eprintln!();
        }
    }

    if cli.runs > 1 {
        print_multi_run_summary(&all_reports);
    }

    ExitCode::SUCCESS
}

fn analyze_only(analyzer: &ImageAnalyzer, buffer: &PixelBuffer, json: bool) -> ExitCode {
    let analysis = match analyzer.analyze(buffer) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Analysis error: {e}");
            return ExitCode::FAILURE;
        }
    };

    if json {
        match serde_json::to_string_pretty(&analysis) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Error serializing analysis: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        let [r, g, b] = analysis.average_color;
        println!("Image Analysis\n{}", "=".repeat(60));
        println!(
            "Source: {}x{}  |  analyzed at {}x{}",
            analysis.width, analysis.height, analysis.analyzed_width, analysis.analyzed_height,
        );
        println!("Average color:   ({r:.3}, {g:.3}, {b:.3})");
        println!("Brightness:      {:.3}", analysis.brightness);
        println!("Contrast:        {:.3}", analysis.contrast);
        println!("Saturation:      {:.3}", analysis.saturation);
        println!("Edge density:    {:.3}", analysis.edge_density);
        println!("Pixel density:   {:.3}", analysis.pixel_density);
        println!("Color variance:  {:.4}", analysis.color_variance);
        println!("Complexity:      {}/10", analysis.complexity);
        println!("Dominant colors:");
        for [r, g, b] in &analysis.dominant_colors {
            println!("  ({r:.3}, {g:.3}, {b:.3})");
        }
    }
    ExitCode::SUCCESS
}

/// Function pointer type for extracting a stage duration from a report.
type StageExtractor = fn(&GenerationReport) -> Option<Duration>;

/// Print aggregated statistics across multiple runs.
#[allow(clippy::cast_precision_loss)]
fn print_multi_run_summary(all_reports: &[GenerationReport]) {
    println!();
    println!("Summary ({} runs)\n{}", all_reports.len(), "=".repeat(60));

    if all_reports.is_empty() {
        println!("Warning: no reports to summarize");
        return;
    }

    let durations: Vec<f64> = all_reports
        .iter()
        .map(|r| r.total_duration.as_secs_f64() * 1000.0)
        .collect();

    let min = durations.iter().copied().reduce(f64::min).unwrap_or(0.0);
    let max = durations.iter().copied().reduce(f64::max).unwrap_or(0.0);
    let mean = durations.iter().sum::<f64>() / durations.len() as f64;
    let hits = all_reports.iter().filter(|r| r.summary.cache_hit).count();

    println!("Total duration: min={min:.3}ms  mean={mean:.3}ms  max={max:.3}ms");
    println!("Cache hits: {hits}/{}", all_reports.len());

    println!();
    println!("{:<24} {:>12}", "Stage", "Mean (ms)");
    println!("{}", "-".repeat(40));

    let stage_extractors: &[(&str, StageExtractor)] = &[
        ("Cache Lookup", |r| Some(r.cache_lookup.duration)),
        ("Analysis", |r| r.analysis.as_ref().map(|s| s.duration)),
        ("Sampling", |r| r.sampling.as_ref().map(|s| s.duration)),
        ("Assembly", |r| Some(r.assembly.duration)),
    ];

    for (name, extractor) in stage_extractors {
        let stage_durations: Vec<f64> = all_reports
            .iter()
            .filter_map(extractor)
            .map(|dur| dur.as_secs_f64() * 1000.0)
            .collect();

        if stage_durations.is_empty() {
            continue;
        }

        let stage_mean = stage_durations.iter().sum::<f64>() / stage_durations.len() as f64;
        println!("{name:<24} {stage_mean:>10.3}ms");
    }
}
