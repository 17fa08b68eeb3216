use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use globe::{Globe, GlobeConfig, TickOutcome, init_logging};
use renderer::{FrameContext, FrameContextConfig, request_headless_device};

#[derive(Parser)]
#[command(author, version, about = "Render the globe offscreen and report imagery progress")]
struct Arguments {
    /// JSON configuration; defaults apply when omitted.
    #[arg(long, short = 'c', value_parser)]
    config: Option<PathBuf>,
    /// Overrides the configured frame count.
    #[arg(long, short = 'n')]
    frames: Option<u64>,
    /// Overrides the configured base level.
    #[arg(long)]
    level: Option<u32>,
}

fn main() -> Result<()> {
    let arguments = Arguments::parse();
    let mut config = match &arguments.config {
        Some(path) => GlobeConfig::load(path)
            .with_context(|| format!("load config {}", path.display()))?,
        None => GlobeConfig::default(),
    };
    if let Some(frames) = arguments.frames {
        config.frames = frames;
    }
    if let Some(level) = arguments.level {
        config.base_level = level;
    }
    config.validate().context("validate config")?;
    init_logging(&config.log.log_config()?);

    let (device, queue) =
        pollster::block_on(request_headless_device("globe")).context("request GPU device")?;
    let context = FrameContext::offscreen(
        device,
        queue,
        config.width,
        config.height,
        FrameContextConfig {
            max_frames_in_flight: config.max_frames_in_flight,
            ..FrameContextConfig::default()
        },
    )
    .context("create offscreen context")?;
    let mut globe = Globe::new(context, &config).context("create globe")?;

    let started = Instant::now();
    let mut rendered = 0_u64;
    let mut skipped = 0_u64;
    for _ in 0..config.frames {
        match globe.tick()? {
            TickOutcome::Rendered(_) => rendered += 1,
            TickOutcome::Skipped => skipped += 1,
        }
    }

    let progress = globe.imagery_progress();
    tracing::info!(
        rendered,
        skipped,
        elapsed_ms = started.elapsed().as_millis() as u64,
        ready = progress.ready,
        failed = progress.failed,
        loading = progress.loading,
        requests = globe.backend().requests_started(),
        deferred = globe.backend().requests_deferred(),
        "globe run finished"
    );
    Ok(())
}
