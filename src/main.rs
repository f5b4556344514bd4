//! inktile-demo - Change Detection Demo
//!
//! Drives a capture session from a synthetic frame producer (typing,
//! scrolling, or a mix) or from a PNG pair, and logs the refresh
//! decisions the engine makes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use inktile::{
    CaptureSession, ChannelSource, Config, CpuDiffKernel, DeadlineRing, Frame, FrameSender,
    PixelFormat, TickRunner, TileCoord, TileGrid,
};

/// Command-line arguments for inktile-demo
#[derive(Parser, Debug)]
#[command(name = "inktile-demo")]
#[command(version, about = "Tile change detection demo", long_about = None)]
pub struct Args {
    /// Configuration file path (defaults used when omitted)
    #[arg(short, long, env = "INKTILE_CONFIG")]
    pub config: Option<String>,

    /// Synthetic scene (typing|scroll|mixed)
    #[arg(long, default_value = "typing")]
    pub scene: String,

    /// Compare a PNG pair instead of a synthetic scene
    #[arg(long, num_args = 2, value_names = ["BEFORE", "AFTER"])]
    pub png: Option<Vec<String>>,

    /// Screen width in pixels (synthetic scenes)
    #[arg(long, default_value = "1280")]
    pub width: u32,

    /// Screen height in pixels (synthetic scenes)
    #[arg(long, default_value = "800")]
    pub height: u32,

    /// Stop after this many completed ticks (0 = run until Ctrl-C)
    #[arg(long, default_value = "120")]
    pub ticks: u64,

    /// Tick interval override (milliseconds)
    #[arg(long)]
    pub interval_ms: Option<u64>,

    /// Force the CPU kernel even when a GPU adapter is available
    #[arg(long)]
    pub cpu: bool,

    /// Verbose logging (can be specified multiple times)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log format (json|pretty|compact)
    #[arg(long, default_value = "compact")]
    pub log_format: String,

    /// Write logs to file (in addition to stdout)
    #[arg(long)]
    pub log_file: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    info!("════════════════════════════════════════════════════════");
    info!("  inktile-demo v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "  Profile: {}",
        if cfg!(debug_assertions) { "debug" } else { "release" }
    );
    info!("════════════════════════════════════════════════════════");

    // Load configuration
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(interval) = args.interval_ms {
        config.runner.tick_interval_ms = interval;
    }
    debug!("Config: {:?}", config);

    // Build the frame producer
    let scene = build_scene(&args)?;
    let (width, height) = scene.size();
    let (sender, source) = ChannelSource::channel(4);

    // Build the session
    let capture_timeout = Duration::from_millis(config.runner.capture_timeout_ms);
    let session = if args.cpu {
        let grid = TileGrid::new(
            width,
            height,
            config.engine.tile_size,
            config.engine.bounding_area.width,
            config.engine.bounding_area.height,
        );
        let kernel = Box::new(CpuDiffKernel::new(config.engine.pixel_delta, &grid));
        CaptureSession::with_kernel(
            config.engine.clone(),
            Box::new(source),
            kernel,
            width,
            height,
            capture_timeout,
        )?
    } else {
        CaptureSession::new(
            config.engine.clone(),
            Box::new(source),
            width,
            height,
            capture_timeout,
        )?
    };

    info!(
        width,
        height,
        kernel = session.kernel_name(),
        scene = %args.scene,
        "session ready"
    );

    let tiles_x = session.grid().tiles_x;
    let overlay_ticks = config.runner.overlay_ticks as u64;
    let stats = session.stats_handle();

    // Start the producer thread and the tick runner
    let stop = Arc::new(AtomicBool::new(false));
    let producer = spawn_producer(
        scene,
        sender,
        Duration::from_millis(config.runner.tick_interval_ms),
        Arc::clone(&stop),
    );

    let cancel = CancellationToken::new();
    let (out_tx, mut out_rx) = mpsc::channel(config.runner.output_capacity);
    let runner = TickRunner::new(session, config.runner.clone());
    let runner_task = tokio::spawn(runner.run(cancel.clone(), out_tx));

    // Consume tick outputs until the budget is spent or Ctrl-C arrives
    let mut overlays: DeadlineRing<Vec<TileCoord>> = DeadlineRing::new(64);
    let mut completed = 0u64;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
                break;
            }
            out = out_rx.recv() => {
                let Some(out) = out else { break };
                completed += 1;

                while let Some(batch) = overlays.pop_expired(out.frame) {
                    debug!(tiles = batch.len(), frame = out.frame, "overlay retired");
                }

                if !out.tiles.is_empty() {
                    let mean = out
                        .tiles
                        .iter()
                        .map(|t| out.brightness[(t.by * tiles_x + t.bx) as usize])
                        .sum::<f32>()
                        / out.tiles.len() as f32;
                    // Dark content gets a light overlay and vice versa
                    let highlight = if mean < 0.5 { "light" } else { "dark" };
                    info!(
                        frame = out.frame,
                        tiles = out.tiles.len(),
                        mean_brightness = format!("{mean:.2}"),
                        highlight,
                        "refresh batch"
                    );
                    overlays.push(out.frame + overlay_ticks, out.tiles);
                }

                if args.ticks > 0 && completed >= args.ticks {
                    info!(ticks = completed, "tick budget spent");
                    break;
                }
            }
        }
    }

    // Cancel before stopping the producer so the runner sees a clean
    // shutdown instead of a disconnected source
    cancel.cancel();
    runner_task.await??;
    stop.store(true, Ordering::Relaxed);
    if producer.join().is_err() {
        bail!("frame producer panicked");
    }

    let stats = stats.read().clone();
    info!(
        ticks = stats.ticks_processed,
        skipped = stats.ticks_skipped,
        seeds = stats.seed_ticks,
        candidates = stats.candidates_emitted,
        suppressed = stats.tiles_suppressed,
        avg_tick_ms = format!("{:.2}", stats.avg_tick_time_ms()),
        "session summary"
    );
    Ok(())
}

// =============================================================================
// Scenes
// =============================================================================

/// Synthetic or file-backed frame generator
enum Scene {
    /// Glyphs appear one by one along text lines; the page clears when
    /// it fills up
    Typing { width: u32, height: u32 },
    /// Horizontal stripes scrolling upward every tick
    Scroll { width: u32, height: u32 },
    /// Typing with a scrolling burst in the middle
    Mixed { width: u32, height: u32 },
    /// Static image switching once from before to after
    PngPair {
        before: Frame,
        after: Frame,
        switch_tick: u64,
    },
}

impl Scene {
    fn size(&self) -> (u32, u32) {
        match self {
            Scene::Typing { width, height }
            | Scene::Scroll { width, height }
            | Scene::Mixed { width, height } => (*width, *height),
            Scene::PngPair { before, .. } => (before.width, before.height),
        }
    }

    fn frame(&self, tick: u64) -> Frame {
        match self {
            Scene::Typing { width, height } => typing_frame(*width, *height, tick),
            Scene::Scroll { width, height } => scroll_frame(*width, *height, tick),
            Scene::Mixed { width, height } => {
                if (20..70).contains(&tick) {
                    scroll_frame(*width, *height, tick)
                } else {
                    typing_frame(*width, *height, tick)
                }
            }
            Scene::PngPair {
                before,
                after,
                switch_tick,
            } => {
                // Frame clones only bump the Bytes refcount
                if tick < *switch_tick {
                    before.clone()
                } else {
                    after.clone()
                }
            }
        }
    }
}

fn build_scene(args: &Args) -> Result<Scene> {
    if let Some(paths) = &args.png {
        let before = load_png(&paths[0])?;
        let after = load_png(&paths[1])?;
        if before.width != after.width || before.height != after.height {
            bail!(
                "PNG pair dimensions differ: {}x{} vs {}x{}",
                before.width,
                before.height,
                after.width,
                after.height
            );
        }
        return Ok(Scene::PngPair {
            before,
            after,
            switch_tick: 10,
        });
    }

    let (width, height) = (args.width, args.height);
    if width < 64 || height < 64 {
        bail!("synthetic scenes need at least 64x64, got {width}x{height}");
    }
    match args.scene.as_str() {
        "typing" => Ok(Scene::Typing { width, height }),
        "scroll" => Ok(Scene::Scroll { width, height }),
        "mixed" => Ok(Scene::Mixed { width, height }),
        other => bail!("unknown scene {other:?} (expected typing|scroll|mixed)"),
    }
}

fn load_png(path: &str) -> Result<Frame> {
    let img = image::open(path)
        .with_context(|| format!("loading {path}"))?
        .to_rgba8();
    let (width, height) = img.dimensions();
    let frame = Frame::tight(width, height, PixelFormat::Rgba8, Bytes::from(img.into_raw()))?;
    Ok(frame)
}

/// Opaque near-white BGRA canvas
fn blank_canvas(width: u32, height: u32, value: u8) -> Vec<u8> {
    let mut data = vec![value; (width * height * 4) as usize];
    for px in data.chunks_exact_mut(4) {
        px[3] = 0xFF;
    }
    data
}

fn fill_rect(data: &mut [u8], stride: u32, x: u32, y: u32, w: u32, h: u32, value: u8) {
    for row in y..y + h {
        let start = (row * stride + x * 4) as usize;
        let end = start + (w * 4) as usize;
        for px in data[start..end].chunks_exact_mut(4) {
            px[0] = value;
            px[1] = value;
            px[2] = value;
        }
    }
}

fn typing_frame(width: u32, height: u32, tick: u64) -> Frame {
    const CELL: u32 = 12;
    const LINE: u32 = 28;
    const MARGIN: u32 = 16;

    let mut data = blank_canvas(width, height, 0xF2);
    let cols = ((width.saturating_sub(2 * MARGIN)) / CELL).max(1);
    let rows = ((height.saturating_sub(2 * MARGIN)) / LINE).max(1);

    // One glyph every other tick; the page wraps and clears
    let glyphs = (tick / 2) % (cols * rows) as u64;
    for i in 0..=glyphs {
        let col = i as u32 % cols;
        let row = i as u32 / cols;
        fill_rect(
            &mut data,
            width * 4,
            MARGIN + col * CELL,
            MARGIN + row * LINE,
            CELL - 3,
            16,
            0x20,
        );
    }

    frame_from(width, height, data)
}

fn scroll_frame(width: u32, height: u32, tick: u64) -> Frame {
    let mut data = blank_canvas(width, height, 0xFF);
    let offset = (tick * 16) as u32;
    for y in 0..height {
        let band = ((y + offset) / 24) % 2;
        let value = if band == 0 { 0xE8 } else { 0x90 };
        fill_rect(&mut data, width * 4, 0, y, width, 1, value);
    }
    frame_from(width, height, data)
}

fn frame_from(width: u32, height: u32, data: Vec<u8>) -> Frame {
    // Tight BGRA buffers built above always pass validation
    Frame::tight(width, height, PixelFormat::Bgra8, Bytes::from(data))
        .unwrap_or_else(|e| panic!("synthetic frame invalid: {e}"))
}

fn spawn_producer(
    scene: Scene,
    sender: FrameSender,
    interval: Duration,
    stop: Arc<AtomicBool>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let mut tick = 0u64;
        while !stop.load(Ordering::Relaxed) {
            if !sender.offer(scene.frame(tick)) {
                trace!(tick, "frame dropped, engine behind");
            }
            tick += 1;
            std::thread::sleep(interval);
        }
    })
}

// =============================================================================
// Logging
// =============================================================================

fn init_logging(args: &Args) -> Result<()> {
    use std::fs::File;

    let log_level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        // wgpu is chatty below warn
        tracing_subscriber::EnvFilter::new(format!(
            "inktile={level},wgpu_core=warn,wgpu_hal=warn,warn",
            level = log_level
        ))
    });

    // If log file is specified, write to both stdout and file
    if let Some(log_file_path) = &args.log_file {
        let file = File::create(log_file_path)?;

        match args.log_format.as_str() {
            "json" => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(
                        tracing_subscriber::fmt::layer()
                            .json()
                            .with_writer(std::io::stdout),
                    )
                    .with(
                        tracing_subscriber::fmt::layer()
                            .json()
                            .with_writer(file)
                            .with_ansi(false),
                    )
                    .init();
            }
            "pretty" => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(
                        tracing_subscriber::fmt::layer()
                            .pretty()
                            .with_writer(std::io::stdout),
                    )
                    .with(
                        tracing_subscriber::fmt::layer()
                            .with_writer(file)
                            .with_ansi(false),
                    )
                    .init();
            }
            _ => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(
                        tracing_subscriber::fmt::layer()
                            .compact()
                            .with_writer(std::io::stdout),
                    )
                    .with(
                        tracing_subscriber::fmt::layer()
                            .compact()
                            .with_writer(file)
                            .with_ansi(false),
                    )
                    .init();
            }
        }
        info!("Logging to file: {}", log_file_path);
    } else {
        match args.log_format.as_str() {
            "json" => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(tracing_subscriber::fmt::layer().json())
                    .init();
            }
            "pretty" => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(tracing_subscriber::fmt::layer().pretty())
                    .init();
            }
            _ => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(tracing_subscriber::fmt::layer().compact())
                    .init();
            }
        }
    }

    Ok(())
}
