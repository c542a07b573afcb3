use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{Parser, Subcommand};
use lottie_host_core::{
    next_frame, AnimationSource, AppConfig, FrameClock, JsonLottie, LifecycleController,
    RegionAllocator, ResourceConfig, ResourceId, ScreenEvent, SharedUi, WidgetId,
};
use tracing_subscriber::EnvFilter;

/// Two seconds at 30 fps, used when no file is given.
const DEMO_ANIMATION: &[u8] = br#"{"v":"5.7.4","ip":0,"op":60,"fr":30,"w":64,"h":64,"layers":[]}"#;

fn main() -> lottie_host_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Play {
            file,
            embed,
            width,
            height,
            once,
            no_autostart,
            dwell_ms,
            cycles,
            config,
        } => {
            let config = load_config(config.as_deref())?;
            let source = resolve_source(file, embed)?;
            run_play(PlayOptions {
                config,
                source,
                width,
                height,
                looping: !once,
                auto_start: !no_autostart,
                dwell: Duration::from_millis(dwell_ms),
                cycles,
            })
        }
        Commands::Frame {
            elapsed_ms,
            start,
            end,
            duration_ms,
            once,
            config,
        } => {
            let config = load_config(config.as_deref())?;
            run_frame(&config, elapsed_ms, start, end, duration_ms, !once);
            Ok(())
        }
    }
}

struct PlayOptions {
    config: AppConfig,
    source: AnimationSource,
    width: u32,
    height: u32,
    looping: bool,
    auto_start: bool,
    dwell: Duration,
    cycles: u32,
}

fn run_play(options: PlayOptions) -> lottie_host_core::Result<()> {
    tracing::info!(
        width = options.width,
        height = options.height,
        looping = options.looping,
        cycles = options.cycles,
        "starting host simulation"
    );

    let ui = SharedUi::new();
    let allocator = RegionAllocator::new(&options.config.memory);
    let mut controller = LifecycleController::new(
        ui.clone(),
        allocator.clone(),
        Arc::new(JsonLottie),
        options.config.playback.clone(),
    );

    let (screen, widget, id) = {
        let mut state = ui.lock()?;
        let screen = state.create_screen();
        let widget = state.create_widget(screen);
        let resource = ResourceConfig::new(widget, options.source, options.width, options.height)
            .looping(options.looping)
            .auto_start(options.auto_start);
        let created = controller.create(&mut state, resource)?;
        if !created.launched {
            tracing::warn!(resource = %created.id, "first launch failed, retrying on next load");
        }
        (screen, widget, created.id)
    };
    ui.mark_running();

    thread::sleep(options.dwell);
    report(&ui, widget, id)?;

    for cycle in 1..=options.cycles {
        for event in [ScreenEvent::UnloadStart, ScreenEvent::Unloaded] {
            let mut state = ui.lock()?;
            controller.handle_screen_event(&mut state, screen, event);
        }
        tracing::info!(cycle, stats = ?allocator.stats(), "screen unloaded");

        {
            let mut state = ui.lock()?;
            controller.handle_screen_event(&mut state, screen, ScreenEvent::Loaded);
        }
        thread::sleep(options.dwell);
        report(&ui, widget, id)?;
    }

    controller.shutdown()?;
    tracing::info!(stats = ?allocator.stats(), "host simulation finished");
    Ok(())
}

fn report(ui: &SharedUi, widget: WidgetId, id: ResourceId) -> lottie_host_core::Result<()> {
    let state = ui.lock()?;
    let task_state = state.resource(id).and_then(|resource| resource.task_state());
    let (frames_drawn, last_frame, hidden) = state
        .widget(widget)
        .map(|widget| (widget.frames_drawn(), widget.last_frame(), widget.is_hidden()))
        .unwrap_or_default();
    tracing::info!(
        resource = %id,
        ?task_state,
        frames_drawn,
        ?last_frame,
        hidden,
        "playback status"
    );
    Ok(())
}

fn run_frame(
    config: &AppConfig,
    elapsed_ms: u64,
    start: i32,
    end: i32,
    duration_ms: u32,
    looping: bool,
) {
    let clock = FrameClock {
        start_frame: start,
        end_frame: end,
        duration_ms,
        looping,
    };
    let (min, max) = config.playback.frame_delay_bounds();
    let frame = next_frame(elapsed_ms, start, end, duration_ms, looping);
    let delay = clock.frame_delay(min, max);
    tracing::info!(elapsed_ms, frame, step = ?clock.step(elapsed_ms), "frame lookup");
    println!("frame={frame} delay_ms={}", delay.as_millis());
}

fn load_config(path: Option<&Path>) -> lottie_host_core::Result<AppConfig> {
    match path {
        Some(path) => {
            tracing::info!(?path, "loading configuration");
            AppConfig::from_json_str(&std::fs::read_to_string(path)?)
        }
        None => Ok(AppConfig::default()),
    }
}

fn resolve_source(file: Option<PathBuf>, embed: bool) -> lottie_host_core::Result<AnimationSource> {
    let (data, path): (Option<Arc<[u8]>>, Option<PathBuf>) = match file {
        Some(path) if embed => (Some(Arc::from(std::fs::read(&path)?)), None),
        Some(path) => (None, Some(path)),
        None => (Some(Arc::from(DEMO_ANIMATION)), None),
    };
    AnimationSource::from_parts(data, path)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Lottie widget host simulator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Play an animation on a simulated screen and cycle its visibility.
    Play {
        /// Lottie JSON file. A built-in demo animation is used when omitted.
        file: Option<PathBuf>,
        /// Read the file up front and hand it over as embedded data.
        #[arg(long)]
        embed: bool,
        #[arg(long, default_value_t = 64)]
        width: u32,
        #[arg(long, default_value_t = 64)]
        height: u32,
        /// Play once and settle on the last frame instead of looping.
        #[arg(long)]
        once: bool,
        /// Load the animation but do not start the frame loop.
        #[arg(long)]
        no_autostart: bool,
        /// How long the screen stays visible per cycle.
        #[arg(long, default_value_t = 1_000)]
        dwell_ms: u64,
        /// Number of unload/reload cycles after the first showing.
        #[arg(long, default_value_t = 3)]
        cycles: u32,
        /// Optional JSON configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Print the frame and frame delay for a point in time.
    Frame {
        elapsed_ms: u64,
        #[arg(long, default_value_t = 0)]
        start: i32,
        #[arg(long)]
        end: i32,
        #[arg(long)]
        duration_ms: u32,
        #[arg(long)]
        once: bool,
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}
