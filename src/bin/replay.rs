//! episode-replay binary
//!
//! Replays one scene of an episode file into a headless world, with an
//! optional annotation pipeline, and reports the events logged meanwhile.
//!
//! ## Configuration (TOML via `--config`, env, flags)
//!
//! | Flag / env                          | Default                | Description                  |
//! |-------------------------------------|------------------------|------------------------------|
//! | `--episode` / `REPLAY_EPISODE`      | from config            | Episode JSON file            |
//! | `--scene` / `REPLAY_SCENE`          | `1`                    | Scene id inside the file     |
//! | `--frame-interval-ms`               | `50`                   | Minimum time between frames  |
//! | `--annotate`                        | off                    | Render event labels          |
//! | `--ignore <id>` (repeatable)        | none                   | Object ids to skip           |
//! | `--cache-dir`                       | `$TMP/episode-replay`  | World mesh cache             |
//! | `--output`                          | none                   | Write timeline JSON here     |

use anyhow::{Context, Result};
use clap::Parser;
use episode_segmenter::{
    logger, Event, EventLogger, FileEpisodePlayer, MemoryWorld, ReplayConfig, SimWorld,
    TrackedObject,
};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Producer id of the built-in new-object watcher.
const WATCHER_ID: &str = "new_object_detector";

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "episode-replay", about = "Replay a recorded episode", version)]
struct Args {
    /// TOML config file
    #[arg(long, env = "REPLAY_CONFIG")]
    config: Option<PathBuf>,

    /// Episode JSON file
    #[arg(long, env = "REPLAY_EPISODE")]
    episode: Option<PathBuf>,

    /// Scene id inside the episode file
    #[arg(long, env = "REPLAY_SCENE")]
    scene: Option<String>,

    /// Minimum time between frames (ms)
    #[arg(long)]
    frame_interval_ms: Option<u64>,

    /// Render event annotations into the world
    #[arg(long)]
    annotate: bool,

    /// Object ids to skip during replay
    #[arg(long = "ignore")]
    ignore: Vec<String>,

    /// Directory the world resolves meshes from
    #[arg(long, env = "REPLAY_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Write the event timeline as JSON
    #[arg(long)]
    output: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("episode_segmenter=debug".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut config =
        ReplayConfig::load(args.config.as_deref()).context("Failed to load replay config")?;
    if let Some(path) = args.episode {
        config.episode.path = path;
    }
    if let Some(scene) = args.scene {
        config.episode.scene_id = scene;
    }
    if let Some(ms) = args.frame_interval_ms {
        config.episode.time_between_frames_ms = ms;
    }
    if args.annotate {
        config.logger.annotate = true;
    }
    config.episode.ignore_objects.extend(args.ignore);

    tracing::info!(
        "Starting episode-replay (episode={}, scene='{}', interval={}ms, annotate={})",
        config.episode.path.display(),
        config.episode.scene_id,
        config.episode.time_between_frames_ms,
        config.logger.annotate,
    );

    let cache_dir = args
        .cache_dir
        .unwrap_or_else(|| std::env::temp_dir().join("episode-replay"));
    let world = Arc::new(MemoryWorld::new(&config.episode.root_frame, &cache_dir));
    let sim: Arc<dyn SimWorld> = world.clone();

    let event_logger = Arc::new(
        EventLogger::from_config(&config.logger, &config.annotation, Some(sim.clone()))
            .context("Failed to start event logger")?,
    );
    logger::init_current(event_logger.clone())?;

    let player = FileEpisodePlayer::new(sim.clone(), config.episode.clone())
        .with_context(|| format!("Failed to load {}", config.episode.path.display()))?
        .into_player()
        .start()?;

    let stop = Arc::new(AtomicBool::new(false));
    let watcher = spawn_watcher(sim, event_logger.clone(), stop.clone())?;

    let playback = player.join();
    stop.store(true, Ordering::SeqCst);
    if watcher.join().is_err() {
        tracing::error!("New-object watcher panicked");
    }

    while let Some(event) = event_logger.poll_next() {
        tracing::info!("{}", event);
    }
    event_logger.join()?;
    playback.context("Episode playback failed")?;

    let stats = event_logger.stats();
    tracing::info!(
        "Replay done: {} objects, {} events from {} producers",
        world.object_count(),
        stats.total_events,
        stats.producers
    );

    if let Some(path) = args.output {
        let json = serde_json::to_string_pretty(&event_logger.export())?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!("Timeline written to {}", path.display());
    }

    logger::reset_current();
    Ok(())
}

// ---------------------------------------------------------------------------
// New-object watcher
// ---------------------------------------------------------------------------

/// Minimal producer: logs a `NewObject` event the first time each object
/// shows up in the world.
fn spawn_watcher(
    world: Arc<dyn SimWorld>,
    event_logger: Arc<EventLogger>,
    stop: Arc<AtomicBool>,
) -> Result<thread::JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("new-object-watcher".into())
        .spawn(move || {
            let mut seen = HashSet::new();
            loop {
                // One more sweep after the stop signal catches the last frame.
                let stopping = stop.load(Ordering::SeqCst);
                for name in world.object_names() {
                    if seen.insert(name.clone()) {
                        let color = world.object(&name).map(|o| o.color).unwrap_or_default();
                        let object = TrackedObject::new(name).with_color(color);
                        event_logger.log_event(Event::new_object(object), WATCHER_ID);
                    }
                }
                if stopping {
                    break;
                }
                thread::sleep(Duration::from_millis(20));
            }
        })
        .context("Failed to spawn new-object watcher")?;
    Ok(handle)
}
