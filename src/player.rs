//! Episode player – a pausable, frame-rate-limited playback thread.
//!
//! ## Loop
//!
//! ```text
//! loop {
//!     wait while paused        (poll every `pause_poll`)
//!     start = now
//!     process one frame        (FrameSource::process_next_frame)
//!     sleep(max(0, interval - elapsed))
//!     ready = true
//! }
//! ```
//!
//! `pause()`/`resume()` only flip a flag; a frame already in flight always
//! completes, and the next iteration observes the new state.

use crate::error::{Error, Result};
use crate::episode::{mesh_name, stage_model_assets, Episode, FrameObjects};
use crate::transform::{FrameTransform, Orientation, Pose};
use crate::types::{ObjectKind, Vec3};
use crate::world::{ObjectSpec, SimWorld};
use log::{debug, info};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Interval at which a paused player re-checks its flag.
pub const PAUSE_POLL: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Frame sources
// ---------------------------------------------------------------------------

/// Anything that can apply an episode to the world one frame at a time.
pub trait FrameSource: Send + 'static {
    /// Apply the next frame. Returns `Ok(false)` once the source is exhausted.
    fn process_next_frame(&mut self) -> Result<bool>;

    /// Frames not yet processed, when known.
    fn remaining_frames(&self) -> Option<usize> {
        None
    }
}

// ---------------------------------------------------------------------------
// Playback control
// ---------------------------------------------------------------------------

/// State shared between the playback thread and its handles.
pub struct PlaybackControl {
    paused: AtomicBool,
    cancelled: AtomicBool,
    ready: Mutex<bool>,
    ready_changed: Condvar,
    frames_processed: AtomicU64,
    time_between_frames: Duration,
    pause_poll: Duration,
}

impl PlaybackControl {
    pub fn new(time_between_frames: Duration) -> Self {
        Self {
            paused: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            ready: Mutex::new(false),
            ready_changed: Condvar::new(),
            frames_processed: AtomicU64::new(0),
            time_between_frames,
            pause_poll: PAUSE_POLL,
        }
    }

    pub fn with_pause_poll(mut self, pause_poll: Duration) -> Self {
        self.pause_poll = pause_poll;
        self
    }

    pub fn time_between_frames(&self) -> Duration {
        self.time_between_frames
    }

    pub fn pause(&self) {
        if !self.paused.swap(true, Ordering::SeqCst) {
            info!("Episode playback paused");
        }
    }

    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::SeqCst) {
            info!("Episode playback resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// True once at least one frame has been processed.
    pub fn is_ready(&self) -> bool {
        *self.ready.lock()
    }

    /// Block until ready or `timeout` elapses. Returns readiness.
    pub fn wait_until_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut ready = self.ready.lock();
        while !*ready {
            if self.ready_changed.wait_until(&mut ready, deadline).timed_out() {
                break;
            }
        }
        *ready
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed.load(Ordering::SeqCst)
    }

    fn mark_ready(&self) {
        let mut ready = self.ready.lock();
        if !*ready {
            *ready = true;
            self.ready_changed.notify_all();
        }
    }

    fn wait_if_paused(&self) {
        while self.is_paused() && !self.is_cancelled() {
            thread::sleep(self.pause_poll);
        }
    }

    fn wait_to_maintain_frame_rate(&self, started: Instant) {
        if let Some(rest) = self.time_between_frames.checked_sub(started.elapsed()) {
            thread::sleep(rest);
        }
    }
}

// ---------------------------------------------------------------------------
// Player
// ---------------------------------------------------------------------------

pub struct EpisodePlayer<S: FrameSource> {
    source: S,
    control: Arc<PlaybackControl>,
}

impl<S: FrameSource> EpisodePlayer<S> {
    pub fn new(source: S, time_between_frames: Duration) -> Self {
        Self::with_control(source, PlaybackControl::new(time_between_frames))
    }

    pub fn with_control(source: S, control: PlaybackControl) -> Self {
        Self {
            source,
            control: Arc::new(control),
        }
    }

    pub fn control(&self) -> Arc<PlaybackControl> {
        self.control.clone()
    }

    /// Run playback on the calling thread until the source is exhausted or
    /// playback is cancelled.
    pub fn run(mut self) -> Result<()> {
        info!(
            "Episode playback started ({:?} between frames)",
            self.control.time_between_frames
        );
        loop {
            self.control.wait_if_paused();
            if self.control.is_cancelled() {
                info!("Episode playback cancelled");
                break;
            }

            let started = Instant::now();
            if !self.source.process_next_frame()? {
                break;
            }
            self.control.frames_processed.fetch_add(1, Ordering::SeqCst);
            self.control.wait_to_maintain_frame_rate(started);
            self.control.mark_ready();
        }
        info!(
            "Episode playback finished after {} frames",
            self.control.frames_processed()
        );
        Ok(())
    }

    /// Run playback on a dedicated thread.
    pub fn start(self) -> Result<PlayerHandle> {
        let control = self.control.clone();
        let thread = thread::Builder::new()
            .name("episode-player".into())
            .spawn(move || self.run())
            .map_err(|source| Error::ThreadSpawn {
                name: "episode player",
                source,
            })?;
        Ok(PlayerHandle {
            control,
            thread: Some(thread),
        })
    }
}

/// Handle of a running playback thread.
pub struct PlayerHandle {
    control: Arc<PlaybackControl>,
    thread: Option<JoinHandle<Result<()>>>,
}

impl PlayerHandle {
    pub fn control(&self) -> &Arc<PlaybackControl> {
        &self.control
    }

    pub fn pause(&self) {
        self.control.pause();
    }

    pub fn resume(&self) {
        self.control.resume();
    }

    pub fn is_paused(&self) -> bool {
        self.control.is_paused()
    }

    pub fn is_ready(&self) -> bool {
        self.control.is_ready()
    }

    pub fn wait_until_ready(&self, timeout: Duration) -> bool {
        self.control.wait_until_ready(timeout)
    }

    pub fn frames_processed(&self) -> u64 {
        self.control.frames_processed()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    pub fn cancel(&self) {
        self.control.cancel();
    }

    /// Wait for playback to end, surfacing its error if it failed.
    pub fn join(mut self) -> Result<()> {
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| Error::ThreadPanicked("episode player"))?,
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// File-backed player
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EpisodeConfig {
    pub path: PathBuf,
    pub scene_id: String,
    pub time_between_frames_ms: u64,
    /// Scale applied to every created mesh.
    pub mesh_scale: f64,
    /// File length unit → world length unit (mm → m by default).
    pub length_unit_scale: f64,
    pub object_prefix: String,
    pub mesh_id_width: usize,
    pub mesh_extension: String,
    /// Frame the recorded poses are expressed in.
    pub sensor_frame: String,
    pub root_frame: String,
    /// Object ids never touched during replay.
    pub ignore_objects: Vec<String>,
}

impl Default for EpisodeConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("refined_poses.json"),
            scene_id: "1".into(),
            time_between_frames_ms: 50,
            mesh_scale: 0.001,
            length_unit_scale: 0.001,
            object_prefix: "episode_object_".into(),
            mesh_id_width: 6,
            mesh_extension: "ply".into(),
            sensor_frame: "episode_camera_frame".into(),
            root_frame: "map".into(),
            ignore_objects: Vec::new(),
        }
    }
}

impl EpisodeConfig {
    pub fn time_between_frames(&self) -> Duration {
        Duration::from_millis(self.time_between_frames_ms)
    }

    pub fn object_name(&self, object_id: &str) -> String {
        format!("{}{}", self.object_prefix, object_id)
    }

    pub fn mesh_name(&self, object_id: &str) -> String {
        mesh_name(object_id, self.mesh_id_width, &self.mesh_extension)
    }
}

/// Fixed camera mount: one metre up, rolled -90° about x.
pub fn camera_mount_transform(root_frame: &str, sensor_frame: &str) -> FrameTransform {
    FrameTransform::new(
        root_frame,
        sensor_frame,
        Vec3::new(0.0, 0.0, 1.0),
        Orientation::from_euler_angles(-std::f64::consts::FRAC_PI_2, 0.0, 0.0),
    )
}

/// Replays an [`Episode`] into a [`SimWorld`].
///
/// Objects missing from the world are created at their first pose; all other
/// objects of a frame are moved with a single batched pose reset.
pub struct FileEpisodePlayer {
    world: Arc<dyn SimWorld>,
    config: EpisodeConfig,
    frames: Vec<(i64, FrameObjects)>,
    cursor: usize,
    ignored: HashSet<String>,
    camera_transform: FrameTransform,
}

impl FileEpisodePlayer {
    /// Load the configured scene and stage its mesh assets into the world's
    /// cache directory.
    pub fn new(world: Arc<dyn SimWorld>, config: EpisodeConfig) -> Result<Self> {
        let episode = Episode::load(&config.path, &config.scene_id)?;
        stage_model_assets(&episode.models_dir(), &world.cache_dir())?;
        Ok(Self::from_episode(world, episode, config))
    }

    /// Use an already loaded episode. No assets are staged.
    pub fn from_episode(world: Arc<dyn SimWorld>, episode: Episode, config: EpisodeConfig) -> Self {
        let camera_transform = camera_mount_transform(&config.root_frame, &config.sensor_frame);
        Self {
            world,
            ignored: config.ignore_objects.iter().cloned().collect(),
            frames: episode.into_frames(),
            cursor: 0,
            config,
            camera_transform,
        }
    }

    pub fn config(&self) -> &EpisodeConfig {
        &self.config
    }

    pub fn into_player(self) -> EpisodePlayer<Self> {
        let interval = self.config.time_between_frames();
        EpisodePlayer::new(self, interval)
    }

    /// Decode a record and express it in the root frame.
    pub fn world_pose(&self, record: &crate::episode::PoseRecord) -> Result<Pose> {
        let pose = Pose::new(
            record.position(self.config.length_unit_scale),
            record.orientation(),
            self.config.sensor_frame.clone(),
        );
        self.world.transform_pose(&pose, &self.config.root_frame)
    }

    fn process_frame(&self, frame_id: i64, objects: &FrameObjects) -> Result<()> {
        self.world
            .update_transforms(std::slice::from_ref(&self.camera_transform));

        let mut batch = Vec::new();
        for (object_id, records) in objects {
            if self.ignored.contains(object_id) {
                continue;
            }
            let record = records.first().ok_or_else(|| Error::MissingPose {
                frame_id,
                object_id: object_id.clone(),
            })?;
            let pose = self.world_pose(record)?;
            let name = self.config.object_name(object_id);

            if self.world.has_object(&name) {
                batch.push((name, pose));
            } else {
                info!("Frame {}: creating {}", frame_id, name);
                self.world.create_object(ObjectSpec {
                    name,
                    kind: ObjectKind::Generic,
                    mesh: self.config.mesh_name(object_id),
                    pose,
                    scale: self.config.mesh_scale,
                })?;
            }
        }

        if !batch.is_empty() {
            debug!("Frame {}: moving {} objects", frame_id, batch.len());
            self.world.reset_object_poses(&batch)?;
        }
        Ok(())
    }
}

impl FrameSource for FileEpisodePlayer {
    fn process_next_frame(&mut self) -> Result<bool> {
        let Some((frame_id, objects)) = self.frames.get(self.cursor) else {
            return Ok(false);
        };
        self.process_frame(*frame_id, objects)?;
        self.cursor += 1;
        Ok(true)
    }

    fn remaining_frames(&self) -> Option<usize> {
        Some(self.frames.len() - self.cursor)
    }
}
