//! Episode Segmenter
//!
//! Replays recorded object-motion episodes inside a 3D world and collects
//! the semantic events detector threads raise while it plays.
//!
//! ## Architecture
//!
//! ```text
//! FileEpisodePlayer  (player.rs)    ← playback thread, mutates poses
//!   └── SimWorld  (world.rs)        ← objects, transforms, text, contacts
//!
//! detector threads (external)
//!   └── EventLogger  (logger.rs)    ← timelines + mirror queue
//!         └── AnnotationRenderer  (annotation.rs) ← K stacked labels
//! ```
//!
//! The player and the logger never talk to each other: detectors observe
//! the poses the player writes and log what they see.

pub mod annotation;
pub mod config;
pub mod contact;
pub mod episode;
pub mod error;
pub mod event;
pub mod logger;
pub mod player;
pub mod queue;
pub mod record;
pub mod transform;
pub mod types;
pub mod world;

pub use annotation::{AnnotationConfig, AnnotationRenderer, AnnotationStack};
pub use crate::config::ReplayConfig;
pub use contact::{ContactPoint, ContactPointsList, Link};
pub use episode::{Episode, PoseRecord};
pub use error::{Error, Result};
pub use event::{Event, EventKind, EventTag, SharedEvent};
pub use logger::{EventLogger, LoggerConfig};
pub use player::{EpisodeConfig, EpisodePlayer, FileEpisodePlayer, FrameSource, PlayerHandle};
pub use record::EventRecord;
pub use transform::{FrameTransform, Orientation, Pose};
pub use types::{Color, LoggerStats, TextId, TrackedObject, Vec3};
pub use world::{MemoryWorld, SimWorld};
