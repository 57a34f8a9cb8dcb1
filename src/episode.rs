//! Episode file format and asset staging.
//!
//! ## File layout
//!
//! ```text
//! { "<scene id>": { "<frame id>": { "<object id>": [ { "t": [x, y, z], "R": [9 × f] }, … ] } } }
//! ```
//!
//! - `t` is in the file's length unit (millimetres in recorded episodes).
//! - `R` is a row-major 3×3 rotation matrix.
//! - Numbers may also be given as numeric strings.
//! - Frame ids are integers; order and contiguity in the file do not matter.
//!
//! Meshes live in `custom/models/` next to the file, named `obj_000007.ply`.

use crate::error::{Error, Result};
use crate::transform::{orientation_from_row_major, Orientation};
use crate::types::Vec3;
use log::{debug, info, warn};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One raw pose of an object in a frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoseRecord {
    #[serde(deserialize_with = "numbers")]
    pub t: [f64; 3],
    #[serde(rename = "R", deserialize_with = "numbers")]
    pub r: [f64; 9],
}

impl PoseRecord {
    /// Position converted to world units with `length_scale`.
    pub fn position(&self, length_scale: f64) -> Vec3 {
        Vec3::from(self.t).scaled(length_scale)
    }

    pub fn orientation(&self) -> Orientation {
        orientation_from_row_major(&self.r)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Number {
    Float(f64),
    Text(String),
}

fn numbers<'de, D, const N: usize>(deserializer: D) -> std::result::Result<[f64; N], D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<Number>::deserialize(deserializer)?;
    if raw.len() != N {
        return Err(serde::de::Error::invalid_length(
            raw.len(),
            &format!("{N} numbers").as_str(),
        ));
    }
    let mut out = [0.0; N];
    for (slot, value) in out.iter_mut().zip(raw) {
        *slot = match value {
            Number::Float(f) => f,
            Number::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| serde::de::Error::custom(Error::InvalidNumber(s)))?,
        };
    }
    Ok(out)
}

/// Object id → pose records of one frame.
pub type FrameObjects = BTreeMap<String, Vec<PoseRecord>>;

// ---------------------------------------------------------------------------
// Episode
// ---------------------------------------------------------------------------

/// One scene of an episode file, frames sorted by id.
#[derive(Debug, Clone)]
pub struct Episode {
    pub path: PathBuf,
    pub scene_id: String,
    frames: BTreeMap<i64, FrameObjects>,
}

impl Episode {
    /// Load and validate `scene_id` from the file at `path`.
    ///
    /// Fails on a missing scene, a non-integer frame id, or an object with
    /// no pose record, so playback never starts on unparseable data.
    pub fn load(path: impl AsRef<Path>, scene_id: &str) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let episode = Self::from_json(&text, scene_id, path)?;
        info!(
            "Loaded episode {} scene '{}' ({} frames)",
            path.display(),
            scene_id,
            episode.len()
        );
        Ok(episode)
    }

    pub fn from_json(text: &str, scene_id: &str, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut scenes: serde_json::Map<String, serde_json::Value> = serde_json::from_str(text)?;
        let scene = scenes.remove(scene_id).ok_or_else(|| Error::SceneNotFound {
            scene_id: scene_id.to_string(),
            path: path.clone(),
        })?;
        let raw: BTreeMap<String, FrameObjects> = serde_json::from_value(scene)?;

        let mut frames = BTreeMap::new();
        for (frame_key, objects) in raw {
            let frame_id: i64 = frame_key
                .trim()
                .parse()
                .map_err(|_| Error::InvalidFrameId(frame_key.clone()))?;
            if let Some((object_id, _)) = objects.iter().find(|(_, poses)| poses.is_empty()) {
                return Err(Error::MissingPose {
                    frame_id,
                    object_id: object_id.clone(),
                });
            }
            if frames.insert(frame_id, objects).is_some() {
                return Err(Error::DuplicateFrameId {
                    frame_id,
                    key: frame_key,
                });
            }
        }

        Ok(Self {
            path,
            scene_id: scene_id.to_string(),
            frames,
        })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frame_ids(&self) -> Vec<i64> {
        self.frames.keys().copied().collect()
    }

    pub fn frame(&self, frame_id: i64) -> Option<&FrameObjects> {
        self.frames.get(&frame_id)
    }

    /// Frames in ascending id order.
    pub fn into_frames(self) -> Vec<(i64, FrameObjects)> {
        self.frames.into_iter().collect()
    }

    /// `custom/models` next to the episode file.
    pub fn models_dir(&self) -> PathBuf {
        self.path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("custom")
            .join("models")
    }
}

// ---------------------------------------------------------------------------
// Naming
// ---------------------------------------------------------------------------

/// Mesh file of an object id: zero-padded to `width`, e.g. `obj_000007.ply`.
pub fn mesh_name(object_id: &str, width: usize, extension: &str) -> String {
    format!("obj_{object_id:0>width$}.{extension}")
}

// ---------------------------------------------------------------------------
// Asset staging
// ---------------------------------------------------------------------------

/// Merge `models_dir` into `cache_dir`, overwriting existing files and
/// keeping the directory structure. Returns the number of files copied.
///
/// A missing `models_dir` is logged and skipped.
pub fn stage_model_assets(models_dir: &Path, cache_dir: &Path) -> Result<usize> {
    if !models_dir.is_dir() {
        warn!(
            "No model directory at {}, skipping asset staging",
            models_dir.display()
        );
        return Ok(0);
    }
    let copied = copy_tree(models_dir, cache_dir)?;
    info!(
        "Staged {} model files from {} into {}",
        copied,
        models_dir.display(),
        cache_dir.display()
    );
    Ok(copied)
}

fn copy_tree(from: &Path, to: &Path) -> Result<usize> {
    fs::create_dir_all(to).map_err(|e| Error::io(to, e))?;
    let mut copied = 0;
    for entry in fs::read_dir(from).map_err(|e| Error::io(from, e))? {
        let entry = entry.map_err(|e| Error::io(from, e))?;
        let source = entry.path();
        let target = to.join(entry.file_name());
        if source.is_dir() {
            copied += copy_tree(&source, &target)?;
        } else {
            fs::copy(&source, &target).map_err(|e| Error::io(&source, e))?;
            debug!("Copied {} -> {}", source.display(), target.display());
            copied += 1;
        }
    }
    Ok(copied)
}
