//! World subsystem: the [`SimWorld`] contract the replay and annotation
//! pipelines drive, plus [`MemoryWorld`], a headless implementation.

use crate::contact::{ContactPointsList, Link};
use crate::error::{Error, Result};
use crate::transform::{FrameTransform, Pose, TransformTree};
use crate::types::{Color, ObjectKind, TextId, Vec3};
use log::debug;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

// ---------------------------------------------------------------------------
// Object records
// ---------------------------------------------------------------------------

/// Everything needed to spawn an object into the world.
#[derive(Debug, Clone)]
pub struct ObjectSpec {
    pub name: String,
    pub kind: ObjectKind,
    /// Mesh file name, resolved against the world's asset cache.
    pub mesh: String,
    pub pose: Pose,
    pub scale: f64,
}

/// A live object as the world reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneObject {
    pub name: String,
    pub kind: ObjectKind,
    pub mesh: String,
    pub pose: Pose,
    pub scale: f64,
    pub color: Color,
}

impl From<ObjectSpec> for SceneObject {
    fn from(spec: ObjectSpec) -> Self {
        Self {
            name: spec.name,
            kind: spec.kind,
            mesh: spec.mesh,
            pose: spec.pose,
            scale: spec.scale,
            color: Color::default(),
        }
    }
}

/// A positioned, colored text label.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextAnnotation {
    pub text: String,
    pub position: Vec3,
    pub color: Color,
    pub size: f64,
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// The simulation world as seen by the episode player and the annotation
/// renderer.
///
/// Implementations must be shareable across threads, but callers only ever
/// issue one category of mutation per thread (poses from the player, text
/// from the renderer).
pub trait SimWorld: Send + Sync {
    fn object_names(&self) -> Vec<String>;

    fn has_object(&self, name: &str) -> bool {
        self.object_names().iter().any(|n| n == name)
    }

    fn object(&self, name: &str) -> Option<SceneObject>;

    fn create_object(&self, spec: ObjectSpec) -> Result<()>;

    /// Move several existing objects in one call.
    fn reset_object_poses(&self, poses: &[(String, Pose)]) -> Result<()>;

    /// Register or refresh named rigid transforms.
    fn update_transforms(&self, transforms: &[FrameTransform]);

    fn transform_pose(&self, pose: &Pose, target_frame: &str) -> Result<Pose>;

    fn add_text(&self, text: &str, position: Vec3, color: Color, size: f64) -> TextId;

    fn remove_text(&self, id: TextId);

    /// Tint a whole object.
    fn set_object_color(&self, name: &str, color: Color) -> Result<()>;

    /// Tint one link of an object.
    fn set_link_color(&self, link: &Link, color: Color) -> Result<()>;

    /// Directory meshes are resolved from when objects are created.
    fn cache_dir(&self) -> PathBuf;

    /// Current contact points of `object` with everything else.
    fn contact_points(&self, object: &str) -> ContactPointsList;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Holds every object spawned into a [`MemoryWorld`].
#[derive(Debug, Default)]
pub struct ObjectRegistry {
    objects: BTreeMap<String, SceneObject>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, object: SceneObject) -> Result<()> {
        if self.objects.contains_key(&object.name) {
            return Err(Error::ObjectExists(object.name));
        }
        self.objects.insert(object.name.clone(), object);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Option<SceneObject> {
        self.objects.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&SceneObject> {
        self.objects.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut SceneObject> {
        self.objects.get_mut(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.objects.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Headless world
// ---------------------------------------------------------------------------

/// In-memory world: no physics, no rendering, just bookkeeping.
///
/// Contact points are whatever was last injected with
/// [`MemoryWorld::set_contact_points`].
pub struct MemoryWorld {
    objects: RwLock<ObjectRegistry>,
    texts: RwLock<BTreeMap<TextId, TextAnnotation>>,
    next_text_id: AtomicU64,
    transforms: RwLock<TransformTree>,
    contacts: RwLock<HashMap<String, ContactPointsList>>,
    link_colors: RwLock<HashMap<Link, Color>>,
    cache_dir: PathBuf,
    pose_batches: AtomicU64,
}

impl MemoryWorld {
    pub fn new(root_frame: impl Into<String>, cache_dir: impl AsRef<Path>) -> Self {
        Self {
            objects: RwLock::new(ObjectRegistry::new()),
            texts: RwLock::new(BTreeMap::new()),
            next_text_id: AtomicU64::new(1),
            transforms: RwLock::new(TransformTree::new(root_frame)),
            contacts: RwLock::new(HashMap::new()),
            link_colors: RwLock::new(HashMap::new()),
            cache_dir: cache_dir.as_ref().to_path_buf(),
            pose_batches: AtomicU64::new(0),
        }
    }

    pub fn object_count(&self) -> usize {
        self.objects.read().len()
    }

    /// Visible texts in creation order.
    pub fn texts(&self) -> Vec<(TextId, TextAnnotation)> {
        self.texts
            .read()
            .iter()
            .map(|(id, t)| (*id, t.clone()))
            .collect()
    }

    pub fn text(&self, id: TextId) -> Option<TextAnnotation> {
        self.texts.read().get(&id).cloned()
    }

    /// Number of [`SimWorld::reset_object_poses`] calls served so far.
    pub fn pose_batch_count(&self) -> u64 {
        self.pose_batches.load(Ordering::SeqCst)
    }

    pub fn set_contact_points(&self, object: impl Into<String>, points: ContactPointsList) {
        self.contacts.write().insert(object.into(), points);
    }

    /// Last color set on `link`, if any.
    pub fn link_color(&self, link: &Link) -> Option<Color> {
        self.link_colors.read().get(link).copied()
    }
}

impl SimWorld for MemoryWorld {
    fn object_names(&self) -> Vec<String> {
        self.objects.read().names()
    }

    fn has_object(&self, name: &str) -> bool {
        self.objects.read().get(name).is_some()
    }

    fn object(&self, name: &str) -> Option<SceneObject> {
        self.objects.read().get(name).cloned()
    }

    fn create_object(&self, spec: ObjectSpec) -> Result<()> {
        debug!("Spawning {} (mesh {})", spec.name, spec.mesh);
        self.objects.write().insert(spec.into())
    }

    fn reset_object_poses(&self, poses: &[(String, Pose)]) -> Result<()> {
        let mut objects = self.objects.write();
        // Validate first so a bad batch leaves every pose untouched.
        if let Some((missing, _)) = poses.iter().find(|(n, _)| objects.get(n).is_none()) {
            return Err(Error::ObjectNotFound(missing.clone()));
        }
        for (name, pose) in poses {
            if let Some(object) = objects.get_mut(name) {
                object.pose = pose.clone();
            }
        }
        self.pose_batches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn update_transforms(&self, transforms: &[FrameTransform]) {
        let mut tree = self.transforms.write();
        for t in transforms {
            tree.update(t.clone());
        }
    }

    fn transform_pose(&self, pose: &Pose, target_frame: &str) -> Result<Pose> {
        self.transforms.read().transform_pose(pose, target_frame)
    }

    fn add_text(&self, text: &str, position: Vec3, color: Color, size: f64) -> TextId {
        let id = TextId(self.next_text_id.fetch_add(1, Ordering::SeqCst));
        self.texts.write().insert(
            id,
            TextAnnotation {
                text: text.to_string(),
                position,
                color,
                size,
            },
        );
        id
    }

    fn remove_text(&self, id: TextId) {
        self.texts.write().remove(&id);
    }

    fn set_object_color(&self, name: &str, color: Color) -> Result<()> {
        let mut objects = self.objects.write();
        let object = objects
            .get_mut(name)
            .ok_or_else(|| Error::ObjectNotFound(name.to_string()))?;
        object.color = color;
        Ok(())
    }

    fn set_link_color(&self, link: &Link, color: Color) -> Result<()> {
        if !self.has_object(&link.object) {
            return Err(Error::ObjectNotFound(link.object.clone()));
        }
        self.link_colors.write().insert(link.clone(), color);
        Ok(())
    }

    fn cache_dir(&self) -> PathBuf {
        self.cache_dir.clone()
    }

    fn contact_points(&self, object: &str) -> ContactPointsList {
        self.contacts
            .read()
            .get(object)
            .cloned()
            .unwrap_or_default()
    }
}
