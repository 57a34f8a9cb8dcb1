//! Rigid transforms: poses and the named frame tree used to express
//! sensor-frame poses in the world root frame.
//!
//! Rotation math is nalgebra's; this module only adds frame names.

use crate::error::{Error, Result};
use crate::types::Vec3;
use nalgebra::{Isometry3, Matrix3, Rotation3, Translation3, UnitQuaternion};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Unit quaternion orientation.
pub type Orientation = UnitQuaternion<f64>;

/// Orientation of a row-major 3×3 rotation matrix.
///
/// The matrix is taken as orthonormal; recorded episodes store exact
/// rotations.
pub fn orientation_from_row_major(r: &[f64; 9]) -> Orientation {
    let rotation = Rotation3::from_matrix_unchecked(Matrix3::from_row_slice(r));
    UnitQuaternion::from_rotation_matrix(&rotation)
}

// ---------------------------------------------------------------------------
// Pose
// ---------------------------------------------------------------------------

/// Position + orientation expressed in a named frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub orientation: Orientation,
    pub frame: String,
}

impl Pose {
    pub fn new(position: Vec3, orientation: Orientation, frame: impl Into<String>) -> Self {
        Self {
            position,
            orientation,
            frame: frame.into(),
        }
    }

    pub fn from_isometry(isometry: &Isometry3<f64>, frame: impl Into<String>) -> Self {
        Self::new(
            isometry.translation.vector.into(),
            isometry.rotation,
            frame,
        )
    }

    pub fn isometry(&self) -> Isometry3<f64> {
        Isometry3::from_parts(
            Translation3::from(self.position.to_vector()),
            self.orientation,
        )
    }

    /// True when both position and orientation are within tolerance.
    pub fn approx_eq(&self, other: &Pose, tolerance: f64) -> bool {
        self.frame == other.frame
            && self.position.distance(other.position) <= tolerance
            && self.orientation.angle_to(&other.orientation) <= tolerance
    }
}

// ---------------------------------------------------------------------------
// Frame transforms
// ---------------------------------------------------------------------------

/// Rigid transform mapping coordinates of `child_frame` into `parent_frame`.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameTransform {
    pub parent_frame: String,
    pub child_frame: String,
    pub isometry: Isometry3<f64>,
}

impl FrameTransform {
    pub fn new(
        parent_frame: impl Into<String>,
        child_frame: impl Into<String>,
        translation: Vec3,
        rotation: Orientation,
    ) -> Self {
        Self {
            parent_frame: parent_frame.into(),
            child_frame: child_frame.into(),
            isometry: Isometry3::from_parts(Translation3::from(translation.to_vector()), rotation),
        }
    }
}

/// Named frames hanging off a single root frame.
#[derive(Debug, Clone)]
pub struct TransformTree {
    root: String,
    transforms: HashMap<String, FrameTransform>,
}

impl TransformTree {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            transforms: HashMap::new(),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Register or refresh the transform of `transform.child_frame`.
    pub fn update(&mut self, transform: FrameTransform) {
        self.transforms
            .insert(transform.child_frame.clone(), transform);
    }

    pub fn contains(&self, frame: &str) -> bool {
        frame == self.root || self.transforms.contains_key(frame)
    }

    /// Isometry mapping `frame` coordinates into the root frame.
    pub fn to_root(&self, frame: &str) -> Result<Isometry3<f64>> {
        let mut acc = Isometry3::identity();
        let mut current = frame;
        // A chain longer than the number of edges means a cycle.
        for _ in 0..=self.transforms.len() {
            if current == self.root {
                return Ok(acc);
            }
            let edge = self
                .transforms
                .get(current)
                .ok_or_else(|| Error::UnknownFrame(current.to_string()))?;
            acc = edge.isometry * acc;
            current = &edge.parent_frame;
        }
        Err(Error::UnknownFrame(frame.to_string()))
    }

    pub fn transform_pose(&self, pose: &Pose, target_frame: &str) -> Result<Pose> {
        if pose.frame == target_frame {
            return Ok(pose.clone());
        }
        let in_root = self.to_root(&pose.frame)? * pose.isometry();
        let in_target = if target_frame == self.root {
            in_root
        } else {
            self.to_root(target_frame)?.inverse() * in_root
        };
        Ok(Pose::from_isometry(&in_target, target_frame))
    }
}
