//! Contact points reported by the world, and the set-difference queries
//! contact events are built on.

use crate::types::Vec3;
use serde::{Deserialize, Serialize};

/// A named link (rigid body part) of a world object.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct Link {
    /// Name of the owning object.
    pub object: String,
    pub name: String,
}

impl Link {
    pub fn new(object: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            object: object.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.object, self.name)
    }
}

/// One point of contact between `link_a` (the queried object) and `link_b`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactPoint {
    pub link_a: Link,
    pub link_b: Link,
    #[serde(default)]
    pub position: Vec3,
    #[serde(default)]
    pub normal: Vec3,
}

impl ContactPoint {
    pub fn new(link_a: Link, link_b: Link) -> Self {
        Self {
            link_a,
            link_b,
            position: Vec3::zero(),
            normal: Vec3::zero(),
        }
    }
}

/// Snapshot of contact points, ordered as the world reported them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactPointsList(pub Vec<ContactPoint>);

impl ContactPointsList {
    pub fn new(points: Vec<ContactPoint>) -> Self {
        Self(points)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn first(&self) -> Option<&ContactPoint> {
        self.0.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ContactPoint> {
        self.0.iter()
    }

    /// Partner objects touching the queried object, first occurrence order.
    pub fn objects_with_points(&self) -> Vec<String> {
        unique(self.0.iter().map(|p| p.link_b.object.clone()))
    }

    /// Partner links touching the queried object, first occurrence order.
    pub fn links_in_contact(&self) -> Vec<Link> {
        unique(self.0.iter().map(|p| p.link_b.clone()))
    }

    /// Partner objects present in `previous` but absent from `self`.
    pub fn objects_removed_since(&self, previous: &ContactPointsList) -> Vec<String> {
        let current = self.objects_with_points();
        previous
            .objects_with_points()
            .into_iter()
            .filter(|o| !current.contains(o))
            .collect()
    }

    /// Partner links present in `previous` but absent from `self`.
    pub fn links_removed_since(&self, previous: &ContactPointsList) -> Vec<Link> {
        let current = self.links_in_contact();
        previous
            .links_in_contact()
            .into_iter()
            .filter(|l| !current.contains(l))
            .collect()
    }
}

impl From<Vec<ContactPoint>> for ContactPointsList {
    fn from(points: Vec<ContactPoint>) -> Self {
        Self(points)
    }
}

fn unique<T: PartialEq>(items: impl Iterator<Item = T>) -> Vec<T> {
    let mut out = Vec::new();
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}
