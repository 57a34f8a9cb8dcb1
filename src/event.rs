//! Semantic events raised while an episode replays.
//!
//! [`EventKind`] is the closed set of variants; [`Event`] wraps one with the
//! bookkeeping every variant shares (timestamp, producer, render handle).
//!
//! Equality is semantic and per variant:
//!
//! | Variant family | Equal when                                         |
//! |----------------|----------------------------------------------------|
//! | new object     | same tracked object                                |
//! | motion         | same tracked object, start pose and timestamp      |
//! | contact        | same tracked object and partner object             |
//! | interaction    | same agent and participating object                |
//!
//! Events of different variants are never equal.

use crate::contact::{ContactPointsList, Link};
use crate::error::{Error, Result};
use crate::transform::Pose;
use crate::types::{now_seconds, Color, TextId, TrackedObject, Vec3};
use crate::world::{SimWorld, TextAnnotation};
use log::warn;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Events are shared between the logger's timelines, its queues and the
/// producer that raised them.
pub type SharedEvent = Arc<Event>;

/// Default text size of an event annotation.
pub const ANNOTATION_SIZE: f64 = 1.0;

// ---------------------------------------------------------------------------
// Tags
// ---------------------------------------------------------------------------

/// Discriminant of [`EventKind`], used for allow-lists and export.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventTag {
    NewObject,
    Translation,
    Rotation,
    StopTranslation,
    StopRotation,
    ContactGained,
    ContactLost,
    SurfaceLost,
    AgentContactGained,
    AgentContactLost,
    PickUp,
    Placing,
}

impl EventTag {
    pub const ALL: [EventTag; 12] = [
        EventTag::NewObject,
        EventTag::Translation,
        EventTag::Rotation,
        EventTag::StopTranslation,
        EventTag::StopRotation,
        EventTag::ContactGained,
        EventTag::ContactLost,
        EventTag::SurfaceLost,
        EventTag::AgentContactGained,
        EventTag::AgentContactLost,
        EventTag::PickUp,
        EventTag::Placing,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EventTag::NewObject => "NewObject",
            EventTag::Translation => "Translation",
            EventTag::Rotation => "Rotation",
            EventTag::StopTranslation => "StopTranslation",
            EventTag::StopRotation => "StopRotation",
            EventTag::ContactGained => "ContactGained",
            EventTag::ContactLost => "ContactLost",
            EventTag::SurfaceLost => "SurfaceLost",
            EventTag::AgentContactGained => "AgentContactGained",
            EventTag::AgentContactLost => "AgentContactLost",
            EventTag::PickUp => "PickUp",
            EventTag::Placing => "Placing",
        }
    }
}

impl std::fmt::Display for EventTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// An object started or stopped moving. Poses are snapshots.
#[derive(Debug, Clone)]
pub struct Motion {
    pub tracked_object: TrackedObject,
    pub start_pose: Pose,
    pub current_pose: Pose,
}

impl Motion {
    pub fn new(tracked_object: TrackedObject, start_pose: Pose, current_pose: Pose) -> Self {
        Self {
            tracked_object,
            start_pose,
            current_pose,
        }
    }
}

/// Contact gained between the tracked object and whatever `contact_points`
/// name as partners.
#[derive(Debug, Clone)]
pub struct Contact {
    pub contact_points: ContactPointsList,
    pub tracked_object: TrackedObject,
    pub with_object: Option<TrackedObject>,
}

impl Contact {
    pub fn new(
        contact_points: ContactPointsList,
        tracked_object: TrackedObject,
        with_object: Option<TrackedObject>,
    ) -> Self {
        Self {
            contact_points,
            tracked_object,
            with_object,
        }
    }
}

/// Contact lost: `previous_points` is the last snapshot that still had the
/// contact, `contact_points` the current one.
#[derive(Debug, Clone)]
pub struct ContactLoss {
    pub contact_points: ContactPointsList,
    pub previous_points: ContactPointsList,
    pub tracked_object: TrackedObject,
    pub with_object: Option<TrackedObject>,
}

impl ContactLoss {
    pub fn new(
        contact_points: ContactPointsList,
        previous_points: ContactPointsList,
        tracked_object: TrackedObject,
        with_object: Option<TrackedObject>,
    ) -> Self {
        Self {
            contact_points,
            previous_points,
            tracked_object,
            with_object,
        }
    }

    /// Partner objects that dropped out relative to `previous_points`.
    pub fn objects_removed(&self) -> Vec<String> {
        self.contact_points
            .objects_removed_since(&self.previous_points)
    }
}

/// An agent (optional) acting on an object.
#[derive(Debug, Clone)]
pub struct Interaction {
    pub participating_object: TrackedObject,
    pub agent: Option<TrackedObject>,
}

impl Interaction {
    pub fn new(participating_object: TrackedObject, agent: Option<TrackedObject>) -> Self {
        Self {
            participating_object,
            agent,
        }
    }
}

// ---------------------------------------------------------------------------
// Kinds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum EventKind {
    NewObject(TrackedObject),
    Translation(Motion),
    Rotation(Motion),
    StopTranslation(Motion),
    StopRotation(Motion),
    ContactGained(Contact),
    ContactLost(ContactLoss),
    /// Contact loss whose partner is the supporting surface.
    SurfaceLost(ContactLoss),
    AgentContactGained(Contact),
    AgentContactLost(ContactLoss),
    PickUp(Interaction),
    Placing(Interaction),
}

impl EventKind {
    pub fn tag(&self) -> EventTag {
        match self {
            EventKind::NewObject(_) => EventTag::NewObject,
            EventKind::Translation(_) => EventTag::Translation,
            EventKind::Rotation(_) => EventTag::Rotation,
            EventKind::StopTranslation(_) => EventTag::StopTranslation,
            EventKind::StopRotation(_) => EventTag::StopRotation,
            EventKind::ContactGained(_) => EventTag::ContactGained,
            EventKind::ContactLost(_) => EventTag::ContactLost,
            EventKind::SurfaceLost(_) => EventTag::SurfaceLost,
            EventKind::AgentContactGained(_) => EventTag::AgentContactGained,
            EventKind::AgentContactLost(_) => EventTag::AgentContactLost,
            EventKind::PickUp(_) => EventTag::PickUp,
            EventKind::Placing(_) => EventTag::Placing,
        }
    }

    fn motion(&self) -> Option<&Motion> {
        match self {
            EventKind::Translation(m)
            | EventKind::Rotation(m)
            | EventKind::StopTranslation(m)
            | EventKind::StopRotation(m) => Some(m),
            _ => None,
        }
    }

    fn interaction(&self) -> Option<&Interaction> {
        match self {
            EventKind::PickUp(i) | EventKind::Placing(i) => Some(i),
            _ => None,
        }
    }

    fn contact(&self) -> Option<ContactView<'_>> {
        match self {
            EventKind::ContactGained(c) | EventKind::AgentContactGained(c) => {
                Some(ContactView::Gained(c))
            }
            EventKind::ContactLost(c)
            | EventKind::SurfaceLost(c)
            | EventKind::AgentContactLost(c) => Some(ContactView::Lost(c)),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A logged (or about to be logged) event.
///
/// The kind and timestamp never change after construction. The render handle
/// and an interaction's end timestamp are filled in later through shared
/// references, so they sit behind locks.
#[derive(Debug)]
pub struct Event {
    timestamp: f64,
    producer_id: Option<String>,
    kind: EventKind,
    render_id: Mutex<Option<TextId>>,
    end_timestamp: Mutex<Option<f64>>,
}

impl Event {
    /// Event stamped with the current wall-clock time.
    pub fn new(kind: EventKind) -> Self {
        Self::at(kind, now_seconds())
    }

    pub fn at(kind: EventKind, timestamp: f64) -> Self {
        Self {
            timestamp,
            producer_id: None,
            kind,
            render_id: Mutex::new(None),
            end_timestamp: Mutex::new(None),
        }
    }

    pub fn new_object(object: TrackedObject) -> Self {
        Self::new(EventKind::NewObject(object))
    }

    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    pub fn tag(&self) -> EventTag {
        self.kind.tag()
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn producer_id(&self) -> Option<&str> {
        self.producer_id.as_deref()
    }

    pub(crate) fn set_producer_id(&mut self, producer_id: impl Into<String>) {
        self.producer_id = Some(producer_id.into());
    }

    pub fn render_id(&self) -> Option<TextId> {
        *self.render_id.lock()
    }

    pub(crate) fn set_render_id(&self, id: Option<TextId>) {
        *self.render_id.lock() = id;
    }

    /// The object the event is primarily about.
    pub fn tracked_object(&self) -> &TrackedObject {
        match &self.kind {
            EventKind::NewObject(o) => o,
            EventKind::Translation(m)
            | EventKind::Rotation(m)
            | EventKind::StopTranslation(m)
            | EventKind::StopRotation(m) => &m.tracked_object,
            EventKind::ContactGained(c) | EventKind::AgentContactGained(c) => &c.tracked_object,
            EventKind::ContactLost(c)
            | EventKind::SurfaceLost(c)
            | EventKind::AgentContactLost(c) => &c.tracked_object,
            EventKind::PickUp(i) | EventKind::Placing(i) => &i.participating_object,
        }
    }

    /// Names of every object the event involves, tracked object first.
    pub fn participants(&self) -> Vec<String> {
        let mut names = vec![self.tracked_object().name.clone()];
        if let Some(c) = self.as_contact() {
            if let Some(w) = c.with_object() {
                names.push(w.name.clone());
            }
        }
        if let Some(agent) = self.kind.interaction().and_then(|i| i.agent.as_ref()) {
            names.push(agent.name.clone());
        }
        names
    }

    pub fn motion(&self) -> Option<&Motion> {
        self.kind.motion()
    }

    pub fn interaction(&self) -> Option<&Interaction> {
        self.kind.interaction()
    }

    pub fn as_contact(&self) -> Option<ContactView<'_>> {
        self.kind.contact()
    }

    /// The surface a [`EventKind::SurfaceLost`] event lost contact with.
    pub fn surface(&self) -> Option<&TrackedObject> {
        match &self.kind {
            EventKind::SurfaceLost(c) => c.with_object.as_ref(),
            _ => None,
        }
    }

    /// Agent-qualified view, only for the agent contact variants.
    pub fn as_agent_contact(&self) -> Option<AgentContact<'_>> {
        match &self.kind {
            EventKind::AgentContactGained(c) => Some(AgentContact(ContactView::Gained(c))),
            EventKind::AgentContactLost(c) => Some(AgentContact(ContactView::Lost(c))),
            _ => None,
        }
    }

    // -----------------------------------------------------------------------
    // Interaction timing
    // -----------------------------------------------------------------------

    pub fn end_timestamp(&self) -> Option<f64> {
        *self.end_timestamp.lock()
    }

    /// Mark an interaction as finished now.
    pub fn record_end_timestamp(&self) -> Result<()> {
        self.record_end_timestamp_at(now_seconds())
    }

    pub fn record_end_timestamp_at(&self, end: f64) -> Result<()> {
        if self.kind.interaction().is_none() {
            return Err(Error::NotAnInteraction(self.tag().to_string()));
        }
        if end < self.timestamp {
            return Err(Error::EndBeforeStart {
                start: self.timestamp,
                end,
            });
        }
        *self.end_timestamp.lock() = Some(end);
        Ok(())
    }

    /// Seconds between start and recorded end, if the end is known.
    pub fn duration(&self) -> Option<f64> {
        self.end_timestamp().map(|end| end - self.timestamp)
    }

    // -----------------------------------------------------------------------
    // Presentation
    // -----------------------------------------------------------------------

    pub fn color(&self) -> Color {
        match &self.kind {
            EventKind::NewObject(o) => o.color,
            EventKind::Translation(_) => Color::CYAN,
            EventKind::Rotation(_) => Color::YELLOW,
            EventKind::StopTranslation(_) | EventKind::StopRotation(_) => Color::WHITE,
            EventKind::ContactGained(_) | EventKind::AgentContactGained(_) => Color::BLUE,
            EventKind::ContactLost(_)
            | EventKind::SurfaceLost(_)
            | EventKind::AgentContactLost(_) => Color::RED,
            EventKind::PickUp(_) => Color::GREEN,
            EventKind::Placing(_) => Color::MAGENTA,
        }
    }

    pub fn describe(&self) -> String {
        let tag = self.tag();
        match &self.kind {
            EventKind::NewObject(o) => format!("{tag}: {}", o.name),
            EventKind::Translation(m)
            | EventKind::Rotation(m)
            | EventKind::StopTranslation(m)
            | EventKind::StopRotation(m) => {
                format!("{tag}: {} - {:.3}", m.tracked_object.name, self.timestamp)
            }
            EventKind::PickUp(i) | EventKind::Placing(i) => {
                let mut text = format!(
                    "{tag}: Object: {}, Timestamp: {:.3}",
                    i.participating_object.name, self.timestamp
                );
                if let Some(agent) = &i.agent {
                    text.push_str(&format!(", Agent: {}", agent.name));
                }
                text
            }
            _ => {
                let with = self
                    .as_contact()
                    .and_then(|c| c.with_object().map(|w| w.name.clone()))
                    .unwrap_or_default();
                format!(
                    "{tag}: {} - {} - {:.3}",
                    self.tracked_object().name,
                    with,
                    self.timestamp
                )
            }
        }
    }

    /// Tint what the event is about in `world`:
    ///
    /// | Variant family | Tinted                                   |
    /// |----------------|------------------------------------------|
    /// | new object     | nothing                                  |
    /// | motion         | tracked object                           |
    /// | contact        | main link and every gained / lost link   |
    /// | interaction    | agent (if any) and participating object  |
    pub fn set_color(&self, world: &dyn SimWorld, color: Color) -> Result<()> {
        match &self.kind {
            EventKind::NewObject(_) => Ok(()),
            EventKind::Translation(m)
            | EventKind::Rotation(m)
            | EventKind::StopTranslation(m)
            | EventKind::StopRotation(m) => world.set_object_color(&m.tracked_object.name, color),
            EventKind::PickUp(i) | EventKind::Placing(i) => {
                if let Some(agent) = &i.agent {
                    world.set_object_color(&agent.name, color)?;
                }
                world.set_object_color(&i.participating_object.name, color)
            }
            _ => {
                let Some(view) = self.as_contact() else {
                    return Ok(());
                };
                if let Some(main) = view.main_link() {
                    world.set_link_color(main, color)?;
                }
                for link in view.links() {
                    world.set_link_color(&link, color)?;
                }
                Ok(())
            }
        }
    }

    /// Tint the event's participants, render its description as a text
    /// annotation and remember the returned handle.
    ///
    /// A participant missing from the world only costs the tint.
    pub fn annotate(&self, world: &dyn SimWorld, position: Vec3, size: f64) -> (TextId, TextAnnotation) {
        if let Err(e) = self.set_color(world, self.color()) {
            warn!("Could not color participants of {}: {}", self.tag(), e);
        }
        let annotation = TextAnnotation {
            text: self.describe(),
            position,
            color: self.color(),
            size,
        };
        let id = world.add_text(&annotation.text, position, annotation.color, size);
        self.set_render_id(Some(id));
        (id, annotation)
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.describe())
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        if self.tag() != other.tag() {
            return false;
        }
        match (&self.kind, &other.kind) {
            (EventKind::NewObject(a), EventKind::NewObject(b)) => a == b,
            (EventKind::PickUp(a), EventKind::PickUp(b))
            | (EventKind::Placing(a), EventKind::Placing(b)) => {
                a.agent == b.agent && a.participating_object == b.participating_object
            }
            _ => {
                if let (Some(a), Some(b)) = (self.motion(), other.motion()) {
                    return a.tracked_object == b.tracked_object
                        && a.start_pose == b.start_pose
                        && self.timestamp == other.timestamp;
                }
                match (self.as_contact(), other.as_contact()) {
                    (Some(a), Some(b)) => {
                        a.tracked_object() == b.tracked_object()
                            && a.with_object() == b.with_object()
                    }
                    _ => false,
                }
            }
        }
    }
}

impl Eq for Event {}

impl Hash for Event {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.tag().hash(state);
        if let Some(m) = self.motion() {
            m.tracked_object.hash(state);
            // -0.0 == 0.0, so both must hash alike.
            (self.timestamp + 0.0).to_bits().hash(state);
        } else if let Some(c) = self.as_contact() {
            c.tracked_object().hash(state);
            c.with_object().hash(state);
        } else if let Some(i) = self.interaction() {
            i.agent.hash(state);
            i.participating_object.hash(state);
        } else {
            self.tracked_object().hash(state);
        }
    }
}

// ---------------------------------------------------------------------------
// Contact views
// ---------------------------------------------------------------------------

/// Uniform read access over the gained and lost contact payloads.
#[derive(Debug, Clone, Copy)]
pub enum ContactView<'a> {
    Gained(&'a Contact),
    Lost(&'a ContactLoss),
}

impl<'a> ContactView<'a> {
    pub fn tracked_object(&self) -> &'a TrackedObject {
        match self {
            ContactView::Gained(c) => &c.tracked_object,
            ContactView::Lost(c) => &c.tracked_object,
        }
    }

    pub fn with_object(&self) -> Option<&'a TrackedObject> {
        match self {
            ContactView::Gained(c) => c.with_object.as_ref(),
            ContactView::Lost(c) => c.with_object.as_ref(),
        }
    }

    pub fn contact_points(&self) -> &'a ContactPointsList {
        match self {
            ContactView::Gained(c) => &c.contact_points,
            ContactView::Lost(c) => &c.contact_points,
        }
    }

    /// The points the event's links are read from: the current snapshot
    /// for gains, the previous one for losses.
    fn reference_points(&self) -> &'a ContactPointsList {
        match self {
            ContactView::Gained(c) => &c.contact_points,
            ContactView::Lost(c) => &c.previous_points,
        }
    }

    /// Partner links gained, or lost since the previous snapshot.
    pub fn links(&self) -> Vec<Link> {
        match self {
            ContactView::Gained(c) => c.contact_points.links_in_contact(),
            ContactView::Lost(c) => c.contact_points.links_removed_since(&c.previous_points),
        }
    }

    pub fn objects(&self) -> Vec<String> {
        match self {
            ContactView::Gained(c) => c.contact_points.objects_with_points(),
            ContactView::Lost(c) => c.objects_removed(),
        }
    }

    pub fn link_names(&self) -> Vec<String> {
        self.links().into_iter().map(|l| l.name).collect()
    }

    pub fn object_names(&self) -> Vec<String> {
        self.objects()
    }

    /// The tracked object's link of the first reference point.
    ///
    /// Detectors can race with a contact disappearing, so an empty point set
    /// is logged and reported as `None` instead of failing.
    pub fn main_link(&self) -> Option<&'a Link> {
        match self.reference_points().first() {
            Some(p) => Some(&p.link_a),
            None => {
                warn!(
                    "No contact points found for {} in contact event",
                    self.tracked_object().name
                );
                None
            }
        }
    }
}

/// Agent-qualified contact view: the tracked object is the agent.
#[derive(Debug, Clone, Copy)]
pub struct AgentContact<'a>(ContactView<'a>);

impl<'a> AgentContact<'a> {
    pub fn agent(&self) -> &'a TrackedObject {
        self.0.tracked_object()
    }

    pub fn agent_link(&self) -> Option<&'a Link> {
        self.0.main_link()
    }

    /// Link of the partner object: the link belonging to `with_object` when
    /// one is named, otherwise the partner link of the first reference point.
    pub fn object_link(&self) -> Option<Link> {
        match self.0.with_object() {
            Some(with) => self.0.links().into_iter().find(|l| l.object == with.name),
            None => self.0.reference_points().first().map(|p| p.link_b.clone()),
        }
    }

    pub fn contact(&self) -> ContactView<'a> {
        self.0
    }
}
