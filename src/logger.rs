//! Event logger – the thread-safe sink every detector thread logs into.
//!
//! ```text
//! detector threads ──► log_event ──┬─► global timeline
//!                                  ├─► per-producer timelines
//!                                  ├─► mirror queue ──► poll_next
//!                                  └─► annotation queue ──► AnnotationRenderer
//!                                      (allow-listed tags only)
//! ```
//!
//! All four appends happen inside one critical section, so both queues see
//! events in exactly the order of the global timeline.

use crate::annotation::{AnnotationConfig, AnnotationRenderer};
use crate::error::{Error, Result};
use crate::event::{Event, EventTag, SharedEvent};
use crate::queue::TrackedQueue;
use crate::types::LoggerStats;
use crate::world::SimWorld;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Forward events to the annotation renderer.
    pub annotate: bool,
    /// Tags to annotate; `None` annotates everything.
    pub annotate_kinds: Option<Vec<EventTag>>,
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Timelines {
    global: Vec<SharedEvent>,
    per_producer: BTreeMap<String, Vec<SharedEvent>>,
}

struct AnnotationPipeline {
    queue: TrackedQueue<SharedEvent>,
    allow: Option<HashSet<EventTag>>,
    renderer: Mutex<AnnotationRenderer>,
    /// Cleared (under the timelines lock) once the renderer is shutting down.
    forwarding: AtomicBool,
}

impl AnnotationPipeline {
    fn accepts(&self, tag: EventTag) -> bool {
        self.forwarding.load(Ordering::SeqCst)
            && self.allow.as_ref().map_or(true, |allow| allow.contains(&tag))
    }
}

pub struct EventLogger {
    timelines: Mutex<Timelines>,
    events: TrackedQueue<SharedEvent>,
    annotations: Option<AnnotationPipeline>,
}

impl EventLogger {
    /// Logger without an annotation pipeline.
    pub fn new() -> Self {
        Self {
            timelines: Mutex::new(Timelines::default()),
            events: TrackedQueue::new(),
            annotations: None,
        }
    }

    /// Logger that also renders allow-listed events into `world`, starting
    /// its own annotation thread.
    pub fn with_annotations(
        world: Arc<dyn SimWorld>,
        allow: Option<HashSet<EventTag>>,
        config: AnnotationConfig,
    ) -> Result<Self> {
        let queue = TrackedQueue::new();
        let renderer = AnnotationRenderer::spawn(world, queue.clone(), config)?;
        info!(
            "Event annotation enabled ({})",
            match &allow {
                Some(tags) => format!("{} tags", tags.len()),
                None => "all tags".into(),
            }
        );
        Ok(Self {
            annotations: Some(AnnotationPipeline {
                queue,
                allow,
                renderer: Mutex::new(renderer),
                forwarding: AtomicBool::new(true),
            }),
            ..Self::new()
        })
    }

    pub fn from_config(
        config: &LoggerConfig,
        annotation: &AnnotationConfig,
        world: Option<Arc<dyn SimWorld>>,
    ) -> Result<Self> {
        if !config.annotate {
            return Ok(Self::new());
        }
        let Some(world) = world else {
            warn!("Annotation requested without a world; annotating nothing");
            return Ok(Self::new());
        };
        let allow = config
            .annotate_kinds
            .as_ref()
            .map(|tags| tags.iter().copied().collect());
        Self::with_annotations(world, allow, annotation.clone())
    }

    pub fn annotation_enabled(&self) -> bool {
        self.annotations.is_some()
    }

    // -----------------------------------------------------------------------
    // Logging
    // -----------------------------------------------------------------------

    /// Record `event` as raised by `producer_id`.
    ///
    /// Never deduplicates. Returns the shared handle so the producer can keep
    /// updating interaction timing on the logged instance.
    pub fn log_event(&self, mut event: Event, producer_id: impl Into<String>) -> SharedEvent {
        let producer_id = producer_id.into();
        event.set_producer_id(producer_id.clone());
        let event = Arc::new(event);

        let mut timelines = self.timelines.lock();
        timelines.global.push(event.clone());
        timelines
            .per_producer
            .entry(producer_id)
            .or_default()
            .push(event.clone());

        self.events.push(event.clone());
        if let Some(pipeline) = &self.annotations {
            if pipeline.accepts(event.tag()) {
                pipeline.queue.push(event.clone());
            }
        }
        drop(timelines);

        debug!("Logged {}", event);
        event
    }

    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    /// Copy of the global timeline, in arrival order.
    pub fn events(&self) -> Vec<SharedEvent> {
        self.timelines.lock().global.clone()
    }

    /// Copy of every producer's timeline.
    pub fn events_by_producer(&self) -> BTreeMap<String, Vec<SharedEvent>> {
        self.timelines.lock().per_producer.clone()
    }

    pub fn producer_ids(&self) -> Vec<String> {
        self.timelines.lock().per_producer.keys().cloned().collect()
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// First producer (in id order) whose id starts with `prefix` and
    /// mentions `object_name`.
    pub fn find_producer_by_prefix_and_object(
        &self,
        prefix: &str,
        object_name: &str,
    ) -> Option<String> {
        self.timelines
            .lock()
            .per_producer
            .keys()
            .find(|id| id.starts_with(prefix) && id.contains(object_name))
            .cloned()
    }

    pub fn latest_event_of(&self, producer_id: &str) -> Option<SharedEvent> {
        self.timelines
            .lock()
            .per_producer
            .get(producer_id)
            .and_then(|timeline| timeline.last().cloned())
    }

    /// Event of `producer_id` closest in time to `timestamp`; on a tie the
    /// earliest stored one wins.
    ///
    /// Linear scan: per-producer timelines stay small in practice.
    pub fn nearest_event_of(&self, producer_id: &str, timestamp: f64) -> Option<SharedEvent> {
        let timelines = self.timelines.lock();
        let timeline = timelines.per_producer.get(producer_id)?;

        let mut best: Option<(&SharedEvent, f64)> = None;
        for event in timeline {
            let distance = (event.timestamp() - timestamp).abs();
            match best {
                Some((_, d)) if d <= distance => {}
                _ => best = Some((event, distance)),
            }
        }
        best.map(|(event, _)| event.clone())
    }

    pub fn latest_event_for_object(&self, prefix: &str, object_name: &str) -> Option<SharedEvent> {
        let producer = self.find_producer_by_prefix_and_object(prefix, object_name)?;
        self.latest_event_of(&producer)
    }

    pub fn nearest_event_for_object(
        &self,
        prefix: &str,
        object_name: &str,
        timestamp: f64,
    ) -> Option<SharedEvent> {
        let producer = self.find_producer_by_prefix_and_object(prefix, object_name)?;
        self.nearest_event_of(&producer, timestamp)
    }

    // -----------------------------------------------------------------------
    // Mirror queue
    // -----------------------------------------------------------------------

    /// Next event of the mirror queue, without blocking. Timelines are not
    /// affected.
    pub fn poll_next(&self) -> Option<SharedEvent> {
        let event = self.events.try_pop()?;
        self.events.task_done();
        Some(event)
    }

    // -----------------------------------------------------------------------
    // Shutdown
    // -----------------------------------------------------------------------

    /// Wait for the mirror queue to be drained and the annotation queue to be
    /// rendered, then stop the annotation thread.
    ///
    /// Events logged after the annotation thread stopped are still recorded
    /// and mirrored, but no longer annotated. Later calls only wait on the
    /// mirror queue. Blocks forever if nobody drains the mirror queue.
    pub fn join(&self) -> Result<()> {
        debug!("Waiting for {} pending events", self.events.pending());
        self.events.join();

        if let Some(pipeline) = &self.annotations {
            debug!(
                "Waiting for {} pending annotations",
                pipeline.queue.pending()
            );
            pipeline.queue.join();
            {
                let _timelines = self.timelines.lock();
                pipeline.forwarding.store(false, Ordering::SeqCst);
            }
            // Anything forwarded before the flag flipped is still rendered.
            pipeline.queue.join();
            pipeline.renderer.lock().join()?;
        }
        info!("Event logger joined");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reporting
    // -----------------------------------------------------------------------

    pub fn stats(&self) -> LoggerStats {
        let timelines = self.timelines.lock();
        LoggerStats {
            total_events: timelines.global.len(),
            producers: timelines.per_producer.len(),
            pending_events: self.events.pending(),
            pending_annotations: self
                .annotations
                .as_ref()
                .map_or(0, |p| p.queue.pending()),
        }
    }

    pub fn print_events(&self) {
        info!("Events:");
        info!("{}", self);
    }
}

impl Default for EventLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lines: Vec<String> = self.events().iter().map(|e| e.describe()).collect();
        f.write_str(&lines.join("\n"))
    }
}

// ---------------------------------------------------------------------------
// Current logger
// ---------------------------------------------------------------------------

static CURRENT: RwLock<Option<Arc<EventLogger>>> = parking_lot::const_rwlock(None);

/// Install the process-wide logger. Fails if one is already installed.
pub fn init_current(logger: Arc<EventLogger>) -> Result<()> {
    let mut current = CURRENT.write();
    if current.is_some() {
        return Err(Error::CurrentLoggerAlreadySet);
    }
    *current = Some(logger);
    Ok(())
}

pub fn current() -> Option<Arc<EventLogger>> {
    CURRENT.read().clone()
}

/// Uninstall the process-wide logger, returning it.
pub fn reset_current() -> Option<Arc<EventLogger>> {
    CURRENT.write().take()
}
