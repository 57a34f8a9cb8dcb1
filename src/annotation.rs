//! Annotation renderer – a single consumer thread that keeps the `K` most
//! recent annotated events stacked as text in the world.
//!
//! ```text
//!  z = initial_offset            ┌ oldest ┐
//!  z = initial_offset - step     │  ...   │
//!  ...                           └ newest ┘
//! ```
//!
//! When the stack is full the oldest label is destroyed and every survivor
//! is re-created one `step` higher (world text is immutable once created).

use crate::error::{Error, Result};
use crate::event::SharedEvent;
use crate::queue::TrackedQueue;
use crate::types::{TextId, Vec3};
use crate::world::{SimWorld, TextAnnotation};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationConfig {
    /// Height of the first (top) label.
    pub initial_offset: f64,
    /// Vertical distance between stacked labels.
    pub step: f64,
    /// Maximum number of simultaneously visible labels.
    pub capacity: usize,
    pub anchor_x: f64,
    pub anchor_y: f64,
    pub text_size: f64,
    /// Sleep between queue polls when idle.
    pub idle_poll_ms: u64,
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            initial_offset: 2.0,
            step: 0.2,
            capacity: 5,
            anchor_x: 1.5,
            anchor_y: 1.0,
            text_size: crate::event::ANNOTATION_SIZE,
            idle_poll_ms: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// Stack
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct VisibleAnnotation {
    pub id: TextId,
    pub annotation: TextAnnotation,
    pub event: SharedEvent,
}

/// The visible label set. Owned by exactly one thread.
pub struct AnnotationStack {
    config: AnnotationConfig,
    visible: VecDeque<VisibleAnnotation>,
}

impl AnnotationStack {
    pub fn new(config: AnnotationConfig) -> Self {
        Self {
            visible: VecDeque::with_capacity(config.capacity.max(1)),
            config,
        }
    }

    fn capacity(&self) -> usize {
        self.config.capacity.max(1)
    }

    /// Height the next label would take given the current stack size.
    pub fn next_offset(&self) -> f64 {
        self.config.initial_offset - self.config.step * self.visible.len() as f64
    }

    pub fn len(&self) -> usize {
        self.visible.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visible.is_empty()
    }

    /// Oldest first.
    pub fn visible(&self) -> impl Iterator<Item = &VisibleAnnotation> {
        self.visible.iter()
    }

    /// Render `event` at the bottom of the stack, recycling the oldest label
    /// when the stack is full.
    pub fn push(&mut self, world: &dyn SimWorld, event: &SharedEvent) -> TextId {
        // Offset is taken before eviction: a full stack always places the new
        // label at `initial_offset - step * capacity`.
        let z = self.next_offset();
        if self.visible.len() >= self.capacity() {
            self.evict_oldest(world);
        }

        let position = Vec3::new(self.config.anchor_x, self.config.anchor_y, z);
        let (id, annotation) = event.annotate(world, position, self.config.text_size);
        self.visible.push_back(VisibleAnnotation {
            id,
            annotation,
            event: event.clone(),
        });
        id
    }

    fn evict_oldest(&mut self, world: &dyn SimWorld) {
        if let Some(oldest) = self.visible.pop_front() {
            debug!("Evicting annotation {} ({})", oldest.id, oldest.annotation.text);
            world.remove_text(oldest.id);
            oldest.event.set_render_id(None);
        }

        let step = self.config.step;
        for label in self.visible.iter_mut() {
            world.remove_text(label.id);
            label.annotation.position.z += step;
            let a = &label.annotation;
            label.id = world.add_text(&a.text, a.position, a.color, a.size);
            label.event.set_render_id(Some(label.id));
        }
    }

    /// Remove every visible label from the world.
    pub fn clear(&mut self, world: &dyn SimWorld) {
        for label in self.visible.drain(..) {
            world.remove_text(label.id);
            label.event.set_render_id(None);
        }
    }
}

// ---------------------------------------------------------------------------
// Renderer thread
// ---------------------------------------------------------------------------

/// Handle of the running annotation thread.
pub struct AnnotationRenderer {
    kill: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl AnnotationRenderer {
    /// Start consuming `queue`. Each event is acknowledged after its label
    /// has been placed.
    pub fn spawn(
        world: Arc<dyn SimWorld>,
        queue: TrackedQueue<SharedEvent>,
        config: AnnotationConfig,
    ) -> Result<Self> {
        let kill = Arc::new(AtomicBool::new(false));
        let thread_kill = kill.clone();
        let handle = thread::Builder::new()
            .name("event-annotation".into())
            .spawn(move || run(world, queue, thread_kill, config))
            .map_err(|source| Error::ThreadSpawn {
                name: "annotation",
                source,
            })?;

        Ok(Self {
            kill,
            handle: Some(handle),
        })
    }

    /// Ask the thread to exit after its current iteration.
    pub fn stop(&self) {
        self.kill.store(true, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop and wait for the thread. Later calls are no-ops.
    pub fn join(&mut self) -> Result<()> {
        self.stop();
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| Error::ThreadPanicked("annotation")),
            None => Ok(()),
        }
    }
}

impl Drop for AnnotationRenderer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    world: Arc<dyn SimWorld>,
    queue: TrackedQueue<SharedEvent>,
    kill: Arc<AtomicBool>,
    config: AnnotationConfig,
) {
    let idle = Duration::from_millis(config.idle_poll_ms);
    let mut stack = AnnotationStack::new(config);

    while !kill.load(Ordering::SeqCst) {
        let Some(event) = queue.pop_timeout(idle) else {
            continue;
        };
        stack.push(world.as_ref(), &event);
        queue.task_done();
    }

    info!("Annotation thread stopping, clearing {} labels", stack.len());
    stack.clear(world.as_ref());
}
