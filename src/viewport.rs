use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};

use log::{debug, trace};
use parking_lot::Mutex;

use crate::{
    geometry::Rect,
    id_type,
    observer::{
        ElementId, IntersectionCallback, IntersectionEntry, IntersectionHost,
        IntersectionObserver, ObserverConfig, TrackerError,
    },
    utils::timestamp,
};

id_type!(ObserverId);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TargetState {
    threshold_index: usize,
    is_intersecting: bool,
}

struct Registration {
    config: ObserverConfig,
    callback: IntersectionCallback,
    // `None` until the initial notification was delivered
    targets: HashMap<ElementId, Option<TargetState>>,
}

type Delivery = (IntersectionCallback, Vec<IntersectionEntry>);

struct Layout {
    viewport: Rect,
    elements: HashMap<ElementId, Rect>,
    observers: HashMap<ObserverId, Registration>,
}

impl Layout {
    fn root_bounds(&self, config: &ObserverConfig) -> Option<Rect> {
        let root = match config.root {
            Some(root) => *self.elements.get(&root)?,
            None => self.viewport,
        };
        Some(root.expand(&config.root_margin))
    }

    fn compute_entry(&self, config: &ObserverConfig, target: ElementId) -> IntersectionEntry {
        let bounding_rect = self.elements.get(&target).copied();
        let root_bounds = self.root_bounds(config);
        let intersection_rect = bounding_rect
            .zip(root_bounds)
            .and_then(|(bounds, root)| bounds.intersection(&root));

        let touching = intersection_rect.is_some();
        let intersection_ratio = match (bounding_rect, intersection_rect) {
            (Some(bounds), Some(intersection)) if bounds.area() > 0.0 => {
                intersection.area() / bounds.area()
            }
            (Some(_), Some(_)) => 1.0,
            _ => 0.0,
        };
        let threshold_index = config.thresholds.index_of(intersection_ratio, touching);

        IntersectionEntry {
            target,
            is_intersecting: threshold_index > 0,
            intersection_ratio,
            bounding_rect,
            intersection_rect,
            root_bounds,
            time: timestamp(),
        }
    }

    fn collect_changes(&mut self) -> Vec<Delivery> {
        let mut deliveries = Vec::new();
        let observer_ids = self.observers.keys().copied().collect::<Vec<_>>();
        for observer_id in observer_ids {
            let Some(registration) = self.observers.get(&observer_id) else {
                continue;
            };
            let mut entries = Vec::new();
            let mut updates = Vec::new();
            for (target, last) in &registration.targets {
                let entry = self.compute_entry(&registration.config, *target);
                let state = TargetState {
                    threshold_index: registration
                        .config
                        .thresholds
                        .index_of(entry.intersection_ratio, entry.intersection_rect.is_some()),
                    is_intersecting: entry.is_intersecting,
                };
                if *last != Some(state) {
                    updates.push((*target, state));
                    entries.push(entry);
                }
            }
            if entries.is_empty() {
                continue;
            }
            let Some(registration) = self.observers.get_mut(&observer_id) else {
                continue;
            };
            for (target, state) in updates {
                registration.targets.insert(target, Some(state));
            }
            trace!(
                "Observer {observer_id} has {} pending intersection entries",
                entries.len()
            );
            deliveries.push((Arc::clone(&registration.callback), entries));
        }
        deliveries
    }
}

// callbacks run after the lock is released and may call back into the viewport
fn flush(layout: &Mutex<Layout>) {
    let deliveries = layout.lock().collect_changes();
    for (callback, entries) in deliveries {
        callback(&entries);
    }
}

/// Element rects are in document coordinates; the viewport's origin is its
/// scroll offset.
#[derive(Clone)]
pub struct Viewport {
    layout: Arc<Mutex<Layout>>,
}

impl Viewport {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            layout: Arc::new(Mutex::new(Layout {
                viewport: Rect::new(0.0, 0.0, width, height),
                elements: HashMap::new(),
                observers: HashMap::new(),
            })),
        }
    }

    pub fn element_rect(&self, id: ElementId) -> Option<Rect> {
        self.layout.lock().elements.get(&id).copied()
    }

    pub fn observer_count(&self) -> usize {
        self.layout.lock().observers.len()
    }

    pub fn place(&self, id: ElementId, rect: Rect) {
        self.layout.lock().elements.insert(id, rect);
        flush(&self.layout);
    }

    pub fn remove(&self, id: ElementId) {
        self.layout.lock().elements.remove(&id);
        flush(&self.layout);
    }

    pub fn scroll_to(&self, x: f64, y: f64) {
        {
            let mut layout = self.layout.lock();
            layout.viewport.x = x;
            layout.viewport.y = y;
        }
        flush(&self.layout);
    }

    pub fn scroll_by(&self, dx: f64, dy: f64) {
        {
            let mut layout = self.layout.lock();
            layout.viewport = layout.viewport.translate(dx, dy);
        }
        flush(&self.layout);
    }

    pub fn resize(&self, width: f64, height: f64) {
        {
            let mut layout = self.layout.lock();
            layout.viewport.width = width;
            layout.viewport.height = height;
        }
        flush(&self.layout);
    }
}

impl IntersectionHost for Viewport {
    fn create_observer(
        &self,
        config: ObserverConfig,
        callback: IntersectionCallback,
    ) -> Result<Box<dyn IntersectionObserver>, TrackerError> {
        let id = ObserverId::new();
        self.layout.lock().observers.insert(
            id,
            Registration {
                config,
                callback,
                targets: HashMap::new(),
            },
        );
        debug!("Created intersection observer {id}");
        Ok(Box::new(ViewportObserver {
            id,
            layout: Arc::downgrade(&self.layout),
        }))
    }
}

pub struct ViewportObserver {
    id: ObserverId,
    layout: Weak<Mutex<Layout>>,
}

impl IntersectionObserver for ViewportObserver {
    fn observe(&mut self, target: ElementId) {
        let Some(layout) = self.layout.upgrade() else {
            return;
        };
        {
            let mut guard = layout.lock();
            let Some(registration) = guard.observers.get_mut(&self.id) else {
                return;
            };
            registration.targets.entry(target).or_insert(None);
        }
        flush(&layout);
    }

    fn unobserve(&mut self, target: ElementId) {
        let Some(layout) = self.layout.upgrade() else {
            return;
        };
        let mut layout = layout.lock();
        if let Some(registration) = layout.observers.get_mut(&self.id) {
            registration.targets.remove(&target);
        }
    }

    fn disconnect(&mut self) {
        let Some(layout) = self.layout.upgrade() else {
            return;
        };
        if layout.lock().observers.remove(&self.id).is_some() {
            debug!("Disconnected intersection observer {}", self.id);
        }
    }
}

impl Drop for ViewportObserver {
    fn drop(&mut self) {
        self.disconnect();
    }
}
