use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use futures_util::{ready, Stream};
use log::{debug, trace};
use tokio::sync::mpsc;

use crate::{
    id_type,
    observer::{
        ElementId, IntersectionCallback, IntersectionEntry, IntersectionHost,
        IntersectionObserver, ObserverConfig, TrackerError,
    },
};

id_type!(BindingId);

#[derive(Debug, Clone, Copy)]
struct Notification {
    binding: BindingId,
    target: ElementId,
    visible: bool,
}

/// Dropping it deregisters the target and disconnects the observer.
pub struct Subscription {
    binding: BindingId,
    target: ElementId,
    observer: Box<dyn IntersectionObserver>,
}

impl Subscription {
    pub fn binding(&self) -> BindingId {
        self.binding
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.observer.unobserve(self.target);
        self.observer.disconnect();
        debug!(
            "Released binding {} for element {}",
            self.binding, self.target
        );
    }
}

pub struct VisibilityTracker {
    host: Arc<dyn IntersectionHost>,
    config: ObserverConfig,
    target: Option<ElementId>,
    // present exactly while `target` is set
    subscription: Option<Subscription>,
    visible: bool,
    notify_tx: mpsc::UnboundedSender<Notification>,
    notify_rx: mpsc::UnboundedReceiver<Notification>,
}

impl VisibilityTracker {
    pub fn new(
        host: Arc<dyn IntersectionHost>,
        config: ObserverConfig,
    ) -> Result<Self, TrackerError> {
        if !host.is_supported() {
            return Err(TrackerError::Unsupported);
        }
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        Ok(Self {
            host,
            config,
            target: None,
            subscription: None,
            visible: false,
            notify_tx,
            notify_rx,
        })
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn binding(&self) -> Option<BindingId> {
        self.subscription.as_ref().map(Subscription::binding)
    }

    /// Binding the element that is already bound does nothing. If the host
    /// refuses the new registration, the previous binding stays in place.
    pub fn bind(&mut self, target: Option<ElementId>) -> Result<(), TrackerError> {
        if target == self.target {
            return Ok(());
        }
        let subscription = match target {
            Some(target) => Some(self.subscribe(target, &self.config)?),
            None => None,
        };
        self.target = target;
        self.replace(subscription);
        Ok(())
    }

    pub fn unbind(&mut self) {
        self.target = None;
        self.replace(None);
    }

    /// Returns `false` without touching the subscription if the new config
    /// equals the current one.
    pub fn reconfigure(&mut self, config: ObserverConfig) -> Result<bool, TrackerError> {
        if config == self.config {
            return Ok(false);
        }
        let subscription = match self.target {
            Some(target) => Some(self.subscribe(target, &config)?),
            None => None,
        };
        self.config = config;
        self.replace(subscription);
        Ok(true)
    }

    fn subscribe(
        &self,
        target: ElementId,
        config: &ObserverConfig,
    ) -> Result<Subscription, TrackerError> {
        let binding = BindingId::new();
        let notify_tx = self.notify_tx.clone();
        let callback: IntersectionCallback = Arc::new(move |entries: &[IntersectionEntry]| {
            for entry in entries.iter().filter(|entry| entry.target == target) {
                trace!(
                    "Element {target} at {:?} covers {:.2} of its area within {:?} (t={})",
                    entry.bounding_rect,
                    entry.intersection_ratio,
                    entry.root_bounds,
                    entry.time
                );
                // the tracker may already be gone during teardown
                let _ = notify_tx.send(Notification {
                    binding,
                    target,
                    visible: entry.is_intersecting,
                });
            }
        });

        let mut observer = self.host.create_observer(config.clone(), callback)?;
        observer.observe(target);
        debug!(
            "Bound element {target} as binding {binding} at thresholds {:?}",
            config.thresholds.as_slice()
        );
        Ok(Subscription {
            binding,
            target,
            observer,
        })
    }

    fn replace(&mut self, subscription: Option<Subscription>) {
        // the previous subscription is released here
        self.subscription = subscription;
        self.visible = false;
    }

    fn accept(&mut self, notification: Notification) -> Option<bool> {
        if self.binding() != Some(notification.binding) {
            debug!(
                "Discarding stale notification for element {} from binding {}",
                notification.target, notification.binding
            );
            return None;
        }
        self.visible = notification.visible;
        Some(notification.visible)
    }
}

impl Stream for VisibilityTracker {
    type Item = bool;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<bool>> {
        let this = self.get_mut();
        loop {
            let Some(notification) = ready!(this.notify_rx.poll_recv(cx)) else {
                return Poll::Ready(None);
            };
            if let Some(visible) = this.accept(notification) {
                return Poll::Ready(Some(visible));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use futures_util::{FutureExt, StreamExt};
    use tokio::time::timeout;

    use crate::{geometry::Rect, observer::UnsupportedHost, viewport::Viewport};

    use super::*;

    // refuses the n-th observer it is asked for
    struct FlakyHost {
        viewport: Viewport,
        calls: AtomicUsize,
        refuse: usize,
    }

    impl IntersectionHost for FlakyHost {
        fn create_observer(
            &self,
            config: ObserverConfig,
            callback: IntersectionCallback,
        ) -> Result<Box<dyn IntersectionObserver>, TrackerError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) + 1 == self.refuse {
                return Err(TrackerError::Unsupported);
            }
            self.viewport.create_observer(config, callback)
        }
    }

    fn setup() -> (Viewport, ElementId, VisibilityTracker) {
        let viewport = Viewport::new(400.0, 800.0);
        let video = ElementId::new();
        viewport.place(video, Rect::new(0.0, 0.0, 400.0, 800.0));
        let tracker =
            VisibilityTracker::new(Arc::new(viewport.clone()), ObserverConfig::default())
                .unwrap();
        (viewport, video, tracker)
    }

    fn flaky_setup(refuse: usize) -> (Viewport, ElementId, VisibilityTracker) {
        let (viewport, video, _) = setup();
        let host = FlakyHost {
            viewport: viewport.clone(),
            calls: AtomicUsize::new(0),
            refuse,
        };
        let tracker = VisibilityTracker::new(Arc::new(host), ObserverConfig::default()).unwrap();
        (viewport, video, tracker)
    }

    fn drain(tracker: &mut VisibilityTracker) -> Vec<bool> {
        std::iter::from_fn(|| tracker.next().now_or_never().flatten()).collect()
    }

    #[test]
    fn should_fail_on_unsupported_host() {
        let result =
            VisibilityTracker::new(Arc::new(UnsupportedHost), ObserverConfig::default());

        assert!(matches!(result, Err(TrackerError::Unsupported)));
    }

    #[test]
    fn should_stay_silent_without_target() {
        let (viewport, _, mut tracker) = setup();

        tracker.bind(None).unwrap();
        viewport.scroll_to(0.0, 400.0);

        assert_eq!(drain(&mut tracker), Vec::<bool>::new());
        assert_eq!(viewport.observer_count(), 0);
    }

    #[test]
    fn should_report_visibility_changes() {
        // given
        let (viewport, video, mut tracker) = setup();

        // when
        tracker.bind(Some(video)).unwrap();
        viewport.scroll_to(0.0, 1000.0);
        viewport.scroll_to(0.0, 0.0);

        // then
        assert_eq!(drain(&mut tracker), vec![true, false, true]);
        assert!(tracker.is_visible());
    }

    #[test]
    fn should_not_resubscribe_for_same_target_or_equal_config() {
        // given
        let (viewport, video, mut tracker) = setup();
        tracker.bind(Some(video)).unwrap();
        let binding = tracker.binding();

        // when
        tracker.bind(Some(video)).unwrap();
        let reconfigured = tracker.reconfigure(ObserverConfig::default()).unwrap();

        // then
        assert!(!reconfigured);
        assert_eq!(tracker.binding(), binding);
        assert_eq!(viewport.observer_count(), 1);
        assert_eq!(drain(&mut tracker), vec![true]);
    }

    #[test]
    fn should_replace_registration_on_reconfigure() {
        // given
        let (viewport, video, mut tracker) = setup();
        tracker.bind(Some(video)).unwrap();
        viewport.scroll_to(0.0, 600.0);
        let old_binding = tracker.binding();

        // when
        let config = ObserverConfig::default().with_thresholds([0.3]).unwrap();
        let reconfigured = tracker.reconfigure(config).unwrap();

        // then
        assert!(reconfigured);
        assert_ne!(tracker.binding(), old_binding);
        assert_eq!(viewport.observer_count(), 1);
        // the notifications queued under the old binding are dropped
        assert_eq!(drain(&mut tracker), vec![false]);
    }

    #[test]
    fn should_keep_listening_when_reconfigure_is_refused() {
        // given
        let (viewport, video, mut tracker) = flaky_setup(2);
        tracker.bind(Some(video)).unwrap();
        let binding = tracker.binding();
        let config = ObserverConfig::default().with_thresholds([0.5]).unwrap();

        // when
        let refused = tracker.reconfigure(config.clone());
        viewport.scroll_to(0.0, 1000.0);

        // then
        assert_eq!(refused, Err(TrackerError::Unsupported));
        assert_eq!(tracker.binding(), binding);
        assert_eq!(viewport.observer_count(), 1);
        assert_eq!(drain(&mut tracker), vec![true, false]);

        // when
        let retried = tracker.reconfigure(config);
        viewport.scroll_to(0.0, 0.0);

        // then
        assert_eq!(retried, Ok(true));
        assert_ne!(tracker.binding(), binding);
        assert_eq!(viewport.observer_count(), 1);
        assert_eq!(drain(&mut tracker), vec![false, true]);
    }

    #[test]
    fn should_retry_bind_after_refusal() {
        // given
        let (viewport, video, mut tracker) = flaky_setup(1);

        // when
        let refused = tracker.bind(Some(video));
        let retried = tracker.bind(Some(video));
        viewport.scroll_to(0.0, 1000.0);

        // then
        assert_eq!(refused, Err(TrackerError::Unsupported));
        assert_eq!(retried, Ok(()));
        assert!(tracker.binding().is_some());
        assert_eq!(drain(&mut tracker), vec![true, false]);
    }

    #[test]
    fn should_discard_notifications_of_previous_element() {
        // given
        let (viewport, first, mut tracker) = setup();
        let second = ElementId::new();
        viewport.place(second, Rect::new(0.0, 1000.0, 400.0, 800.0));
        tracker.bind(Some(first)).unwrap();
        viewport.scroll_to(0.0, 1000.0);

        // when
        tracker.bind(Some(second)).unwrap();
        viewport.scroll_to(0.0, 0.0);
        viewport.remove(first);

        // then
        assert_eq!(drain(&mut tracker), vec![true, false]);
        assert_eq!(viewport.observer_count(), 1);
    }

    #[test]
    fn should_release_registration_on_unbind_and_drop() {
        let (viewport, video, mut tracker) = setup();
        tracker.bind(Some(video)).unwrap();

        tracker.unbind();
        assert_eq!(viewport.observer_count(), 0);
        assert!(!tracker.is_visible());
        assert_eq!(tracker.binding(), None);

        tracker.bind(Some(video)).unwrap();
        drop(tracker);
        assert_eq!(viewport.observer_count(), 0);
    }

    #[tokio::test]
    async fn should_stream_visibility() {
        // given
        let (viewport, video, mut tracker) = setup();
        tracker.bind(Some(video)).unwrap();

        // when
        let scroller = tokio::spawn(async move {
            viewport.scroll_to(0.0, 900.0);
        });
        let first = tracker.next().await;
        let second = tracker.next().await;
        scroller.await.unwrap();

        // then
        assert_eq!(first, Some(true));
        assert_eq!(second, Some(false));
        assert!(timeout(Duration::from_millis(20), tracker.next())
            .await
            .is_err());
    }
}
