use std::sync::Arc;

use futures_util::{FutureExt, StreamExt};
use log::debug;

use crate::{
    media::MediaSurface,
    observer::{ElementId, IntersectionHost, ObserverConfig, TrackerError},
    playback::{Command, PlaybackController, PlaybackError, PlaybackState},
    tracker::VisibilityTracker,
};

/// A media surface detached from its session, together with the outcome of
/// stopping it if it was still playing.
#[derive(Debug)]
pub struct Released<M> {
    pub media: M,
    pub outcome: Option<Result<Command, PlaybackError>>,
}

pub struct AutoplaySession<M> {
    tracker: VisibilityTracker,
    controller: PlaybackController<M>,
}

impl<M: MediaSurface> AutoplaySession<M> {
    pub fn mount(
        host: Arc<dyn IntersectionHost>,
        config: ObserverConfig,
        element: ElementId,
        media: M,
    ) -> Result<Self, TrackerError> {
        let mut tracker = VisibilityTracker::new(host, config)?;
        tracker.bind(Some(element))?;
        Ok(Self {
            tracker,
            controller: PlaybackController::new(element, media),
        })
    }

    pub fn element(&self) -> ElementId {
        self.controller.element()
    }

    pub fn state(&self) -> PlaybackState {
        self.controller.state()
    }

    pub fn is_visible(&self) -> bool {
        self.tracker.is_visible()
    }

    /// Applies every notification that is already queued, without waiting.
    pub fn pump(&mut self) -> Vec<Result<Command, PlaybackError>> {
        let mut outcomes = Vec::new();
        while let Some(Some(outcome)) = self.next().now_or_never() {
            outcomes.extend(outcome.transpose());
        }
        outcomes
    }

    pub async fn next(&mut self) -> Option<Result<Option<Command>, PlaybackError>> {
        let visible = self.tracker.next().await?;
        Some(self.controller.on_visibility(visible))
    }

    pub fn toggle(&mut self) -> Result<Command, PlaybackError> {
        self.controller.toggle()
    }

    pub fn reconfigure(&mut self, config: ObserverConfig) -> Result<bool, TrackerError> {
        self.tracker.reconfigure(config)
    }

    /// Moves the session to another element and stops the previous one. If
    /// the new element cannot be bound, the session is left as it was.
    pub fn rebind(&mut self, element: ElementId, media: M) -> Result<Released<M>, TrackerError> {
        self.tracker.bind(Some(element))?;
        let mut previous = std::mem::replace(
            &mut self.controller,
            PlaybackController::new(element, media),
        );
        debug!("Moved autoplay session from {} to {element}", previous.element());
        let outcome = previous.release().transpose();
        Ok(Released {
            media: previous.into_media(),
            outcome,
        })
    }

    pub fn unmount(mut self) -> Released<M> {
        self.tracker.unbind();
        let outcome = self.controller.release().transpose();
        debug!("Unmounted autoplay session of {}", self.controller.element());
        Released {
            media: self.controller.into_media(),
            outcome,
        }
    }
}
