use std::fmt::Display;

use log::{debug, info, warn};
use thiserror::Error;

use crate::{
    media::{MediaError, MediaSurface, Trigger},
    observer::ElementId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Paused,
    Playing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
}

impl Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Start => write!(f, "start"),
            Command::Stop => write!(f, "stop"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Failed to {command} media element {element}")]
pub struct PlaybackError {
    pub element: ElementId,
    pub command: Command,
    #[source]
    pub source: MediaError,
}

#[derive(Debug)]
pub struct PlaybackController<M> {
    element: ElementId,
    media: M,
    state: PlaybackState,
    last_visibility: Option<bool>,
}

impl<M: MediaSurface> PlaybackController<M> {
    pub fn new(element: ElementId, media: M) -> Self {
        let state = if media.is_playing() {
            PlaybackState::Playing
        } else {
            PlaybackState::Paused
        };
        Self {
            element,
            media,
            state,
            last_visibility: None,
        }
    }

    pub fn element(&self) -> ElementId {
        self.element
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    #[cfg(test)]
    pub fn media(&self) -> &M {
        &self.media
    }

    pub fn into_media(self) -> M {
        self.media
    }

    /// Repeated values and values that already agree with the current state
    /// issue no command.
    pub fn on_visibility(&mut self, visible: bool) -> Result<Option<Command>, PlaybackError> {
        if self.last_visibility == Some(visible) {
            return Ok(None);
        }
        self.last_visibility = Some(visible);

        let command = match (visible, self.state) {
            (true, PlaybackState::Paused) => Command::Start,
            (false, PlaybackState::Playing) => Command::Stop,
            _ => {
                debug!(
                    "Element {} is already {:?} while visible={visible}",
                    self.element, self.state
                );
                return Ok(None);
            }
        };
        self.issue(command, Trigger::Visibility).map(Some)
    }

    pub fn toggle(&mut self) -> Result<Command, PlaybackError> {
        let command = match self.state {
            PlaybackState::Paused => Command::Start,
            PlaybackState::Playing => Command::Stop,
        };
        self.issue(command, Trigger::User)
    }

    /// Stops the element if it is playing, before it is handed off.
    pub fn release(&mut self) -> Result<Option<Command>, PlaybackError> {
        self.last_visibility = None;
        match self.state {
            PlaybackState::Playing => self.issue(Command::Stop, Trigger::Release).map(Some),
            PlaybackState::Paused => Ok(None),
        }
    }

    fn issue(&mut self, command: Command, trigger: Trigger) -> Result<Command, PlaybackError> {
        let result = match command {
            Command::Start => self.media.start(trigger),
            Command::Stop => self.media.stop(),
        };
        if let Err(source) = result {
            warn!(
                "Media element {} rejected {command} ({trigger:?}): {source}",
                self.element
            );
            return Err(PlaybackError {
                element: self.element,
                command,
                source,
            });
        }

        self.state = match command {
            Command::Start => PlaybackState::Playing,
            Command::Stop => PlaybackState::Paused,
        };
        info!("Issued {command} to media element {} ({trigger:?})", self.element);
        Ok(command)
    }
}
