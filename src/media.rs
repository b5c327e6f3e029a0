use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Visibility,
    User,
    // the controller hands the element off
    Release,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    #[error("the media element has no playable source")]
    MissingSource,

    #[error("autoplay was blocked by the {0:?} policy")]
    AutoplayBlocked(AutoplayPolicy),
}

pub trait MediaSurface {
    fn start(&mut self, trigger: Trigger) -> Result<(), MediaError>;

    fn stop(&mut self) -> Result<(), MediaError>;

    fn is_playing(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoplayPolicy {
    #[default]
    Allow,
    MutedOnly,
    UserGestureRequired,
}

impl AutoplayPolicy {
    fn allows(self, muted: bool, activated: bool) -> bool {
        match self {
            AutoplayPolicy::Allow => true,
            AutoplayPolicy::MutedOnly => muted || activated,
            AutoplayPolicy::UserGestureRequired => activated,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VideoElement {
    source: Option<String>,
    muted: bool,
    policy: AutoplayPolicy,
    playing: bool,
    // sticky user activation, set by the first user-triggered start
    activated: bool,
}

impl VideoElement {
    pub fn new(source: Option<String>) -> Self {
        Self {
            source,
            muted: false,
            policy: AutoplayPolicy::default(),
            playing: false,
            activated: false,
        }
    }

    pub fn muted(self, muted: bool) -> Self {
        Self { muted, ..self }
    }

    pub fn with_policy(self, policy: AutoplayPolicy) -> Self {
        Self { policy, ..self }
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }
}

impl MediaSurface for VideoElement {
    fn start(&mut self, trigger: Trigger) -> Result<(), MediaError> {
        if self.source.as_deref().map_or(true, str::is_empty) {
            return Err(MediaError::MissingSource);
        }
        if trigger == Trigger::User {
            self.activated = true;
        } else if !self.policy.allows(self.muted, self.activated) {
            return Err(MediaError::AutoplayBlocked(self.policy));
        }
        self.playing = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), MediaError> {
        self.playing = false;
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.playing
    }
}
