use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;

use crate::{
    geometry::{MarginParseError, Rect, RootMargin},
    id_type,
};

id_type!(ElementId);

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrackerError {
    #[error("the host platform has no intersection-watching facility")]
    Unsupported,

    #[error("threshold {0} is outside of [0, 1]")]
    InvalidThreshold(f64),

    #[error("at least one threshold is required")]
    EmptyThresholds,

    #[error("invalid root margin: {0}")]
    InvalidRootMargin(#[from] MarginParseError),
}

// always non-empty, sorted and free of duplicates
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "ThresholdValue")]
pub struct Thresholds(Vec<f64>);

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ThresholdValue {
    Single(f64),
    Many(Vec<f64>),
}

impl TryFrom<ThresholdValue> for Thresholds {
    type Error = TrackerError;

    fn try_from(value: ThresholdValue) -> Result<Self, Self::Error> {
        match value {
            ThresholdValue::Single(threshold) => Thresholds::single(threshold),
            ThresholdValue::Many(thresholds) => Thresholds::new(thresholds),
        }
    }
}

impl Thresholds {
    pub fn new(values: impl IntoIterator<Item = f64>) -> Result<Self, TrackerError> {
        let mut values = values.into_iter().collect::<Vec<_>>();
        if let Some(invalid) = values.iter().find(|t| !(0.0..=1.0).contains(*t)) {
            return Err(TrackerError::InvalidThreshold(*invalid));
        }
        if values.is_empty() {
            return Err(TrackerError::EmptyThresholds);
        }
        values.sort_by(f64::total_cmp);
        values.dedup();
        Ok(Self(values))
    }

    pub fn single(threshold: f64) -> Result<Self, TrackerError> {
        Self::new([threshold])
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    /// Counts the thresholds reached by `ratio`. A threshold of zero only
    /// counts when the target touches the root at all.
    pub fn index_of(&self, ratio: f64, touching: bool) -> usize {
        if !touching {
            return 0;
        }
        self.0.iter().filter(|t| ratio >= **t).count()
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self(vec![0.0])
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct ObserverConfig {
    // set by name from the scenario, `None` means the viewport
    #[serde(skip)]
    pub root: Option<ElementId>,

    pub root_margin: RootMargin,

    #[serde(rename = "threshold")]
    pub thresholds: Thresholds,
}

impl ObserverConfig {
    pub fn with_root(self, root: ElementId) -> Self {
        Self {
            root: Some(root),
            ..self
        }
    }

    pub fn with_root_margin(self, root_margin: &str) -> Result<Self, TrackerError> {
        Ok(Self {
            root_margin: root_margin.parse()?,
            ..self
        })
    }

    pub fn with_thresholds(
        self,
        thresholds: impl IntoIterator<Item = f64>,
    ) -> Result<Self, TrackerError> {
        Ok(Self {
            thresholds: Thresholds::new(thresholds)?,
            ..self
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntersectionEntry {
    pub target: ElementId,
    pub is_intersecting: bool,
    pub intersection_ratio: f64,
    pub bounding_rect: Option<Rect>,
    pub intersection_rect: Option<Rect>,
    pub root_bounds: Option<Rect>,
    pub time: u64,
}

pub type IntersectionCallback = Arc<dyn Fn(&[IntersectionEntry]) + Send + Sync>;

pub trait IntersectionHost: Send + Sync {
    fn is_supported(&self) -> bool {
        true
    }

    fn create_observer(
        &self,
        config: ObserverConfig,
        callback: IntersectionCallback,
    ) -> Result<Box<dyn IntersectionObserver>, TrackerError>;
}

pub trait IntersectionObserver: Send {
    fn observe(&mut self, target: ElementId);

    fn unobserve(&mut self, target: ElementId);

    fn disconnect(&mut self);
}

#[cfg(test)]
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedHost;

#[cfg(test)]
impl IntersectionHost for UnsupportedHost {
    fn is_supported(&self) -> bool {
        false
    }

    fn create_observer(
        &self,
        _config: ObserverConfig,
        _callback: IntersectionCallback,
    ) -> Result<Box<dyn IntersectionObserver>, TrackerError> {
        Err(TrackerError::Unsupported)
    }
}
