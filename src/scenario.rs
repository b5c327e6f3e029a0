use std::{collections::HashMap, fmt::Display, fs::File, io::Read, path::Path, sync::Arc};

use anyhow::{anyhow, Context};
use log::{debug, info, warn};
use serde::Deserialize;

use crate::{
    config::{Config, PlaybackConfig},
    geometry::{Rect, RootMargin},
    media::VideoElement,
    observer::{ElementId, ObserverConfig, Thresholds},
    playback::{Command, PlaybackError, PlaybackState},
    session::{AutoplaySession, Released},
    viewport::Viewport,
};

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ViewportSpec {
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    pub rect: Rect,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VideoSpec {
    pub name: String,
    pub source: Option<String>,
    pub muted: Option<bool>,
    pub rect: Rect,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    Scroll {
        #[serde(default)]
        x: f64,
        y: f64,
    },
    ScrollBy {
        #[serde(default)]
        dx: f64,
        #[serde(default)]
        dy: f64,
    },
    Resize {
        width: f64,
        height: f64,
    },
    Toggle {
        video: String,
    },
    Place {
        element: String,
        rect: Rect,
    },
    Remove {
        video: String,
    },
    Unmount {
        video: String,
    },
    // re-creates the video's element in place
    Rebind {
        video: String,
    },
    Reconfigure {
        root: Option<String>,
        root_margin: Option<RootMargin>,
        threshold: Option<Thresholds>,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Scenario {
    pub viewport: ViewportSpec,

    // a container or video whose bounds replace the viewport as the root
    pub root: Option<String>,

    #[serde(default)]
    pub containers: Vec<ContainerSpec>,

    #[serde(default)]
    pub videos: Vec<VideoSpec>,

    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn read(file: &mut impl Read) -> anyhow::Result<Self> {
        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .context("Failed to read scenario file")?;

        let scenario = toml::from_str(&contents).context("Failed to parse scenario file")?;
        Ok(scenario)
    }

    pub fn read_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let mut file = File::open(path).context("Failed to open scenario file")?;
        Self::read(&mut file)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Issued(Command),
    Failed(Command, String),
}

/// Step `None` stands for the initial layout before any step ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub step: Option<usize>,
    pub video: String,
    pub outcome: Outcome,
}

impl Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.step {
            Some(step) => write!(f, "step {step}: ")?,
            None => write!(f, "mount: ")?,
        }
        match &self.outcome {
            Outcome::Issued(command) => write!(f, "{} <- {command}", self.video),
            Outcome::Failed(command, reason) => {
                write!(f, "{} <- {command} FAILED ({reason})", self.video)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoStatus {
    pub name: String,
    pub state: PlaybackState,
    pub visible: bool,
}

impl Display for VideoStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let visibility = if self.visible { "visible" } else { "hidden" };
        write!(f, "final: {} is {:?} ({visibility})", self.name, self.state)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub events: Vec<Event>,
    pub videos: Vec<VideoStatus>,
}

struct Mounted {
    name: String,
    spec: VideoSpec,
    session: AutoplaySession<VideoElement>,
}

pub struct ScenarioRunner {
    viewport: Viewport,
    playback: PlaybackConfig,
    observer_config: ObserverConfig,
    elements: HashMap<String, ElementId>,
    mounted: Vec<Mounted>,
    events: Vec<Event>,
}

impl ScenarioRunner {
    pub fn new(scenario: &Scenario, config: &Config) -> anyhow::Result<Self> {
        let mut runner = Self {
            viewport: Viewport::new(scenario.viewport.width, scenario.viewport.height),
            playback: config.playback,
            observer_config: config.observer.clone(),
            elements: HashMap::new(),
            mounted: Vec::with_capacity(scenario.videos.len()),
            events: Vec::new(),
        };

        let named = scenario
            .containers
            .iter()
            .map(|container| (&container.name, container.rect))
            .chain(scenario.videos.iter().map(|video| (&video.name, video.rect)));
        for (name, rect) in named {
            if runner.elements.contains_key(name) {
                return Err(anyhow!("Duplicate element name '{name}'"));
            }
            let element = ElementId::new();
            runner.viewport.place(element, rect);
            runner.elements.insert(name.clone(), element);
        }

        if let Some(root) = &scenario.root {
            let root = runner.element(root)?;
            runner.observer_config = runner.observer_config.clone().with_root(root);
        }

        for video in &scenario.videos {
            let element = runner.element(&video.name)?;
            let session = AutoplaySession::mount(
                Arc::new(runner.viewport.clone()),
                runner.observer_config.clone(),
                element,
                runner.media(video),
            )
            .with_context(|| format!("Failed to mount video '{}'", video.name))?;

            runner.mounted.push(Mounted {
                name: video.name.clone(),
                spec: video.clone(),
                session,
            });
        }

        runner.pump_all(None);
        Ok(runner)
    }

    pub fn run(mut self, steps: &[Step]) -> anyhow::Result<Report> {
        for (index, step) in steps.iter().enumerate() {
            self.apply(index, step)
                .with_context(|| format!("Failed to run step {index} ({step:?})"))?;
            self.pump_all(Some(index));
            debug!(
                "{} intersection observers registered after step {index}",
                self.viewport.observer_count()
            );
        }

        let videos = self
            .mounted
            .iter()
            .map(|mounted| VideoStatus {
                name: mounted.name.clone(),
                state: mounted.session.state(),
                visible: mounted.session.is_visible(),
            })
            .collect();
        Ok(Report {
            events: self.events,
            videos,
        })
    }

    fn element(&self, name: &str) -> anyhow::Result<ElementId> {
        self.elements
            .get(name)
            .copied()
            .ok_or_else(|| anyhow!("Unknown element '{name}'"))
    }

    fn find(&mut self, name: &str) -> anyhow::Result<&mut Mounted> {
        self.mounted
            .iter_mut()
            .find(|m| m.name == name)
            .ok_or_else(|| anyhow!("Unknown video '{name}'"))
    }

    fn media(&self, video: &VideoSpec) -> VideoElement {
        let media = VideoElement::new(video.source.clone())
            .muted(video.muted.unwrap_or(self.playback.muted))
            .with_policy(self.playback.autoplay_policy);
        info!(
            "Loaded video '{}' from {}",
            video.name,
            media.source().unwrap_or("<no source>")
        );
        media
    }

    fn apply(&mut self, index: usize, step: &Step) -> anyhow::Result<()> {
        match step {
            Step::Scroll { x, y } => self.viewport.scroll_to(*x, *y),
            Step::ScrollBy { dx, dy } => self.viewport.scroll_by(*dx, *dy),
            Step::Resize { width, height } => self.viewport.resize(*width, *height),
            Step::Toggle { video } => {
                let result = self.find(video)?.session.toggle();
                self.record(Some(index), video.clone(), result);
            }
            Step::Place { element, rect } => {
                let element = self.element(element)?;
                self.viewport.place(element, *rect);
            }
            Step::Remove { video } => {
                let element = self.find(video)?.session.element();
                self.viewport.remove(element);
                self.elements.remove(video);
                // deliver the final notification before tearing the session down
                self.pump_all(Some(index));
                self.unmount(index, video)?;
            }
            Step::Unmount { video } => self.unmount(index, video)?,
            Step::Rebind { video } => self.rebind(index, video)?,
            Step::Reconfigure {
                root,
                root_margin,
                threshold,
            } => {
                let mut config = self.observer_config.clone();
                if let Some(root) = root {
                    config = config.with_root(self.element(root)?);
                }
                if let Some(root_margin) = root_margin {
                    config.root_margin = *root_margin;
                }
                if let Some(threshold) = threshold {
                    config.thresholds = threshold.clone();
                }
                for mounted in &mut self.mounted {
                    mounted.session.reconfigure(config.clone())?;
                }
                self.observer_config = config;
            }
        }
        Ok(())
    }

    fn unmount(&mut self, index: usize, video: &str) -> anyhow::Result<()> {
        let position = self
            .mounted
            .iter()
            .position(|m| m.name == video)
            .ok_or_else(|| anyhow!("Unknown video '{video}'"))?;
        let mounted = self.mounted.remove(position);
        let released = mounted.session.unmount();
        self.record_released(index, video, released);
        info!("Unmounted video '{video}'");
        Ok(())
    }

    fn rebind(&mut self, index: usize, video: &str) -> anyhow::Result<()> {
        let mounted = self.find(video)?;
        let previous = mounted.session.element();
        let spec = mounted.spec.clone();
        let rect = self
            .viewport
            .element_rect(previous)
            .ok_or_else(|| anyhow!("Video '{video}' is not laid out"))?;

        let element = ElementId::new();
        self.viewport.place(element, rect);
        let media = self.media(&spec);
        let released = match self.find(video)?.session.rebind(element, media) {
            Ok(released) => released,
            Err(err) => {
                self.viewport.remove(element);
                return Err(err).with_context(|| format!("Failed to rebind video '{video}'"));
            }
        };
        self.viewport.remove(previous);
        self.elements.insert(video.to_string(), element);
        self.record_released(index, video, released);
        info!("Rebound video '{video}' to element {element}");
        Ok(())
    }

    fn pump_all(&mut self, step: Option<usize>) {
        let mut outcomes = Vec::new();
        for mounted in &mut self.mounted {
            for result in mounted.session.pump() {
                outcomes.push((mounted.name.clone(), result));
            }
        }
        for (video, result) in outcomes {
            self.record(step, video, result);
        }
    }

    fn record_released(&mut self, index: usize, video: &str, released: Released<VideoElement>) {
        if let Some(result) = released.outcome {
            self.record(Some(index), video.to_string(), result);
        }
    }

    fn record(
        &mut self,
        step: Option<usize>,
        video: String,
        result: Result<Command, PlaybackError>,
    ) {
        let outcome = match result {
            Ok(command) => Outcome::Issued(command),
            Err(err) => {
                warn!("{err}: {}", err.source);
                Outcome::Failed(err.command, err.source.to_string())
            }
        };
        let event = Event {
            step,
            video,
            outcome,
        };
        info!("{event}");
        self.events.push(event);
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use crate::media::AutoplayPolicy;

    use super::*;

    const FEED: &str = include_str!("../scenarios/feed.toml");
    const FRAME: &str = include_str!("../scenarios/frame.toml");

    fn issued(step: Option<usize>, video: &str, command: Command) -> Event {
        Event {
            step,
            video: video.to_string(),
            outcome: Outcome::Issued(command),
        }
    }

    fn report(scenario: &str, config: &Config) -> Report {
        let scenario = Scenario::read(&mut Cursor::new(scenario)).unwrap();
        ScenarioRunner::new(&scenario, config)
            .unwrap()
            .run(&scenario.steps)
            .unwrap()
    }

    fn run(scenario: &str, config: &Config) -> Vec<Event> {
        report(scenario, config).events
    }

    #[test]
    fn should_parse_scenario_steps() {
        // when
        let scenario = Scenario::read(&mut Cursor::new(FEED)).unwrap();

        // then
        assert_eq!(
            scenario.viewport,
            ViewportSpec {
                width: 400.0,
                height: 800.0
            }
        );
        assert_eq!(scenario.videos.len(), 3);
        assert_eq!(scenario.steps[0], Step::Scroll { x: 0.0, y: 900.0 });
        assert!(scenario.steps.contains(&Step::Reconfigure {
            root: None,
            root_margin: None,
            threshold: Some(Thresholds::single(0.9).unwrap()),
        }));
    }

    #[test]
    fn should_play_the_video_in_view_while_scrolling() {
        // given
        let scenario = r#"
[viewport]
width = 400
height = 800

[[videos]]
name = "first"
source = "first.mp4"
rect = { y = 0, width = 400, height = 800 }

[[videos]]
name = "second"
source = "second.mp4"
rect = { y = 900, width = 400, height = 800 }

[[steps]]
action = "scroll"
y = 900
"#;

        // when
        let events = run(scenario, &Config::default());

        // then
        assert_eq!(
            events,
            vec![
                issued(None, "first", Command::Start),
                issued(Some(0), "first", Command::Stop),
                issued(Some(0), "second", Command::Start),
            ]
        );
    }

    #[test]
    fn should_report_failed_starts() {
        let scenario = r#"
[viewport]
width = 400
height = 800

[[videos]]
name = "broken"
rect = { width = 400, height = 800 }

[[steps]]
action = "toggle"
video = "broken"
"#;

        let events = run(scenario, &Config::default());

        assert_eq!(events.len(), 2);
        assert!(events
            .iter()
            .all(|e| matches!(&e.outcome, Outcome::Failed(Command::Start, _))));
    }

    #[test]
    fn should_stop_and_unmount_removed_video() {
        // given
        let scenario = r#"
[viewport]
width = 400
height = 800

[[videos]]
name = "only"
source = "only.mp4"
rect = { width = 400, height = 800 }

[[steps]]
action = "remove"
video = "only"

[[steps]]
action = "toggle"
video = "only"
"#;
        let scenario = Scenario::read(&mut Cursor::new(scenario)).unwrap();
        let runner = ScenarioRunner::new(&scenario, &Config::default()).unwrap();

        // when
        let result = runner.run(&scenario.steps);

        // then
        let err = result.unwrap_err();
        assert!(format!("{err:?}").contains("Unknown video 'only'"));
    }

    #[test]
    fn should_run_feed_scenario() {
        // given
        let config = Config {
            playback: PlaybackConfig {
                muted: true,
                autoplay_policy: AutoplayPolicy::MutedOnly,
            },
            ..Config::default()
        };

        // when
        let events = run(FEED, &config);

        // then
        assert_eq!(
            events,
            vec![
                issued(None, "intro", Command::Start),
                issued(Some(0), "intro", Command::Stop),
                issued(Some(0), "dance", Command::Start),
                issued(Some(1), "dance", Command::Stop),
                issued(Some(2), "dance", Command::Start),
                issued(Some(4), "dance", Command::Stop),
                issued(Some(5), "outro", Command::Start),
                issued(Some(6), "outro", Command::Stop),
            ]
        );
    }

    #[test]
    fn should_reject_duplicate_video_names() {
        let scenario = r#"
[viewport]
width = 400
height = 800

[[videos]]
name = "same"
rect = { width = 400, height = 800 }

[[videos]]
name = "same"
rect = { width = 400, height = 800 }
"#;
        let scenario = Scenario::read(&mut Cursor::new(scenario)).unwrap();

        assert!(ScenarioRunner::new(&scenario, &Config::default()).is_err());
    }

    #[test]
    fn should_observe_against_root_container() {
        // when
        let report = report(FRAME, &Config::default());

        // then
        assert_eq!(
            report.events,
            vec![
                issued(None, "inline", Command::Start),
                issued(Some(0), "below", Command::Start),
                issued(Some(1), "inline", Command::Stop),
                issued(Some(2), "inline", Command::Start),
                issued(Some(4), "below", Command::Stop),
                issued(Some(5), "inline", Command::Stop),
            ]
        );
        assert_eq!(
            report.videos,
            vec![VideoStatus {
                name: "inline".to_string(),
                state: PlaybackState::Paused,
                visible: false,
            }]
        );
    }

    #[test]
    fn should_stop_playing_video_when_rebinding() {
        // given
        let scenario = r#"
[viewport]
width = 400
height = 800

[[videos]]
name = "clip"
source = "clip.mp4"
rect = { width = 400, height = 800 }

[[steps]]
action = "rebind"
video = "clip"
"#;

        // when
        let report = report(scenario, &Config::default());

        // then
        assert_eq!(
            report.events,
            vec![
                issued(None, "clip", Command::Start),
                issued(Some(0), "clip", Command::Stop),
                issued(Some(0), "clip", Command::Start),
            ]
        );
        assert_eq!(report.videos[0].state, PlaybackState::Playing);
        assert!(report.videos[0].visible);
    }

    #[test]
    fn should_follow_relative_scrolling() {
        let scenario = r#"
[viewport]
width = 400
height = 800

[[videos]]
name = "second"
source = "second.mp4"
rect = { y = 900, width = 400, height = 800 }

[[steps]]
action = "scroll_by"
dy = 450

[[steps]]
action = "scroll_by"
dy = -450
"#;

        let events = run(scenario, &Config::default());

        assert_eq!(
            events,
            vec![
                issued(Some(0), "second", Command::Start),
                issued(Some(1), "second", Command::Stop),
            ]
        );
    }

    #[test]
    fn should_reject_unknown_root() {
        let scenario = r#"
root = "missing"

[viewport]
width = 400
height = 800
"#;
        let scenario = Scenario::read(&mut Cursor::new(scenario)).unwrap();

        let result = ScenarioRunner::new(&scenario, &Config::default());

        assert!(result.is_err());
    }
}
