//! Presence for Media Player Classic's `variables.html`
//!
//! MPC-HC and MPC-BE expose their playback state as a flat HTML page of
//! `<p id="name">value</p>` pairs. Only a handful of them matter here.

use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::{Duration, SystemTime};
use tracing::{debug, info};

use super::{Activity, PresenceUpdater};
use crate::config::PresenceConfig;
use crate::media::MediaStatus;
use crate::rpc::RpcSession;

/// Discord truncates longer fields
const MAX_FIELD_LEN: usize = 128;

/// Allowed slack between the expected and reported position while playing
const SEEK_TOLERANCE: Duration = Duration::from_secs(2);

const LARGE_IMAGE_FALLBACK: &str = "default";
const LARGE_IMAGE_TEXT: &str = "Media Player Classic";

fn field_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?s)<p id="([^"]+)">(.*?)</p>"#).expect("valid variables.html pattern")
    })
}

fn bracket_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\s*[\[(][^\])]*[\])]\s*").expect("valid bracket pattern"))
}

/// MPC's `state` variable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    Idle,
    Stopped,
    Paused,
    Playing,
}

impl PlayState {
    fn from_variable(value: &str) -> Option<Self> {
        match value.trim() {
            "-1" => Some(Self::Idle),
            "0" => Some(Self::Stopped),
            "1" => Some(Self::Paused),
            "2" => Some(Self::Playing),
            _ => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Idle => "Idling",
            Self::Stopped => "Stopped",
            Self::Paused => "Paused",
            Self::Playing => "Playing",
        }
    }

    fn small_image(self) -> &'static str {
        match self {
            Self::Idle | Self::Stopped => "stop_small",
            Self::Paused => "pause_small",
            Self::Playing => "play_small",
        }
    }
}

/// Playback state extracted from one status page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Playback {
    pub file: String,
    pub state: PlayState,
    pub position: Duration,
    pub duration: Duration,
    pub position_text: String,
    pub duration_text: String,
}

impl Playback {
    /// Parse a `variables.html` body. Returns `None` when it is not one.
    pub fn parse(body: &str, options: &PresenceConfig) -> Option<Self> {
        let vars: HashMap<&str, String> = field_pattern()
            .captures_iter(body)
            .filter_map(|c| Some((c.get(1)?.as_str(), unescape(c.get(2)?.as_str()))))
            .collect();

        let state = PlayState::from_variable(vars.get("state")?)?;

        let raw_name = vars
            .get("file")
            .filter(|f| !f.is_empty())
            .cloned()
            .or_else(|| {
                vars.get("filepath")
                    .and_then(|p| p.rsplit(['\\', '/']).next())
                    .map(str::to_string)
            })
            .unwrap_or_default();

        let millis = |key: &str| {
            vars.get(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or_default()
        };
        let text = |key: &str| vars.get(key).map(|v| trim_hours(v)).unwrap_or_default();

        Some(Self {
            file: clean_file_name(&raw_name, options),
            state,
            position: millis("position"),
            duration: millis("duration"),
            position_text: text("positionstring"),
            duration_text: text("durationstring"),
        })
    }

    fn to_activity(&self, snapshot: Option<&str>, options: &PresenceConfig) -> Activity {
        let now = SystemTime::now();
        let mut activity = Activity {
            details: Some(self.file.clone()).filter(|f| !f.is_empty()),
            state: None,
            large_image: snapshot.unwrap_or(LARGE_IMAGE_FALLBACK).to_string(),
            large_text: Some(LARGE_IMAGE_TEXT.to_string()),
            small_image: Some(self.state.small_image().to_string()),
            small_text: Some(self.state.label().to_string()),
            start: None,
            end: None,
        };

        match self.state {
            PlayState::Idle => {
                activity.details = None;
                activity.state = Some(self.state.label().to_string());
            }
            PlayState::Stopped => {
                activity.state = Some(format!("{} total", self.duration_text));
            }
            PlayState::Paused => {
                activity.state = Some(format!("{} / {}", self.position_text, self.duration_text));
            }
            PlayState::Playing => {
                activity.state = Some(format!("{} total", self.duration_text));
                if options.show_remaining_time {
                    activity.end = Some(now + self.duration.saturating_sub(self.position));
                } else {
                    activity.start = now.checked_sub(self.position);
                }
            }
        }

        activity
    }
}

/// Decode the handful of entities MPC emits
fn unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#039;", "'")
        .replace("&amp;", "&")
}

/// `00:12:34` reads better as `12:34`
fn trim_hours(value: &str) -> String {
    let value = value.trim();
    value.strip_prefix("00:").unwrap_or(value).to_string()
}

fn clean_file_name(name: &str, options: &PresenceConfig) -> String {
    let mut name = name.trim().to_string();

    if options.ignore_file_extension {
        if let Some((stem, ext)) = name.rsplit_once('.') {
            if !stem.is_empty() && !ext.contains(' ') {
                name = stem.to_string();
            }
        }
    }

    if options.ignore_brackets {
        name = bracket_pattern().replace_all(&name, " ").trim().to_string();
    }

    if options.replace_underscores {
        name = name.replace('_', " ");
    }

    truncate(&name, MAX_FIELD_LEN)
}

fn truncate(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        return value.to_string();
    }
    let mut out: String = value.chars().take(max - 3).collect();
    out.push_str("...");
    out
}

/// Presence updater for MPC-HC/MPC-BE
pub struct MpcPresence {
    options: PresenceConfig,
    /// Expected position advance between two consecutive polls
    poll_interval: Duration,
    last: Option<Playback>,
    /// Large image of the last activity sent
    last_snapshot: Option<String>,
}

impl MpcPresence {
    pub fn new(options: PresenceConfig, poll_interval: Duration) -> Self {
        Self {
            options,
            poll_interval,
            last: None,
            last_snapshot: None,
        }
    }

    fn changed(&self, now: &Playback) -> bool {
        let Some(prev) = &self.last else {
            return true;
        };

        if prev.state != now.state || prev.file != now.file {
            return true;
        }

        match now.state {
            PlayState::Playing => {
                let expected = prev.position + self.poll_interval;
                let drift = if now.position > expected {
                    now.position - expected
                } else {
                    expected - now.position
                };
                drift > SEEK_TOLERANCE
            }
            PlayState::Paused => prev.position != now.position,
            PlayState::Idle | PlayState::Stopped => false,
        }
    }
}

impl PresenceUpdater for MpcPresence {
    fn update(
        &mut self,
        status: &MediaStatus,
        snapshot: Option<&str>,
        force: bool,
        rpc: &dyn RpcSession,
    ) -> bool {
        let Some(playback) = Playback::parse(&status.body, &self.options) else {
            debug!("Status page has no playback state, skipping presence update");
            return false;
        };

        let new_snapshot = snapshot != self.last_snapshot.as_deref();
        if force || new_snapshot || self.changed(&playback) {
            rpc.set_activity(playback.to_activity(snapshot, &self.options));
            info!("Presence update sent: {} {}", playback.state.label(), playback.file);
            self.last_snapshot = snapshot.map(str::to_string);
        }

        self.last = Some(playback);
        true
    }
}
