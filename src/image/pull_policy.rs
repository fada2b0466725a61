//! Image pull policies and the `image.json` pull-timestamp store
//!
//! `interval` policies remember when each image ID was last pulled and only
//! pull again once the interval has elapsed. Stale timestamps are pruned
//! every `pruning_interval` (default `7d`).

use crate::error::{PackError, PackResult};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

const DEFAULT_PRUNING_INTERVAL: &str = "7d";

/// When to pull builder, run, lifecycle and cache images
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PullPolicy {
    #[default]
    Always,
    Never,
    IfNotPresent,
    Interval(Duration),
}

impl PullPolicy {
    /// Whether a present local image still needs pulling, given when it was last pulled
    pub fn needs_pull(&self, present: bool, last_pull: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::IfNotPresent => !present,
            Self::Interval(interval) => match (present, last_pull) {
                (true, Some(last)) => now - last >= *interval,
                _ => true,
            },
        }
    }
}

impl FromStr for PullPolicy {
    type Err = PackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "always" => Ok(Self::Always),
            "never" => Ok(Self::Never),
            "if-not-present" => Ok(Self::IfNotPresent),
            "hourly" => Ok(Self::Interval(Duration::hours(1))),
            "daily" => Ok(Self::Interval(Duration::days(1))),
            "weekly" => Ok(Self::Interval(Duration::weeks(1))),
            other => match other.strip_prefix("interval=") {
                Some(spec) => Ok(Self::Interval(parse_interval(spec)?)),
                None => Err(PackError::invalid(format!(
                    "invalid pull policy '{}': expected always, never, if-not-present, hourly, daily, weekly or interval=<d h m>",
                    other
                ))),
            },
        }
    }
}

impl fmt::Display for PullPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => write!(f, "always"),
            Self::Never => write!(f, "never"),
            Self::IfNotPresent => write!(f, "if-not-present"),
            Self::Interval(d) if *d == Duration::hours(1) => write!(f, "hourly"),
            Self::Interval(d) if *d == Duration::days(1) => write!(f, "daily"),
            Self::Interval(d) if *d == Duration::weeks(1) => write!(f, "weekly"),
            Self::Interval(d) => write!(f, "interval={}", format_interval(*d)),
        }
    }
}

/// Parse `[<n>d][<n>h][<n>m]`; at least one component is required
pub fn parse_interval(spec: &str) -> PackResult<Duration> {
    let invalid = || PackError::invalid(format!("invalid interval '{}': expected e.g. 1d2h30m", spec));

    let mut total = Duration::zero();
    let mut digits = String::new();
    let mut last_unit = 0;
    for c in spec.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let (rank, unit) = match c {
            'd' => (1, Duration::days(1)),
            'h' => (2, Duration::hours(1)),
            'm' => (3, Duration::minutes(1)),
            _ => return Err(invalid()),
        };
        if digits.is_empty() || rank <= last_unit {
            return Err(invalid());
        }
        let n: i64 = digits.parse().map_err(|_| invalid())?;
        total += unit * i32::try_from(n).map_err(|_| invalid())?;
        digits.clear();
        last_unit = rank;
    }

    if last_unit == 0 || !digits.is_empty() {
        return Err(invalid());
    }
    Ok(total)
}

fn format_interval(d: Duration) -> String {
    let days = d.num_days();
    let hours = d.num_hours() % 24;
    let minutes = d.num_minutes() % 60;
    let mut out = String::new();
    if days > 0 {
        out.push_str(&format!("{}d", days));
    }
    if hours > 0 {
        out.push_str(&format!("{}h", hours));
    }
    if minutes > 0 || out.is_empty() {
        out.push_str(&format!("{}m", minutes));
    }
    out
}

/// Contents of `image.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PullState {
    #[serde(default)]
    pub interval: IntervalState,
    #[serde(default)]
    pub image: ImageTimes,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntervalState {
    #[serde(default)]
    pub pulling_interval: String,
    #[serde(default = "default_pruning_interval")]
    pub pruning_interval: String,
    #[serde(default)]
    pub last_prune: Option<DateTime<Utc>>,
}

impl Default for IntervalState {
    fn default() -> Self {
        Self {
            pulling_interval: String::new(),
            pruning_interval: default_pruning_interval(),
            last_prune: None,
        }
    }
}

fn default_pruning_interval() -> String {
    DEFAULT_PRUNING_INTERVAL.to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageTimes {
    #[serde(rename = "ImageIDtoTIME", default)]
    pub image_id_to_time: BTreeMap<String, DateTime<Utc>>,
}

impl PullState {
    /// Load from disk; a missing file is an empty state
    pub fn load(path: &Path) -> PackResult<Self> {
        match fs::read(path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(Self::default()),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| PackError::ConfigInvalid {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(PackError::io(format!("reading {}", path.display()), e)),
        }
    }

    pub fn save(&self, path: &Path) -> PackResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| PackError::ConfigDirCreate {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let contents = serde_json::to_vec_pretty(self)?;
        fs::write(path, contents).map_err(|e| PackError::io(format!("writing {}", path.display()), e))
    }

    pub fn last_pull(&self, image_id: &str) -> Option<DateTime<Utc>> {
        self.image.image_id_to_time.get(image_id).copied()
    }

    pub fn record_pull(&mut self, image_id: &str, policy: &PullPolicy, now: DateTime<Utc>) {
        if let PullPolicy::Interval(_) = policy {
            self.interval.pulling_interval = policy.to_string();
        }
        self.image
            .image_id_to_time
            .insert(image_id.to_string(), now);
    }

    /// Drop timestamps older than the pruning interval, at most once per interval
    pub fn prune(&mut self, now: DateTime<Utc>) -> PackResult<usize> {
        let interval = parse_interval(&self.interval.pruning_interval)?;
        if self
            .interval
            .last_prune
            .is_some_and(|last| now - last < interval)
        {
            return Ok(0);
        }

        let before = self.image.image_id_to_time.len();
        self.image
            .image_id_to_time
            .retain(|_, pulled| now - *pulled < interval);
        self.interval.last_prune = Some(now);

        let removed = before - self.image.image_id_to_time.len();
        if removed > 0 {
            debug!("Pruned {} stale pull timestamps", removed);
        }
        Ok(removed)
    }
}
