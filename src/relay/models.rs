// Common data models for the relay pipeline

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Media kind of one exported memory.
///
/// Drives both the scratch-file extension and the relay method
/// (streamable video transfer vs. static photo transfer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaKind {
    Image,
    Video,
    Other,
}

impl MediaKind {
    /// Map the export's media-type cell text onto a kind.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "image" | "photo" | "picture" => Self::Image,
            "video" => Self::Video,
            _ => Self::Other,
        }
    }

    /// Scratch-file extension for this kind.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Video => "mp4",
            Self::Image | Self::Other => "jpg",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image => write!(f, "Image"),
            Self::Video => write!(f, "Video"),
            Self::Other => write!(f, "Other"),
        }
    }
}

/// One memory to transfer, extracted from the export document.
///
/// Immutable after extraction; the Transfer Engine reads it but never
/// retains it past the call that processes the item.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    /// Parsed capture time. None when the date cell failed to parse.
    pub taken_at: Option<OffsetDateTime>,
    /// Raw date cell text, used for captions and scratch filenames.
    pub date_text: String,
    pub media_kind: MediaKind,
    /// Location cell text. None when the cell was empty.
    pub location: Option<String>,
    /// Short-lived source URL. Never empty.
    pub source_url: String,
    /// Whether the GET must carry the route-tag marker header.
    pub requires_route_header: bool,
    /// Position of the row in the export document.
    pub ordinal: usize,
}

/// Location sentinel the export uses when no coordinates were recorded.
const NO_LOCATION_SENTINEL: &str = "0.0, 0.0";

impl WorkItem {
    /// Calendar year of the capture time, if it parsed.
    pub fn year(&self) -> Option<i32> {
        self.taken_at.map(|t| t.year())
    }

    /// Scratch filename for this item.
    ///
    /// The ordinal disambiguates items sharing the same timestamp and
    /// kind.
    pub fn scratch_file_name(&self) -> String {
        let safe_date = self.date_text.replace(':', "-").replace(' ', "_");
        format!(
            "{}_{}_{:05}.{}",
            safe_date,
            self.media_kind,
            self.ordinal,
            self.media_kind.extension()
        )
    }

    /// Caption delivered alongside the relayed media.
    pub fn caption(&self) -> String {
        let mut caption = format!("📅 {}\n📹 {}", self.date_text, self.media_kind);
        if let Some(location) = self.cleaned_location() {
            caption.push_str("\n📍 ");
            caption.push_str(&location);
        }
        caption
    }

    /// Location text with the label prefix stripped, or None when the
    /// cell was absent or holds the zero-coordinate sentinel.
    fn cleaned_location(&self) -> Option<String> {
        let raw = self.location.as_deref()?;
        let cleaned = raw
            .trim_start_matches("Latitude, Longitude:")
            .trim()
            .to_string();
        if cleaned.is_empty() || cleaned.contains(NO_LOCATION_SENTINEL) {
            return None;
        }
        Some(cleaned)
    }
}

/// Fetched payload persisted to the run's scratch directory.
///
/// The Run Controller deletes `path` after relay on every exit path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalPayload {
    pub path: PathBuf,
    pub size: u64,
}

/// Per-kind item counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindTally {
    pub images: usize,
    pub videos: usize,
    pub other: usize,
}

impl KindTally {
    pub fn record(&mut self, kind: MediaKind) {
        match kind {
            MediaKind::Image => self.images += 1,
            MediaKind::Video => self.videos += 1,
            MediaKind::Other => self.other += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.images + self.videos + self.other
    }
}

/// Aggregate view over a work-item list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStatistics {
    pub total: usize,
    pub kinds: KindTally,
    /// Item count per calendar year. Items with an unparseable date
    /// contribute to `undated` instead.
    pub by_year: BTreeMap<i32, usize>,
    pub undated: usize,
}

/// Identifying fields of an item that failed after retry exhaustion,
/// kept for the final report (capped for display).
#[derive(Debug, Clone)]
pub struct FailedItem {
    pub ordinal: usize,
    pub date_text: String,
    pub media_kind: MediaKind,
    pub reason: String,
}

/// Tunable knobs for the pipeline.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Per-attempt timeout for fetch requests.
    pub request_timeout: Duration,
    /// Attempt ceiling shared by fetch and relay.
    pub retry_attempts: u32,
    /// Delay between attempts.
    pub retry_delay: Duration,
    /// Courtesy delay between items.
    pub item_delay: Duration,
    /// Work lists larger than this require explicit confirmation.
    pub confirm_threshold: usize,
    /// How long a confirmation prompt stays open.
    pub confirm_timeout: Duration,
    /// Progress message is edited every this many items.
    pub progress_interval: usize,
    /// At most this many failed items are listed in the report.
    pub failed_display_cap: usize,
    /// Idle sessions are evicted after this long.
    pub session_ttl: Duration,
    /// Connection-pool cap for the fetch client.
    pub max_connections: usize,
    /// SOCKS5/HTTP proxy URL for the fetch client.
    pub proxy: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            retry_attempts: 3,
            retry_delay: Duration::from_secs(2),
            item_delay: Duration::from_secs(1),
            confirm_threshold: 100,
            confirm_timeout: Duration::from_secs(30),
            progress_interval: 10,
            failed_display_cap: 10,
            session_ttl: Duration::from_secs(30 * 60),
            max_connections: 8,
            proxy: None,
        }
    }
}

impl RelayConfig {
    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.retry_attempts = attempts;
        self.retry_delay = delay;
        self
    }

    pub fn with_item_delay(mut self, delay: Duration) -> Self {
        self.item_delay = delay;
        self
    }

    pub fn with_confirm_threshold(mut self, threshold: usize) -> Self {
        self.confirm_threshold = threshold;
        self
    }

    pub fn with_confirm_timeout(mut self, timeout: Duration) -> Self {
        self.confirm_timeout = timeout;
        self
    }
}
