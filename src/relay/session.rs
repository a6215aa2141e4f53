// Per-user run state and the keyed session store
//
// One run may be active per chat at a time; that phase check is the
// only concurrency control the pipeline needs. Sessions are created
// lazily, reset to Idle at the end of every run, and evicted by the
// store once idle past the TTL (the store never grows unbounded).

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::models::{FailedItem, KindTally, MediaKind, WorkItem};
use super::retry::CancelToken;
use super::traits::ChatRef;

/// Lifecycle of one chat's run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    AwaitingConfirmation,
    Processing,
    Stopping,
    Completed,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::AwaitingConfirmation => write!(f, "awaiting confirmation"),
            Self::Processing => write!(f, "processing"),
            Self::Stopping => write!(f, "stopping"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// One chat's run state. Owned by the store, mutated only under its
/// lock and never across an await point.
pub struct RunSession {
    pub phase: RunPhase,
    pub work_items: Vec<WorkItem>,
    /// Index of the item currently in flight.
    pub cursor: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub kind_tally: KindTally,
    /// Capped by the controller's display limit.
    pub failed_items: Vec<FailedItem>,
    pub started_at: Option<Instant>,
    cancel: CancelToken,
    /// Bumped on every phase transition so stale confirmation timers
    /// can tell they lost the race.
    nonce: u64,
    last_activity: Instant,
}

impl RunSession {
    fn new() -> Self {
        Self {
            phase: RunPhase::Idle,
            work_items: Vec::new(),
            cursor: 0,
            succeeded: 0,
            failed: 0,
            kind_tally: KindTally::default(),
            failed_items: Vec::new(),
            started_at: None,
            cancel: CancelToken::new(),
            nonce: 0,
            last_activity: Instant::now(),
        }
    }

    pub fn is_busy(&self) -> bool {
        matches!(self.phase, RunPhase::Processing | RunPhase::Stopping)
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Park an oversized work list pending explicit confirmation.
    /// Returns the nonce the confirmation timer must present.
    pub fn begin_confirmation(&mut self, items: Vec<WorkItem>) -> u64 {
        self.nonce += 1;
        self.phase = RunPhase::AwaitingConfirmation;
        self.work_items = items;
        self.touch();
        self.nonce
    }

    /// Take the parked list back out (confirmation accepted).
    pub fn take_pending(&mut self) -> Vec<WorkItem> {
        std::mem::take(&mut self.work_items)
    }

    /// Enter Processing with zeroed counters and a fresh stop token.
    pub fn begin_processing(&mut self, items: Vec<WorkItem>) -> CancelToken {
        self.nonce += 1;
        self.phase = RunPhase::Processing;
        self.work_items = items;
        self.cursor = 0;
        self.succeeded = 0;
        self.failed = 0;
        self.kind_tally = KindTally::default();
        self.failed_items.clear();
        self.started_at = Some(Instant::now());
        self.cancel = CancelToken::new();
        self.touch();
        self.cancel.clone()
    }

    /// Cooperative stop. True when a run was actually active.
    pub fn request_stop(&mut self) -> bool {
        if !self.is_busy() {
            return false;
        }
        self.phase = RunPhase::Stopping;
        self.cancel.cancel();
        self.touch();
        true
    }

    pub fn record_success(&mut self, kind: MediaKind) {
        self.succeeded += 1;
        self.kind_tally.record(kind);
    }

    pub fn record_failure(&mut self, item: &WorkItem, reason: String, display_cap: usize) {
        self.failed += 1;
        if self.failed_items.len() < display_cap {
            self.failed_items.push(FailedItem {
                ordinal: item.ordinal,
                date_text: item.date_text.clone(),
                media_kind: item.media_kind,
                reason,
            });
        }
    }

    pub fn advance_cursor(&mut self) {
        self.cursor += 1;
        self.touch();
    }

    /// Drop all run state and return to Idle.
    pub fn reset(&mut self) {
        let nonce = self.nonce + 1;
        *self = Self::new();
        self.nonce = nonce;
    }

    /// Snapshot for live status queries.
    pub fn status_text(&self) -> String {
        match self.phase {
            RunPhase::Idle => {
                "Nothing is running. Send a memories export file to begin.".to_string()
            }
            RunPhase::AwaitingConfirmation => format!(
                "Waiting for you to confirm a transfer of {} memories.",
                self.work_items.len()
            ),
            RunPhase::Processing | RunPhase::Stopping | RunPhase::Completed => {
                let elapsed = self
                    .started_at
                    .map(|t| t.elapsed().as_secs())
                    .unwrap_or_default();
                format!(
                    "Transfer {}: {}/{} processed — ✅ {} · ❌ {} · ⏱ {}s",
                    self.phase,
                    self.cursor,
                    self.work_items.len(),
                    self.succeeded,
                    self.failed,
                    elapsed
                )
            }
        }
    }
}

/// Process-wide session map, keyed by chat.
///
/// Supports concurrent insertion of new per-chat entries; idle entries
/// past the TTL are pruned on access so the map stays bounded.
pub struct SessionStore {
    ttl: Duration,
    inner: Mutex<HashMap<ChatRef, Arc<Mutex<RunSession>>>>,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch the chat's session, creating it lazily.
    pub fn get_or_create(&self, chat: ChatRef) -> Arc<Mutex<RunSession>> {
        let mut map = self.inner.lock().unwrap();
        let ttl = self.ttl;
        map.retain(|_, entry| {
            let session = entry.lock().unwrap();
            session.phase != RunPhase::Idle || session.last_activity.elapsed() < ttl
        });
        map.entry(chat)
            .or_insert_with(|| Arc::new(Mutex::new(RunSession::new())))
            .clone()
    }

    pub fn contains(&self, chat: ChatRef) -> bool {
        self.inner.lock().unwrap().contains_key(&chat)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
