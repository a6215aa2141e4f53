// Run controller - drives the transfer engine over a full work list
//
// Owns the per-chat state machine (Idle → AwaitingConfirmation →
// Processing → Stopping/Completed → Idle), the throttled progress
// message, and the terminal report. Items are processed strictly in
// extraction order, one at a time, to respect destination-side rate
// limits and keep progress deterministic.

use std::fmt::Write as _;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;

use super::classifier;
use super::engine::TransferEngine;
use super::errors::SessionError;
use super::extractor;
use super::models::{RelayConfig, WorkItem};
use super::retry::{CancelToken, RetryOutcome};
use super::session::{RunPhase, RunSession, SessionStore};
use super::traits::{ChatRef, ChatTransport, MediaFetcher};

/// What happened to one item, folded into the run counters.
enum ItemOutcome {
    Delivered,
    Failed(String),
    Cancelled,
}

/// Reply classification while a confirmation is pending.
enum Decision {
    Proceed,
    Declined,
    Unclear,
}

pub struct RunController {
    transport: Arc<dyn ChatTransport>,
    engine: TransferEngine,
    sessions: SessionStore,
    config: RelayConfig,
}

impl RunController {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        fetcher: Arc<dyn MediaFetcher>,
        config: RelayConfig,
    ) -> Self {
        Self {
            transport,
            engine: TransferEngine::new(fetcher, config.clone()),
            sessions: SessionStore::new(config.session_ttl),
            config,
        }
    }

    /// Entry point for a freshly received export document.
    ///
    /// Extracts the work list, asks for confirmation on oversized
    /// lists, and otherwise runs the transfer to completion.
    pub async fn submit_document(self: &Arc<Self>, chat: ChatRef, html: &str) {
        let session = self.sessions.get_or_create(chat);
        if let Err(SessionError::Busy) = Self::guard_not_busy(&session) {
            self.send_best_effort(chat, "⚠️ A transfer is already running in this chat. Use /stop to cancel it first.")
                .await;
            return;
        }

        self.send_best_effort(chat, "🔍 Reading your export file…")
            .await;
        let items = extractor::extract(html);
        if items.is_empty() {
            self.send_best_effort(
                chat,
                "❌ No memories found. Make sure you sent the memories HTML file from your data export.",
            )
            .await;
            return;
        }

        let stats = classifier::analyze(&items);
        let needs_confirmation = items.len() > self.config.confirm_threshold;

        // Guard again at the transition: another document may have won
        // the race while we were parsing.
        enum Next {
            Confirm(u64),
            Run,
            Busy,
        }
        let next = {
            let mut s = session.lock().unwrap();
            if s.is_busy() {
                Next::Busy
            } else if needs_confirmation {
                Next::Confirm(s.begin_confirmation(items))
            } else {
                s.begin_processing(items);
                Next::Run
            }
        };

        match next {
            Next::Busy => {
                self.send_best_effort(chat, "⚠️ A transfer is already running in this chat.")
                    .await;
            }
            Next::Confirm(nonce) => {
                let prompt = format!(
                    "{}\n\nThat is a large export. Reply \"yes\" to start or \"no\" to cancel \
                     (expires in {}s).",
                    stats.describe(),
                    self.config.confirm_timeout.as_secs()
                );
                self.send_best_effort(chat, &prompt).await;
                self.spawn_confirmation_timeout(chat, nonce);
            }
            Next::Run => {
                self.send_best_effort(chat, &stats.describe()).await;
                self.run_to_completion(chat).await;
            }
        }
    }

    /// Feed a plain-text reply to a pending confirmation.
    ///
    /// Returns false when no confirmation is pending, so the caller can
    /// fall through to its default reply.
    pub async fn handle_reply(self: &Arc<Self>, chat: ChatRef, text: &str) -> bool {
        let session = self.sessions.get_or_create(chat);
        let decision = {
            let mut s = session.lock().unwrap();
            if s.phase != RunPhase::AwaitingConfirmation {
                return false;
            }
            let reply = text.trim().to_ascii_lowercase();
            if is_affirmative(&reply) {
                let items = s.take_pending();
                s.begin_processing(items);
                Decision::Proceed
            } else if is_negative(&reply) {
                s.reset();
                Decision::Declined
            } else {
                Decision::Unclear
            }
        };

        match decision {
            Decision::Proceed => self.run_to_completion(chat).await,
            Decision::Declined => {
                self.send_best_effort(chat, "🚫 Cancelled. Nothing was transferred.")
                    .await;
            }
            Decision::Unclear => {
                self.send_best_effort(chat, "Please reply \"yes\" to start or \"no\" to cancel.")
                    .await;
            }
        }
        true
    }

    /// Cooperative stop: the in-flight attempt completes, nothing new
    /// begins.
    pub async fn request_stop(&self, chat: ChatRef) {
        let session = self.sessions.get_or_create(chat);
        let response = {
            let mut s = session.lock().unwrap();
            if s.request_stop() {
                "⏹ Stopping after the current item…"
            } else if s.phase == RunPhase::AwaitingConfirmation {
                s.reset();
                "🚫 Pending transfer discarded."
            } else {
                "Nothing is running right now."
            }
        };
        self.send_best_effort(chat, response).await;
    }

    /// Set the stop flag without messaging the chat.
    pub fn signal_stop(&self, chat: ChatRef) -> bool {
        self.sessions
            .get_or_create(chat)
            .lock()
            .unwrap()
            .request_stop()
    }

    /// Live snapshot of the chat's run.
    pub async fn report_status(&self, chat: ChatRef) {
        let text = self
            .sessions
            .get_or_create(chat)
            .lock()
            .unwrap()
            .status_text();
        self.send_best_effort(chat, &text).await;
    }

    fn guard_not_busy(session: &Mutex<RunSession>) -> Result<(), SessionError> {
        if session.lock().unwrap().is_busy() {
            Err(SessionError::Busy)
        } else {
            Ok(())
        }
    }

    /// Discard a confirmation that nobody answered within the window.
    fn spawn_confirmation_timeout(self: &Arc<Self>, chat: ChatRef, nonce: u64) {
        let controller = Arc::clone(self);
        let window = self.config.confirm_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let session = controller.sessions.get_or_create(chat);
            let expired = {
                let mut s = session.lock().unwrap();
                if s.phase == RunPhase::AwaitingConfirmation && s.nonce() == nonce {
                    s.reset();
                    true
                } else {
                    false
                }
            };
            if expired {
                controller
                    .send_best_effort(
                        chat,
                        "⌛ Confirmation window expired; nothing was transferred.",
                    )
                    .await;
            }
        });
    }

    /// Run the prepared work list and always deliver exactly one
    /// terminal message, then reset the session.
    async fn run_to_completion(&self, chat: ChatRef) {
        match self.run_loop(chat).await {
            Ok(report) => self.send_best_effort(chat, &report).await,
            Err(err) => {
                log::error!("run for chat {} aborted unexpectedly: {:#}", chat, err);
                self.send_best_effort(
                    chat,
                    &format!("⚠️ Unexpected error: {}. The transfer was aborted.", err),
                )
                .await;
            }
        }
        self.sessions.get_or_create(chat).lock().unwrap().reset();
    }

    async fn run_loop(&self, chat: ChatRef) -> anyhow::Result<String> {
        let session = self.sessions.get_or_create(chat);
        let (total, cancel) = {
            let s = session.lock().unwrap();
            (s.work_items.len(), s.cancel_token())
        };

        let scratch = tempfile::Builder::new()
            .prefix("snaprelay-")
            .tempdir()
            .context("creating scratch directory")?;
        let progress = self
            .transport
            .send_text(chat, &format!("⬇️ Transferring {} memories…", total))
            .await
            .context("sending progress message")?;
        log::info!("chat {}: starting transfer of {} memories", chat, total);

        for index in 0..total {
            if cancel.is_cancelled() {
                break;
            }
            let item = { session.lock().unwrap().work_items[index].clone() };
            let outcome = self
                .process_item(chat, &item, scratch.path(), &cancel)
                .await;

            let mut halted = false;
            {
                let mut s = session.lock().unwrap();
                match outcome {
                    ItemOutcome::Delivered => s.record_success(item.media_kind),
                    ItemOutcome::Failed(reason) => {
                        log::warn!("chat {}: item #{} failed: {}", chat, item.ordinal, reason);
                        s.record_failure(&item, reason, self.config.failed_display_cap);
                    }
                    // The item never completed; leave it uncounted.
                    ItemOutcome::Cancelled => halted = true,
                }
                if !halted {
                    s.advance_cursor();
                }
            }
            if halted {
                break;
            }

            let processed = index + 1;
            if processed % self.config.progress_interval == 0 || processed == total {
                let text = {
                    let s = session.lock().unwrap();
                    format!(
                        "📤 {}/{} processed — ✅ {} · ❌ {}",
                        processed, total, s.succeeded, s.failed
                    )
                };
                if let Err(err) = self.transport.edit_text(chat, progress, &text).await {
                    log::warn!("chat {}: progress edit failed: {}", chat, err);
                }
            }
            if processed < total {
                tokio::time::sleep(self.config.item_delay).await;
            }
        }

        Ok(self.compose_report(&session))
    }

    /// Fetch then relay one item; the scratch file is removed on every
    /// exit path.
    async fn process_item(
        &self,
        chat: ChatRef,
        item: &WorkItem,
        scratch: &std::path::Path,
        cancel: &CancelToken,
    ) -> ItemOutcome {
        let payload = match self.engine.fetch(item, scratch, cancel).await {
            RetryOutcome::Done(payload) => payload,
            RetryOutcome::Exhausted(err) => return ItemOutcome::Failed(format!("fetch: {}", err)),
            RetryOutcome::Cancelled => return ItemOutcome::Cancelled,
        };

        let relayed = self
            .engine
            .relay(self.transport.as_ref(), chat, item, &payload, cancel)
            .await;
        if let Err(err) = tokio::fs::remove_file(&payload.path).await {
            log::warn!("failed to remove scratch file {:?}: {}", payload.path, err);
        }

        match relayed {
            RetryOutcome::Done(()) => ItemOutcome::Delivered,
            RetryOutcome::Exhausted(err) => ItemOutcome::Failed(format!("relay: {}", err)),
            RetryOutcome::Cancelled => ItemOutcome::Cancelled,
        }
    }

    /// Terminal report, emitted exactly once per run.
    fn compose_report(&self, session: &Mutex<RunSession>) -> String {
        let mut s = session.lock().unwrap();
        let stopped = s.phase == RunPhase::Stopping || s.cancel_token().is_cancelled();
        s.phase = RunPhase::Completed;

        let elapsed = s
            .started_at
            .map(|t| t.elapsed())
            .unwrap_or(Duration::ZERO);
        let mut text = if stopped {
            "⏹ Transfer stopped.\n".to_string()
        } else {
            "🎉 Transfer complete!\n".to_string()
        };
        let _ = writeln!(text, "Processed {}/{}", s.cursor, s.work_items.len());
        let _ = writeln!(text, "✅ Succeeded: {}", s.succeeded);
        let _ = writeln!(text, "❌ Failed: {}", s.failed);
        let _ = writeln!(
            text,
            "🖼 {} · 🎬 {} · 📄 {}",
            s.kind_tally.images, s.kind_tally.videos, s.kind_tally.other
        );
        let _ = writeln!(text, "⏱ {}s", elapsed.as_secs());

        if !s.failed_items.is_empty() {
            let _ = writeln!(text, "\nFailed items:");
            for failed in &s.failed_items {
                let _ = writeln!(
                    text,
                    "• {} ({}): {}",
                    failed.date_text, failed.media_kind, failed.reason
                );
            }
            let hidden = s.failed - s.failed_items.len();
            if hidden > 0 {
                let _ = writeln!(text, "…and {} more", hidden);
            }
        }
        text.trim_end().to_string()
    }

    async fn send_best_effort(&self, chat: ChatRef, text: &str) {
        if let Err(err) = self.transport.send_text(chat, text).await {
            log::warn!("chat {}: send failed via {}: {}", chat, self.transport.name(), err);
        }
    }
}

fn is_affirmative(reply: &str) -> bool {
    matches!(reply, "yes" | "y" | "ok" | "start" | "confirm")
}

fn is_negative(reply: &str) -> bool {
    matches!(reply, "no" | "n" | "cancel" | "stop")
}
