//! Attachment bookkeeping and the debounce decision.
//!
//! [`CaptureCache`] holds the text caches of the current attachment. The
//! capture loop feeds every tick's capture through [`CaptureCache::observe`],
//! which decides whether the screen is worth broadcasting and whether the
//! busy indicator flipped. The decision is a pure function of the cache, the
//! capture and the clock, so it is tested here without a runtime.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::sanitize::{display_text, is_blank, sanitize};
use crate::session::SessionName;

use super::capture::CaptureLoop;

/// Cache shared between the engine and its capture loop.
pub type SharedCache = Arc<Mutex<CaptureCache>>;

/// Locks the shared cache, recovering the data from a poisoned lock.
pub(crate) fn lock(cache: &SharedCache) -> MutexGuard<'_, CaptureCache> {
    cache.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The session the engine is mirroring, together with its running loop.
///
/// Holding a `CaptureLoop` is what makes an attachment "running", so a running
/// attachment without a session cannot be expressed.
pub struct Attachment {
    pub(crate) session: SessionName,
    pub(crate) generation: u64,
    pub(crate) capture: CaptureLoop,
}

impl Attachment {
    /// The attached session.
    pub fn session(&self) -> &str {
        &self.session
    }

    /// Counter distinguishing this attachment from earlier ones.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the capture loop task is still alive.
    pub fn is_running(&self) -> bool {
        self.capture.is_running()
    }
}

/// Timing knobs used by the debounce decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceWindow {
    /// Quiet time after the last change before it is broadcast.
    pub debounce: Duration,
    /// Longest a changed screen may be withheld.
    pub max_silence: Duration,
}

/// What a single tick decided.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickOutcome {
    /// Text to broadcast as an `output` message.
    pub output: Option<String>,
    /// New busy flag to announce in a `status` message.
    pub busy: Option<bool>,
}

/// Text caches and timestamps of the current attachment.
#[derive(Debug, Default, Clone)]
pub struct CaptureCache {
    last_content: String,
    last_clean: String,
    last_emitted: String,
    last_change: Option<Instant>,
    last_emit: Option<Instant>,
    announced_busy: bool,
}

impl CaptureCache {
    /// A cache seeded with the snapshot taken when attaching.
    ///
    /// The snapshot counts as already emitted and not as a change, so a
    /// freshly attached session is idle. Later captures are still held for
    /// the debounce window, measured from the snapshot until the screen first
    /// changes.
    pub fn seeded(snapshot: &str, now: Instant) -> Self {
        Self {
            last_content: snapshot.to_string(),
            last_clean: sanitize(snapshot),
            last_emitted: snapshot.to_string(),
            last_change: None,
            last_emit: Some(now),
            announced_busy: false,
        }
    }

    /// Drops every cached field at once.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Last raw capture.
    pub fn last_content(&self) -> &str {
        &self.last_content
    }

    /// Last sanitized capture.
    pub fn last_clean(&self) -> &str {
        &self.last_clean
    }

    /// Raw text of the last emission.
    pub fn last_emitted(&self) -> &str {
        &self.last_emitted
    }

    /// When the sanitized screen last changed.
    pub fn last_change(&self) -> Option<Instant> {
        self.last_change
    }

    /// When output was last emitted.
    pub fn last_emit(&self) -> Option<Instant> {
        self.last_emit
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.last_content.is_empty()
            && self.last_clean.is_empty()
            && self.last_emitted.is_empty()
            && self.last_change.is_none()
            && self.last_emit.is_none()
    }

    /// Whether the screen changed within the debounce window.
    pub fn is_busy(&self, now: Instant, debounce: Duration) -> bool {
        self.last_change
            .is_some_and(|changed| now.saturating_duration_since(changed) < debounce)
    }

    /// Records the busy flag that was sent to clients.
    pub fn set_announced_busy(&mut self, busy: bool) {
        self.announced_busy = busy;
    }

    /// Records an emission of `raw` at `now`.
    pub fn mark_emitted(&mut self, raw: &str, now: Instant) {
        self.last_emitted = raw.to_string();
        self.last_emit = Some(now);
    }

    /// Feeds one capture through the debounce rules.
    pub fn observe(&mut self, raw: String, now: Instant, window: DebounceWindow) -> TickOutcome {
        let clean = sanitize(&raw);
        if clean != self.last_clean {
            self.last_change = Some(now);
            self.last_clean = clean;
        }

        let since_change = elapsed(self.last_change, now);
        let since_settle = elapsed(self.last_change.or(self.last_emit), now);
        let since_emit = elapsed(self.last_emit, now);

        let mut outcome = TickOutcome::default();

        let pending = raw != self.last_emitted;
        if pending && (since_settle >= window.debounce || since_emit >= window.max_silence) {
            let text = display_text(&raw);
            if !is_blank(&text) {
                outcome.output = Some(text);
            }
            self.mark_emitted(&raw, now);
        }

        // Every visible emission is followed by a status.
        let busy = since_change < window.debounce;
        if busy != self.announced_busy || outcome.output.is_some() {
            self.announced_busy = busy;
            outcome.busy = Some(busy);
        }

        self.last_content = raw;
        outcome
    }
}

/// Time since `at`, or forever when it never happened.
fn elapsed(at: Option<Instant>, now: Instant) -> Duration {
    at.map_or(Duration::MAX, |t| now.saturating_duration_since(t))
}
