//! Per-user rate limiting and session tracking.
//!
//! All inbound user actions funnel through the [`AdmissionGate`]: uploads are
//! admitted against a sliding-window rate limit, and the conversational state
//! attached to each user (the image awaiting an operation choice, the chosen
//! operation) lives in the same per-user record. The gate exclusively owns
//! every session; handlers never touch session state directly.

use crate::config::{self, QualityPreset, Settings};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors produced by session-state operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GateError {
    /// An operation was selected while no image is on record
    #[error("no image is pending for this session")]
    NoImagePending,
}

/// Opaque handle to the most recently uploaded image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    /// Telegram file identifier
    pub file_id: String,
    /// Upload size in bytes, as reported by Telegram
    pub file_size: u64,
}

/// A processing operation selected from the bot menu
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Background removal via the Remove.bg API
    RemoveBackground,
    /// AI editing via the `PhotoRoom` API
    AiEdit,
    /// Local resize/pad to a quality preset
    EnhanceQuality(&'static QualityPreset),
    /// Local 16:9 wallpaper conversion
    Wallpaper,
}

impl Operation {
    /// Stable string form used both as Telegram callback data and as the
    /// processed-result cache key suffix.
    #[must_use]
    pub fn callback_data(&self) -> String {
        match self {
            Self::RemoveBackground => "remove_bg".to_string(),
            Self::AiEdit => "ai_edit".to_string(),
            Self::EnhanceQuality(preset) => format!("quality_{}", preset.key),
            Self::Wallpaper => "wallpaper".to_string(),
        }
    }

    /// Parse callback data back into an operation
    #[must_use]
    pub fn from_callback_data(data: &str) -> Option<Self> {
        match data {
            "remove_bg" => Some(Self::RemoveBackground),
            "ai_edit" => Some(Self::AiEdit),
            "wallpaper" => Some(Self::Wallpaper),
            other => {
                let key = other.strip_prefix("quality_")?;
                config::quality_preset(key).map(Self::EnhanceQuality)
            }
        }
    }
}

/// Outcome of a rate-limit admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The action may proceed; `remaining` slots are left in the window
    Allowed {
        /// Requests left in the current window after this one
        remaining: usize,
    },
    /// The action is rejected until the oldest admitted request leaves the window
    Denied {
        /// Time until a slot frees up
        retry_after: Duration,
    },
}

impl Decision {
    /// True for [`Decision::Allowed`]
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// One user's transient interaction state.
///
/// `request_timestamps` is chronological: entries are only ever appended with
/// the current instant and pruned from the front.
#[derive(Debug)]
struct UserSession {
    request_timestamps: VecDeque<Instant>,
    pending_operation: Option<Operation>,
    last_image: Option<ImageRef>,
    last_touched: Instant,
}

impl UserSession {
    fn new(now: Instant) -> Self {
        Self {
            request_timestamps: VecDeque::new(),
            pending_operation: None,
            last_image: None,
            last_touched: now,
        }
    }

    /// Drop every timestamp that has left the trailing window.
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(oldest) = self.request_timestamps.front() {
            if now.saturating_duration_since(*oldest) >= window {
                self.request_timestamps.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Combined rate limiter and session store.
///
/// Every operation is a single critical section over one user's record, so
/// two racing actions from the same user can never both observe a free slot
/// and overshoot the limit. The lock is never held across an await point;
/// vendor calls and image transforms happen strictly outside the gate.
pub struct AdmissionGate {
    sessions: Mutex<HashMap<u64, UserSession>>,
    max_requests: usize,
    window: Duration,
    max_sessions: usize,
}

impl AdmissionGate {
    /// Create a gate with the default session capacity
    #[must_use]
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self::with_capacity(max_requests, window, config::MAX_TRACKED_SESSIONS)
    }

    /// Create a gate with an explicit bound on tracked sessions
    #[must_use]
    pub fn with_capacity(max_requests: usize, window: Duration, max_sessions: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            max_requests,
            window,
            max_sessions,
        }
    }

    /// Create a gate from loaded settings
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.max_requests_per_window, settings.window())
    }

    /// Run `f` against the user's session under the store lock.
    ///
    /// Creates the session lazily; when the store is at capacity the
    /// least-recently-touched session is evicted first.
    fn with_session<T>(&self, user_id: u64, now: Instant, f: impl FnOnce(&mut UserSession) -> T) -> T {
        let mut sessions = self.sessions.lock();

        if !sessions.contains_key(&user_id) && sessions.len() >= self.max_sessions {
            if let Some(evict_id) = sessions
                .iter()
                .min_by_key(|(_, s)| s.last_touched)
                .map(|(id, _)| *id)
            {
                sessions.remove(&evict_id);
                debug!("Session store at capacity, evicted user {evict_id}");
            }
        }

        let session = sessions
            .entry(user_id)
            .or_insert_with(|| UserSession::new(now));
        session.last_touched = now;
        f(session)
    }

    /// Check and consume one rate-limit slot for `user_id`.
    ///
    /// On `Allowed` the current instant is appended to the user's request
    /// history; on `Denied` nothing is mutated and `retry_after` reports how
    /// long until the oldest admitted request leaves the window.
    pub fn admit(&self, user_id: u64) -> Decision {
        self.admit_at(user_id, Instant::now())
    }

    /// [`Self::admit`] with an explicit clock, the seam the tests drive.
    pub fn admit_at(&self, user_id: u64, now: Instant) -> Decision {
        self.with_session(user_id, now, |session| {
            session.prune(now, self.window);

            if session.request_timestamps.len() < self.max_requests {
                session.request_timestamps.push_back(now);
                Decision::Allowed {
                    remaining: self.max_requests - session.request_timestamps.len(),
                }
            } else {
                let retry_after = session.request_timestamps.front().map_or(
                    self.window,
                    |oldest| self.window.saturating_sub(now.saturating_duration_since(*oldest)),
                );
                warn!(
                    "Rate limit exceeded for user {user_id}, retry in {}s",
                    retry_after.as_secs()
                );
                Decision::Denied { retry_after }
            }
        })
    }

    /// Remember a fresh upload for `user_id`.
    ///
    /// Always clears any pending operation: a new image supersedes an
    /// unconsumed choice.
    pub fn record_upload(&self, user_id: u64, image: ImageRef) {
        self.with_session(user_id, Instant::now(), |session| {
            session.pending_operation = None;
            session.last_image = Some(image);
        });
    }

    /// Record the operation chosen for the image on record.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::NoImagePending`] when no image is on record; the
    /// caller should re-prompt the user to upload one.
    pub fn select_operation(&self, user_id: u64, operation: Operation) -> Result<(), GateError> {
        self.with_session(user_id, Instant::now(), |session| {
            if session.last_image.is_none() {
                return Err(GateError::NoImagePending);
            }
            session.pending_operation = Some(operation);
            Ok(())
        })
    }

    /// Atomically take the pending image/operation pair.
    ///
    /// One-shot: a second call without an intervening upload returns `None`.
    /// Returns `None` (and mutates nothing) unless both fields are present.
    pub fn consume_pending(&self, user_id: u64) -> Option<(ImageRef, Operation)> {
        self.with_session(user_id, Instant::now(), |session| {
            if session.pending_operation.is_none() || session.last_image.is_none() {
                return None;
            }
            let image = session.last_image.take()?;
            let operation = session.pending_operation.take()?;
            Some((image, operation))
        })
    }

    /// Remaining rate-limit slots for `user_id` after pruning
    pub fn remaining_requests(&self, user_id: u64) -> usize {
        self.remaining_requests_at(user_id, Instant::now())
    }

    /// [`Self::remaining_requests`] with an explicit clock
    pub fn remaining_requests_at(&self, user_id: u64, now: Instant) -> usize {
        self.with_session(user_id, now, |session| {
            session.prune(now, self.window);
            self.max_requests.saturating_sub(session.request_timestamps.len())
        })
    }

    /// Number of tracked sessions
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }
}
