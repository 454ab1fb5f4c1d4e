//! Conversation sessions and the registry that owns them.
//!
//! Each session lives behind its own async mutex ([`SessionHandle`]). The
//! retrieval chain holds that mutex for the whole of an `ask`, which
//! serializes questions within a session while leaving different sessions
//! fully independent.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use crate::error::{RagError, Result};
use crate::memory::ConversationMemory;
use crate::models::ConversationTurn;

/// Shared, serialized access to one session.
pub type SessionHandle = Arc<tokio::sync::Mutex<ConversationSession>>;

/// One user's bounded conversation context.
#[derive(Debug, Clone)]
pub struct ConversationSession {
    id: String,
    /// Domain profile for this session; `None` uses the chain default.
    profile: Option<String>,
    memory: ConversationMemory,
}

impl ConversationSession {
    /// # Errors
    ///
    /// Fails when `capacity` is 0.
    pub fn new(id: impl Into<String>, capacity: usize) -> Result<Self> {
        Ok(Self {
            id: id.into(),
            profile: None,
            memory: ConversationMemory::new(capacity)?,
        })
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn profile(&self) -> Option<&str> {
        self.profile.as_deref()
    }

    pub fn set_profile(&mut self, profile: Option<String>) {
        self.profile = profile;
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut ConversationMemory {
        &mut self.memory
    }

    pub fn into_handle(self) -> SessionHandle {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    /// Serializable copy of the retained turns.
    pub fn transcript(&self) -> SessionTranscript {
        SessionTranscript {
            session_id: self.id.clone(),
            profile: self.profile.clone(),
            turns: self.memory.turns(),
        }
    }
}

/// Stable, serializable view of a session for export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionTranscript {
    pub session_id: String,
    pub profile: Option<String>,
    pub turns: Vec<ConversationTurn>,
}

/// Creates sessions on first use and discards them when they end.
///
/// Without limits a session lives until [`end`](Self::end). With an idle TTL,
/// sessions not used for that long are treated as gone and are dropped by
/// [`sweep_idle`](Self::sweep_idle). With a session cap, creating a session at
/// the cap evicts the least recently used one, preferring sessions that are
/// not in the middle of an `ask`.
pub struct SessionRegistry {
    capacity: usize,
    idle_ttl: Option<Duration>,
    max_sessions: Option<usize>,
    sessions: Mutex<HashMap<String, Slot>>,
}

struct Slot {
    handle: SessionHandle,
    last_used: Instant,
}

impl Slot {
    fn is_busy(&self) -> bool {
        self.handle.try_lock().is_err()
    }
}

impl SessionRegistry {
    /// # Errors
    ///
    /// Fails when `capacity` is 0, so misconfiguration surfaces at startup
    /// rather than on the first question.
    pub fn new(capacity: usize) -> Result<Self> {
        ConversationMemory::new(capacity)?;
        Ok(Self {
            capacity,
            idle_ttl: None,
            max_sessions: None,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    /// Expire sessions unused for `ttl`.
    pub fn with_idle_ttl(mut self, ttl: Duration) -> Result<Self> {
        if ttl.is_zero() {
            return Err(RagError::InvalidConfiguration(
                "session idle ttl must be > 0".to_string(),
            ));
        }
        self.idle_ttl = Some(ttl);
        Ok(self)
    }

    /// Keep at most `max` sessions.
    pub fn with_max_sessions(mut self, max: usize) -> Result<Self> {
        if max == 0 {
            return Err(RagError::InvalidConfiguration(
                "max sessions must be >= 1".to_string(),
            ));
        }
        self.max_sessions = Some(max);
        Ok(self)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn idle_ttl(&self) -> Option<Duration> {
        self.idle_ttl
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_expired(&self, slot: &Slot, now: Instant) -> bool {
        self.idle_ttl
            .is_some_and(|ttl| !slot.is_busy() && now.duration_since(slot.last_used) >= ttl)
    }

    /// Return the session `id`, creating it if it does not exist.
    pub fn get_or_create(&self, id: &str) -> Result<SessionHandle> {
        let now = Instant::now();
        let mut sessions = self.lock();
        if let Some(slot) = sessions.get(id) {
            if self.is_expired(slot, now) {
                sessions.remove(id);
                debug!(session = id, "session expired");
            }
        }
        if let Some(slot) = sessions.get_mut(id) {
            slot.last_used = now;
            return Ok(slot.handle.clone());
        }

        if let Some(max) = self.max_sessions {
            if sessions.len() >= max {
                sessions.retain(|_, slot| !self.is_expired(slot, now));
            }
            while sessions.len() >= max {
                let Some(victim) = least_recently_used(&sessions) else {
                    break;
                };
                sessions.remove(&victim);
                debug!(session = %victim, "evicted session at capacity");
            }
        }

        let handle = ConversationSession::new(id, self.capacity)?.into_handle();
        sessions.insert(
            id.to_string(),
            Slot {
                handle: handle.clone(),
                last_used: now,
            },
        );
        debug!(session = id, "created session");
        Ok(handle)
    }

    pub fn get(&self, id: &str) -> Option<SessionHandle> {
        let now = Instant::now();
        let mut sessions = self.lock();
        if self.is_expired(sessions.get(id)?, now) {
            sessions.remove(id);
            debug!(session = id, "session expired");
            return None;
        }
        let slot = sessions.get_mut(id)?;
        slot.last_used = now;
        Some(slot.handle.clone())
    }

    /// Discard a session. Returns `false` if it did not exist.
    pub fn end(&self, id: &str) -> bool {
        let removed = self.lock().remove(id).is_some();
        if removed {
            debug!(session = id, "ended session");
        }
        removed
    }

    /// Drop every expired session. Returns how many were dropped.
    pub fn sweep_idle(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|_, slot| !self.is_expired(slot, now));
        let swept = before - sessions.len();
        if swept > 0 {
            debug!(swept, remaining = sessions.len(), "swept idle sessions");
        }
        swept
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Session ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Oldest idle session, or the oldest overall when every session is busy.
fn least_recently_used(sessions: &HashMap<String, Slot>) -> Option<String> {
    let oldest = |busy: bool| {
        sessions
            .iter()
            .filter(|(_, slot)| slot.is_busy() == busy)
            .min_by_key(|(_, slot)| slot.last_used)
            .map(|(id, _)| id.clone())
    };
    oldest(false).or_else(|| oldest(true))
}
