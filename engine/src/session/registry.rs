//! Process-wide session registry
//!
//! Maps session ids to live sessions and remembers terminal outcomes so a
//! stopped id can be told apart from an unknown one. All operations take the
//! registry mutex briefly and never perform I/O while holding it.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::{EngineError, Result};

use super::{Session, SessionOutcome};

/// Terminal outcomes retained after sessions are destroyed.
const HISTORY_CAPACITY: usize = 32;

/// Result of resolving a session id.
pub enum Lookup {
    Active(Arc<Session>),
    Terminal(SessionOutcome),
    Unknown,
}

struct RegistryInner {
    active: HashMap<String, Arc<Session>>,
    history: VecDeque<(String, SessionOutcome)>,
    max_concurrent: usize,
}

/// Registry of live sessions plus a short terminal history.
pub struct SessionRegistry {
    inner: Mutex<RegistryInner>,
}

impl SessionRegistry {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                active: HashMap::new(),
                history: VecDeque::new(),
                max_concurrent: max_concurrent.max(1),
            }),
        }
    }

    /// Check the concurrency policy and id uniqueness before the caller
    /// spends time loading models. Admission is re-checked at `register`.
    pub async fn check_can_start(&self, session_id: &str) -> Result<()> {
        let inner = self.inner.lock().await;
        inner.admission_check(session_id)
    }

    /// Admit a fully constructed session.
    pub async fn register(&self, session: Arc<Session>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.admission_check(session.id())?;
        inner.active.insert(session.id().to_string(), session);
        Ok(())
    }

    /// Resolve an id to a live session, a terminal outcome, or nothing.
    pub async fn lookup(&self, session_id: &str) -> Lookup {
        let inner = self.inner.lock().await;
        if let Some(session) = inner.active.get(session_id) {
            return Lookup::Active(session.clone());
        }
        if let Some((_, outcome)) = inner
            .history
            .iter()
            .rev()
            .find(|(id, _)| id == session_id)
        {
            return Lookup::Terminal(outcome.clone());
        }
        Lookup::Unknown
    }

    /// Retire a session into the terminal history, releasing its resources
    /// once the last reference drops. Idempotent: a concurrent second stop
    /// replaces the entry instead of duplicating it.
    pub async fn finish(&self, session_id: &str, outcome: SessionOutcome) {
        let mut inner = self.inner.lock().await;
        inner.active.remove(session_id);
        inner.history.retain(|(id, _)| id != session_id);
        inner.history.push_back((session_id.to_string(), outcome));
        while inner.history.len() > HISTORY_CAPACITY {
            inner.history.pop_front();
        }
    }

    /// Drain all live sessions for shutdown; the caller aborts them without
    /// the registry lock held.
    pub async fn drain_active(&self) -> Vec<Arc<Session>> {
        let inner = self.inner.lock().await;
        inner.active.values().cloned().collect()
    }

    /// Number of live sessions.
    pub async fn active_count(&self) -> usize {
        self.inner.lock().await.active.len()
    }
}

impl RegistryInner {
    fn admission_check(&self, session_id: &str) -> Result<()> {
        if self.active.contains_key(session_id)
            || self.history.iter().any(|(id, _)| id == session_id)
        {
            return Err(EngineError::SessionAlreadyExists {
                session_id: session_id.to_string(),
            });
        }
        if self.active.len() >= self.max_concurrent {
            let active_id = self
                .active
                .keys()
                .next()
                .cloned()
                .unwrap_or_default();
            return Err(EngineError::SessionAlreadyActive { active_id });
        }
        Ok(())
    }
}
