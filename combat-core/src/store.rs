//! Registry of live combat sessions.
//!
//! Each session sits behind its own async mutex, so actions on one session
//! are applied one at a time while other sessions proceed independently. The
//! map itself is only locked for lookups and never across an await.

use crate::dice::DieRoller;
use crate::error::{CombatError, Result};
use crate::session::{CombatSession, SessionKey};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;

/// A session together with the dice it rolls with.
pub struct LiveSession {
    pub session: CombatSession,
    pub roller: Box<dyn DieRoller>,
}

impl LiveSession {
    pub fn new(session: CombatSession, roller: Box<dyn DieRoller>) -> Self {
        Self { session, roller }
    }
}

pub type SessionHandle = Arc<Mutex<LiveSession>>;

#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionKey, SessionHandle>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &SessionKey) -> Option<SessionHandle> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Register a new session. Fails if one is already live under `key`.
    pub fn create(&self, key: SessionKey, live: LiveSession) -> Result<SessionHandle> {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        if sessions.contains_key(&key) {
            return Err(CombatError::SessionAlreadyExists(key));
        }
        let handle = Arc::new(Mutex::new(live));
        sessions.insert(key, Arc::clone(&handle));
        Ok(handle)
    }

    pub fn remove(&self, key: &SessionKey) -> Option<SessionHandle> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    /// Remove `key` only if it still maps to `handle`. Returns whether it did.
    ///
    /// Guards against removing a newer session that reused the key.
    pub fn remove_if_same(&self, key: &SessionKey, handle: &SessionHandle) -> bool {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        match sessions.get(key) {
            Some(current) if Arc::ptr_eq(current, handle) => {
                sessions.remove(key);
                true
            }
            _ => false,
        }
    }

    pub fn contains(&self, key: &SessionKey) -> bool {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<SessionKey> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Sessions that have been idle for at least `timeout` as of `now`.
    ///
    /// A session whose lock is held is mid-action and therefore not idle.
    pub fn expired(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<(SessionKey, SessionHandle)> {
        let snapshot: Vec<(SessionKey, SessionHandle)> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(key, handle)| (key.clone(), Arc::clone(handle)))
            .collect();

        snapshot
            .into_iter()
            .filter(|(_, handle)| {
                handle
                    .try_lock()
                    .map(|live| live.session.is_idle(now, timeout))
                    .unwrap_or(false)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combatant::{CharacterRef, Combatant};
    use crate::content::ContentCatalog;
    use crate::testing::{sample_fighter, ScriptedRoller};

    fn live(owner: &str) -> LiveSession {
        let catalog = ContentCatalog::standard();
        let session = CombatSession::new(
            SessionKey::new(owner),
            vec![
                Combatant::from_sheet(CharacterRef::new(owner), &sample_fighter("Roland")),
                Combatant::from_monster(&catalog.monsters["goblin"]),
            ],
            10,
        );
        LiveSession::new(session, Box::new(ScriptedRoller::new([])))
    }

    #[test]
    fn test_create_get_remove() {
        let store = SessionStore::new();
        let key = SessionKey::new("alice");
        assert!(store.get(&key).is_none());

        store.create(key.clone(), live("alice")).unwrap();
        assert!(store.contains(&key));
        assert_eq!(store.len(), 1);

        assert!(matches!(
            store.create(key.clone(), live("alice")),
            Err(CombatError::SessionAlreadyExists(k)) if k == key
        ));

        assert!(store.remove(&key).is_some());
        assert!(store.is_empty());
    }

    #[test]
    fn test_remove_if_same_ignores_replaced_session() {
        let store = SessionStore::new();
        let key = SessionKey::new("alice");
        let old = store.create(key.clone(), live("alice")).unwrap();
        store.remove(&key);
        let new = store.create(key.clone(), live("alice")).unwrap();

        assert!(!store.remove_if_same(&key, &old));
        assert!(store.contains(&key));
        assert!(store.remove_if_same(&key, &new));
        assert!(!store.contains(&key));
    }

    #[tokio::test]
    async fn test_expired_skips_busy_sessions() {
        let store = SessionStore::new();
        let idle = store.create(SessionKey::new("idle"), live("idle")).unwrap();
        let busy = store.create(SessionKey::new("busy"), live("busy")).unwrap();
        store.create(SessionKey::new("fresh"), live("fresh")).unwrap();

        let past = Utc::now() - chrono::Duration::seconds(600);
        idle.lock().await.session.touch(past);
        busy.lock().await.session.touch(past);

        let _guard = busy.lock().await;
        let expired = store.expired(Utc::now(), Duration::from_secs(300));
        let keys: Vec<_> = expired.iter().map(|(k, _)| k.0.as_str()).collect();
        assert_eq!(keys, vec!["idle"]);
    }
}
