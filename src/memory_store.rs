use crate::session::SessionRecord;
use crate::session_store::WriteSessionResult;
use crate::{Result, SessionId, SessionStoreImplementation};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

/// A session backend keeping all records in a process-local map.
///
/// Suitable for tests and single-instance deployments. Keep in mind:
///
/// * records are lost on restart, logging every user out;
/// * behind a load balancer without sticky sessions, a client's requests may reach an instance
///   that does not know its session;
/// * expired records are only dropped when read or when [`MemoryStore::cleanup`] runs, so a
///   long-running process should call it periodically.
#[derive(Debug, Default)]
pub struct MemoryStore {
    session_map: RwLock<HashMap<SessionId, SessionRecord>>,
}

impl SessionStoreImplementation for MemoryStore {
    const MAXIMUM_RETRIES_ON_ID_COLLISION: Option<u8> = None;

    fn create_session(&self, id: &SessionId, record: &SessionRecord) -> Result<WriteSessionResult> {
        let mut session_map = self.session_map.write();
        if session_map.contains_key(id) {
            Ok(WriteSessionResult::SessionIdExists)
        } else {
            session_map.insert(id.clone(), record.clone());
            Ok(WriteSessionResult::Ok(()))
        }
    }

    fn read_session(&self, id: &SessionId) -> Result<Option<SessionRecord>> {
        Ok(self.session_map.read().get(id).cloned())
    }

    fn update_session(&self, id: &SessionId, record: &SessionRecord) -> Result<()> {
        self.session_map.write().insert(id.clone(), record.clone());
        Ok(())
    }

    fn update_existing_session(&self, id: &SessionId, record: &SessionRecord) -> Result<bool> {
        Ok(match self.session_map.write().get_mut(id) {
            Some(stored) => {
                *stored = record.clone();
                true
            }
            None => false,
        })
    }

    fn delete_session(&self, id: &SessionId) -> Result<()> {
        self.session_map.write().remove(id);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.session_map.write().clear();
        Ok(())
    }
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Default::default()
    }

    /// Returns the number of stored records, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.session_map.read().len()
    }

    /// Returns true if no record is stored.
    pub fn is_empty(&self) -> bool {
        self.session_map.read().is_empty()
    }

    /// Returns true if a record exists for the session identified by `cookie_value`.
    pub fn contains_cookie(&self, cookie_value: &str) -> bool {
        self.session_map
            .read()
            .contains_key(&SessionId::from_cookie_value(cookie_value))
    }

    /// Drops every record that expired before `now`.
    pub fn cleanup(&self, now: DateTime<Utc>) {
        let mut session_map = self.session_map.write();
        let initial_len = session_map.len();
        session_map.retain(|_, record| !record.is_expired(now));
        log::trace!(
            "Swept {} expired session records, {} remain",
            initial_len - session_map.len(),
            session_map.len()
        );
    }
}
