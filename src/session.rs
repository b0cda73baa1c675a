use crate::SessionError;
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};

/// A session with a client, as seen by a single request.
///
/// Sessions are obtained from [`SessionStore::start`](crate::SessionStore::start), which runs the
/// lifecycle checks, and handed back to [`SessionStore::finish`](crate::SessionStore::finish) to
/// persist changes. It is marked `#[must_use]`, as dropping it will not update the session store.
///
/// All accessors fail with [`SessionError::NotActive`] once the session was destroyed.
#[must_use]
pub struct Session {
    pub(crate) id: SessionId,
    pub(crate) cookie_value: String,
    pub(crate) record: SessionRecord,
    pub(crate) state: SessionState,
    pub(crate) changed: bool,
    pub(crate) cookie_renewed: bool,
    pub(crate) regeneration_requested: bool,
}

/// The lifecycle states of a session.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum SessionState {
    /// No session data exists yet for the client.
    Fresh,
    /// Normal operation.
    Active,
    /// A new id was minted, and the old id is still honoured during the grace window.
    RegenerationPending,
    /// The session is gone. The next request starts a fresh one.
    Destroyed,
}

/// The persisted form of a session.
///
/// Besides the application values, a record carries the bookkeeping needed for the session
/// lifecycle. Bookkeeping is never copied when a session id is rotated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) user_agent: String,
    pub(crate) expiry: DateTime<Utc>,
    #[serde(default)]
    pub(crate) destroyed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub(crate) pending_cookie_value: Option<String>,
    /// The id this one was rotated from, so destroying a session also ends its grace window.
    #[serde(default)]
    pub(crate) predecessor: Option<SessionIdType>,
    #[serde(default)]
    pub(crate) values: BTreeMap<String, serde_json::Value>,
}

/// The type of a session id.
pub type SessionIdType = [u8; blake3::OUT_LEN];

/// A session id.
///
/// Records are keyed by the hash of the cookie value, never by the cookie value itself.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SessionId(Box<SessionIdType>);

impl Session {
    pub(crate) fn new(id: SessionId, cookie_value: String, record: SessionRecord) -> Self {
        Self {
            id,
            cookie_value,
            record,
            state: SessionState::Active,
            changed: false,
            cookie_renewed: false,
            regeneration_requested: false,
        }
    }

    /// Returns the id of this session.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Returns the current lifecycle state.
    ///
    /// A session handed out by the store is always [`SessionState::Active`] until it is destroyed.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns when the current session id was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.record.created_at
    }

    /// Returns true if the values of this session were changed during this request.
    pub fn is_changed(&self) -> bool {
        self.changed
    }

    /// Returns the value stored under `key`, or `None` if there is none.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use campus_web::{MemoryStore, SessionStore};
    /// # fn main() -> Result<(), campus_web::SessionError> {
    /// # let store = SessionStore::new(MemoryStore::new());
    /// let mut session = store.start(None, "Mozilla/5.0", chrono::Utc::now())?;
    /// assert_eq!(session.get::<Vec<u32>>("role_ids")?, None);
    /// session.set("role_ids", vec![1, 3])?;
    /// assert_eq!(session.get::<Vec<u32>>("role_ids")?, Some(vec![1, 3]));
    /// # Ok(()) }
    /// ```
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, SessionError> {
        self.ensure_active()?;
        self.record
            .values
            .get(key)
            .map(|value| {
                T::deserialize(value).map_err(|source| SessionError::Value {
                    key: key.to_string(),
                    source,
                })
            })
            .transpose()
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn set<T: Serialize>(&mut self, key: &str, value: T) -> Result<(), SessionError> {
        self.ensure_active()?;
        let value = serde_json::to_value(value).map_err(|source| SessionError::Value {
            key: key.to_string(),
            source,
        })?;
        self.record.values.insert(key.to_string(), value);
        self.changed = true;
        Ok(())
    }

    /// Returns true if a value is stored under `key`.
    pub fn contains(&self, key: &str) -> Result<bool, SessionError> {
        self.ensure_active()?;
        Ok(self.record.values.contains_key(key))
    }

    /// Removes the value stored under `key`, returning whether there was one.
    pub fn remove(&mut self, key: &str) -> Result<bool, SessionError> {
        self.ensure_active()?;
        let removed = self.record.values.remove(key).is_some();
        self.changed |= removed;
        Ok(removed)
    }

    /// Requests a new session id for this session.
    ///
    /// The rotation happens in [`SessionStore::finish`](crate::SessionStore::finish):
    /// the values move to a new id, and the old id stays valid for the grace window.
    pub fn regenerate(&mut self) -> Result<(), SessionError> {
        self.ensure_active()?;
        self.regeneration_requested = true;
        Ok(())
    }

    /// Destroys this session.
    /// The record is deleted and the cookie removed in [`SessionStore::finish`](crate::SessionStore::finish).
    pub fn destroy(&mut self) -> Result<(), SessionError> {
        self.ensure_active()?;
        self.end();
        Ok(())
    }

    /// Marks the session destroyed regardless of its state.
    pub(crate) fn end(&mut self) {
        self.state = SessionState::Destroyed;
        self.record.values.clear();
    }

    fn ensure_active(&self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Active => Ok(()),
            _ => Err(SessionError::NotActive),
        }
    }
}

impl Debug for Session {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // The cookie value is a secret.
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("record", &self.record)
            .field("changed", &self.changed)
            .finish_non_exhaustive()
    }
}

impl SessionRecord {
    /// Create the record of a brand-new session.
    pub(crate) fn new(now: DateTime<Utc>, user_agent: &str, ttl: Duration) -> Self {
        Self {
            created_at: now,
            user_agent: user_agent.to_string(),
            expiry: now + ttl,
            destroyed_at: None,
            pending_cookie_value: None,
            predecessor: None,
            values: BTreeMap::new(),
        }
    }

    /// Create the record for a rotated id, carrying over the application values but none of the
    /// bookkeeping.
    pub(crate) fn successor(&self, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            values: self.values.clone(),
            ..Self::new(now, &self.user_agent, ttl)
        }
    }

    /// Returns the state of this record at `now`, given the grace window for rotated ids.
    pub fn state(&self, now: DateTime<Utc>, grace: Duration) -> SessionState {
        match self.destroyed_at {
            Some(destroyed_at) if now > destroyed_at + grace => SessionState::Destroyed,
            Some(_) => SessionState::RegenerationPending,
            None => SessionState::Active,
        }
    }

    /// Returns the time after which the store may forget this record.
    pub fn expiry(&self) -> DateTime<Utc> {
        self.expiry
    }

    /// Returns true if the store may forget this record.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry < now
    }
}

impl SessionId {
    /// Applies a cryptographic hash function on a cookie value to obtain the session id for that cookie.
    ///
    /// This is automatically done by the [`SessionStore`](crate::SessionStore), and this function is only public for test purposes.
    pub fn from_cookie_value(cookie_value: &str) -> Self {
        let hash = blake3::hash(cookie_value.as_bytes());
        Self(Box::new(hash.into()))
    }
}

impl From<SessionId> for SessionIdType {
    fn from(id: SessionId) -> Self {
        *id.0
    }
}

impl From<SessionIdType> for SessionId {
    fn from(id: SessionIdType) -> Self {
        Self(Box::new(id))
    }
}

impl Debug for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionId({})", hex::encode(&self.0[..4]))
    }
}
