use crate::session::{SessionId, SessionRecord, SessionState};
use crate::{ConfigError, Result, Session, SessionConfig, SessionError};
use chrono::{DateTime, Utc};
use cookie_generator::{DefaultSessionCookieGenerator, SessionCookieGenerator};
use std::fmt::{Debug, Formatter};

pub(crate) mod cookie_generator;

/// A session store.
///
/// This is the user-facing interface of the session store.
/// It runs the session lifecycle on top of CRUD-based storage operations on session records:
///
/// * a request without a known session gets a fresh one, bound to its user agent;
/// * a request whose user agent differs from the one the session was created with destroys the session;
/// * a session id older than [`SessionConfig::regenerate_after`] is rotated on the same request;
/// * a rotated-out id keeps working for [`SessionConfig::regeneration_grace`], and switches the
///   client over to the new id; afterwards it destroys the session;
/// * destroying a session also deletes the ids it was rotated from, and a rotated-out id whose
///   new id is gone is rejected, so a destroyed session can never be followed back into.
///
/// Requests on the same session are not serialized against each other.
/// Two concurrent requests that both rotate the id race on the old record, and the last writer wins.
pub struct SessionStore<Implementation, CookieGenerator = DefaultSessionCookieGenerator> {
    implementation: Implementation,
    cookie_generator: CookieGenerator,
    config: SessionConfig,
}

/// What the HTTP layer must do with the session cookie after a request.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum SessionCookieCommand {
    /// Set the session cookie.
    Set {
        /// The value of the session cookie.
        cookie_value: String,
        /// The expiry time of the session cookie.
        expiry: DateTime<Utc>,
    },
    /// Delete the session cookie.
    Delete,
    /// Leave the session cookie as it is.
    DoNothing,
}

/// Where a lookup of the request's cookie led.
enum Lookup {
    /// There is no usable record, a fresh session has to be created.
    Fresh,
    /// The record to continue with, and whether it belongs to a different cookie than the request's.
    Found {
        id: SessionId,
        cookie_value: String,
        record: SessionRecord,
        switched: bool,
    },
}

impl<Implementation: SessionStoreImplementation> SessionStore<Implementation> {
    /// Create a new session store with the given implementation and the default configuration.
    pub fn new(implementation: Implementation) -> Self {
        let config = SessionConfig::default();
        let cookie_generator = DefaultSessionCookieGenerator::new(config.cookie_length);
        Self::from_parts(implementation, cookie_generator, config)
    }

    /// Create a new session store with the given implementation and configuration.
    ///
    /// Fails if the configuration does not validate.
    pub fn new_with_config(
        implementation: Implementation,
        config: SessionConfig,
    ) -> std::result::Result<Self, ConfigError> {
        let cookie_generator = DefaultSessionCookieGenerator::new(config.cookie_length);
        Self::new_with_cookie_generator(implementation, cookie_generator, config)
    }
}

impl<Implementation: SessionStoreImplementation, CookieGenerator: SessionCookieGenerator>
    SessionStore<Implementation, CookieGenerator>
{
    /// Create a new session store with the given implementation, cookie generator and configuration.
    ///
    /// Fails if the configuration does not validate.
    pub fn new_with_cookie_generator(
        implementation: Implementation,
        cookie_generator: CookieGenerator,
        config: SessionConfig,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate().map_err(ConfigError::Validation)?;
        Ok(Self::from_parts(implementation, cookie_generator, config))
    }

    fn from_parts(
        implementation: Implementation,
        cookie_generator: CookieGenerator,
        config: SessionConfig,
    ) -> Self {
        Self {
            implementation,
            cookie_generator,
            config,
        }
    }

    /// Returns the configuration of this store.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Returns a reference to the storage implementation.
    pub fn implementation(&self) -> &Implementation {
        &self.implementation
    }

    /// Consume the store and return its storage implementation.
    pub fn into_inner(self) -> Implementation {
        self.implementation
    }

    /// Start the session for a request.
    ///
    /// `cookie_value` is the value of the session cookie sent by the client, if any, and
    /// `user_agent` the user agent header of the request.
    /// The returned session is always [`SessionState::Active`].
    ///
    /// A session that was destroyed in reaction to the request is reported as
    /// [`SessionError::UserAgentMismatch`] or [`SessionError::RegenerationWindowExpired`];
    /// the caller should delete the cookie and ask the client to log in again.
    pub fn start(
        &self,
        cookie_value: Option<&str>,
        user_agent: &str,
        now: DateTime<Utc>,
    ) -> std::result::Result<Session, SessionError> {
        let Lookup::Found {
            id,
            cookie_value,
            record,
            switched,
        } = self.lookup(cookie_value, user_agent, now)?
        else {
            let record = SessionRecord::new(now, user_agent, self.config.record_ttl());
            let (id, cookie_value) = self.create(&record)?;
            log::debug!("Created session {id:?}");
            let mut session = Session::new(id, cookie_value, record);
            session.cookie_renewed = true;
            return Ok(session);
        };

        let mut session = Session::new(id, cookie_value, record);
        session.cookie_renewed = switched;
        if now - session.record.created_at > self.config.regenerate_after() {
            self.rotate(&mut session, now)?;
        }
        Ok(session)
    }

    /// Finds the record for the request's cookie, following ids that were rotated out.
    fn lookup(
        &self,
        cookie_value: Option<&str>,
        user_agent: &str,
        now: DateTime<Utc>,
    ) -> std::result::Result<Lookup, SessionError> {
        let Some(cookie_value) = cookie_value else {
            return Ok(Lookup::Fresh);
        };
        let mut cookie_value = cookie_value.to_string();
        let mut id = SessionId::from_cookie_value(&cookie_value);
        let Some(mut record) = self.read_live(&id, now)? else {
            // Unknown ids are never adopted, the client gets a new one.
            return Ok(Lookup::Fresh);
        };
        let mut switched = false;

        loop {
            self.check(&id, &record, user_agent, now)?;

            let Some(pending_cookie_value) = record.pending_cookie_value.take() else {
                return Ok(Lookup::Found {
                    id,
                    cookie_value,
                    record,
                    switched,
                });
            };

            // The client still uses the old id of a rotation, switch it over to the new one.
            let pending_id = SessionId::from_cookie_value(&pending_cookie_value);
            let Some(pending_record) = self.read_live(&pending_id, now)? else {
                // The new id was destroyed or expired, and the old one goes with it.
                log::warn!("Session {id:?} was rotated to {pending_id:?}, which no longer exists");
                self.implementation.delete_session(&id)?;
                return Err(SessionError::RegenerationWindowExpired);
            };
            log::debug!("Completing regeneration of session {id:?} to {pending_id:?}");

            id = pending_id;
            cookie_value = pending_cookie_value;
            record = pending_record;
            switched = true;
        }
    }

    /// Destroys the session if its rotation grace window has passed or its user agent changed.
    fn check(
        &self,
        id: &SessionId,
        record: &SessionRecord,
        user_agent: &str,
        now: DateTime<Utc>,
    ) -> std::result::Result<(), SessionError> {
        match record.state(now, self.config.regeneration_grace()) {
            SessionState::Destroyed => {
                log::warn!("Session {id:?} was used after its regeneration grace window");
                self.implementation.delete_session(id)?;
                return Err(SessionError::RegenerationWindowExpired);
            }
            SessionState::Fresh | SessionState::Active | SessionState::RegenerationPending => {}
        }

        if record.user_agent != user_agent {
            log::warn!("User agent changed for session {id:?}, destroying it");
            self.delete_with_predecessors(id, record)?;
            return Err(SessionError::UserAgentMismatch);
        }
        Ok(())
    }

    /// Finish the session of a request, persisting its changes.
    ///
    /// Returns what to do with the session cookie.
    pub fn finish(
        &self,
        mut session: Session,
        now: DateTime<Utc>,
    ) -> std::result::Result<SessionCookieCommand, SessionError> {
        if session.state == SessionState::Destroyed {
            self.delete_with_predecessors(&session.id, &session.record)?;
            log::debug!("Destroyed session {:?}", session.id);
            return Ok(SessionCookieCommand::Delete);
        }

        if session.regeneration_requested {
            self.rotate(&mut session, now)?;
        } else if session.changed {
            if !self.implementation.update_existing_session(&session.id, &session.record)? {
                return Err(SessionError::UpdatedSessionDoesNotExist);
            }
        }

        if session.cookie_renewed {
            Ok(SessionCookieCommand::Set {
                cookie_value: session.cookie_value,
                expiry: session.record.expiry,
            })
        } else {
            Ok(SessionCookieCommand::DoNothing)
        }
    }

    /// Moves the values of `session` to a new id.
    ///
    /// The old record stays behind with the values, the rotation time and a reference to the new id,
    /// so in-flight requests with the old cookie can follow.
    fn rotate(
        &self,
        session: &mut Session,
        now: DateTime<Utc>,
    ) -> std::result::Result<(), SessionError> {
        let mut successor = session.record.successor(now, self.config.record_ttl());
        successor.predecessor = Some(session.id.clone().into());
        let (new_id, new_cookie_value) = self.create(&successor)?;

        let mut retired = session.record.clone();
        retired.destroyed_at = Some(now);
        retired.pending_cookie_value = Some(new_cookie_value.clone());
        self.implementation.update_session(&session.id, &retired)?;

        log::debug!("Regenerated session {:?} as {new_id:?}", session.id);
        session.id = new_id;
        session.cookie_value = new_cookie_value;
        session.record = successor;
        session.changed = false;
        session.cookie_renewed = true;
        session.regeneration_requested = false;
        Ok(())
    }

    /// Writes `record` under a newly generated id, retrying on id collisions.
    fn create(
        &self,
        record: &SessionRecord,
    ) -> std::result::Result<(SessionId, String), SessionError> {
        let mut attempts: u8 = 0;
        loop {
            let cookie_value = self.cookie_generator.generate_cookie();
            let id = SessionId::from_cookie_value(&cookie_value);
            match self.implementation.create_session(&id, record)? {
                WriteSessionResult::Ok(()) => return Ok((id, cookie_value)),
                WriteSessionResult::SessionIdExists => {
                    attempts = attempts.saturating_add(1);
                    if let Some(maximum) = Implementation::MAXIMUM_RETRIES_ON_ID_COLLISION {
                        if attempts >= maximum {
                            return Err(SessionError::MaximumSessionIdGenerationTriesReached {
                                maximum,
                            });
                        }
                    }
                }
            }
        }
    }

    /// Deletes the record of `id` and the chain of rotated-out ids leading to it,
    /// so none of them can be followed back into the session.
    fn delete_with_predecessors(
        &self,
        id: &SessionId,
        record: &SessionRecord,
    ) -> std::result::Result<(), SessionError> {
        self.implementation.delete_session(id)?;
        let mut predecessor = record.predecessor.map(SessionId::from);
        while let Some(id) = predecessor {
            predecessor = self
                .implementation
                .read_session(&id)?
                .and_then(|record| record.predecessor)
                .map(SessionId::from);
            self.implementation.delete_session(&id)?;
        }
        Ok(())
    }

    /// Reads a record, deleting it if it is past its expiry.
    fn read_live(
        &self,
        id: &SessionId,
        now: DateTime<Utc>,
    ) -> std::result::Result<Option<SessionRecord>, SessionError> {
        match self.implementation.read_session(id)? {
            Some(record) if record.is_expired(now) => {
                self.implementation.delete_session(id)?;
                Ok(None)
            }
            record => Ok(record),
        }
    }

    /// Empties the entire store, deleting all sessions.
    pub fn clear_store(&self) -> Result {
        self.implementation.clear()
    }
}

impl<Implementation: Debug, CookieGenerator> Debug
    for SessionStore<Implementation, CookieGenerator>
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("implementation", &self.implementation)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// This is the backend-facing interface of the session store.
/// It defines simple [CRUD]-methods on session records.
///
/// The session id is expected to be the primary key, uniquely identifying a record.
/// Methods take `&self`, implementations are expected to synchronize internally.
///
/// [CRUD]: https://en.wikipedia.org/wiki/Create,_read,_update_and_delete
pub trait SessionStoreImplementation {
    /// Writing a session may fail if the id already exists.
    /// This constant indicates how often the caller should retry with different randomly generated ids until it should give up.
    /// The value `None` indicates that the caller should never give up, possibly looping infinitely.
    const MAXIMUM_RETRIES_ON_ID_COLLISION: Option<u8>;

    /// Create a session with the given `id` and `record`, unless the id exists already.
    fn create_session(&self, id: &SessionId, record: &SessionRecord) -> Result<WriteSessionResult>;

    /// Read the session with the given `id`.
    fn read_session(&self, id: &SessionId) -> Result<Option<SessionRecord>>;

    /// Write the session with the given `id`, creating it if it does not exist.
    fn update_session(&self, id: &SessionId, record: &SessionRecord) -> Result<()>;

    /// Write the session with the given `id` only if it exists.
    /// Returns false if it does not exist.
    fn update_existing_session(&self, id: &SessionId, record: &SessionRecord) -> Result<bool>;

    /// Delete the session with the given `id`.
    fn delete_session(&self, id: &SessionId) -> Result<()>;

    /// Delete all sessions in the store.
    fn clear(&self) -> Result<()>;
}

/// The result of writing a session, indicating if the session could be written, or if the id collided.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum WriteSessionResult<OkData = ()> {
    /// The session could be written without id collision.
    Ok(OkData),
    /// The session could not be written, because the chosen id already exists.
    SessionIdExists,
}

impl SessionCookieCommand {
    /// Formats this command as the value of a `Set-Cookie` header for the cookie called `name`.
    ///
    /// Returns `None` for [`SessionCookieCommand::DoNothing`].
    pub fn set_cookie_header(&self, name: &str) -> Option<String> {
        match self {
            Self::Set {
                cookie_value,
                expiry,
            } => Some(format!(
                "{name}={cookie_value}; Expires={}; Path=/; HttpOnly; SameSite=Lax",
                expiry.format("%a, %d %b %Y %H:%M:%S GMT")
            )),
            Self::Delete => Some(format!(
                "{name}=; Expires=Thu, 01 Jan 1970 00:00:00 GMT; Max-Age=0; Path=/; HttpOnly; SameSite=Lax"
            )),
            Self::DoNothing => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use chrono::{Duration, TimeZone};
    use cookie_generator::DebugSessionCookieGenerator;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn store() -> SessionStore<MemoryStore, DebugSessionCookieGenerator> {
        SessionStore::new_with_cookie_generator(
            MemoryStore::new(),
            DebugSessionCookieGenerator::new(32),
            SessionConfig::default(),
        )
        .unwrap()
    }

    /// A store whose every `create_session` collides.
    #[derive(Debug, Default)]
    struct CollidingStore;

    impl SessionStoreImplementation for CollidingStore {
        const MAXIMUM_RETRIES_ON_ID_COLLISION: Option<u8> = Some(3);

        fn create_session(&self, _: &SessionId, _: &SessionRecord) -> Result<WriteSessionResult> {
            Ok(WriteSessionResult::SessionIdExists)
        }

        fn read_session(&self, _: &SessionId) -> Result<Option<SessionRecord>> {
            Ok(None)
        }

        fn update_session(&self, _: &SessionId, _: &SessionRecord) -> Result<()> {
            Ok(())
        }

        fn update_existing_session(&self, _: &SessionId, _: &SessionRecord) -> Result<bool> {
            Ok(false)
        }

        fn delete_session(&self, _: &SessionId) -> Result<()> {
            Ok(())
        }

        fn clear(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn id_generation_gives_up_after_maximum_retries() {
        let store = SessionStore::new(CollidingStore);
        assert!(matches!(
            store.start(None, "agent", now()),
            Err(SessionError::MaximumSessionIdGenerationTriesReached { maximum: 3 })
        ));
    }

    #[test]
    fn fresh_sessions_set_the_cookie() {
        let store = store();
        let session = store.start(None, "agent", now()).unwrap();
        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(
            store.finish(session, now()).unwrap(),
            SessionCookieCommand::Set {
                cookie_value: format!("{:032}", 0),
                expiry: now() + Duration::hours(24),
            }
        );
    }

    #[test]
    fn unchanged_sessions_leave_the_cookie_alone() {
        let store = store();
        let session = store.start(None, "agent", now()).unwrap();
        let SessionCookieCommand::Set { cookie_value, .. } = store.finish(session, now()).unwrap()
        else {
            panic!("fresh session must set the cookie")
        };

        let session = store
            .start(Some(&cookie_value), "agent", now() + Duration::minutes(1))
            .unwrap();
        assert_eq!(
            store.finish(session, now() + Duration::minutes(1)).unwrap(),
            SessionCookieCommand::DoNothing
        );
    }

    #[test]
    fn finishing_a_deleted_session_fails() {
        let store = store();
        let mut session = store.start(None, "agent", now()).unwrap();
        store.clear_store().unwrap();
        session.set("k", 1).unwrap();
        assert!(matches!(
            store.finish(session, now()),
            Err(SessionError::UpdatedSessionDoesNotExist)
        ));
    }

    #[test]
    fn set_cookie_header_formats_commands() {
        let command = SessionCookieCommand::Set {
            cookie_value: "abc".to_string(),
            expiry: now(),
        };
        assert_eq!(
            command.set_cookie_header("session").unwrap(),
            "session=abc; Expires=Fri, 01 Mar 2024 12:00:00 GMT; Path=/; HttpOnly; SameSite=Lax"
        );
        assert!(SessionCookieCommand::Delete
            .set_cookie_header("session")
            .unwrap()
            .starts_with("session=; "));
        assert_eq!(SessionCookieCommand::DoNothing.set_cookie_header("session"), None);
    }
}
