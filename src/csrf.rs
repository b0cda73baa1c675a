//! One-time anti-forgery tokens, bound to a form and stored in the session.
//!
//! Every form gets its own key, so several forms on one page do not invalidate each other.
//! A token is single-use unless it was issued as multi-use, for forms that may legitimately be
//! resubmitted after a validation failure.
//! Expired tokens are removed when they are looked up, never by a sweep.

use crate::{CsrfConfig, CsrfRejection, Session, SessionError};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use subtle::ConstantTimeEq;

/// The session key under which the token table is stored.
const TOKEN_TABLE_KEY: &str = "_csrf_tokens";

/// Number of random bytes in a token, hex encoded to twice as many characters.
const TOKEN_LENGTH: usize = 32;

/// Issues and validates CSRF tokens.
///
/// # Example
///
/// ```rust
/// # use campus_web::{Csrf, CsrfConfig, MemoryStore, SessionStore};
/// # fn main() -> Result<(), campus_web::SessionError> {
/// # let store = SessionStore::new(MemoryStore::new());
/// # let now = chrono::Utc::now();
/// let csrf = Csrf::new(&CsrfConfig::default());
/// let mut session = store.start(None, "Mozilla/5.0", now)?;
///
/// let token = csrf.generate_token(&mut session, "subscribe-form", false, now)?;
/// assert!(!csrf.validate_token(&mut session, "subscribe-form", "forged", now)?);
/// assert!(csrf.validate_token(&mut session, "subscribe-form", &token, now)?);
/// // Single-use tokens are gone after the first successful validation.
/// assert!(!csrf.validate_token(&mut session, "subscribe-form", &token, now)?);
/// # Ok(()) }
/// ```
#[derive(Debug, Clone)]
pub struct Csrf {
    ttl: Duration,
    key_field: String,
    token_field: String,
}

/// A token issued for one form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct TokenEntry {
    token: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    multi_use: bool,
}

/// The hidden fields to embed into a rendered form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormFields {
    /// Name of the field carrying the form key.
    pub key_field: String,
    /// The form key.
    pub key: String,
    /// Name of the field carrying the token.
    pub token_field: String,
    /// The token.
    pub token: String,
}

type TokenTable = BTreeMap<String, TokenEntry>;

impl Csrf {
    /// Create a token issuer with the given settings.
    pub fn new(config: &CsrfConfig) -> Self {
        Self {
            ttl: config.token_ttl(),
            key_field: config.key_field.clone(),
            token_field: config.token_field.clone(),
        }
    }

    /// Issue a new token for the form identified by `key`, replacing any previous one.
    ///
    /// The token is 32 random bytes, hex encoded.
    pub fn generate_token(
        &self,
        session: &mut Session,
        key: &str,
        multi_use: bool,
        now: DateTime<Utc>,
    ) -> Result<String, SessionError> {
        let mut bytes = [0u8; TOKEN_LENGTH];
        rand::thread_rng().fill(&mut bytes);
        let token = hex::encode(bytes);

        let mut table = Self::table(session)?;
        table.insert(
            key.to_string(),
            TokenEntry {
                token: token.clone(),
                created_at: now,
                expires_at: now + self.ttl,
                multi_use,
            },
        );
        Self::put_table(session, &table)?;

        log::debug!("Issued CSRF token for form `{key}`");
        Ok(token)
    }

    /// Check `submitted` against the token issued for `key`.
    ///
    /// An expired token is deleted and fails.
    /// A matching single-use token is deleted. A wrong guess leaves the token in place.
    pub fn validate_token(
        &self,
        session: &mut Session,
        key: &str,
        submitted: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, SessionError> {
        let mut table = Self::table(session)?;
        let Some(entry) = table.get(key) else {
            return Ok(false);
        };

        if now > entry.expires_at {
            log::debug!(
                "CSRF token for form `{key}` issued at {} has expired",
                entry.created_at
            );
            table.remove(key);
            Self::put_table(session, &table)?;
            return Ok(false);
        }

        let valid: bool = entry.token.as_bytes().ct_eq(submitted.as_bytes()).into();
        if valid && !entry.multi_use {
            table.remove(key);
            Self::put_table(session, &table)?;
        }
        Ok(valid)
    }

    /// Delete the token issued for `key`, whether it is multi-use or not.
    ///
    /// Used after a successful state-changing action, e.g. a login, to prevent replay.
    pub fn invalidate_token(&self, session: &mut Session, key: &str) -> Result<(), SessionError> {
        let mut table = Self::table(session)?;
        if table.remove(key).is_some() {
            Self::put_table(session, &table)?;
        }
        Ok(())
    }

    /// Issue a token for the form `key` and return the hidden fields to render with it.
    pub fn form_fields(
        &self,
        session: &mut Session,
        key: &str,
        multi_use: bool,
        now: DateTime<Utc>,
    ) -> Result<FormFields, SessionError> {
        let token = self.generate_token(session, key, multi_use, now)?;
        Ok(FormFields {
            key_field: self.key_field.clone(),
            key: key.to_string(),
            token_field: self.token_field.clone(),
            token,
        })
    }

    /// Validate the key and token fields of a submitted form.
    pub fn verify_form(
        &self,
        session: &mut Session,
        form: &HashMap<String, String>,
        now: DateTime<Utc>,
    ) -> Result<(), CsrfRejection> {
        let (Some(key), Some(token)) = (form.get(&self.key_field), form.get(&self.token_field))
        else {
            log::warn!("Rejected form submission without CSRF fields");
            return Err(CsrfRejection::MissingFields);
        };

        if self.validate_token(session, key, token, now)? {
            Ok(())
        } else {
            log::warn!("Rejected invalid CSRF token for form `{key}`");
            Err(CsrfRejection::InvalidToken { key: key.clone() })
        }
    }

    fn table(session: &Session) -> Result<TokenTable, SessionError> {
        Ok(session.get(TOKEN_TABLE_KEY)?.unwrap_or_default())
    }

    fn put_table(session: &mut Session, table: &TokenTable) -> Result<(), SessionError> {
        if table.is_empty() {
            session.remove(TOKEN_TABLE_KEY)?;
            Ok(())
        } else {
            session.set(TOKEN_TABLE_KEY, table)
        }
    }
}

impl FormFields {
    /// Renders the fields as hidden HTML inputs, escaping the attribute values.
    pub fn to_hidden_inputs(&self) -> String {
        format!(
            r#"<input type="hidden" name="{}" value="{}"><input type="hidden" name="{}" value="{}">"#,
            escape_attribute(&self.key_field),
            escape_attribute(&self.key),
            escape_attribute(&self.token_field),
            escape_attribute(&self.token),
        )
    }
}

fn escape_attribute(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
