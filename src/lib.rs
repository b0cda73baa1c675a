//! Request routing and session handling for a server-rendered course platform.
//!
//! This crate provides the request-level core the controllers of the platform plug into:
//!
//! * a [`Router`] resolving a method and path to a handler, with named variable segments
//!   like `/faculties/:facultyId/courses/:courseId/tags`;
//! * a [`SessionStore`] running the session lifecycle on top of a storage backend:
//!   creation, user agent binding, periodic id rotation with a grace window, and destruction;
//! * [`Csrf`], per-form one-time tokens kept in the session;
//! * a [`FrontController`] chaining these into a request pipeline.
//!
//! Nothing in this crate blocks on anything but the session storage backend, and all time
//! dependent operations take the current time as an argument.
//!
//! # Sessions
//!
//! The session store hands out a [`Session`] per request and takes it back at the end of the
//! request, answering with a [`SessionCookieCommand`] for the HTTP layer.
//! Sessions are passed explicitly through the request, there is no global session state.
//!
//! # Security
//!
//! Session records are stored under the [blake3] hash of the cookie value, so a leaked store
//! does not leak usable cookies. Session ids are rotated every
//! [`SessionConfig::regenerate_after`], and a session is destroyed as soon as a request presents
//! it with a different user agent than the one it was created with.
//! CSRF tokens are compared in constant time.
//!
//! # Example
//!
//! ```
//! use campus_web::{action, Config, FrontController, IncomingRequest, MemoryStore, Response, Router};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut router = Router::new();
//! router.get(
//!     "/courses/:courseId",
//!     action(|context| {
//!         let course_id = context.variables.get("courseId").unwrap_or_default();
//!         Ok(Response::ok(format!("course {course_id}")))
//!     }),
//! )?;
//!
//! let controller = FrontController::with_config(router, MemoryStore::new(), &Config::default())?;
//! let now = chrono::Utc::now();
//!
//! let response = controller.handle(
//!     &IncomingRequest::new("GET", "/courses/42").with_user_agent("Mozilla/5.0"),
//!     now,
//! );
//! assert_eq!(response.status, 200);
//! assert_eq!(response.body, "course 42");
//! // A fresh session was started, and its cookie is sent to the client.
//! assert!(response.header("Set-Cookie").unwrap().starts_with("session="));
//!
//! let response = controller.handle(&IncomingRequest::new("GET", "/faculties"), now);
//! assert_eq!(response.status, 404);
//! # Ok(()) }
//! ```

#![forbid(unsafe_code)]
#![deny(
    future_incompatible,
    missing_debug_implementations,
    nonstandard_style,
    missing_docs
)]
#![warn(unreachable_pub, unused_qualifications)]

/// An anyhow::Result with default return type of (), used by session storage backends.
pub type Result<T = ()> = std::result::Result<T, anyhow::Error>;

mod config;
mod csrf;
mod error;
mod front;
mod memory_store;
mod router;
mod session;
mod session_store;

pub use config::{Config, ConfigError, CsrfConfig, SessionConfig, ValidationError};
pub use csrf::{Csrf, FormFields};
pub use error::{CsrfRejection, RouteError, SessionError};
pub use front::{action, Action, FrontController, IncomingRequest, RequestContext, Response};
pub use memory_store::MemoryStore;
pub use router::{Match, Router, Variables, VARIABLE_PREFIX};
pub use session::{Session, SessionId, SessionIdType, SessionRecord, SessionState};
pub use session_store::cookie_generator::{
    DebugSessionCookieGenerator, DefaultSessionCookieGenerator, SessionCookieGenerator,
};
pub use session_store::{
    SessionCookieCommand, SessionStore, SessionStoreImplementation, WriteSessionResult,
};
