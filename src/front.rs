//! The per-request pipeline.
//!
//! ```text
//! IncomingRequest
//!     → SessionStore::start (lifecycle checks, id rotation)
//!     → Router::dispatch (404 / 405 on miss)
//!     → Csrf::verify_form for POST, PUT, PATCH and DELETE (403 on rejection)
//!     → Action
//!     → SessionStore::finish (Set-Cookie)
//! ```
//!
//! Controllers and views live outside this crate; they are plugged in as [`Action`]s.

use crate::session_store::cookie_generator::{DefaultSessionCookieGenerator, SessionCookieGenerator};
use crate::{
    Config, ConfigError, Csrf, CsrfRejection, Router, Session, SessionCookieCommand, SessionError,
    SessionStore, SessionStoreImplementation, Variables,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};

const REAUTHENTICATE: &str = "Your session has ended, please log in again";

/// A controller action.
pub type Action =
    Box<dyn Fn(&mut RequestContext<'_>) -> Result<Response, SessionError> + Send + Sync>;

/// Box a closure as an [`Action`].
pub fn action<F>(f: F) -> Action
where
    F: Fn(&mut RequestContext<'_>) -> Result<Response, SessionError> + Send + Sync + 'static,
{
    Box::new(f)
}

/// The parts of an HTTP request the pipeline looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncomingRequest {
    /// The request method.
    pub method: String,
    /// The request path, without query string.
    pub path: String,
    /// The value of the session cookie, if the client sent one.
    pub session_cookie: Option<String>,
    /// The `User-Agent` header, empty if absent.
    pub user_agent: String,
    /// The decoded form body.
    pub form: HashMap<String, String>,
}

/// What an action sees of the request.
pub struct RequestContext<'a> {
    /// The active session.
    pub session: &'a mut Session,
    /// The values of the route's variable segments.
    pub variables: &'a Variables,
    /// The decoded form body.
    pub form: &'a HashMap<String, String>,
    /// The CSRF token issuer, for rendering forms and invalidating tokens.
    pub csrf: &'a Csrf,
    /// The time the request is handled at.
    pub now: DateTime<Utc>,
}

/// A minimal HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// The status code.
    pub status: u16,
    /// The headers, in order.
    pub headers: Vec<(String, String)>,
    /// The body.
    pub body: String,
}

/// Routes requests into actions, wrapping them in session handling and CSRF protection.
pub struct FrontController<Implementation, CookieGenerator = DefaultSessionCookieGenerator> {
    router: Router<Action>,
    sessions: SessionStore<Implementation, CookieGenerator>,
    csrf: Csrf,
}

impl<Implementation: SessionStoreImplementation> FrontController<Implementation> {
    /// Create a front controller from a configuration, failing if it does not validate.
    pub fn with_config(
        router: Router<Action>,
        implementation: Implementation,
        config: &Config,
    ) -> Result<Self, ConfigError> {
        config.validate().map_err(ConfigError::Validation)?;
        Ok(Self::new(
            router,
            SessionStore::new_with_config(implementation, config.session.clone())?,
            Csrf::new(&config.csrf),
        ))
    }
}

impl<Implementation: SessionStoreImplementation, CookieGenerator: SessionCookieGenerator>
    FrontController<Implementation, CookieGenerator>
{
    /// Create a front controller from its parts.
    pub fn new(
        router: Router<Action>,
        sessions: SessionStore<Implementation, CookieGenerator>,
        csrf: Csrf,
    ) -> Self {
        Self {
            router,
            sessions,
            csrf,
        }
    }

    /// Returns the session store.
    pub fn sessions(&self) -> &SessionStore<Implementation, CookieGenerator> {
        &self.sessions
    }

    /// Handle one request.
    pub fn handle(&self, request: &IncomingRequest, now: DateTime<Utc>) -> Response {
        let mut session = match self.sessions.start(
            request.session_cookie.as_deref(),
            &request.user_agent,
            now,
        ) {
            Ok(session) => session,
            Err(error) => return self.session_failure(&error),
        };

        let response = match self.route(request, &mut session, now) {
            Ok(response) => response,
            Err(error) if error.is_reauthentication_required() => {
                // Finishing a destroyed session deletes the cookie.
                session.end();
                Response::new(401, REAUTHENTICATE)
            }
            Err(error) => self.session_failure(&error),
        };

        match self.sessions.finish(session, now) {
            Ok(command) => response.with_session_cookie(&command, &self.sessions.config().cookie_name),
            Err(error) => self.session_failure(&error),
        }
    }

    fn route(
        &self,
        request: &IncomingRequest,
        session: &mut Session,
        now: DateTime<Utc>,
    ) -> Result<Response, SessionError> {
        let Some(found) = self.router.dispatch(&request.method, &request.path) else {
            let allowed = self.router.allowed_methods(&request.path);
            return Ok(if allowed.is_empty() {
                Response::new(404, "Not Found")
            } else {
                Response::new(405, "Method Not Allowed").with_header("Allow", &allowed.join(", "))
            });
        };

        if is_state_changing(&request.method) {
            match self.csrf.verify_form(session, &request.form, now) {
                Ok(()) => {}
                Err(CsrfRejection::Session(error)) => return Err(error),
                Err(CsrfRejection::MissingFields | CsrfRejection::InvalidToken { .. }) => {
                    return Ok(Response::new(
                        403,
                        "The form has expired or was already submitted, please reload the page",
                    ));
                }
            }
        }

        let mut context = RequestContext {
            session,
            variables: &found.variables,
            form: &request.form,
            csrf: &self.csrf,
            now,
        };
        (found.handler)(&mut context)
    }

    fn session_failure(&self, error: &SessionError) -> Response {
        if error.is_reauthentication_required() {
            Response::new(401, REAUTHENTICATE)
                .with_session_cookie(&SessionCookieCommand::Delete, &self.sessions.config().cookie_name)
        } else {
            log::error!("Session handling failed: {error}");
            Response::new(500, "Internal Server Error")
        }
    }
}

impl<Implementation: Debug, CookieGenerator> Debug
    for FrontController<Implementation, CookieGenerator>
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrontController")
            .field("router", &self.router)
            .field("sessions", &self.sessions)
            .field("csrf", &self.csrf)
            .finish()
    }
}

impl Debug for RequestContext<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("session", &self.session)
            .field("variables", &self.variables)
            .field("now", &self.now)
            .finish_non_exhaustive()
    }
}

fn is_state_changing(method: &str) -> bool {
    matches!(
        method.trim().to_ascii_uppercase().as_str(),
        "POST" | "PUT" | "PATCH" | "DELETE"
    )
}

impl IncomingRequest {
    /// Create a request without cookie, user agent or form body.
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            method: method.to_string(),
            path: path.to_string(),
            ..Default::default()
        }
    }

    /// Set the session cookie value.
    pub fn with_session_cookie(mut self, cookie_value: impl Into<String>) -> Self {
        self.session_cookie = Some(cookie_value.into());
        self
    }

    /// Set the user agent.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Add a form field.
    pub fn with_form_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.form.insert(name.into(), value.into());
        self
    }
}

impl Response {
    /// Create a response with the given status and body.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Create a `200 OK` response.
    pub fn ok(body: impl Into<String>) -> Self {
        Self::new(200, body)
    }

    /// Create a `303 See Other` response, the answer to a successful form submission.
    pub fn redirect(location: &str) -> Self {
        Self::new(303, "").with_header("Location", location)
    }

    /// Append a header.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Returns the first value of the header `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(known, _)| known.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    fn with_session_cookie(self, command: &SessionCookieCommand, cookie_name: &str) -> Self {
        match command.set_cookie_header(cookie_name) {
            Some(value) => self.with_header("Set-Cookie", &value),
            None => self,
        }
    }
}
