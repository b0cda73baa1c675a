/// Errors raised while building a [`Router`](crate::Router).
///
/// These indicate a mistake in the route table and are meant to abort application start-up.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    /// The HTTP method was empty.
    #[error("route method must not be empty")]
    EmptyMethod,

    /// The HTTP method contained something other than ASCII letters.
    #[error("route method `{method}` must consist of ASCII letters only")]
    InvalidMethod {
        /// The rejected method.
        method: String,
    },

    /// The path was empty.
    #[error("route path must not be empty")]
    EmptyPath,

    /// The route contains an empty segment, e.g. `/courses//tags`.
    #[error("route `{route}` contains an empty segment")]
    EmptySegment {
        /// The normalized route key.
        route: String,
    },

    /// A variable segment consisted of the prefix only.
    #[error("route `{route}` contains a variable segment without a name")]
    EmptyVariableName {
        /// The normalized route key.
        route: String,
    },

    /// The same variable name appears twice in one route.
    #[error("route `{route}` binds the variable `{name}` more than once")]
    DuplicateVariable {
        /// The normalized route key.
        route: String,
        /// The repeated variable name.
        name: String,
    },

    /// A handler is already registered for this method and path.
    #[error("a handler for {method} {path} is already registered")]
    DuplicateRoute {
        /// The normalized method.
        method: String,
        /// The normalized path.
        path: String,
    },
}

/// All errors that can occur while starting, using or finishing a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The user agent of the request differs from the one the session was created with.
    /// The session was destroyed.
    #[error("the user agent does not match the one the session was created with")]
    UserAgentMismatch,

    /// The request carried a session id that was rotated out longer ago than the grace window allows.
    /// The session was destroyed.
    #[error("the session id was rotated out and its grace window has passed")]
    RegenerationWindowExpired,

    /// The session was used after it was destroyed.
    #[error("the session is not active")]
    NotActive,

    /// A session was attempted to be updated, but the session does not exist.
    /// This may happen due to concurrent modification.
    #[error("the session that was attempted to be updated does not exist, which indicates that it was concurrently deleted")]
    UpdatedSessionDoesNotExist,

    /// Tried as often as desired to generate a session id, but all generated ids already exist.
    #[error("the maximum number of retries to generate a session id was reached")]
    MaximumSessionIdGenerationTriesReached {
        /// The maximum number of retries that was reached.
        maximum: u8,
    },

    /// A session value could not be converted to or from its stored representation.
    #[error("session value `{key}` could not be converted: {source}")]
    Value {
        /// The key of the value.
        key: String,
        /// The conversion error.
        source: serde_json::Error,
    },

    /// An error occurred in the session store implementation.
    #[error("session store failure: {0}")]
    Store(#[from] anyhow::Error),
}

impl SessionError {
    /// Returns true if the client should be asked to log in again.
    ///
    /// This is the case when the session was destroyed as a reaction to the request,
    /// as opposed to internal failures.
    pub fn is_reauthentication_required(&self) -> bool {
        matches!(
            self,
            Self::UserAgentMismatch | Self::RegenerationWindowExpired
        )
    }
}

/// The reasons a state-changing request is refused by the CSRF check.
#[derive(Debug, thiserror::Error)]
pub enum CsrfRejection {
    /// The submitted form lacks the key or the token field.
    #[error("the submitted form carries no CSRF key or token")]
    MissingFields,

    /// The token for the given form key is unknown, expired or wrong.
    #[error("invalid CSRF token for form `{key}`")]
    InvalidToken {
        /// The form key the token was submitted for.
        key: String,
    },

    /// The token table could not be accessed.
    #[error(transparent)]
    Session(#[from] SessionError),
}

mod expect_impl_error {
    trait ExpectImplError: std::error::Error {}

    impl ExpectImplError for super::RouteError {}
    impl ExpectImplError for super::SessionError {}
    impl ExpectImplError for super::CsrfRejection {}
}
