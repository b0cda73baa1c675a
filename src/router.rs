//! Method and path based request routing.
//!
//! Routes are registered once at start-up into a trie of path segments.
//! The first level of the trie is the HTTP method, every further level is one `/`-delimited
//! segment of the path.
//! A segment starting with [`VARIABLE_PREFIX`] matches any value and binds it to the name
//! following the prefix.
//!
//! Literal segments always win over variables at the same position.
//! Variables are only considered if no literal branch, including everything below it, matches.

mod node;

use crate::RouteError;
use node::{Node, Segment};
use std::collections::HashSet;
use std::fmt::{Debug, Formatter};

/// Marks a path segment as a variable, e.g. `/courses/:courseId`.
pub const VARIABLE_PREFIX: char = ':';

/// A prefix-tree router mapping a method and a path to a handler of type `H`.
///
/// The router is built mutably and only read afterwards, so it can be shared between threads
/// without locking once construction is finished.
///
/// # Example
///
/// ```rust
/// # use campus_web::Router;
/// # fn main() -> Result<(), campus_web::RouteError> {
/// let mut router = Router::new();
/// router.get("/courses/:courseId", "show course")?;
/// router.get("/courses/new", "new course form")?;
///
/// let found = router.dispatch("GET", "/courses/42").unwrap();
/// assert_eq!(*found.handler, "show course");
/// assert_eq!(found.variables.get("courseId"), Some("42"));
///
/// let found = router.dispatch("GET", "/courses/new").unwrap();
/// assert_eq!(*found.handler, "new course form");
/// assert!(router.dispatch("DELETE", "/courses/42").is_none());
/// # Ok(()) }
/// ```
pub struct Router<H> {
    root: Node<H>,
    routes: Vec<(String, String)>,
}

/// A successful [`Router::dispatch`].
#[derive(Debug)]
pub struct Match<'r, H> {
    /// The handler registered for the route.
    pub handler: &'r H,
    /// The values bound to the variable segments of the route.
    pub variables: Variables,
}

/// Values bound to variable segments during dispatch.
///
/// Iteration yields the bindings in the order they were recorded, which is from the last variable
/// of the path to the first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Variables(Vec<(String, String)>);

impl<H> Router<H> {
    /// Create an empty router.
    pub fn new() -> Self {
        Self {
            root: Node::new(),
            routes: Vec::new(),
        }
    }

    /// Register `handler` for the given method and path.
    ///
    /// Fails if the method or path is empty, if the path contains an empty segment, if the same
    /// variable name is used twice, or if a handler is already registered for this exact route.
    /// These errors are meant to abort start-up.
    pub fn add(&mut self, method: &str, path: &str, handler: H) -> Result<(), RouteError> {
        let method = normalize_method(method);
        if method.is_empty() {
            return Err(RouteError::EmptyMethod);
        }
        if !is_valid_method(&method) {
            return Err(RouteError::InvalidMethod { method });
        }
        if path.trim().is_empty() {
            return Err(RouteError::EmptyPath);
        }

        let path = normalize_path(path);
        let key = route_key(&method, &path);
        let segments = parse_segments(&key)?;

        if self.root.insert(&segments, handler).is_err() {
            return Err(RouteError::DuplicateRoute { method, path });
        }

        log::debug!("Registered route {method} {}", display_path(&path));
        self.routes.push((method, path));
        Ok(())
    }

    /// Register `handler` for `GET` requests to `path`.
    pub fn get(&mut self, path: &str, handler: H) -> Result<(), RouteError> {
        self.add("GET", path, handler)
    }

    /// Register `handler` for `POST` requests to `path`.
    pub fn post(&mut self, path: &str, handler: H) -> Result<(), RouteError> {
        self.add("POST", path, handler)
    }

    /// Register `handler` for `PUT` requests to `path`.
    pub fn put(&mut self, path: &str, handler: H) -> Result<(), RouteError> {
        self.add("PUT", path, handler)
    }

    /// Register `handler` for `DELETE` requests to `path`.
    pub fn delete(&mut self, path: &str, handler: H) -> Result<(), RouteError> {
        self.add("DELETE", path, handler)
    }

    /// Register `handler` for `PATCH` requests to `path`.
    pub fn patch(&mut self, path: &str, handler: H) -> Result<(), RouteError> {
        self.add("PATCH", path, handler)
    }

    /// Register `handler` for `OPTIONS` requests to `path`.
    pub fn options(&mut self, path: &str, handler: H) -> Result<(), RouteError> {
        self.add("OPTIONS", path, handler)
    }

    /// Resolve a request to its handler and the values of its variable segments.
    ///
    /// Returns `None` if no route matches. This is an expected outcome, the caller decides
    /// whether to answer with a 404.
    /// Requests are held to the same rules as registered routes, so a method that is not all
    /// letters or a path with an empty segment never matches.
    pub fn dispatch(&self, method: &str, path: &str) -> Option<Match<'_, H>> {
        let method = normalize_method(method);
        if !is_valid_method(&method) {
            log::trace!("No route for malformed method {method:?}");
            return None;
        }
        let key = route_key(&method, &normalize_path(path));
        let segments: Vec<&str> = key.split('/').collect();
        if segments.contains(&"") {
            log::trace!("No route for {key}, it contains an empty segment");
            return None;
        }

        let mut bindings = Vec::new();
        match self.root.search(&segments, &mut bindings) {
            Some(handler) => Some(Match {
                handler,
                variables: Variables(bindings),
            }),
            None => {
                log::trace!("No route for {key}");
                None
            }
        }
    }

    /// Returns the methods for which `path` would be dispatched, sorted alphabetically.
    ///
    /// An empty result means the path is unknown for every method.
    pub fn allowed_methods(&self, path: &str) -> Vec<String> {
        let path = normalize_path(path);
        let segments: Vec<&str> = path.split('/').skip(1).collect();
        if segments.contains(&"") {
            return Vec::new();
        }

        let mut methods: Vec<String> = self
            .root
            .literal_children()
            .filter(|(_, node)| node.search(&segments, &mut Vec::new()).is_some())
            .map(|(method, _)| method.to_string())
            .collect();
        methods.sort();
        methods
    }

    /// Iterates over the registered routes as `(method, path)` pairs in registration order.
    pub fn routes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.routes
            .iter()
            .map(|(method, path)| (method.as_str(), display_path(path)))
    }

    /// Returns the number of registered routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns true if no route is registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl<H> Default for Router<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> Debug for Router<H> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.routes)
            .finish_non_exhaustive()
    }
}

impl Variables {
    /// Returns the value bound to the variable `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(known, _)| known == name)
            .map(|(_, value)| value.as_str())
    }

    /// Iterates over the `(name, value)` bindings.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Returns the number of bound variables.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if no variable was bound.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl IntoIterator for Variables {
    type Item = (String, String);
    type IntoIter = std::vec::IntoIter<(String, String)>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

fn normalize_method(method: &str) -> String {
    method.trim().to_ascii_uppercase()
}

fn is_valid_method(method: &str) -> bool {
    !method.is_empty() && method.chars().all(|c| c.is_ascii_alphabetic())
}

/// Trims whitespace, strips one trailing slash and makes sure a non-empty path starts with a slash.
/// The root path `/` normalizes to the empty string.
fn normalize_path(path: &str) -> String {
    let path = path.trim();
    let path = path.strip_suffix('/').unwrap_or(path);
    if path.is_empty() || path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

fn route_key(method: &str, path: &str) -> String {
    format!("{method}{path}")
}

fn display_path(path: &str) -> &str {
    if path.is_empty() {
        "/"
    } else {
        path
    }
}

fn parse_segments(key: &str) -> Result<Vec<Segment<'_>>, RouteError> {
    let mut seen = HashSet::new();
    key.split('/')
        .map(|segment| {
            if segment.is_empty() {
                return Err(RouteError::EmptySegment {
                    route: key.to_string(),
                });
            }
            let Some(name) = segment.strip_prefix(VARIABLE_PREFIX) else {
                return Ok(Segment::Literal(segment));
            };
            if name.is_empty() {
                return Err(RouteError::EmptyVariableName {
                    route: key.to_string(),
                });
            }
            if !seen.insert(name) {
                return Err(RouteError::DuplicateVariable {
                    route: key.to_string(),
                    name: name.to_string(),
                });
            }
            Ok(Segment::Variable(name))
        })
        .collect()
}
