use rand::distributions::{Alphanumeric, DistString};
use std::sync::atomic::{AtomicUsize, Ordering};

/// A type with the ability to generate cookies.
pub trait SessionCookieGenerator {
    /// Generate a cookie, i.e. a string that is a valid HTTP cookie value.
    fn generate_cookie(&self) -> String;
}

/// The default cookie generator with focus on security.
/// It uses [rand::thread_rng] as a random source and the [Alphanumeric] distribution to generate cookie strings.
/// This gives `log_2(26+26+10) ≥ 5.95` bits of entropy per character.
#[derive(Debug, Clone, Copy)]
pub struct DefaultSessionCookieGenerator {
    length: usize,
}

impl DefaultSessionCookieGenerator {
    /// Create a generator producing cookies of `length` characters.
    pub fn new(length: usize) -> Self {
        Self { length }
    }
}

impl Default for DefaultSessionCookieGenerator {
    fn default() -> Self {
        Self::new(64)
    }
}

impl SessionCookieGenerator for DefaultSessionCookieGenerator {
    fn generate_cookie(&self) -> String {
        let mut cookie = String::new();
        Alphanumeric.append_string(&mut rand::thread_rng(), &mut cookie, self.length);
        cookie
    }
}

/// A debug cookie generator that generates an ascending sequence of integers, formatted as strings padded with zeroes.
///
/// **Only use this in tests**, its cookies are trivially guessable.
#[derive(Debug, Default)]
pub struct DebugSessionCookieGenerator {
    next_index: AtomicUsize,
    length: usize,
}

impl DebugSessionCookieGenerator {
    /// Create a generator producing cookies of `length` characters, starting at zero.
    pub fn new(length: usize) -> Self {
        Self {
            next_index: AtomicUsize::new(0),
            length,
        }
    }
}

impl SessionCookieGenerator for DebugSessionCookieGenerator {
    fn generate_cookie(&self) -> String {
        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        format!("{:0width$}", index, width = self.length)
    }
}
