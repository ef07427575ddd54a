//! HTTP Basic authentication.
//!
//! # Security caveat
//!
//! Credentials are compared with plain byte equality: case-sensitive, no
//! hashing, and **not constant-time**. A remote attacker able to measure
//! response latency precisely may learn a password prefix. Keep this behind
//! TLS, rate limiting at the proxy, and use it for low-stakes admin
//! endpoints only.

use std::collections::HashMap;

use crate::request::Request;

/// A fixed registry of username → password pairs.
#[derive(Clone, Debug, Default)]
pub struct BasicAuth {
    users: HashMap<String, String>,
}

impl BasicAuth {
    pub fn new<I, U, P>(users: I) -> Self
    where
        I: IntoIterator<Item = (U, P)>,
        U: Into<String>,
        P: Into<String>,
    {
        Self {
            users: users.into_iter().map(|(u, p)| (u.into(), p.into())).collect(),
        }
    }

    /// Adds or replaces a user. Returns `self` for chaining.
    pub fn user(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.users.insert(username.into(), password.into());
        self
    }

    /// Whether `req` carries Basic credentials matching a registered pair.
    ///
    /// `false` when the `Authorization` header is absent, malformed, or does
    /// not match.
    pub fn check(&self, req: &Request) -> bool {
        let Some((username, password)) = req.basic_auth() else {
            return false;
        };
        self.users.get(&username).is_some_and(|expected| *expected == password)
    }
}
