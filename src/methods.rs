//! Dispatch by HTTP verb.
//!
//! A [`Methods`] table maps verbs to handlers. Keys are normalised to
//! uppercase on insert and the incoming verb is normalised the same way, so
//! `get`, `Get` and `GET` all reach the handler registered for `GET`.
//! Anything without an entry (including extension verbs nobody registered)
//! goes to the fallback.
//!
//! ```rust
//! use halyard::{Methods, Request, Response};
//! use http::StatusCode;
//!
//! async fn list(_: Request) -> Response { Response::text("[]") }
//! async fn create(_: Request) -> StatusCode { StatusCode::CREATED }
//! async fn not_allowed(_: Request) -> StatusCode { StatusCode::METHOD_NOT_ALLOWED }
//!
//! let app = Methods::register("GET", list)
//!     .add("POST", create)
//!     .into_handler(not_allowed);
//! ```

use std::collections::HashMap;

use crate::handler::{BoxedHandler, Handler};
use crate::request::Request;

/// A verb → handler table. Last registration for a verb wins.
#[derive(Clone, Default)]
pub struct Methods {
    handlers: HashMap<String, BoxedHandler>,
}

impl Methods {
    pub fn new() -> Self {
        Self::default()
    }

    /// A table holding a single entry.
    pub fn register(method: impl AsRef<str>, handler: impl Handler) -> Self {
        Self::new().add(method, handler)
    }

    /// Adds (or replaces) the handler for `method`. Returns `self` for chaining.
    pub fn add(mut self, method: impl AsRef<str>, handler: impl Handler) -> Self {
        self.handlers.insert(normalize(method.as_ref()), handler.into_boxed_handler());
        self
    }

    pub fn get(&self, method: &str) -> Option<&BoxedHandler> {
        self.handlers.get(&normalize(method))
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// A handler that dispatches on the request verb, or calls `fallback`
    /// when the table has no entry for it.
    pub fn into_handler(self, fallback: impl Handler) -> BoxedHandler {
        dispatch(fallback, self)
    }
}

/// Builds the dispatching handler for `methods`, with `fallback` for
/// unregistered verbs.
pub fn dispatch(fallback: impl Handler, methods: Methods) -> BoxedHandler {
    let fallback = fallback.into_boxed_handler();
    let handler = move |req: Request| {
        let target = methods
            .get(req.method().as_str())
            .unwrap_or(&fallback)
            .clone();
        target.call(req)
    };
    handler.into_boxed_handler()
}

fn normalize(method: &str) -> String {
    method.to_ascii_uppercase()
}
