//! Middleware layer.
//!
//! A [`Middleware`] is a function from handler to handler. It is the right
//! place for cross-cutting concerns: tracing, authentication, request-id
//! injection.
//!
//! # Ordering
//!
//! [`compose`] applies middleware first-in-last-out. The first middleware in
//! the list wraps outermost, so its pre-processing runs first and its
//! post-processing runs last:
//!
//! ```text
//! compose([a, b])(h)   ==   a(b(h))
//!
//!   a-pre → b-pre → h → b-post → a-post
//! ```
//!
//! Composing an already-composed handler wraps it again, so the newest
//! composition is outermost: `compose([b])(compose([a])(h)) == compose([b, a])(h)`.
//!
//! # Writing middleware
//!
//! ```rust
//! use halyard::middleware::{self, Next};
//! use halyard::{Request, Response};
//!
//! let stamp = middleware::from_fn(|req: Request, next: Next| async move {
//!     let res = next.run(req).await;
//!     Response::builder()
//!         .status(res.status_code())
//!         .header("x-served-by", "halyard")
//!         .json(res.body().to_vec())
//! });
//! ```

mod auth;
mod trace;

use std::future::Future;
use std::sync::Arc;

use crate::handler::{BoxedHandler, Handler};
use crate::request::Request;
use crate::response::{IntoResponse, Response};

pub use auth::basic_auth;
pub use trace::trace;

/// A function from handler to handler.
pub type Middleware = Arc<dyn Fn(BoxedHandler) -> BoxedHandler + Send + Sync + 'static>;

/// Folds `middlewares` into a single middleware, first-in-last-out.
///
/// The result is itself a [`Middleware`], so compositions nest.
pub fn compose<I>(middlewares: I) -> Middleware
where
    I: IntoIterator<Item = Middleware>,
{
    let stack: Vec<Middleware> = middlewares.into_iter().collect();
    Arc::new(move |handler: BoxedHandler| {
        // Right to left: the last middleware wraps the handler first, leaving
        // the first one outermost.
        stack.iter().rev().fold(handler, |inner, layer| layer(inner))
    })
}

/// Wraps `handler` in `middlewares`. Shorthand for `compose(middlewares)(handler)`.
pub fn wrap<I>(handler: impl Handler, middlewares: I) -> BoxedHandler
where
    I: IntoIterator<Item = Middleware>,
{
    compose(middlewares)(handler.into_boxed_handler())
}

/// The rest of the chain, as seen from inside a [`from_fn`] middleware.
pub struct Next(BoxedHandler);

impl Next {
    pub async fn run(self, req: Request) -> Response {
        self.0.call(req).await
    }
}

/// Builds a middleware from an async function of the request and the rest
/// of the chain.
pub fn from_fn<F, Fut, R>(f: F) -> Middleware
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    let f = Arc::new(f);
    Arc::new(move |inner: BoxedHandler| {
        let f = Arc::clone(&f);
        let layer = move |req: Request| f(req, Next(inner.clone()));
        layer.into_boxed_handler()
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use http::Method;

    use super::*;

    type Log = Arc<Mutex<String>>;

    fn recording(log: &Log, label: &'static str) -> Middleware {
        let log = Arc::clone(log);
        from_fn(move |req: Request, next: Next| {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push_str(&format!("{label}-pre"));
                let res = next.run(req).await;
                log.lock().unwrap().push_str(&format!("{label}-post"));
                res
            }
        })
    }

    fn base(log: &Log) -> BoxedHandler {
        let log = Arc::clone(log);
        (move |_req: Request| {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push('H');
                "ok"
            }
        })
        .into_boxed_handler()
    }

    async fn hit(handler: &BoxedHandler) {
        handler.call(Request::new(Method::GET, "/")).await;
    }

    #[tokio::test]
    async fn first_middleware_wraps_outermost() {
        let log = Log::default();
        let h = wrap(base(&log), [recording(&log, "1"), recording(&log, "2")]);

        hit(&h).await;

        assert_eq!(*log.lock().unwrap(), "1-pre2-preH2-post1-post");
    }

    #[tokio::test]
    async fn newest_composition_wraps_outermost() {
        let log = Log::default();
        let inner = compose([recording(&log, "1")])(base(&log));
        let outer = compose([recording(&log, "2")])(inner);

        hit(&outer).await;

        assert_eq!(*log.lock().unwrap(), "2-pre1-preH1-post2-post");

        let flat_log = Log::default();
        let flat = wrap(base(&flat_log), [recording(&flat_log, "2"), recording(&flat_log, "1")]);
        hit(&flat).await;
        assert_eq!(*flat_log.lock().unwrap(), *log.lock().unwrap());
    }

    #[tokio::test]
    async fn nested_compose_matches_flat_compose() {
        let log = Log::default();
        let nested = compose([compose([recording(&log, "1"), recording(&log, "2")]), recording(&log, "3")]);

        hit(&nested(base(&log))).await;

        assert_eq!(*log.lock().unwrap(), "1-pre2-pre3-preH3-post2-post1-post");
    }

    #[tokio::test]
    async fn empty_composition_is_identity() {
        let log = Log::default();
        hit(&wrap(base(&log), Vec::<Middleware>::new())).await;
        assert_eq!(*log.lock().unwrap(), "H");
    }

    #[tokio::test]
    async fn middleware_can_short_circuit() {
        let log = Log::default();
        let deny = from_fn(|_req: Request, _next: Next| async { http::StatusCode::FORBIDDEN });
        let h = wrap(base(&log), [deny]);

        let res = h.call(Request::new(Method::GET, "/")).await;

        assert_eq!(res.status_code(), http::StatusCode::FORBIDDEN);
        assert!(log.lock().unwrap().is_empty());
    }
}
