use std::time::Instant;

use tracing::{Instrument, info, info_span};

use crate::middleware::{Middleware, Next, from_fn};
use crate::request::Request;

/// Per-request span with method and path, closed by an event carrying the
/// response status and latency.
pub fn trace() -> Middleware {
    from_fn(|req: Request, next: Next| {
        let span = info_span!("request", method = %req.method(), path = %req.path());
        async move {
            let started = Instant::now();
            let res = next.run(req).await;
            info!(
                status = res.status_code().as_u16(),
                latency_ms = started.elapsed().as_millis() as u64,
                "request completed"
            );
            res
        }
        .instrument(span)
    })
}
