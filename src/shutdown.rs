//! Shutdown coordination.
//!
//! # The usual wiring
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use halyard::{Context, Request, Server, listen_and_serve, shutdown, signal};
//!
//! # async fn hello(_: Request) -> &'static str { "hello" }
//! # async fn start(ctx: Context) -> Result<(), halyard::Error> {
//! let server = Server::bind("0.0.0.0:3000", hello);
//!
//! let (tx, mut rx) = signal::channel(1);
//! signal::notify(tx)?;
//!
//! // Wait for a stop signal, then drain.
//! let coordinator = {
//!     let server = server.clone();
//!     tokio::spawn(async move {
//!         let (caught, result) = shutdown(&ctx, &server, Duration::from_secs(5), &mut rx).await;
//!         if let Err(e) = result {
//!             tracing::error!(signal = ?caught, "shutdown: {e}");
//!         }
//!     })
//! };
//!
//! listen_and_serve(&server).await?;
//! # let _ = coordinator;
//! # Ok(())
//! # }
//! ```
//!
//! [`run`] packages exactly this.
//!
//! # Ordering guarantees
//!
//! - `Server::shutdown` is never called before a signal arrives or the
//!   context is done.
//! - It is called exactly once per coordinator run.
//! - The bounded shutdown context is released on every path.
//!
//! Run one coordinator per server lifecycle. Two coordinators on the same
//! channel race, and only one of them sees each signal.

use std::panic;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinError;
use tracing::{error, info, warn};

use crate::context::Context;
use crate::error::Error;
use crate::handler::{BoxedHandler, Handler};
use crate::request::Request;
use crate::server::{Server, Shutdown, listen_and_serve};
use crate::signal::Signal;

/// Waits for a stop signal or for `ctx` to be done, then shuts `server` down
/// within `timeout`.
///
/// Returns the caught signal (if a signal was the trigger) and the outcome:
///
/// | Trigger | Drain | Result |
/// |---|---|---|
/// | signal | ok | `Ok(())` |
/// | signal | failed | `Err(Error::Shutdown { cancelled: None, .. })` |
/// | `ctx` done | ok | `Err(Error::Cancelled(cause))` |
/// | `ctx` done | failed | `Err(Error::Shutdown { cancelled: Some(cause), .. })` |
///
/// The shutdown deadline is derived from `ctx`, so after a cancellation
/// trigger the drain only succeeds if nothing is in flight. A zero `timeout`
/// grants no grace beyond that either.
///
/// A closed channel is not a stop request: if every sender of `signals` is
/// dropped, the signal arm is disabled and only `ctx` can trigger.
pub async fn shutdown<S>(
    ctx: &Context,
    server: &S,
    timeout: Duration,
    signals: &mut mpsc::Receiver<Signal>,
) -> (Option<Signal>, Result<(), Error>)
where
    S: Shutdown,
{
    let (caught, cancelled) = tokio::select! {
        Some(signal) = signals.recv() => {
            info!(signal = %signal, "stop signal received");
            (Some(signal), None)
        }
        cause = ctx.done() => {
            info!("context done, shutting down: {cause}");
            (None, Some(cause))
        }
    };

    let result = {
        let (bounded, _release) = ctx.with_timeout(timeout);
        server.shutdown(&bounded).await
    };

    let result = match (result, cancelled) {
        (Ok(()), None) => Ok(()),
        (Ok(()), Some(cause)) => Err(Error::Cancelled(cause)),
        (Err(e), cancelled) => Err(Error::Shutdown { source: Box::new(e), cancelled }),
    };
    (caught, result)
}

/// Wraps `preprocess` so that, after it has produced its response, `signal`
/// is sent on `tx`.
///
/// This is how an HTTP request (an admin "stop" endpoint, say) asks the
/// process to shut down. The send waits for channel capacity; size the
/// channel with room for at least one signal so the request task is never
/// parked behind the coordinator. If the coordinator is gone the signal is
/// dropped with a warning.
pub fn terminate_handler(
    preprocess: impl Handler,
    tx: mpsc::Sender<Signal>,
    signal: Signal,
) -> BoxedHandler {
    let preprocess = preprocess.into_boxed_handler();
    let handler = move |req: Request| {
        let preprocess = preprocess.clone();
        let tx = tx.clone();
        async move {
            let res = preprocess.call(req).await;
            if tx.send(signal).await.is_err() {
                warn!(signal = %signal, "terminate requested but nobody is listening");
            }
            res
        }
    };
    handler.into_boxed_handler()
}

/// Serves `server` until a signal on `signals` or cancellation of `ctx`
/// stops it, then waits for the drain to finish.
///
/// Returns the signal that stopped the server. Errors from the listener
/// (bind, fatal accept) win over shutdown errors; when the listener fails
/// the coordinator is abandoned.
pub async fn run(
    ctx: &Context,
    server: &Server,
    timeout: Duration,
    mut signals: mpsc::Receiver<Signal>,
) -> Result<Option<Signal>, Error> {
    let coordinator = {
        let ctx = ctx.clone();
        let server = server.clone();
        tokio::spawn(async move { shutdown(&ctx, &server, timeout, &mut signals).await })
    };

    if let Err(e) = listen_and_serve(server).await {
        coordinator.abort();
        error!("listener failed: {e}");
        return Err(e);
    }

    let (caught, result) = joined(coordinator.await)?;
    if let Err(e) = &result {
        error!(signal = ?caught, "shutdown: {e}");
    }
    result.map(|()| caught)
}

/// A panicking coordinator re-raises its panic on the caller.
fn joined<T>(res: Result<T, JoinError>) -> Result<T, Error> {
    match res {
        Ok(value) => Ok(value),
        Err(join) if join.is_panic() => panic::resume_unwind(join.into_panic()),
        Err(_) => Err(Error::CoordinatorAborted),
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use http::Method;

    use super::*;
    use crate::context::ContextError;
    use crate::signal;

    /// Records every shutdown call and the state of the context it was given.
    #[derive(Default)]
    struct Recorder {
        calls: AtomicUsize,
        seen: Mutex<Vec<Option<ContextError>>>,
        fail: bool,
    }

    impl Recorder {
        fn failing() -> Self {
            Self { fail: true, ..Self::default() }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Shutdown for Recorder {
        async fn shutdown(&self, ctx: &Context) -> Result<(), Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(ctx.err());
            if self.fail {
                return Err(Error::Io(io::ErrorKind::UnexpectedEof.into()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn signal_is_caught_and_shutdown_runs_once() {
        for sent in [Signal::Terminate, Signal::Interrupt, Signal::Hangup] {
            let server = Recorder::default();
            let (tx, mut rx) = signal::channel(1);
            tx.send(sent).await.unwrap();

            let (caught, result) =
                shutdown(&Context::background(), &server, Duration::from_secs(5), &mut rx).await;

            assert_eq!(caught, Some(sent));
            assert!(result.is_ok());
            assert_eq!(server.calls(), 1);
        }
    }

    #[tokio::test]
    async fn unbounded_timeout_shuts_down() {
        let server = Recorder::default();
        let (tx, mut rx) = signal::channel(1);
        tx.send(Signal::Terminate).await.unwrap();

        let (caught, result) =
            shutdown(&Context::background(), &server, Duration::MAX, &mut rx).await;

        assert_eq!(caught, Some(Signal::Terminate));
        assert!(result.is_ok());
        assert_eq!(*server.seen.lock().unwrap(), vec![None]);
    }

    #[tokio::test]
    async fn bounded_context_is_live_during_shutdown() {
        let server = Recorder::default();
        let (tx, mut rx) = signal::channel(1);
        tx.send(Signal::Terminate).await.unwrap();

        shutdown(&Context::background(), &server, Duration::from_secs(5), &mut rx).await;

        assert_eq!(*server.seen.lock().unwrap(), vec![None]);
    }

    #[tokio::test]
    async fn cancelled_context_triggers_shutdown_with_its_error() {
        let server = Recorder::default();
        let (_tx, mut rx) = signal::channel(1);
        let (ctx, cancel) = Context::background().with_cancel();
        cancel.cancel();

        let (caught, result) = shutdown(&ctx, &server, Duration::ZERO, &mut rx).await;

        assert_eq!(caught, None);
        let err = result.unwrap_err();
        assert!(matches!(err, Error::Cancelled(ContextError::Canceled)));
        assert_eq!(err.cancellation(), Some(ContextError::Canceled));
        assert_eq!(server.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_deadline_triggers_shutdown() {
        let server = Recorder::default();
        let (_tx, mut rx) = signal::channel(1);
        let (ctx, _guard) = Context::background().with_timeout(Duration::from_secs(1));

        let (_, result) = shutdown(&ctx, &server, Duration::from_secs(5), &mut rx).await;

        assert_eq!(result.unwrap_err().cancellation(), Some(ContextError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn failed_shutdown_is_wrapped() {
        let server = Recorder::failing();
        let (tx, mut rx) = signal::channel(1);
        tx.send(Signal::Terminate).await.unwrap();

        let (caught, result) = shutdown(&Context::background(), &server, Duration::from_nanos(1), &mut rx).await;

        assert_eq!(caught, Some(Signal::Terminate));
        match result {
            Err(Error::Shutdown { source, cancelled: None }) => {
                assert!(matches!(*source, Error::Io(ref e) if e.kind() == io::ErrorKind::UnexpectedEof));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_shutdown_after_cancel_keeps_cancellation() {
        let server = Recorder::failing();
        let (_tx, mut rx) = signal::channel(1);
        let (ctx, cancel) = Context::background().with_cancel();
        cancel.cancel();

        let (_, result) = shutdown(&ctx, &server, Duration::from_secs(1), &mut rx).await;

        let err = result.unwrap_err();
        assert!(matches!(err, Error::Shutdown { .. }));
        assert_eq!(err.cancellation(), Some(ContextError::Canceled));
    }

    #[tokio::test]
    async fn closed_channel_waits_for_context() {
        let server = Recorder::default();
        let (tx, mut rx) = signal::channel(1);
        drop(tx);
        let (ctx, cancel) = Context::background().with_cancel();

        let waiting = tokio::spawn(async move {
            shutdown(&ctx, &server, Duration::ZERO, &mut rx).await.1
        });
        tokio::task::yield_now().await;
        assert!(!waiting.is_finished());

        cancel.cancel();
        assert!(matches!(waiting.await.unwrap(), Err(Error::Cancelled(_))));
    }

    #[tokio::test]
    async fn terminate_handler_signals_after_preprocess() {
        let (tx, mut rx) = signal::channel(1);
        let order = Arc::new(Mutex::new(Vec::new()));

        let preprocess = {
            let order = Arc::clone(&order);
            move |_req: Request| {
                let order = Arc::clone(&order);
                async move {
                    order.lock().unwrap().push("preprocess");
                    "bye"
                }
            }
        };
        let handler = terminate_handler(preprocess, tx, Signal::Terminate);

        assert!(rx.try_recv().is_err());
        let res = handler.call(Request::new(Method::POST, "/stop")).await;
        order.lock().unwrap().push("returned");

        assert_eq!(res.body(), b"bye");
        assert_eq!(rx.try_recv().unwrap(), Signal::Terminate);
        assert_eq!(*order.lock().unwrap(), vec!["preprocess", "returned"]);
    }

    #[tokio::test]
    async fn terminate_handler_survives_closed_channel() {
        let (tx, rx) = signal::channel(1);
        drop(rx);
        let handler = terminate_handler(|_req: Request| async { "bye" }, tx, Signal::Interrupt);

        let res = handler.call(Request::new(Method::POST, "/stop")).await;

        assert_eq!(res.body(), b"bye");
    }

    #[tokio::test]
    async fn aborted_coordinator_is_reported() {
        let task = tokio::spawn(std::future::pending::<()>());
        task.abort();
        assert!(matches!(joined(task.await), Err(Error::CoordinatorAborted)));
    }

    #[tokio::test]
    #[should_panic(expected = "coordinator blew up")]
    async fn coordinator_panic_is_resumed() {
        let task = tokio::spawn(async { panic!("coordinator blew up") });
        let _ = joined::<()>(task.await);
    }
}
