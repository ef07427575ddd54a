//! HTTP server handle and the listener.
//!
//! A [`Server`] is a cheap, clonable handle. One clone runs the serve loop,
//! another is handed to the shutdown coordinator:
//!
//! ```text
//!   listen_and_serve(&server)            shutdown(&ctx, &server, …)
//!   ─────────────────────────            ──────────────────────────
//!   bind                                 wait for signal / cancellation
//!   accept ─┐                                  │
//!   accept  │ connections tracked              ▼
//!   accept ─┘ in `in_flight`             server.shutdown(&bounded_ctx)
//!     │                                    ├─ mark closed ───────────┐
//!     ▼ closed                             ├─ connections finish     │
//!   drop listener, return Ok               └─ Ok, or ctx error       │
//!     ▲──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Shutdown stops `accept()` immediately. In-flight connections are asked to
//! finish (HTTP/1 keep-alive is turned off, HTTP/2 sends GOAWAY) and the
//! shutdown call waits for them, bounded by its context.

use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::context::Context;
use crate::error::Error;
use crate::handler::{BoxedHandler, Handler};
use crate::request::Request;
use crate::response::Response;

/// Something that can be shut down gracefully within a context.
///
/// The shutdown coordinator only needs this capability, which keeps it
/// testable against handles that are not real servers.
pub trait Shutdown {
    /// Initiates a graceful close and waits for in-flight work, giving up
    /// with the context's error once `ctx` is done.
    fn shutdown(&self, ctx: &Context) -> impl Future<Output = Result<(), Error>> + Send;
}

/// The HTTP server handle.
#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
}

struct Inner {
    addr: String,
    handler: BoxedHandler,
    closed: watch::Sender<bool>,
    local_addr: watch::Sender<Option<SocketAddr>>,
    connections: watch::Sender<usize>,
}

impl Server {
    /// Configures a server that will bind to `addr` and answer every request
    /// with `handler`.
    ///
    /// The address is resolved when [`serve`](Server::serve) runs, so an
    /// invalid or busy address surfaces as a serve error.
    ///
    /// ```rust,no_run
    /// use halyard::{Request, Server};
    ///
    /// async fn hello(_: Request) -> &'static str { "hello" }
    ///
    /// let server = Server::bind("0.0.0.0:3000", hello);
    /// ```
    pub fn bind(addr: impl Into<String>, handler: impl Handler) -> Self {
        let (closed, _) = watch::channel(false);
        let (local_addr, _) = watch::channel(None);
        let (connections, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                addr: addr.into(),
                handler: handler.into_boxed_handler(),
                closed,
                local_addr,
                connections,
            }),
        }
    }

    /// Binds and serves until shutdown.
    ///
    /// Always returns an error. [`Error::ServerClosed`] means shutdown was
    /// initiated (possibly before this call) and the listening socket has
    /// been released. Use [`listen_and_serve`] to treat that as success.
    pub async fn serve(&self) -> Result<(), Error> {
        if self.is_closed() {
            return Err(Error::ServerClosed);
        }

        let listener = TcpListener::bind(self.inner.addr.as_str())
            .await
            .map_err(|source| Error::Bind { addr: self.inner.addr.clone(), source })?;
        let local = listener.local_addr()?;
        self.inner.local_addr.send_replace(Some(local));

        info!(addr = %local, "listening");

        let result = self.accept_loop(&listener).await;

        drop(listener);
        self.inner.local_addr.send_replace(None);
        info!(addr = %local, "listener closed");

        result
    }

    async fn accept_loop(&self, listener: &TcpListener) -> Result<(), Error> {
        let mut closed = self.inner.closed.subscribe();

        loop {
            tokio::select! {
                // Check shutdown first so a close stops accepting even while
                // connections are queued.
                biased;

                _ = closed.wait_for(|closed| *closed) => return Err(Error::ServerClosed),

                res = listener.accept() => match res {
                    Ok((stream, peer)) => self.admit(stream, peer)?,
                    Err(e) if is_transient(&e) => {
                        warn!("accept error: {e}");
                    }
                    Err(e) => {
                        error!("fatal accept error: {e}");
                        return Err(Error::Accept(e));
                    }
                },
            }
        }
    }

    /// Counts an accepted connection, then re-checks `closed`. A shutdown
    /// that saw zero connections has already flipped `closed`, so the
    /// connection is dropped unserved instead of outliving it.
    fn admit(&self, stream: TcpStream, peer: SocketAddr) -> Result<(), Error> {
        let tracked = Tracked::new(Arc::clone(&self.inner));
        if self.is_closed() {
            debug!(peer = %peer, "closed while accepting, dropping connection");
            return Err(Error::ServerClosed);
        }
        self.spawn_connection(stream, peer, tracked);
        Ok(())
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr, tracked: Tracked) {
        let handler = self.inner.handler.clone();
        let mut closed = self.inner.closed.subscribe();
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            let _tracked = tracked;

            let svc = service_fn(move |req| {
                let handler = handler.clone();
                async move { Ok::<_, Infallible>(dispatch(handler, req, peer).await) }
            });

            let builder = ConnBuilder::new(TokioExecutor::new());
            let conn = builder.serve_connection(io, svc);
            tokio::pin!(conn);

            let mut draining = false;
            loop {
                tokio::select! {
                    res = conn.as_mut() => {
                        if let Err(e) = res {
                            error!(peer = %peer, "connection error: {e}");
                        }
                        break;
                    }
                    _ = closed.wait_for(|closed| *closed), if !draining => {
                        debug!(peer = %peer, "draining connection");
                        draining = true;
                        conn.as_mut().graceful_shutdown();
                    }
                }
            }
        });
    }

    /// The bound address, once listening. `None` if the server closes first.
    /// Waits indefinitely if serving never starts.
    pub async fn listening(&self) -> Option<SocketAddr> {
        let mut local_addr = self.inner.local_addr.subscribe();
        let mut closed = self.inner.closed.subscribe();
        tokio::select! {
            biased;
            res = local_addr.wait_for(Option::is_some) => res.ok().and_then(|addr| *addr),
            _ = closed.wait_for(|closed| *closed) => None,
        }
    }

    /// Number of open connections.
    pub fn in_flight(&self) -> usize {
        *self.inner.connections.borrow()
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.closed.borrow()
    }
}

impl Shutdown for Server {
    async fn shutdown(&self, ctx: &Context) -> Result<(), Error> {
        self.inner.closed.send_replace(true);

        let mut connections = self.inner.connections.subscribe();
        info!(in_flight = self.in_flight(), "shutting down, draining connections");

        tokio::select! {
            // Idle completion wins over an already-expired context.
            biased;

            _ = connections.wait_for(|n| *n == 0) => {
                info!("server stopped");
                Ok(())
            }
            cause = ctx.done() => {
                warn!(in_flight = self.in_flight(), "shutdown gave up: {cause}");
                Err(Error::Context(cause))
            }
        }
    }
}

/// Starts `server` and blocks until it stops.
///
/// A stop caused by shutdown is the expected way out and returns `Ok(())`.
/// Bind failures and fatal accept errors are returned.
pub async fn listen_and_serve(server: &Server) -> Result<(), Error> {
    match server.serve().await {
        Ok(()) | Err(Error::ServerClosed) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Keeps the connection count accurate even if a connection task panics.
struct Tracked(Arc<Inner>);

impl Tracked {
    fn new(inner: Arc<Inner>) -> Self {
        inner.connections.send_modify(|n| *n += 1);
        Self(inner)
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.0.connections.send_modify(|n| *n -= 1);
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    ) || is_fd_exhaustion(e)
}

// ENFILE / EMFILE: the next accept may succeed once connections close.
#[cfg(unix)]
fn is_fd_exhaustion(e: &io::Error) -> bool {
    matches!(e.raw_os_error(), Some(23 | 24))
}

#[cfg(not(unix))]
fn is_fd_exhaustion(_: &io::Error) -> bool {
    false
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Core hot path: reads one request and produces one response.
///
/// Infallible: body read failures become `400`, so hyper never sees an error.
async fn dispatch(
    handler: BoxedHandler,
    req: hyper::Request<hyper::body::Incoming>,
    peer: SocketAddr,
) -> http::Response<Full<Bytes>> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(peer = %peer, "failed to read request body: {e}");
            return Response::status(http::StatusCode::BAD_REQUEST).into_http();
        }
    };

    handler.call(Request::from_parts(parts, body, peer)).await.into_http()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    async fn ok(_: Request) -> &'static str { "ok" }

    #[tokio::test]
    async fn serve_after_shutdown_reports_closed() {
        let server = Server::bind("127.0.0.1:0", ok);
        server.shutdown(&Context::background()).await.unwrap();

        assert!(matches!(server.serve().await, Err(Error::ServerClosed)));
        assert!(listen_and_serve(&server).await.is_ok());
        assert_eq!(server.listening().await, None);
    }

    #[tokio::test]
    async fn idle_shutdown_succeeds_with_expired_context() {
        let server = Server::bind("127.0.0.1:0", ok);
        let task = tokio::spawn({
            let server = server.clone();
            async move { listen_and_serve(&server).await }
        });
        assert!(server.listening().await.is_some());

        let (ctx, _guard) = Context::background().with_timeout(Duration::ZERO);
        server.shutdown(&ctx).await.unwrap();

        task.await.unwrap().unwrap();
        assert_eq!(server.in_flight(), 0);
    }

    #[tokio::test]
    async fn invalid_address_is_a_bind_error() {
        let server = Server::bind("127.0.0.1:66666", ok);
        assert!(matches!(listen_and_serve(&server).await, Err(Error::Bind { .. })));
    }

    #[tokio::test]
    async fn connection_accepted_during_shutdown_is_dropped() {
        let server = Server::bind("127.0.0.1:0", ok);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (stream, peer) = listener.accept().await.unwrap();

        server.shutdown(&Context::background()).await.unwrap();

        assert!(matches!(server.admit(stream, peer), Err(Error::ServerClosed)));
        assert_eq!(server.in_flight(), 0);

        let mut buf = Vec::new();
        let read = tokio::io::AsyncReadExt::read_to_end(&mut client, &mut buf).await;
        assert!(read.map_or(true, |n| n == 0));
    }

    #[test]
    fn transient_accept_errors() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::ConnectionAborted)));
        #[cfg(unix)]
        assert!(is_transient(&io::Error::from_raw_os_error(24)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }
}
