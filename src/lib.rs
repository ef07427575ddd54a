//! # halyard
//!
//! The serving lifecycle of an HTTP service, and nothing else: when the
//! listener starts, how requests pass through middleware and verb dispatch,
//! and how the process stops.
//!
//! ## The pieces
//!
//! - [`Server`] / [`listen_and_serve`]: bind, accept, serve over hyper.
//!   A stop caused by shutdown is the normal way out, not an error.
//! - [`shutdown`]: waits for a stop [`Signal`] or a [`Context`] to be done,
//!   then drains the server within a timeout.
//! - [`terminate_handler`]: lets an HTTP request send the stop signal.
//! - [`middleware::compose`]: first-in-last-out middleware stacks.
//! - [`Methods`]: case-insensitive dispatch by HTTP verb.
//! - [`BasicAuth`]: a fixed username/password check.
//!
//! TLS, routing by path, connection pooling and retries are out of scope.
//! Put a reverse proxy in front.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use halyard::{Context, Methods, Request, Response, Server, Signal, middleware, signal, terminate_handler};
//! use http::StatusCode;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), halyard::Error> {
//!     let (tx, rx) = signal::channel(1);
//!     signal::notify(tx.clone())?;
//!
//!     let app = Methods::register("GET", hello)
//!         .add("DELETE", terminate_handler(bye, tx, Signal::Terminate))
//!         .into_handler(not_allowed);
//!     let app = middleware::wrap(app, [middleware::trace()]);
//!
//!     let server = Server::bind("0.0.0.0:3000", app);
//!     halyard::run(&Context::background(), &server, Duration::from_secs(5), rx).await?;
//!     Ok(())
//! }
//!
//! async fn hello(_: Request) -> Response { Response::text("hello") }
//! async fn bye(_: Request) -> Response { Response::text("bye") }
//! async fn not_allowed(_: Request) -> StatusCode { StatusCode::METHOD_NOT_ALLOWED }
//! ```

mod auth;
mod context;
mod error;
mod handler;
mod methods;
mod request;
mod response;
mod server;
mod shutdown;

pub mod middleware;
pub mod signal;

pub use auth::BasicAuth;
pub use context::{CancelGuard, Context, ContextError};
pub use error::Error;
pub use handler::{BoxFuture, BoxedHandler, Handler};
pub use methods::{Methods, dispatch};
pub use request::Request;
pub use response::{IntoResponse, Response, ResponseBuilder};
pub use server::{Server, Shutdown, listen_and_serve};
pub use shutdown::{run, shutdown, terminate_handler};
pub use signal::Signal;
