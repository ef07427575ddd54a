//! Minimal halyard service: verb dispatch, middleware, an authenticated stop
//! endpoint, and graceful shutdown on SIGINT / SIGTERM.
//!
//! Run with:
//!   cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/
//!   curl -X PUT http://localhost:3000/            # 405
//!   curl -X DELETE http://localhost:3000/         # 401
//!   curl -X DELETE -u admin:hunter2 http://localhost:3000/   # stops the server

use std::time::Duration;

use halyard::{
    BasicAuth, Context, Methods, Request, Response, Server, Signal, middleware, signal,
    terminate_handler,
};
use http::StatusCode;

#[tokio::main]
async fn main() -> Result<(), halyard::Error> {
    tracing_subscriber::fmt::init();

    let (tx, rx) = signal::channel(1);
    signal::notify(tx.clone())?;

    let stop = middleware::wrap(
        terminate_handler(goodbye, tx, Signal::Terminate),
        [middleware::basic_auth(BasicAuth::new([("admin", "hunter2")]), "admin")],
    );

    let app = Methods::register("GET", hello)
        .add("POST", echo)
        .add("DELETE", stop)
        .into_handler(not_allowed);
    let app = middleware::wrap(app, [middleware::trace()]);

    let server = Server::bind("0.0.0.0:3000", app);
    let caught = halyard::run(&Context::background(), &server, Duration::from_secs(5), rx).await?;

    tracing::info!(signal = ?caught, "bye");
    Ok(())
}

// GET / → 200 text
async fn hello(_req: Request) -> Response {
    Response::text("hello")
}

// POST / → echoes the body back as JSON bytes, untouched.
async fn echo(req: Request) -> Response {
    if req.body().is_empty() {
        return Response::status(StatusCode::BAD_REQUEST);
    }
    Response::json(req.body().to_vec())
}

async fn goodbye(_req: Request) -> Response {
    Response::text("shutting down")
}

async fn not_allowed(_req: Request) -> Response {
    Response::builder()
        .status(StatusCode::METHOD_NOT_ALLOWED)
        .header("allow", "GET, POST, DELETE")
        .no_body()
}
