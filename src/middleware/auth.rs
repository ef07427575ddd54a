use std::sync::Arc;

use http::StatusCode;
use http::header::WWW_AUTHENTICATE;

use crate::auth::BasicAuth;
use crate::middleware::{Middleware, Next, from_fn};
use crate::request::Request;
use crate::response::Response;

/// Rejects requests without valid Basic credentials with `401` and a
/// `WWW-Authenticate` challenge for `realm`.
pub fn basic_auth(auth: BasicAuth, realm: &str) -> Middleware {
    let auth = Arc::new(auth);
    let challenge: Arc<str> = format!(r#"Basic realm="{realm}""#).into();

    from_fn(move |req: Request, next: Next| {
        let auth = Arc::clone(&auth);
        let challenge = Arc::clone(&challenge);
        async move {
            if !auth.check(&req) {
                return Response::builder()
                    .status(StatusCode::UNAUTHORIZED)
                    .header(WWW_AUTHENTICATE.as_str(), &challenge)
                    .no_body();
            }
            next.run(req).await
        }
    })
}
