use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::headers::{authorization::Basic, Authorization, HeaderMapExt};
use subtle::ConstantTimeEq;

const REALM: &str = "Basic realm=\"Authorization Required\"";

/// Username → password pairs allowed to read the scrape endpoint.
#[derive(Debug, Clone, Default)]
pub struct Accounts(HashMap<String, String>);

impl Accounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.0.insert(user.into(), password.into());
        self
    }

    /// Password check in constant time for equal-length inputs.
    fn verify(&self, user: &str, password: &str) -> bool {
        self.0
            .get(user)
            .map(|expected| bool::from(expected.as_bytes().ct_eq(password.as_bytes())))
            .unwrap_or(false)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Accounts {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Accounts(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub name: String,
}

/// Reject requests without valid Basic credentials. Rejections carry no body.
pub async fn require_basic_auth(
    State(accounts): State<Arc<Accounts>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let credentials = request.headers().typed_get::<Authorization<Basic>>();

    match credentials {
        Some(Authorization(basic)) if accounts.verify(basic.username(), basic.password()) => {
            let name = basic.username().to_string();
            request.extensions_mut().insert(AuthUser { name });
            next.run(request).await
        }
        _ => (StatusCode::UNAUTHORIZED, [(header::WWW_AUTHENTICATE, REALM)]).into_response(),
    }
}
