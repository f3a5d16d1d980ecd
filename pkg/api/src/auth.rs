use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use pkg_types::config::TokenEntry;
use pkg_types::identity::UserInfo;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::AppState;
use crate::error::ApiError;

/// Resolves static bearer tokens from the hub config to caller identities.
#[derive(Debug, Default)]
pub struct TokenAuthenticator {
    tokens: HashMap<String, UserInfo>,
}

impl TokenAuthenticator {
    pub fn new(entries: &[TokenEntry]) -> Self {
        let tokens = entries
            .iter()
            .map(|e| {
                let user = UserInfo {
                    name: e.user.clone(),
                    groups: e.groups.clone(),
                };
                (e.token.clone(), user)
            })
            .collect();
        Self { tokens }
    }

    pub fn authenticate(&self, token: &str) -> Option<&UserInfo> {
        self.tokens.get(token)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

fn bearer_token(req: &Request) -> Option<&str> {
    let value = req.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    value.strip_prefix("Bearer ").map(str::trim).filter(|t| !t.is_empty())
}

/// Middleware: authenticates the bearer token and stores the caller's
/// [`UserInfo`] in the request extensions.
pub async fn auth_middleware(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let Some(token) = bearer_token(&req) else {
        debug!("Request without bearer token to {}", req.uri().path());
        return ApiError::Unauthorized("Unauthorized".to_string()).into_response();
    };

    match state.authenticator.authenticate(token) {
        Some(user) => {
            let user = user.clone();
            req.extensions_mut().insert(user);
            next.run(req).await
        }
        None => {
            warn!("Invalid bearer token provided");
            ApiError::Unauthorized("Unauthorized".to_string()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn entries() -> Vec<TokenEntry> {
        vec![TokenEntry {
            token: "s3cr3t".to_string(),
            user: "alice".to_string(),
            groups: vec!["devs".to_string()],
        }]
    }

    #[test]
    fn tokens_resolve_to_identities() {
        let authn = TokenAuthenticator::new(&entries());
        assert_eq!(authn.len(), 1);
        let alice = authn.authenticate("s3cr3t").unwrap();
        assert_eq!(alice.name, "alice");
        assert!(alice.in_group("devs"));
        assert!(authn.authenticate("nope").is_none());
    }

    #[test]
    fn bearer_header_parsing() {
        let req = |value: &str| {
            Request::builder()
                .header(header::AUTHORIZATION, value)
                .body(Body::empty())
                .unwrap()
        };
        assert_eq!(bearer_token(&req("Bearer abc")), Some("abc"));
        assert_eq!(bearer_token(&req("Basic abc")), None);
        assert_eq!(bearer_token(&req("Bearer ")), None);
        assert_eq!(bearer_token(&Request::new(Body::empty())), None);
    }
}
