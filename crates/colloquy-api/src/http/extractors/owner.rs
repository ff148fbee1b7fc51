//! Caller identity extractor.
//!
//! Authentication happens upstream; the gateway forwards the authenticated
//! user in the `X-User-Id` header. Requests without it act as `anonymous`.

use std::convert::Infallible;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

pub const OWNER_HEADER: &str = "x-user-id";
pub const ANONYMOUS_OWNER: &str = "anonymous";

/// The user a request acts for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner(pub String);

impl Owner {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Owner {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let owner = parts
            .headers
            .get(OWNER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(ANONYMOUS_OWNER);
        Ok(Owner(owner.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(req: Request<()>) -> Owner {
        let (mut parts, _) = req.into_parts();
        Owner::from_request_parts(&mut parts, &()).await.unwrap()
    }

    #[tokio::test]
    async fn test_header_present() {
        let req = Request::builder().header("X-User-Id", " alice ").body(()).unwrap();
        assert_eq!(extract(req).await, Owner("alice".to_string()));
    }

    #[tokio::test]
    async fn test_header_missing_or_blank() {
        let req = Request::builder().body(()).unwrap();
        assert_eq!(extract(req).await.as_str(), ANONYMOUS_OWNER);

        let req = Request::builder().header("X-User-Id", "").body(()).unwrap();
        assert_eq!(extract(req).await.as_str(), ANONYMOUS_OWNER);
    }
}
