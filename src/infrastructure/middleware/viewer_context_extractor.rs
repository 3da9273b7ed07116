// Vc extractor - hands the request's viewer to handlers

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};
use std::sync::Arc;

use crate::infrastructure::viewer::ViewerContext;

/// Cheap-to-clone handle on the request's `ViewerContext`.
///
/// Derefs to `ViewerContext`, so handlers call `vc.require_user()` directly.
#[derive(Debug, Clone)]
pub struct Vc(Arc<ViewerContext>);

impl Vc {
    pub fn new(vc: Arc<ViewerContext>) -> Self {
        Self(vc)
    }

    pub fn arc(self) -> Arc<ViewerContext> {
        self.0
    }
}

impl std::ops::Deref for Vc {
    type Target = ViewerContext;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<ViewerContext> for Vc {
    fn as_ref(&self) -> &ViewerContext {
        &self.0
    }
}

// Requires viewer_context_middleware on the route; without it extraction fails with 500
impl<S> FromRequestParts<S> for Vc
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let vc = parts
            .extensions
            .get::<Arc<ViewerContext>>()
            .map(|vc| Vc(vc.clone()))
            .ok_or(StatusCode::INTERNAL_SERVER_ERROR);

        async move { vc }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    #[tokio::test]
    async fn test_extracts_from_extensions() {
        let mut request = Request::builder().uri("/").body(()).unwrap();
        request
            .extensions_mut()
            .insert(Arc::new(ViewerContext::authenticated(5)));
        let (mut parts, _) = request.into_parts();

        let vc = Vc::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(vc.user_id, Some(5));
        assert_eq!(vc.arc().user_id, Some(5));
    }

    #[tokio::test]
    async fn test_missing_viewer_is_rejected() {
        let (mut parts, _) = Request::builder().uri("/").body(()).unwrap().into_parts();
        assert_eq!(
            Vc::from_request_parts(&mut parts, &()).await.unwrap_err(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
