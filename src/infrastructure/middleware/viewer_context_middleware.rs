// ViewerContext middleware - resolves the bearer token into a request-scoped viewer

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::debug;

use crate::app_state::AppState;
use crate::infrastructure::security::SecurityService;
use crate::infrastructure::viewer::ViewerContext;

/// Insert an `Arc<ViewerContext>` into the request extensions.
///
/// A missing, malformed or expired token yields an anonymous viewer; handlers that
/// need a user reject with AuthenticationRequired.
pub async fn viewer_context_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let viewer = resolve_viewer(request.headers(), &state.security);
    request.extensions_mut().insert(Arc::new(viewer));
    next.run(request).await
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

pub(crate) fn resolve_viewer(headers: &HeaderMap, security: &SecurityService) -> ViewerContext {
    let Some(token) = bearer_token(headers) else {
        return ViewerContext::anonymous();
    };

    match security.validate_access_token(token) {
        Ok(user_id) => ViewerContext::authenticated(user_id),
        Err(e) => {
            debug!("treating request as anonymous: {}", e);
            ViewerContext::anonymous()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecurityConfig;
    use crate::infrastructure::database::MarketDatabase;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwYXNz"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(bearer_token(&headers), Some("abc.def.ghi"));
    }

    #[tokio::test]
    async fn test_resolve_viewer() {
        let security = SecurityService::new(SecurityConfig::default());
        let db = MarketDatabase::new_in_memory().await.unwrap();
        let mut conn = db.acquire().await.unwrap();
        let auth = security
            .register(&mut conn, "juma", "", "password")
            .await
            .unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", auth.tokens.access)).unwrap(),
        );
        assert_eq!(resolve_viewer(&headers, &security).user_id, Some(auth.user.id));

        // Refresh tokens do not authenticate requests
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", auth.tokens.refresh)).unwrap(),
        );
        assert!(!resolve_viewer(&headers, &security).is_authenticated());
    }
}
