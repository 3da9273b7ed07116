// Shared harness: an in-memory app driven through tower's oneshot

#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

use kira_market::{
    app_state::AppState,
    config::Config,
    domains::catalog::{self, AttributeDataType, AttributeSpec},
    infrastructure::{BlobStore, FsBlobStore, MarketDatabase},
    market_interface::create_app,
    services::ThumbnailQueue,
};

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub media: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        let media = TempDir::new().unwrap();
        let mut config = Config::default();
        config.media.root = media.path().to_path_buf();

        let db = Arc::new(MarketDatabase::new_in_memory().await.unwrap());
        let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::from_config(&config.media));
        let (thumbnails, _receiver) = ThumbnailQueue::channel();
        let state = AppState::with_parts(config, db, blobs, thumbnails);

        Self {
            router: create_app(state.clone()),
            state,
            media,
        }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.send(request).await
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, value)
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.request(Method::GET, uri, token, None).await
    }

    pub async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, uri, token, Some(body)).await
    }

    /// Register a user and return its access token.
    pub async fn register(&self, username: &str) -> String {
        let (status, body) = self
            .post(
                "/api/v1/auth/register",
                None,
                json!({"username": username, "email": format!("{}@example.com", username), "password": "s3cret-pass"}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        body["tokens"]["access"].as_str().unwrap().to_string()
    }

    /// Register a user with a dealer profile and return its access token.
    pub async fn register_dealer(&self, username: &str) -> String {
        let token = self.register(username).await;
        let (status, body) = self
            .post(
                "/api/v1/me/dealer",
                Some(&token),
                json!({"dealership_name": format!("{} Motors", username), "city": "Arusha"}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        token
    }

    /// Cars category with a few typed attributes.
    pub async fn seed_cars_category(&self) {
        let mut conn = self.state.db.acquire().await.unwrap();
        let (cars, _) = catalog::get_or_create_category(&mut conn, "Cars", "cars")
            .await
            .unwrap();
        for spec in [
            AttributeSpec::new("make", "Make", AttributeDataType::Text),
            AttributeSpec::new("mileage", "Mileage", AttributeDataType::Int),
            AttributeSpec::new("year", "Year", AttributeDataType::Int),
        ] {
            catalog::upsert_attribute(&mut conn, cars.id, &spec).await.unwrap();
        }
    }

    /// Create and publish a universal car listing; returns its id.
    pub async fn publish_listing(&self, token: &str, title: &str, attributes: Value) -> i64 {
        let (status, body) = self
            .post(
                "/api/v1/v2/listings",
                Some(token),
                json!({"category_slug": "cars", "title": title, "price": "15000", "city": "Dar es Salaam", "attributes": attributes}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        let id = body["id"].as_i64().unwrap();

        let (status, body) = self
            .post(&format!("/api/v1/v2/listings/{}/publish", id), Some(token), json!({}))
            .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["status"], "PUBLISHED");
        id
    }
}
