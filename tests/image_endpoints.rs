mod common;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
};
use serde_json::{json, Value};
use tower::ServiceExt;

use common::TestApp;

const BOUNDARY: &str = "kira-test-boundary";

fn multipart_body(files: &[(&str, &[u8])], fields: &[(&str, &str)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
    }
    for (file_name, bytes) in files {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"images\"; filename=\"{}\"\r\nContent-Type: image/jpeg\r\n\r\n",
                BOUNDARY, file_name
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

async fn upload(
    app: &TestApp,
    uri: &str,
    token: &str,
    files: &[(&str, &[u8])],
    fields: &[(&str, &str)],
) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(multipart_body(files, fields)))
        .unwrap();
    app.send(request).await
}

fn ids(body: &Value) -> Vec<i64> {
    body["images"]
        .as_array()
        .unwrap()
        .iter()
        .map(|image| image["id"].as_i64().unwrap())
        .collect()
}

fn covers(body: &Value) -> usize {
    body["images"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|image| image["isCover"] == true)
        .count()
}

#[tokio::test]
async fn test_upload_cover_reorder_and_delete() {
    let app = TestApp::new().await;
    app.seed_cars_category().await;
    let dealer = app.register_dealer("dealer").await;
    let listing = app.publish_listing(&dealer, "Toyota Vitz", json!([])).await;
    let base = format!("/api/v1/v2/listings/{}/images", listing);

    let (status, body) = upload(
        &app,
        &base,
        &dealer,
        &[("front.jpg", b"front-bytes"), ("side.jpg", b"side-bytes")],
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["listingId"], listing);
    assert_eq!(body["count"], 2);
    let uploaded = ids(&body);
    assert_eq!(covers(&body), 1);
    assert_eq!(body["coverImageId"], uploaded[0]);
    assert_eq!(body["images"][1]["sortOrder"], 1);
    assert_eq!(body["images"][0]["thumbnailUrl"], Value::Null);

    // Stored files are served under the media URL
    let image_url = body["images"][0]["imageUrl"].as_str().unwrap().to_string();
    assert!(image_url.starts_with(&format!("/media/listings/v2/{}/", listing)));
    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri(&image_url).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // A later upload flagged as cover takes over and continues the sort order
    let (status, body) = upload(&app, &base, &dealer, &[("rear.jpg", b"rear-bytes")], &[("is_cover", "true")]).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["count"], 1);
    let all = ids(&body);
    assert_eq!(all.len(), 3);
    let rear = all[2];
    assert_eq!(body["coverImageId"], rear);
    assert_eq!(covers(&body), 1);

    let (status, body) = app
        .post(&format!("{}/{}/cover", base, uploaded[1]), Some(&dealer), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["coverImageId"], uploaded[1]);
    assert_eq!(covers(&body), 1);

    let (status, body) = app
        .post(
            &format!("{}/reorder", base),
            Some(&dealer),
            json!([rear, uploaded[1], uploaded[0]]),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&body), vec![rear, uploaded[1], uploaded[0]]);

    let (status, body) = app
        .post(&format!("{}/reorder", base), Some(&dealer), json!([rear, uploaded[0]]))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("exactly once"));

    let (status, _) = app
        .post(&format!("{}/reorder", base), Some(&dealer), json!({"ids": "1,2"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Deleting the cover elects a new one
    let (status, body) = app
        .request(
            Method::DELETE,
            &format!("{}/{}", base, uploaded[1]),
            Some(&dealer),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], true);
    assert_eq!(body["imageId"], uploaded[1]);
    assert_eq!(body["count"], 2);
    assert_eq!(covers(&body), 1);
    assert_eq!(body["coverImageId"], rear);

    let (status, body) = app
        .request(
            Method::DELETE,
            &format!("{}/{}", base, uploaded[1]),
            Some(&dealer),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Image not found.");

    let (_, view) = app
        .get(&format!("/api/v1/v2/listings/{}", listing), None)
        .await;
    assert_eq!(view["images"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_image_endpoints_check_ownership() {
    let app = TestApp::new().await;
    app.seed_cars_category().await;
    let owner = app.register_dealer("owner").await;
    let rival = app.register_dealer("rival").await;
    let buyer = app.register("buyer").await;
    let listing = app.publish_listing(&owner, "Honda Fit", json!([])).await;
    let base = format!("/api/v1/v2/listings/{}/images", listing);

    let (status, body) = upload(&app, &base, &buyer, &[("a.jpg", b"a")], &[]).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Dealer profile not found.");

    let (status, body) = upload(&app, &base, &rival, &[("a.jpg", b"a")], &[]).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Listing not found.");

    let (status, _) = upload(&app, "/api/v1/v2/listings/9999/images", &owner, &[("a.jpg", b"a")], &[]).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = upload(&app, &base, &owner, &[], &[("is_cover", "1")]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = upload(&app, &base, &owner, &[("a.jpg", b"a")], &[("sort_order", "first")]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = upload(&app, &base, &owner, &[("a.jpg", b"a")], &[("sort_order", "10")]).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["images"][0]["sortOrder"], 10);
    let image = ids(&body)[0];

    let (status, _) = app
        .post(&format!("{}/{}/cover", base, image), Some(&rival), json!({}))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_legacy_listing_images() {
    let app = TestApp::new().await;
    let dealer = app.register_dealer("dealer").await;
    let (status, car) = app
        .post(
            "/api/v1/listings",
            Some(&dealer),
            json!({"title": "VW Polo", "price": "7000", "year": 2014, "make": "VW", "model": "Polo"}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = car["id"].as_i64().unwrap();

    let (status, body) = upload(
        &app,
        &format!("/api/v1/listings/{}/images", id),
        &dealer,
        &[("polo.jpg", b"polo")],
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let url = body["images"][0]["imageUrl"].as_str().unwrap();
    assert!(url.starts_with(&format!("/media/listings/{}/", id)));
    assert!(!url.contains("/v2/"));

    // Legacy and universal image ids live in separate tables
    let (status, _) = app
        .post(
            &format!("/api/v1/v2/listings/{}/images/{}/cover", id, ids(&body)[0]),
            Some(&dealer),
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_deleting_one_generation_keeps_files_shared_with_the_other() {
    use kira_market::domains::{images, ListingGeneration};
    use kira_market::services::car_migration::{self, MigrationOptions};

    let app = TestApp::new().await;
    let dealer = app.register_dealer("dealer").await;
    let (status, car) = app
        .post(
            "/api/v1/listings",
            Some(&dealer),
            json!({"title": "VW Polo", "price": "7000", "year": 2014, "make": "VW", "model": "Polo"}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let car_id = car["id"].as_i64().unwrap();

    let (status, body) = upload(
        &app,
        &format!("/api/v1/listings/{}/images", car_id),
        &dealer,
        &[("polo.jpg", b"polo")],
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let legacy_image = ids(&body)[0];
    let url = body["images"][0]["imageUrl"].as_str().unwrap();
    let stored = app.media.path().join(url.trim_start_matches("/media/"));
    assert!(stored.exists());

    let report = car_migration::run(&app.state.db, MigrationOptions::default())
        .await
        .unwrap();
    assert_eq!(report.images_created, 1);
    let listing_id = report.id_map[&car_id];

    let (status, _) = app
        .request(
            Method::DELETE,
            &format!("/api/v1/listings/{}/images/{}", car_id, legacy_image),
            Some(&dealer),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(stored.exists(), "migrated copy still points at the file");

    let copied = {
        let mut conn = app.state.db.acquire().await.unwrap();
        images::list_images(&mut conn, ListingGeneration::Universal, listing_id)
            .await
            .unwrap()
    };
    assert_eq!(copied.len(), 1);
    assert_eq!(stored, app.media.path().join(&copied[0].image_ref));

    // The last row going releases the file
    let (status, _) = app
        .request(
            Method::DELETE,
            &format!("/api/v1/v2/listings/{}/images/{}", listing_id, copied[0].id),
            Some(&dealer),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!stored.exists());
}
