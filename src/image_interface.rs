// Image Interface - REST endpoints managing listing photos
//
// The same handlers serve both generations; the router layers the generation in as
// an extension. Every endpoint requires the dealer that owns the listing.

use axum::{
    extract::{DefaultBodyLimit, Extension, Multipart, Path as AxumPath, State},
    http::StatusCode,
    response::Json,
    routing::{delete, post},
    Router,
};
use serde::Serialize;
use serde_json::Value;
use sqlx::SqliteConnection;
use tracing::{info, warn};

use crate::{
    app_state::AppState,
    domains::{
        dealers,
        images::{self, ListingImage},
        listing_owned_by, ListingGeneration,
    },
    error::{AppError, AppResult},
    infrastructure::middleware::Vc,
};

pub const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSummary {
    pub id: i64,
    pub image_url: String,
    pub thumbnail_url: Option<String>,
    pub is_cover: bool,
    pub sort_order: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSetResponse {
    pub listing_id: i64,
    pub count: usize,
    pub images: Vec<ImageSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_image_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_id: Option<i64>,
}

impl ImageSetResponse {
    fn new(state: &AppState, listing_id: i64, images: Vec<ListingImage>) -> Self {
        let images: Vec<ImageSummary> = images
            .into_iter()
            .map(|image| ImageSummary {
                id: image.id,
                image_url: state.blobs.url(&image.image_ref),
                thumbnail_url: image.thumbnail_ref.as_deref().map(|r| state.blobs.url(r)),
                is_cover: image.is_cover,
                sort_order: image.sort_order,
            })
            .collect();
        Self {
            listing_id,
            count: images.len(),
            cover_image_id: None,
            deleted: None,
            image_id: None,
            images,
        }
    }
}

/// Files and options of one upload request
#[derive(Debug, Default)]
struct UploadForm {
    files: Vec<(String, Vec<u8>)>,
    is_cover: bool,
    sort_order: Option<i64>,
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

async fn read_upload_form(mut multipart: Multipart) -> AppResult<UploadForm> {
    let invalid = |e: axum::extract::multipart::MultipartError| {
        AppError::Validation(format!("Invalid multipart body: {}", e))
    };

    let mut form = UploadForm::default();
    while let Some(field) = multipart.next_field().await.map_err(invalid)? {
        let name = field.name().unwrap_or_default().to_string();
        if let Some(file_name) = field.file_name().map(str::to_string) {
            let bytes = field.bytes().await.map_err(invalid)?;
            if !bytes.is_empty() {
                form.files.push((file_name, bytes.to_vec()));
            }
            continue;
        }

        let text = field.text().await.map_err(invalid)?;
        match name.as_str() {
            "is_cover" => form.is_cover = parse_flag(&text),
            "sort_order" if !text.trim().is_empty() => {
                let sort_order = text.trim().parse().map_err(|_| {
                    AppError::Validation("sort_order must be an integer.".to_string())
                })?;
                form.sort_order = Some(sort_order);
            }
            _ => {}
        }
    }
    Ok(form)
}

/// Resolve the caller's dealer and check it owns the listing.
async fn authorize(
    conn: &mut SqliteConnection,
    vc: &Vc,
    generation: ListingGeneration,
    listing_id: i64,
) -> AppResult<()> {
    let user_id = vc.require_user()?;
    let dealer = dealers::resolve_dealer(conn, user_id).await?;
    if !listing_owned_by(conn, generation, listing_id, dealer.id).await? {
        return Err(AppError::NotFound("Listing not found.".to_string()));
    }
    Ok(())
}

async fn release_blobs(state: &AppState, references: &[String]) {
    for reference in references {
        if let Err(e) = state.blobs.delete(reference).await {
            warn!(reference = %reference, error = %e, "failed to delete stored image");
        }
    }
}

pub async fn upload_images_handler(
    State(state): State<AppState>,
    Extension(generation): Extension<ListingGeneration>,
    vc: Vc,
    AxumPath(listing_id): AxumPath<i64>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<ImageSetResponse>), AppError> {
    let form = read_upload_form(multipart).await?;

    let mut tx = state.db.begin().await?;
    authorize(&mut tx, &vc, generation, listing_id).await?;
    if form.files.is_empty() {
        return Err(AppError::Validation("No image files were uploaded.".to_string()));
    }

    let prefix = generation.media_prefix(listing_id);
    let mut stored = Vec::with_capacity(form.files.len());
    for (file_name, bytes) in &form.files {
        match state.blobs.store(&format!("{}/{}", prefix, file_name), bytes).await {
            Ok(reference) => stored.push(reference),
            Err(e) => {
                release_blobs(&state, &stored).await;
                return Err(e);
            }
        }
    }

    let created = async {
        let sort_base = match form.sort_order {
            Some(sort_order) => sort_order,
            None => images::max_sort_order(&mut tx, generation, listing_id).await? + 1,
        };
        let created =
            images::add_images(&mut tx, generation, listing_id, &stored, form.is_cover, sort_base)
                .await?;
        let all = images::list_images(&mut tx, generation, listing_id).await?;
        Ok::<_, AppError>((created, all))
    }
    .await;
    let (created, all) = match created {
        Ok(result) => result,
        Err(e) => {
            release_blobs(&state, &stored).await;
            return Err(e);
        }
    };
    if let Err(e) = tx.commit().await {
        release_blobs(&state, &stored).await;
        return Err(e.into());
    }

    for image in &created {
        state.thumbnails.enqueue(generation, image.id);
    }
    info!(listing_id, generation = ?generation, count = created.len(), "uploaded listing images");

    let mut response = ImageSetResponse::new(&state, listing_id, all);
    response.count = created.len();
    response.cover_image_id = response.images.iter().find(|i| i.is_cover).map(|i| i.id);
    Ok((StatusCode::CREATED, Json(response)))
}

/// Accepts a bare list of ids or `{"order": [...]}`.
fn parse_order(body: &Value) -> AppResult<Vec<i64>> {
    let list = match body {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("order") {
            Some(Value::Array(items)) => items,
            _ => return Err(AppError::Validation("Expected a list of image IDs.".to_string())),
        },
        _ => return Err(AppError::Validation("Expected a list of image IDs.".to_string())),
    };

    list.iter()
        .map(|item| {
            let id = match item {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            };
            id.ok_or_else(|| AppError::Validation("Image IDs must be integers.".to_string()))
        })
        .collect()
}

pub async fn reorder_images_handler(
    State(state): State<AppState>,
    Extension(generation): Extension<ListingGeneration>,
    vc: Vc,
    AxumPath(listing_id): AxumPath<i64>,
    Json(body): Json<Value>,
) -> Result<Json<ImageSetResponse>, AppError> {
    let order = parse_order(&body)?;

    let mut tx = state.db.begin().await?;
    authorize(&mut tx, &vc, generation, listing_id).await?;
    let reordered = images::reorder(&mut tx, generation, listing_id, &order).await?;
    tx.commit().await?;

    Ok(Json(ImageSetResponse::new(&state, listing_id, reordered)))
}

pub async fn set_cover_handler(
    State(state): State<AppState>,
    Extension(generation): Extension<ListingGeneration>,
    vc: Vc,
    AxumPath((listing_id, image_id)): AxumPath<(i64, i64)>,
) -> Result<Json<ImageSetResponse>, AppError> {
    let mut tx = state.db.begin().await?;
    authorize(&mut tx, &vc, generation, listing_id).await?;
    let cover = images::set_cover(&mut tx, generation, listing_id, image_id).await?;
    let all = images::list_images(&mut tx, generation, listing_id).await?;
    tx.commit().await?;

    let mut response = ImageSetResponse::new(&state, listing_id, all);
    response.cover_image_id = Some(cover.id);
    Ok(Json(response))
}

pub async fn delete_image_handler(
    State(state): State<AppState>,
    Extension(generation): Extension<ListingGeneration>,
    vc: Vc,
    AxumPath((listing_id, image_id)): AxumPath<(i64, i64)>,
) -> Result<Json<ImageSetResponse>, AppError> {
    let mut tx = state.db.begin().await?;
    authorize(&mut tx, &vc, generation, listing_id).await?;
    let deleted = images::delete_image(&mut tx, generation, listing_id, image_id).await?;
    let remaining = images::list_images(&mut tx, generation, listing_id).await?;
    let mut references = vec![deleted.image_ref.clone()];
    references.extend(deleted.thumbnail_ref.clone());
    // Files still shared with another row (migrated copies) are kept
    let orphaned = images::unreferenced(&mut tx, &references).await?;
    tx.commit().await?;

    // Rows are gone; leftover files are only logged
    release_blobs(&state, &orphaned).await;

    let mut response = ImageSetResponse::new(&state, listing_id, remaining);
    response.deleted = Some(true);
    response.image_id = Some(deleted.id);
    response.cover_image_id = response.images.iter().find(|i| i.is_cover).map(|i| i.id);
    Ok(Json(response))
}

fn image_routes(base: &str, generation: ListingGeneration) -> Router<AppState> {
    Router::new()
        .route(
            &format!("{}/{{id}}/images", base),
            post(upload_images_handler).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route(
            &format!("{}/{{id}}/images/reorder", base),
            post(reorder_images_handler),
        )
        .route(
            &format!("{}/{{id}}/images/{{image_id}}/cover", base),
            post(set_cover_handler),
        )
        .route(
            &format!("{}/{{id}}/images/{{image_id}}", base),
            delete(delete_image_handler),
        )
        .layer(Extension(generation))
}

/// Image routes of both generations, relative to `/api/v1`.
pub fn create_image_router() -> Router<AppState> {
    image_routes("/listings", ListingGeneration::Legacy)
        .merge(image_routes("/v2/listings", ListingGeneration::Universal))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_order_shapes() {
        assert_eq!(parse_order(&json!([3, 1, 2])).unwrap(), vec![3, 1, 2]);
        assert_eq!(parse_order(&json!({"order": ["4", 5]})).unwrap(), vec![4, 5]);
        assert!(matches!(
            parse_order(&json!({"ids": [1]})),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(parse_order(&json!("1,2")), Err(AppError::Validation(_))));
        assert!(matches!(
            parse_order(&json!([1, "two"])),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("true"));
        assert!(parse_flag(" 1 "));
        assert!(parse_flag("On"));
        assert!(!parse_flag("false"));
        assert!(!parse_flag(""));
    }
}
