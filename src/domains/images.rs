// Listing images - ordered image rows with a single cover per listing
// Both generations share this code; `ListingGeneration` selects the table. At most one
// row per listing has is_cover = 1 (partial unique index), so cover changes always clear
// first and set second.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, SqliteConnection};
use std::collections::HashSet;

use super::ListingGeneration;
use crate::core::Timestamp;
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListingImage {
    pub id: i64,
    pub listing_id: i64,
    pub image_ref: String,
    pub thumbnail_ref: Option<String>,
    pub is_cover: bool,
    pub sort_order: i64,
    pub created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, SqliteRow> for ListingImage {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            listing_id: row.try_get("listing_id")?,
            image_ref: row.try_get("image_ref")?,
            thumbnail_ref: row.try_get("thumbnail_ref")?,
            is_cover: row.try_get("is_cover")?,
            sort_order: row.try_get("sort_order")?,
            created_at: Timestamp(row.try_get("created_at")?).to_datetime(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewImage {
    pub image_ref: String,
    pub thumbnail_ref: Option<String>,
    pub is_cover: bool,
    pub sort_order: i64,
}

const IMAGE_COLUMNS: &str = "id, listing_id, image_ref, thumbnail_ref, is_cover, sort_order, created_at";

fn image_not_found() -> AppError {
    AppError::NotFound("Image not found.".to_string())
}

/// Images of a listing ordered by `(sort_order, id)`.
pub async fn list_images(
    conn: &mut SqliteConnection,
    generation: ListingGeneration,
    listing_id: i64,
) -> AppResult<Vec<ListingImage>> {
    let sql = format!(
        "SELECT {} FROM {} WHERE listing_id = ? ORDER BY sort_order, id",
        IMAGE_COLUMNS,
        generation.images_table()
    );
    let images = sqlx::query_as::<_, ListingImage>(&sql)
        .bind(listing_id)
        .fetch_all(&mut *conn)
        .await?;
    Ok(images)
}

pub async fn get_image(
    conn: &mut SqliteConnection,
    generation: ListingGeneration,
    image_id: i64,
) -> AppResult<Option<ListingImage>> {
    let sql = format!("SELECT {} FROM {} WHERE id = ?", IMAGE_COLUMNS, generation.images_table());
    let image = sqlx::query_as::<_, ListingImage>(&sql)
        .bind(image_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(image)
}

async fn get_listing_image(
    conn: &mut SqliteConnection,
    generation: ListingGeneration,
    listing_id: i64,
    image_id: i64,
) -> AppResult<ListingImage> {
    match get_image(conn, generation, image_id).await? {
        Some(image) if image.listing_id == listing_id => Ok(image),
        _ => Err(image_not_found()),
    }
}

/// Insert one row as given. A cover row must only be inserted once any previous cover
/// has been cleared.
pub async fn insert_image(
    conn: &mut SqliteConnection,
    generation: ListingGeneration,
    listing_id: i64,
    image: &NewImage,
) -> AppResult<ListingImage> {
    let sql = format!(
        "INSERT INTO {} (listing_id, image_ref, thumbnail_ref, is_cover, sort_order, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        generation.images_table()
    );
    let result = sqlx::query(&sql)
        .bind(listing_id)
        .bind(&image.image_ref)
        .bind(&image.thumbnail_ref)
        .bind(image.is_cover)
        .bind(image.sort_order)
        .bind(Timestamp::now().value())
        .execute(&mut *conn)
        .await?;

    get_image(conn, generation, result.last_insert_rowid())
        .await?
        .ok_or_else(image_not_found)
}

async fn clear_cover(
    conn: &mut SqliteConnection,
    generation: ListingGeneration,
    listing_id: i64,
) -> AppResult<()> {
    let sql = format!(
        "UPDATE {} SET is_cover = 0 WHERE listing_id = ? AND is_cover = 1",
        generation.images_table()
    );
    sqlx::query(&sql).bind(listing_id).execute(&mut *conn).await?;
    Ok(())
}

/// Make sure a listing with images has a cover: elect the first by `(sort_order, id)`.
pub async fn ensure_cover(
    conn: &mut SqliteConnection,
    generation: ListingGeneration,
    listing_id: i64,
) -> AppResult<()> {
    let images = list_images(conn, generation, listing_id).await?;
    if images.iter().any(|image| image.is_cover) {
        return Ok(());
    }
    if let Some(first) = images.first() {
        let sql = format!("UPDATE {} SET is_cover = 1 WHERE id = ?", generation.images_table());
        sqlx::query(&sql).bind(first.id).execute(&mut *conn).await?;
    }
    Ok(())
}

/// Attach uploaded blobs to a listing in the given order.
///
/// Sort orders continue from `sort_base`. When `as_cover` is set the first new image
/// replaces the current cover; either way the listing ends with exactly one cover.
pub async fn add_images(
    conn: &mut SqliteConnection,
    generation: ListingGeneration,
    listing_id: i64,
    image_refs: &[String],
    as_cover: bool,
    sort_base: i64,
) -> AppResult<Vec<ListingImage>> {
    if as_cover && !image_refs.is_empty() {
        clear_cover(conn, generation, listing_id).await?;
    }

    let mut created = Vec::with_capacity(image_refs.len());
    for (index, image_ref) in image_refs.iter().enumerate() {
        let image = NewImage {
            image_ref: image_ref.clone(),
            thumbnail_ref: None,
            is_cover: as_cover && index == 0,
            sort_order: sort_base + index as i64,
        };
        created.push(insert_image(conn, generation, listing_id, &image).await?);
    }

    ensure_cover(conn, generation, listing_id).await?;

    // Reload so the returned rows reflect a cover elected by ensure_cover
    let mut refreshed = Vec::with_capacity(created.len());
    for image in created {
        refreshed.push(get_listing_image(conn, generation, listing_id, image.id).await?);
    }
    Ok(refreshed)
}

/// Clear the current cover and mark `image_id`. Run inside one transaction.
pub async fn set_cover(
    conn: &mut SqliteConnection,
    generation: ListingGeneration,
    listing_id: i64,
    image_id: i64,
) -> AppResult<ListingImage> {
    let image = get_listing_image(conn, generation, listing_id, image_id).await?;
    if image.is_cover {
        return Ok(image);
    }

    clear_cover(conn, generation, listing_id).await?;
    let sql = format!("UPDATE {} SET is_cover = 1 WHERE id = ?", generation.images_table());
    sqlx::query(&sql).bind(image_id).execute(&mut *conn).await?;

    get_listing_image(conn, generation, listing_id, image_id).await
}

/// Delete an image row and re-elect a cover if it was the cover.
/// Returns the deleted row so the caller can release its blobs.
pub async fn delete_image(
    conn: &mut SqliteConnection,
    generation: ListingGeneration,
    listing_id: i64,
    image_id: i64,
) -> AppResult<ListingImage> {
    let image = get_listing_image(conn, generation, listing_id, image_id).await?;

    let sql = format!("DELETE FROM {} WHERE id = ?", generation.images_table());
    sqlx::query(&sql).bind(image_id).execute(&mut *conn).await?;

    if image.is_cover {
        ensure_cover(conn, generation, listing_id).await?;
    }
    Ok(image)
}

/// Rewrite sort orders so that `order` lists the listing's images first to last.
///
/// `order` must contain every image id of the listing exactly once.
pub async fn reorder(
    conn: &mut SqliteConnection,
    generation: ListingGeneration,
    listing_id: i64,
    order: &[i64],
) -> AppResult<Vec<ListingImage>> {
    let existing: HashSet<i64> = list_images(conn, generation, listing_id)
        .await?
        .into_iter()
        .map(|image| image.id)
        .collect();
    let requested: HashSet<i64> = order.iter().copied().collect();

    if requested.len() != order.len() {
        return Err(AppError::Validation("Order contains duplicate image IDs.".to_string()));
    }
    if requested != existing {
        return Err(AppError::Validation(
            "Order must list every image of this listing exactly once.".to_string(),
        ));
    }

    let sql = format!(
        "UPDATE {} SET sort_order = ? WHERE id = ? AND listing_id = ?",
        generation.images_table()
    );
    for (position, image_id) in order.iter().enumerate() {
        sqlx::query(&sql)
            .bind(position as i64)
            .bind(image_id)
            .bind(listing_id)
            .execute(&mut *conn)
            .await?;
    }

    list_images(conn, generation, listing_id).await
}

/// Highest sort order in use, or -1 for a listing without images.
pub async fn max_sort_order(
    conn: &mut SqliteConnection,
    generation: ListingGeneration,
    listing_id: i64,
) -> AppResult<i64> {
    let sql = format!(
        "SELECT COALESCE(MAX(sort_order), -1) FROM {} WHERE listing_id = ?",
        generation.images_table()
    );
    let max: i64 = sqlx::query_scalar(&sql)
        .bind(listing_id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(max)
}

/// Record a generated thumbnail unless one was recorded meanwhile.
pub async fn set_thumbnail(
    conn: &mut SqliteConnection,
    generation: ListingGeneration,
    image_id: i64,
    thumbnail_ref: &str,
) -> AppResult<bool> {
    let sql = format!(
        "UPDATE {} SET thumbnail_ref = ? WHERE id = ? AND thumbnail_ref IS NULL",
        generation.images_table()
    );
    let result = sqlx::query(&sql)
        .bind(thumbnail_ref)
        .bind(image_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() == 1)
}

/// Ids of every image still waiting for a thumbnail.
pub async fn missing_thumbnails(
    conn: &mut SqliteConnection,
    generation: ListingGeneration,
) -> AppResult<Vec<i64>> {
    let sql = format!(
        "SELECT id FROM {} WHERE thumbnail_ref IS NULL ORDER BY id",
        generation.images_table()
    );
    let ids = sqlx::query_scalar(&sql).fetch_all(&mut *conn).await?;
    Ok(ids)
}

/// Whether any image row of either generation still points at `reference`, as the
/// original or as the thumbnail. Migrated rows share files with their source.
pub async fn blob_in_use(conn: &mut SqliteConnection, reference: &str) -> AppResult<bool> {
    let row = sqlx::query(
        r#"
        SELECT 1 FROM car_images WHERE image_ref = ?1 OR thumbnail_ref = ?1
        UNION ALL
        SELECT 1 FROM listing_images WHERE image_ref = ?1 OR thumbnail_ref = ?1
        LIMIT 1
        "#,
    )
    .bind(reference)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.is_some())
}

/// The subset of `references` no image row points at any more.
pub async fn unreferenced(
    conn: &mut SqliteConnection,
    references: &[String],
) -> AppResult<Vec<String>> {
    let mut free = Vec::with_capacity(references.len());
    for reference in references {
        if !blob_in_use(conn, reference).await? {
            free.push(reference.clone());
        }
    }
    Ok(free)
}
