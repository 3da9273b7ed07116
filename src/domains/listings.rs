// Listings - universal (category + attribute) listing store
// Every write is scoped to the owning dealer; a listing owned by someone else is
// reported as NotFound.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, SqliteConnection};
use std::fmt;
use std::str::FromStr;
use tracing::info;

use super::attributes::{self, AttributeInput};
use super::catalog::Category;
use super::decode_error;
use crate::core::slug::{base_slug, next_free_slug};
use crate::core::{cents_to_price, price_to_cents, Pagination, Timestamp};
use crate::error::{AppError, AppResult};

pub const DEFAULT_CURRENCY: &str = "USD";
pub const DEFAULT_COUNTRY: &str = "Tanzania";
const SLUG_FALLBACK: &str = "listing";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ListingStatus {
    Draft,
    Published,
    Sold,
    Archived,
}

impl ListingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ListingStatus::Draft => "DRAFT",
            ListingStatus::Published => "PUBLISHED",
            ListingStatus::Sold => "SOLD",
            ListingStatus::Archived => "ARCHIVED",
        }
    }
}

impl fmt::Display for ListingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ListingStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(ListingStatus::Draft),
            "PUBLISHED" => Ok(ListingStatus::Published),
            "SOLD" => Ok(ListingStatus::Sold),
            "ARCHIVED" => Ok(ListingStatus::Archived),
            other => Err(AppError::Validation(format!("Unknown listing status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Listing {
    pub id: i64,
    pub dealer_id: i64,
    pub category_id: i64,
    pub title: String,
    pub slug: String,
    pub price: Decimal,
    pub currency: String,
    pub city: String,
    pub region: String,
    pub country: String,
    pub description: String,
    pub status: ListingStatus,
    pub is_featured: bool,
    pub views_count: i64,
    pub created_by: Option<i64>,
    /// The car listing this row was migrated from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legacy_listing_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, SqliteRow> for Listing {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let status: String = row.try_get("status")?;
        Ok(Self {
            id: row.try_get("id")?,
            dealer_id: row.try_get("dealer_id")?,
            category_id: row.try_get("category_id")?,
            title: row.try_get("title")?,
            slug: row.try_get("slug")?,
            price: cents_to_price(row.try_get("price_cents")?),
            currency: row.try_get("currency")?,
            city: row.try_get("city")?,
            region: row.try_get("region")?,
            country: row.try_get("country")?,
            description: row.try_get("description")?,
            status: status.parse().map_err(|e| decode_error("status", e))?,
            is_featured: row.try_get("is_featured")?,
            views_count: row.try_get("views_count")?,
            created_by: row.try_get("created_by")?,
            legacy_listing_id: row.try_get("legacy_listing_id")?,
            created_at: Timestamp(row.try_get("created_at")?).to_datetime(),
            updated_at: Timestamp(row.try_get("updated_at")?).to_datetime(),
        })
    }
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_country() -> String {
    DEFAULT_COUNTRY.to_string()
}

/// Input of `create_listing_v2`.
#[derive(Debug, Clone, Deserialize)]
pub struct NewListing {
    pub category_slug: String,
    pub title: String,
    pub price: Decimal,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub region: String,
    #[serde(default = "default_country")]
    pub country: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub attributes: Vec<AttributeInput>,
}

/// Partial update; absent fields are left as they are.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListingUpdate {
    pub title: Option<String>,
    pub price: Option<Decimal>,
    pub currency: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
    pub description: Option<String>,
    pub is_featured: Option<bool>,
    #[serde(default)]
    pub attributes: Vec<AttributeInput>,
}

/// A fully specified row to insert. Used by creation and by the legacy migration,
/// which carries status, counters and timestamps across.
#[derive(Debug, Clone)]
pub struct ListingDraft {
    pub dealer_id: i64,
    pub category_id: i64,
    pub title: String,
    pub slug: String,
    pub price: Decimal,
    pub currency: String,
    pub city: String,
    pub region: String,
    pub country: String,
    pub description: String,
    pub status: ListingStatus,
    pub is_featured: bool,
    pub views_count: i64,
    pub created_by: Option<i64>,
    pub legacy_listing_id: Option<i64>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

const LISTING_COLUMNS: &str = "id, dealer_id, category_id, title, slug, price_cents, currency, city, region, country, description, status, is_featured, views_count, created_by, legacy_listing_id, created_at, updated_at";

fn require_title(title: &str) -> AppResult<()> {
    if title.trim().is_empty() {
        return Err(AppError::Validation("Title cannot be empty.".to_string()));
    }
    Ok(())
}

fn not_found() -> AppError {
    AppError::NotFound("Listing not found.".to_string())
}

/// Insert a row exactly as drafted. The slug must already be free.
pub async fn insert_listing(conn: &mut SqliteConnection, draft: &ListingDraft) -> AppResult<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO listings
            (dealer_id, category_id, title, slug, price_cents, currency, city, region, country,
             description, status, is_featured, views_count, created_by, legacy_listing_id,
             created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(draft.dealer_id)
    .bind(draft.category_id)
    .bind(&draft.title)
    .bind(&draft.slug)
    .bind(price_to_cents(draft.price)?)
    .bind(&draft.currency)
    .bind(&draft.city)
    .bind(&draft.region)
    .bind(&draft.country)
    .bind(&draft.description)
    .bind(draft.status.as_str())
    .bind(draft.is_featured)
    .bind(draft.views_count)
    .bind(draft.created_by)
    .bind(draft.legacy_listing_id)
    .bind(draft.created_at.value())
    .bind(draft.updated_at.value())
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Create a draft listing in `category` for `dealer_id`, then upsert its initial attributes.
pub async fn create_listing(
    conn: &mut SqliteConnection,
    dealer_id: i64,
    created_by: Option<i64>,
    category: &Category,
    input: &NewListing,
) -> AppResult<Listing> {
    require_title(&input.title)?;
    let slug = next_free_slug(conn, "listings", &base_slug(&input.title, SLUG_FALLBACK)).await?;
    let now = Timestamp::now();

    let id = insert_listing(
        conn,
        &ListingDraft {
            dealer_id,
            category_id: category.id,
            title: input.title.trim().to_string(),
            slug,
            price: input.price,
            currency: input.currency.clone(),
            city: input.city.clone(),
            region: input.region.clone(),
            country: input.country.clone(),
            description: input.description.clone(),
            status: ListingStatus::Draft,
            is_featured: false,
            views_count: 0,
            created_by,
            legacy_listing_id: None,
            created_at: now,
            updated_at: now,
        },
    )
    .await?;

    attributes::upsert_attributes(conn, id, category.id, &input.attributes).await?;
    info!(listing_id = id, dealer_id, category = %category.slug, "created listing");
    get_listing(conn, id).await?.ok_or_else(not_found)
}

pub async fn get_listing(conn: &mut SqliteConnection, id: i64) -> AppResult<Option<Listing>> {
    let sql = format!("SELECT {} FROM listings WHERE id = ?", LISTING_COLUMNS);
    let listing = sqlx::query_as::<_, Listing>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(listing)
}

pub async fn get_published(conn: &mut SqliteConnection, id: i64) -> AppResult<Option<Listing>> {
    let sql = format!(
        "SELECT {} FROM listings WHERE id = ? AND status = 'PUBLISHED'",
        LISTING_COLUMNS
    );
    let listing = sqlx::query_as::<_, Listing>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(listing)
}

pub async fn get_published_by_slug(
    conn: &mut SqliteConnection,
    slug: &str,
) -> AppResult<Option<Listing>> {
    let sql = format!(
        "SELECT {} FROM listings WHERE slug = ? AND status = 'PUBLISHED'",
        LISTING_COLUMNS
    );
    let listing = sqlx::query_as::<_, Listing>(&sql)
        .bind(slug)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(listing)
}

/// The listing `id` if it belongs to `dealer_id`, NotFound otherwise.
pub async fn get_owned(conn: &mut SqliteConnection, id: i64, dealer_id: i64) -> AppResult<Listing> {
    let sql = format!("SELECT {} FROM listings WHERE id = ? AND dealer_id = ?", LISTING_COLUMNS);
    sqlx::query_as::<_, Listing>(&sql)
        .bind(id)
        .bind(dealer_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(not_found)
}

/// The row migrated from car listing `legacy_id`, if any.
pub async fn find_by_legacy_id(
    conn: &mut SqliteConnection,
    legacy_id: i64,
) -> AppResult<Option<Listing>> {
    let sql = format!("SELECT {} FROM listings WHERE legacy_listing_id = ?", LISTING_COLUMNS);
    let listing = sqlx::query_as::<_, Listing>(&sql)
        .bind(legacy_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(listing)
}

/// Record which car listing an existing row was migrated from.
pub async fn link_legacy(conn: &mut SqliteConnection, id: i64, legacy_id: i64) -> AppResult<()> {
    sqlx::query("UPDATE listings SET legacy_listing_id = ? WHERE id = ?")
        .bind(legacy_id)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Slug-key lookup for rows that carry no legacy link.
pub async fn find_by_dealer_category_slug(
    conn: &mut SqliteConnection,
    dealer_id: i64,
    category_id: i64,
    slug: &str,
) -> AppResult<Option<Listing>> {
    let sql = format!(
        "SELECT {} FROM listings WHERE dealer_id = ? AND category_id = ? AND slug = ? ORDER BY id LIMIT 1",
        LISTING_COLUMNS
    );
    let listing = sqlx::query_as::<_, Listing>(&sql)
        .bind(dealer_id)
        .bind(category_id)
        .bind(slug)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(listing)
}

pub async fn slug_exists(conn: &mut SqliteConnection, slug: &str) -> AppResult<bool> {
    let row = sqlx::query("SELECT 1 FROM listings WHERE slug = ? LIMIT 1")
        .bind(slug)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.is_some())
}

/// Apply a partial update; the slug is never recomputed.
pub async fn update_listing(
    conn: &mut SqliteConnection,
    id: i64,
    dealer_id: i64,
    update: &ListingUpdate,
) -> AppResult<Listing> {
    let mut listing = get_owned(conn, id, dealer_id).await?;

    if let Some(title) = &update.title {
        require_title(title)?;
        listing.title = title.trim().to_string();
    }
    if let Some(price) = update.price {
        listing.price = price;
    }
    if let Some(currency) = &update.currency {
        listing.currency = currency.clone();
    }
    if let Some(city) = &update.city {
        listing.city = city.clone();
    }
    if let Some(region) = &update.region {
        listing.region = region.clone();
    }
    if let Some(country) = &update.country {
        listing.country = country.clone();
    }
    if let Some(description) = &update.description {
        listing.description = description.clone();
    }
    if let Some(is_featured) = update.is_featured {
        listing.is_featured = is_featured;
    }

    sqlx::query(
        r#"
        UPDATE listings
        SET title = ?, price_cents = ?, currency = ?, city = ?, region = ?, country = ?,
            description = ?, is_featured = ?, updated_at = ?
        WHERE id = ? AND dealer_id = ?
        "#,
    )
    .bind(&listing.title)
    .bind(price_to_cents(listing.price)?)
    .bind(&listing.currency)
    .bind(&listing.city)
    .bind(&listing.region)
    .bind(&listing.country)
    .bind(&listing.description)
    .bind(listing.is_featured)
    .bind(Timestamp::now().value())
    .bind(id)
    .bind(dealer_id)
    .execute(&mut *conn)
    .await?;

    attributes::upsert_attributes(conn, id, listing.category_id, &update.attributes).await?;
    get_owned(conn, id, dealer_id).await
}

/// Unconditional status write; any status may follow any other.
pub async fn set_status(
    conn: &mut SqliteConnection,
    id: i64,
    dealer_id: i64,
    status: ListingStatus,
) -> AppResult<Listing> {
    let result = sqlx::query(
        "UPDATE listings SET status = ?, updated_at = ? WHERE id = ? AND dealer_id = ?",
    )
    .bind(status.as_str())
    .bind(Timestamp::now().value())
    .bind(id)
    .bind(dealer_id)
    .execute(&mut *conn)
    .await?;
    if result.rows_affected() == 0 {
        return Err(not_found());
    }

    info!(listing_id = id, status = %status, "listing status changed");
    get_owned(conn, id, dealer_id).await
}

/// Hard delete; images, attribute values and favorites cascade.
pub async fn delete_listing(conn: &mut SqliteConnection, id: i64, dealer_id: i64) -> AppResult<()> {
    let result = sqlx::query("DELETE FROM listings WHERE id = ? AND dealer_id = ?")
        .bind(id)
        .bind(dealer_id)
        .execute(&mut *conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(not_found());
    }
    info!(listing_id = id, dealer_id, "deleted listing");
    Ok(())
}

/// Atomically add one view to a published listing and return the new count.
pub async fn increment_views(conn: &mut SqliteConnection, id: i64) -> AppResult<i64> {
    let count: Option<i64> = sqlx::query_scalar(
        "UPDATE listings SET views_count = views_count + 1 WHERE id = ? AND status = 'PUBLISHED' RETURNING views_count",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    count.ok_or_else(not_found)
}

/// A dealer's listings in any status, newest first.
pub async fn list_for_dealer(
    conn: &mut SqliteConnection,
    dealer_id: i64,
    pagination: Pagination,
) -> AppResult<Vec<Listing>> {
    let sql = format!(
        "SELECT {} FROM listings WHERE dealer_id = ? ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
        LISTING_COLUMNS
    );
    let listings = sqlx::query_as::<_, Listing>(&sql)
        .bind(dealer_id)
        .bind(pagination.limit as i64)
        .bind(pagination.offset as i64)
        .fetch_all(&mut *conn)
        .await?;
    Ok(listings)
}

/// Rows for a list of ids, keeping the order of `ids` and dropping missing ones.
pub async fn get_many(conn: &mut SqliteConnection, ids: &[i64]) -> AppResult<Vec<Listing>> {
    let mut listings = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(listing) = get_listing(conn, *id).await? {
            listings.push(listing);
        }
    }
    Ok(listings)
}
