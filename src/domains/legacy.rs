// Legacy car listings - fixed-column listing schema kept alongside the universal one
// Writes here are not mirrored into migrated universal listings.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, SqliteConnection};
use std::str::FromStr;
use tracing::info;

use super::decode_error;
use super::listings::{ListingStatus, DEFAULT_COUNTRY, DEFAULT_CURRENCY};
use crate::core::slug::{base_slug, next_free_slug};
use crate::core::{cents_to_price, price_to_cents, Pagination, Timestamp};
use crate::error::{AppError, AppResult};

const SLUG_FALLBACK: &str = "car";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FuelType {
    Petrol,
    Diesel,
    Hybrid,
    Electric,
    Other,
}

impl FuelType {
    pub const ALL: [&'static str; 5] = ["PETROL", "DIESEL", "HYBRID", "ELECTRIC", "OTHER"];

    pub fn as_str(self) -> &'static str {
        match self {
            FuelType::Petrol => "PETROL",
            FuelType::Diesel => "DIESEL",
            FuelType::Hybrid => "HYBRID",
            FuelType::Electric => "ELECTRIC",
            FuelType::Other => "OTHER",
        }
    }
}

impl FromStr for FuelType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PETROL" => Ok(FuelType::Petrol),
            "DIESEL" => Ok(FuelType::Diesel),
            "HYBRID" => Ok(FuelType::Hybrid),
            "ELECTRIC" => Ok(FuelType::Electric),
            "OTHER" => Ok(FuelType::Other),
            other => Err(AppError::Validation(format!("Unknown fuel type '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Transmission {
    Auto,
    Manual,
    Cvt,
    Other,
}

impl Transmission {
    pub const ALL: [&'static str; 4] = ["AUTO", "MANUAL", "CVT", "OTHER"];

    pub fn as_str(self) -> &'static str {
        match self {
            Transmission::Auto => "AUTO",
            Transmission::Manual => "MANUAL",
            Transmission::Cvt => "CVT",
            Transmission::Other => "OTHER",
        }
    }
}

impl FromStr for Transmission {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AUTO" => Ok(Transmission::Auto),
            "MANUAL" => Ok(Transmission::Manual),
            "CVT" => Ok(Transmission::Cvt),
            "OTHER" => Ok(Transmission::Other),
            other => Err(AppError::Validation(format!("Unknown transmission '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CarListing {
    pub id: i64,
    pub dealer_id: i64,
    pub title: String,
    pub slug: String,
    pub price: Decimal,
    pub currency: String,
    pub city: String,
    pub region: String,
    pub country: String,
    pub year: i64,
    pub make: String,
    pub model: String,
    pub trim: String,
    pub mileage: Option<i64>,
    pub fuel_type: FuelType,
    pub transmission: Transmission,
    pub body_type: String,
    pub color: String,
    pub vin: String,
    pub description: String,
    pub status: ListingStatus,
    pub is_featured: bool,
    pub views_count: i64,
    pub created_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, SqliteRow> for CarListing {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let fuel_type: String = row.try_get("fuel_type")?;
        let transmission: String = row.try_get("transmission")?;
        let status: String = row.try_get("status")?;
        Ok(Self {
            id: row.try_get("id")?,
            dealer_id: row.try_get("dealer_id")?,
            title: row.try_get("title")?,
            slug: row.try_get("slug")?,
            price: cents_to_price(row.try_get("price_cents")?),
            currency: row.try_get("currency")?,
            city: row.try_get("city")?,
            region: row.try_get("region")?,
            country: row.try_get("country")?,
            year: row.try_get("year")?,
            make: row.try_get("make")?,
            model: row.try_get("model")?,
            trim: row.try_get("trim")?,
            mileage: row.try_get("mileage")?,
            fuel_type: fuel_type.parse().map_err(|e| decode_error("fuel_type", e))?,
            transmission: transmission
                .parse()
                .map_err(|e| decode_error("transmission", e))?,
            body_type: row.try_get("body_type")?,
            color: row.try_get("color")?,
            vin: row.try_get("vin")?,
            description: row.try_get("description")?,
            status: status.parse().map_err(|e| decode_error("status", e))?,
            is_featured: row.try_get("is_featured")?,
            views_count: row.try_get("views_count")?,
            created_by: row.try_get("created_by")?,
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

fn default_fuel_type() -> FuelType {
    FuelType::Petrol
}

fn default_transmission() -> Transmission {
    Transmission::Auto
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewCarListing {
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
    pub year: i64,
    pub make: String,
    pub model: String,
    #[serde(default)]
    pub trim: String,
    #[serde(default)]
    pub mileage: Option<i64>,
    #[serde(default = "default_fuel_type")]
    pub fuel_type: FuelType,
    #[serde(default = "default_transmission")]
    pub transmission: Transmission,
    #[serde(default)]
    pub body_type: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub vin: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CarListingUpdate {
    pub title: Option<String>,
    pub price: Option<Decimal>,
    pub currency: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
    pub year: Option<i64>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub trim: Option<String>,
    pub mileage: Option<i64>,
    pub fuel_type: Option<FuelType>,
    pub transmission: Option<Transmission>,
    pub body_type: Option<String>,
    pub color: Option<String>,
    pub vin: Option<String>,
    pub description: Option<String>,
    pub is_featured: Option<bool>,
}

const CAR_COLUMNS: &str = "id, dealer_id, title, slug, price_cents, currency, city, region, country, year, make, model, trim, mileage, fuel_type, transmission, body_type, color, vin, description, status, is_featured, views_count, created_by, created_at, updated_at";

fn not_found() -> AppError {
    AppError::NotFound("Listing not found.".to_string())
}

fn validate_car(title: &str, mileage: Option<i64>) -> AppResult<()> {
    if title.trim().is_empty() {
        return Err(AppError::Validation("Title cannot be empty.".to_string()));
    }
    if mileage.is_some_and(|m| m < 0) {
        return Err(AppError::Validation("Mileage cannot be negative.".to_string()));
    }
    Ok(())
}

pub async fn create_car_listing(
    conn: &mut SqliteConnection,
    dealer_id: i64,
    created_by: Option<i64>,
    input: &NewCarListing,
) -> AppResult<CarListing> {
    validate_car(&input.title, input.mileage)?;
    let slug = next_free_slug(conn, "car_listings", &base_slug(&input.title, SLUG_FALLBACK)).await?;
    let now = Timestamp::now().value();

    let result = sqlx::query(
        r#"
        INSERT INTO car_listings
            (dealer_id, title, slug, price_cents, currency, city, region, country, year, make, model,
             trim, mileage, fuel_type, transmission, body_type, color, vin, description, status,
             is_featured, views_count, created_by, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'DRAFT', 0, 0, ?, ?, ?)
        "#,
    )
    .bind(dealer_id)
    .bind(input.title.trim())
    .bind(&slug)
    .bind(price_to_cents(input.price)?)
    .bind(&input.currency)
    .bind(&input.city)
    .bind(&input.region)
    .bind(&input.country)
    .bind(input.year)
    .bind(&input.make)
    .bind(&input.model)
    .bind(&input.trim)
    .bind(input.mileage)
    .bind(input.fuel_type.as_str())
    .bind(input.transmission.as_str())
    .bind(&input.body_type)
    .bind(&input.color)
    .bind(&input.vin)
    .bind(&input.description)
    .bind(created_by)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    let id = result.last_insert_rowid();
    info!(listing_id = id, dealer_id, "created car listing");
    get_car_listing(conn, id).await?.ok_or_else(not_found)
}

pub async fn get_car_listing(conn: &mut SqliteConnection, id: i64) -> AppResult<Option<CarListing>> {
    let sql = format!("SELECT {} FROM car_listings WHERE id = ?", CAR_COLUMNS);
    let listing = sqlx::query_as::<_, CarListing>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(listing)
}

pub async fn get_published(conn: &mut SqliteConnection, id: i64) -> AppResult<Option<CarListing>> {
    let sql = format!(
        "SELECT {} FROM car_listings WHERE id = ? AND status = 'PUBLISHED'",
        CAR_COLUMNS
    );
    let listing = sqlx::query_as::<_, CarListing>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(listing)
}

pub async fn get_published_by_slug(
    conn: &mut SqliteConnection,
    slug: &str,
) -> AppResult<Option<CarListing>> {
    let sql = format!(
        "SELECT {} FROM car_listings WHERE slug = ? AND status = 'PUBLISHED'",
        CAR_COLUMNS
    );
    let listing = sqlx::query_as::<_, CarListing>(&sql)
        .bind(slug)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(listing)
}

pub async fn get_owned(
    conn: &mut SqliteConnection,
    id: i64,
    dealer_id: i64,
) -> AppResult<CarListing> {
    let sql = format!("SELECT {} FROM car_listings WHERE id = ? AND dealer_id = ?", CAR_COLUMNS);
    sqlx::query_as::<_, CarListing>(&sql)
        .bind(id)
        .bind(dealer_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(not_found)
}

/// Legacy rows in id order, optionally capped.
pub async fn list_all(conn: &mut SqliteConnection, limit: Option<u32>) -> AppResult<Vec<CarListing>> {
    let sql = format!("SELECT {} FROM car_listings ORDER BY id LIMIT ?", CAR_COLUMNS);
    let limit = limit.map(i64::from).unwrap_or(-1);
    let listings = sqlx::query_as::<_, CarListing>(&sql)
        .bind(limit)
        .fetch_all(&mut *conn)
        .await?;
    Ok(listings)
}

pub async fn update_car_listing(
    conn: &mut SqliteConnection,
    id: i64,
    dealer_id: i64,
    update: &CarListingUpdate,
) -> AppResult<CarListing> {
    let mut car = get_owned(conn, id, dealer_id).await?;

    if let Some(v) = &update.title {
        car.title = v.trim().to_string();
    }
    if let Some(v) = update.price {
        car.price = v;
    }
    if let Some(v) = &update.currency {
        car.currency = v.clone();
    }
    if let Some(v) = &update.city {
        car.city = v.clone();
    }
    if let Some(v) = &update.region {
        car.region = v.clone();
    }
    if let Some(v) = &update.country {
        car.country = v.clone();
    }
    if let Some(v) = update.year {
        car.year = v;
    }
    if let Some(v) = &update.make {
        car.make = v.clone();
    }
    if let Some(v) = &update.model {
        car.model = v.clone();
    }
    if let Some(v) = &update.trim {
        car.trim = v.clone();
    }
    if let Some(v) = update.mileage {
        car.mileage = Some(v);
    }
    if let Some(v) = update.fuel_type {
        car.fuel_type = v;
    }
    if let Some(v) = update.transmission {
        car.transmission = v;
    }
    if let Some(v) = &update.body_type {
        car.body_type = v.clone();
    }
    if let Some(v) = &update.color {
        car.color = v.clone();
    }
    if let Some(v) = &update.vin {
        car.vin = v.clone();
    }
    if let Some(v) = &update.description {
        car.description = v.clone();
    }
    if let Some(v) = update.is_featured {
        car.is_featured = v;
    }
    validate_car(&car.title, car.mileage)?;

    sqlx::query(
        r#"
        UPDATE car_listings
        SET title = ?, price_cents = ?, currency = ?, city = ?, region = ?, country = ?, year = ?,
            make = ?, model = ?, trim = ?, mileage = ?, fuel_type = ?, transmission = ?,
            body_type = ?, color = ?, vin = ?, description = ?, is_featured = ?, updated_at = ?
        WHERE id = ? AND dealer_id = ?
        "#,
    )
    .bind(&car.title)
    .bind(price_to_cents(car.price)?)
    .bind(&car.currency)
    .bind(&car.city)
    .bind(&car.region)
    .bind(&car.country)
    .bind(car.year)
    .bind(&car.make)
    .bind(&car.model)
    .bind(&car.trim)
    .bind(car.mileage)
    .bind(car.fuel_type.as_str())
    .bind(car.transmission.as_str())
    .bind(&car.body_type)
    .bind(&car.color)
    .bind(&car.vin)
    .bind(&car.description)
    .bind(car.is_featured)
    .bind(Timestamp::now().value())
    .bind(id)
    .bind(dealer_id)
    .execute(&mut *conn)
    .await?;

    get_owned(conn, id, dealer_id).await
}

pub async fn set_status(
    conn: &mut SqliteConnection,
    id: i64,
    dealer_id: i64,
    status: ListingStatus,
) -> AppResult<CarListing> {
    let result = sqlx::query(
        "UPDATE car_listings SET status = ?, updated_at = ? WHERE id = ? AND dealer_id = ?",
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
    get_owned(conn, id, dealer_id).await
}

pub async fn delete_car_listing(
    conn: &mut SqliteConnection,
    id: i64,
    dealer_id: i64,
) -> AppResult<()> {
    let result = sqlx::query("DELETE FROM car_listings WHERE id = ? AND dealer_id = ?")
        .bind(id)
        .bind(dealer_id)
        .execute(&mut *conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(not_found());
    }
    Ok(())
}

pub async fn increment_views(conn: &mut SqliteConnection, id: i64) -> AppResult<i64> {
    let count: Option<i64> = sqlx::query_scalar(
        "UPDATE car_listings SET views_count = views_count + 1 WHERE id = ? AND status = 'PUBLISHED' RETURNING views_count",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    count.ok_or_else(not_found)
}

pub async fn list_for_dealer(
    conn: &mut SqliteConnection,
    dealer_id: i64,
    pagination: Pagination,
) -> AppResult<Vec<CarListing>> {
    let sql = format!(
        "SELECT {} FROM car_listings WHERE dealer_id = ? ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
        CAR_COLUMNS
    );
    let listings = sqlx::query_as::<_, CarListing>(&sql)
        .bind(dealer_id)
        .bind(pagination.limit as i64)
        .bind(pagination.offset as i64)
        .fetch_all(&mut *conn)
        .await?;
    Ok(listings)
}

pub async fn get_many(conn: &mut SqliteConnection, ids: &[i64]) -> AppResult<Vec<CarListing>> {
    let mut listings = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(listing) = get_car_listing(conn, *id).await? {
            listings.push(listing);
        }
    }
    Ok(listings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::fixtures::{new_car, seed_dealer};
    use crate::infrastructure::database::MarketDatabase;

    #[tokio::test]
    async fn test_create_defaults_and_slug_fallback() {
        let db = MarketDatabase::new_in_memory().await.unwrap();
        let mut conn = db.acquire().await.unwrap();
        let dealer = seed_dealer(&mut conn, "dealer").await;

        let car = create_car_listing(&mut conn, dealer, None, &new_car("Toyota RAV4", "Toyota", "RAV4"))
            .await
            .unwrap();
        assert_eq!(car.slug, "toyota-rav4");
        assert_eq!(car.status, ListingStatus::Draft);
        assert_eq!(car.fuel_type, FuelType::Petrol);
        assert_eq!(car.country, "Tanzania");

        let second = create_car_listing(&mut conn, dealer, None, &new_car("Toyota RAV4", "Toyota", "RAV4"))
            .await
            .unwrap();
        assert_eq!(second.slug, "toyota-rav4-2");

        let blank = create_car_listing(&mut conn, dealer, None, &new_car("%%", "Toyota", "RAV4"))
            .await
            .unwrap();
        assert_eq!(blank.slug, "car");
    }

    #[tokio::test]
    async fn test_partial_update_and_list_all_limit() {
        let db = MarketDatabase::new_in_memory().await.unwrap();
        let mut conn = db.acquire().await.unwrap();
        let dealer = seed_dealer(&mut conn, "dealer").await;
        let car = create_car_listing(&mut conn, dealer, None, &new_car("Subaru Forester", "Subaru", "Forester"))
            .await
            .unwrap();
        create_car_listing(&mut conn, dealer, None, &new_car("Mazda CX-5", "Mazda", "CX-5"))
            .await
            .unwrap();

        let update = CarListingUpdate {
            mileage: Some(88_000),
            transmission: Some(Transmission::Manual),
            ..Default::default()
        };
        let updated = update_car_listing(&mut conn, car.id, dealer, &update).await.unwrap();
        assert_eq!(updated.mileage, Some(88_000));
        assert_eq!(updated.transmission, Transmission::Manual);
        assert_eq!(updated.make, "Subaru");

        let negative = CarListingUpdate {
            mileage: Some(-1),
            ..Default::default()
        };
        assert!(matches!(
            update_car_listing(&mut conn, car.id, dealer, &negative).await,
            Err(AppError::Validation(_))
        ));

        assert_eq!(list_all(&mut conn, Some(1)).await.unwrap().len(), 1);
        assert_eq!(list_all(&mut conn, None).await.unwrap().len(), 2);
    }
}
