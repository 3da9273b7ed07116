// Dealer profiles - one optional seller identity per user

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, SqliteConnection};
use tracing::info;

use super::listings::DEFAULT_COUNTRY;
use crate::core::{Pagination, Timestamp};
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DealerProfile {
    pub id: i64,
    pub user_id: i64,
    pub dealership_name: String,
    pub phone: String,
    pub whatsapp: String,
    pub email_public: String,
    pub city: String,
    pub region: String,
    pub country: String,
    pub bio: String,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, SqliteRow> for DealerProfile {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            dealership_name: row.try_get("dealership_name")?,
            phone: row.try_get("phone")?,
            whatsapp: row.try_get("whatsapp")?,
            email_public: row.try_get("email_public")?,
            city: row.try_get("city")?,
            region: row.try_get("region")?,
            country: row.try_get("country")?,
            bio: row.try_get("bio")?,
            is_verified: row.try_get("is_verified")?,
            created_at: Timestamp(row.try_get("created_at")?).to_datetime(),
        })
    }
}

fn default_country() -> String {
    DEFAULT_COUNTRY.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewDealerProfile {
    pub dealership_name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub whatsapp: String,
    #[serde(default)]
    pub email_public: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub region: String,
    #[serde(default = "default_country")]
    pub country: String,
    #[serde(default)]
    pub bio: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DealerProfileUpdate {
    pub dealership_name: Option<String>,
    pub phone: Option<String>,
    pub whatsapp: Option<String>,
    pub email_public: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
    pub bio: Option<String>,
}

const DEALER_COLUMNS: &str = "id, user_id, dealership_name, phone, whatsapp, email_public, city, region, country, bio, is_verified, created_at";

pub async fn find_by_user(
    conn: &mut SqliteConnection,
    user_id: i64,
) -> AppResult<Option<DealerProfile>> {
    let sql = format!("SELECT {} FROM dealer_profiles WHERE user_id = ?", DEALER_COLUMNS);
    let dealer = sqlx::query_as::<_, DealerProfile>(&sql)
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(dealer)
}

/// The dealer identity of `user_id`; Forbidden when the user has none.
pub async fn resolve_dealer(conn: &mut SqliteConnection, user_id: i64) -> AppResult<DealerProfile> {
    find_by_user(conn, user_id)
        .await?
        .ok_or_else(|| AppError::Forbidden("Dealer profile not found.".to_string()))
}

pub async fn get_dealer(conn: &mut SqliteConnection, id: i64) -> AppResult<Option<DealerProfile>> {
    let sql = format!("SELECT {} FROM dealer_profiles WHERE id = ?", DEALER_COLUMNS);
    let dealer = sqlx::query_as::<_, DealerProfile>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(dealer)
}

/// Newest dealers first.
pub async fn list_dealers(
    conn: &mut SqliteConnection,
    pagination: Pagination,
) -> AppResult<Vec<DealerProfile>> {
    let sql = format!(
        "SELECT {} FROM dealer_profiles ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
        DEALER_COLUMNS
    );
    let dealers = sqlx::query_as::<_, DealerProfile>(&sql)
        .bind(pagination.limit as i64)
        .bind(pagination.offset as i64)
        .fetch_all(&mut *conn)
        .await?;
    Ok(dealers)
}

pub async fn create_dealer_profile(
    conn: &mut SqliteConnection,
    user_id: i64,
    input: &NewDealerProfile,
) -> AppResult<DealerProfile> {
    if input.dealership_name.trim().is_empty() {
        return Err(AppError::Validation("Dealership name cannot be empty.".to_string()));
    }
    if find_by_user(conn, user_id).await?.is_some() {
        return Err(AppError::Conflict("Dealer profile already exists.".to_string()));
    }

    sqlx::query(
        r#"
        INSERT INTO dealer_profiles
            (user_id, dealership_name, phone, whatsapp, email_public, city, region, country, bio,
             is_verified, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?)
        "#,
    )
    .bind(user_id)
    .bind(input.dealership_name.trim())
    .bind(&input.phone)
    .bind(&input.whatsapp)
    .bind(&input.email_public)
    .bind(&input.city)
    .bind(&input.region)
    .bind(&input.country)
    .bind(&input.bio)
    .bind(Timestamp::now().value())
    .execute(&mut *conn)
    .await?;

    info!(user_id, "created dealer profile");
    resolve_dealer(conn, user_id).await
}

pub async fn update_dealer_profile(
    conn: &mut SqliteConnection,
    user_id: i64,
    update: &DealerProfileUpdate,
) -> AppResult<DealerProfile> {
    let mut dealer = find_by_user(conn, user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Dealer profile not found.".to_string()))?;

    if let Some(v) = &update.dealership_name {
        if v.trim().is_empty() {
            return Err(AppError::Validation("Dealership name cannot be empty.".to_string()));
        }
        dealer.dealership_name = v.trim().to_string();
    }
    if let Some(v) = &update.phone {
        dealer.phone = v.clone();
    }
    if let Some(v) = &update.whatsapp {
        dealer.whatsapp = v.clone();
    }
    if let Some(v) = &update.email_public {
        dealer.email_public = v.clone();
    }
    if let Some(v) = &update.city {
        dealer.city = v.clone();
    }
    if let Some(v) = &update.region {
        dealer.region = v.clone();
    }
    if let Some(v) = &update.country {
        dealer.country = v.clone();
    }
    if let Some(v) = &update.bio {
        dealer.bio = v.clone();
    }

    sqlx::query(
        r#"
        UPDATE dealer_profiles
        SET dealership_name = ?, phone = ?, whatsapp = ?, email_public = ?, city = ?, region = ?,
            country = ?, bio = ?
        WHERE id = ?
        "#,
    )
    .bind(&dealer.dealership_name)
    .bind(&dealer.phone)
    .bind(&dealer.whatsapp)
    .bind(&dealer.email_public)
    .bind(&dealer.city)
    .bind(&dealer.region)
    .bind(&dealer.country)
    .bind(&dealer.bio)
    .bind(dealer.id)
    .execute(&mut *conn)
    .await?;

    Ok(dealer)
}
