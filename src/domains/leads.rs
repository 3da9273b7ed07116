// Inquiry leads sent by buyers about legacy car listings

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, SqliteConnection};
use tracing::info;

use super::legacy;
use crate::core::{Pagination, Timestamp};
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InquiryLead {
    pub id: i64,
    pub listing_id: i64,
    pub dealer_id: i64,
    pub name: String,
    pub phone: String,
    pub email: String,
    pub message: String,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, SqliteRow> for InquiryLead {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            listing_id: row.try_get("listing_id")?,
            dealer_id: row.try_get("dealer_id")?,
            name: row.try_get("name")?,
            phone: row.try_get("phone")?,
            email: row.try_get("email")?,
            message: row.try_get("message")?,
            source: row.try_get("source")?,
            created_at: Timestamp(row.try_get("created_at")?).to_datetime(),
        })
    }
}

fn default_source() -> String {
    "web".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewInquiry {
    pub name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub message: String,
    #[serde(default = "default_source")]
    pub source: String,
}

/// Record an inquiry against a published car listing. The lead goes to the listing's dealer.
pub async fn create_inquiry(
    conn: &mut SqliteConnection,
    listing_id: i64,
    input: &NewInquiry,
) -> AppResult<InquiryLead> {
    if input.name.trim().is_empty() {
        return Err(AppError::Validation("Name cannot be empty.".to_string()));
    }
    let listing = legacy::get_published(conn, listing_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Listing not found.".to_string()))?;

    let result = sqlx::query(
        r#"
        INSERT INTO inquiry_leads (listing_id, dealer_id, name, phone, email, message, source, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(listing.id)
    .bind(listing.dealer_id)
    .bind(input.name.trim())
    .bind(&input.phone)
    .bind(&input.email)
    .bind(&input.message)
    .bind(&input.source)
    .bind(Timestamp::now().value())
    .execute(&mut *conn)
    .await?;

    let id = result.last_insert_rowid();
    info!(lead_id = id, listing_id, dealer_id = listing.dealer_id, "recorded inquiry");

    sqlx::query_as::<_, InquiryLead>(
        "SELECT id, listing_id, dealer_id, name, phone, email, message, source, created_at FROM inquiry_leads WHERE id = ?",
    )
    .bind(id)
    .fetch_one(&mut *conn)
    .await
    .map_err(AppError::from)
}

/// A dealer's leads, newest first.
pub async fn list_for_dealer(
    conn: &mut SqliteConnection,
    dealer_id: i64,
    pagination: Pagination,
) -> AppResult<Vec<InquiryLead>> {
    let leads = sqlx::query_as::<_, InquiryLead>(
        r#"
        SELECT id, listing_id, dealer_id, name, phone, email, message, source, created_at
        FROM inquiry_leads
        WHERE dealer_id = ?
        ORDER BY created_at DESC, id DESC
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(dealer_id)
    .bind(pagination.limit as i64)
    .bind(pagination.offset as i64)
    .fetch_all(&mut *conn)
    .await?;
    Ok(leads)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::fixtures::{new_car, seed_dealer};
    use crate::domains::legacy::{create_car_listing, set_status};
    use crate::domains::listings::ListingStatus;
    use crate::infrastructure::database::MarketDatabase;

    fn inquiry(name: &str) -> NewInquiry {
        NewInquiry {
            name: name.to_string(),
            phone: "+255711000000".to_string(),
            email: String::new(),
            message: "Is it still available?".to_string(),
            source: default_source(),
        }
    }

    #[tokio::test]
    async fn test_inquiry_requires_published_listing() {
        let db = MarketDatabase::new_in_memory().await.unwrap();
        let mut conn = db.acquire().await.unwrap();
        let dealer = seed_dealer(&mut conn, "dealer").await;
        let car = create_car_listing(&mut conn, dealer, None, &new_car("Nissan X-Trail", "Nissan", "X-Trail"))
            .await
            .unwrap();

        assert!(matches!(
            create_inquiry(&mut conn, car.id, &inquiry("Juma")).await,
            Err(AppError::NotFound(_))
        ));

        set_status(&mut conn, car.id, dealer, ListingStatus::Published).await.unwrap();
        let first = create_inquiry(&mut conn, car.id, &inquiry("Juma")).await.unwrap();
        let second = create_inquiry(&mut conn, car.id, &inquiry("Neema")).await.unwrap();
        assert_eq!(first.dealer_id, dealer);
        assert_eq!(first.source, "web");

        let leads = list_for_dealer(&mut conn, dealer, Pagination::default()).await.unwrap();
        let ids: Vec<i64> = leads.iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }
}
