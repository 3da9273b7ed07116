// Favorites - per-user bookmarks of published listings

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, SqliteConnection};

use super::{listing_is_published, ListingGeneration};
use crate::core::{Pagination, Timestamp};
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Favorite {
    pub id: i64,
    pub user_id: i64,
    pub listing_id: i64,
    pub created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, SqliteRow> for Favorite {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            listing_id: row.try_get("listing_id")?,
            created_at: Timestamp(row.try_get("created_at")?).to_datetime(),
        })
    }
}

/// Insert the favorite if absent. Returns true when a row was created.
pub async fn get_or_create(
    conn: &mut SqliteConnection,
    generation: ListingGeneration,
    user_id: i64,
    listing_id: i64,
) -> AppResult<bool> {
    let sql = format!(
        "INSERT INTO {} (user_id, listing_id, created_at) VALUES (?, ?, ?) ON CONFLICT(user_id, listing_id) DO NOTHING",
        generation.favorites_table()
    );
    let result = sqlx::query(&sql)
        .bind(user_id)
        .bind(listing_id)
        .bind(Timestamp::now().value())
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() == 1)
}

/// Flip the favorite state of a published listing. Returns the new state.
pub async fn toggle(
    conn: &mut SqliteConnection,
    generation: ListingGeneration,
    user_id: i64,
    listing_id: i64,
) -> AppResult<bool> {
    if !listing_is_published(conn, generation, listing_id).await? {
        return Err(AppError::NotFound("Listing not found.".to_string()));
    }

    let sql = format!(
        "DELETE FROM {} WHERE user_id = ? AND listing_id = ?",
        generation.favorites_table()
    );
    let removed = sqlx::query(&sql)
        .bind(user_id)
        .bind(listing_id)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    if removed > 0 {
        return Ok(false);
    }

    get_or_create(conn, generation, user_id, listing_id).await?;
    Ok(true)
}

pub async fn is_favorited(
    conn: &mut SqliteConnection,
    generation: ListingGeneration,
    user_id: i64,
    listing_id: i64,
) -> AppResult<bool> {
    let sql = format!(
        "SELECT 1 FROM {} WHERE user_id = ? AND listing_id = ?",
        generation.favorites_table()
    );
    let row = sqlx::query(&sql)
        .bind(user_id)
        .bind(listing_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.is_some())
}

/// Listing ids a user favorited, most recent first.
pub async fn favorite_listing_ids(
    conn: &mut SqliteConnection,
    generation: ListingGeneration,
    user_id: i64,
    pagination: Pagination,
) -> AppResult<Vec<i64>> {
    let sql = format!(
        "SELECT listing_id FROM {} WHERE user_id = ? ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
        generation.favorites_table()
    );
    let ids = sqlx::query_scalar(&sql)
        .bind(user_id)
        .bind(pagination.limit as i64)
        .bind(pagination.offset as i64)
        .fetch_all(&mut *conn)
        .await?;
    Ok(ids)
}

/// Every favorite of a generation in id order.
pub async fn list_all(
    conn: &mut SqliteConnection,
    generation: ListingGeneration,
) -> AppResult<Vec<Favorite>> {
    let sql = format!(
        "SELECT id, user_id, listing_id, created_at FROM {} ORDER BY id",
        generation.favorites_table()
    );
    let favorites = sqlx::query_as::<_, Favorite>(&sql)
        .fetch_all(&mut *conn)
        .await?;
    Ok(favorites)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::fixtures::{new_car, seed_dealer, seed_user};
    use crate::domains::legacy::{create_car_listing, set_status};
    use crate::domains::listings::ListingStatus;
    use crate::infrastructure::database::MarketDatabase;

    const V1: ListingGeneration = ListingGeneration::Legacy;

    #[tokio::test]
    async fn test_toggle_flips_state() {
        let db = MarketDatabase::new_in_memory().await.unwrap();
        let mut conn = db.acquire().await.unwrap();
        let dealer = seed_dealer(&mut conn, "dealer").await;
        let buyer = seed_user(&mut conn, "buyer").await;
        let car = create_car_listing(&mut conn, dealer, None, &new_car("VW Golf", "VW", "Golf"))
            .await
            .unwrap();

        // Drafts cannot be favorited
        assert!(matches!(
            toggle(&mut conn, V1, buyer, car.id).await,
            Err(AppError::NotFound(_))
        ));

        set_status(&mut conn, car.id, dealer, ListingStatus::Published).await.unwrap();
        assert!(toggle(&mut conn, V1, buyer, car.id).await.unwrap());
        assert!(is_favorited(&mut conn, V1, buyer, car.id).await.unwrap());
        assert_eq!(
            favorite_listing_ids(&mut conn, V1, buyer, Pagination::default()).await.unwrap(),
            vec![car.id]
        );

        assert!(!toggle(&mut conn, V1, buyer, car.id).await.unwrap());
        assert!(!is_favorited(&mut conn, V1, buyer, car.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let db = MarketDatabase::new_in_memory().await.unwrap();
        let mut conn = db.acquire().await.unwrap();
        let dealer = seed_dealer(&mut conn, "dealer").await;
        let buyer = seed_user(&mut conn, "buyer").await;
        let car = create_car_listing(&mut conn, dealer, None, &new_car("VW Polo", "VW", "Polo"))
            .await
            .unwrap();

        assert!(get_or_create(&mut conn, V1, buyer, car.id).await.unwrap());
        assert!(!get_or_create(&mut conn, V1, buyer, car.id).await.unwrap());
        assert_eq!(list_all(&mut conn, V1).await.unwrap().len(), 1);
    }
}
