// Domain stores
// Each module owns the rows of one aggregate and exposes async functions over
// `&mut SqliteConnection`, so callers decide the transaction boundary.

pub mod accounts;
pub mod attributes;
pub mod catalog;
pub mod dealers;
pub mod favorites;
pub mod images;
pub mod leads;
pub mod legacy;
pub mod listings;
pub mod projection;

use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;

use crate::error::AppResult;

/// Which listing schema a row belongs to.
///
/// Legacy rows live in the fixed-column car tables; universal rows live in the
/// category/attribute tables. Images and favorites exist for both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingGeneration {
    Legacy,
    Universal,
}

impl ListingGeneration {
    pub fn listings_table(self) -> &'static str {
        match self {
            ListingGeneration::Legacy => "car_listings",
            ListingGeneration::Universal => "listings",
        }
    }

    pub fn images_table(self) -> &'static str {
        match self {
            ListingGeneration::Legacy => "car_images",
            ListingGeneration::Universal => "listing_images",
        }
    }

    pub fn favorites_table(self) -> &'static str {
        match self {
            ListingGeneration::Legacy => "favorites",
            ListingGeneration::Universal => "favorites_v2",
        }
    }

    /// Blob path prefix for a listing's uploads.
    pub fn media_prefix(self, listing_id: i64) -> String {
        match self {
            ListingGeneration::Legacy => format!("listings/{}", listing_id),
            ListingGeneration::Universal => format!("listings/v2/{}", listing_id),
        }
    }
}

/// Whether `listing_id` exists in the generation's table and belongs to `dealer_id`.
pub async fn listing_owned_by(
    conn: &mut SqliteConnection,
    generation: ListingGeneration,
    listing_id: i64,
    dealer_id: i64,
) -> AppResult<bool> {
    let sql = format!(
        "SELECT 1 FROM {} WHERE id = ? AND dealer_id = ?",
        generation.listings_table()
    );
    let row = sqlx::query(&sql)
        .bind(listing_id)
        .bind(dealer_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.is_some())
}

/// Whether `listing_id` exists and is published.
pub async fn listing_is_published(
    conn: &mut SqliteConnection,
    generation: ListingGeneration,
    listing_id: i64,
) -> AppResult<bool> {
    let sql = format!(
        "SELECT 1 FROM {} WHERE id = ? AND status = 'PUBLISHED'",
        generation.listings_table()
    );
    let row = sqlx::query(&sql)
        .bind(listing_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.is_some())
}

/// Column decode failure for values stored as text but parsed into enums or JSON.
pub(crate) fn decode_error(
    column: &str,
    source: impl std::error::Error + Send + Sync + 'static,
) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(source),
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use rust_decimal::Decimal;
    use sqlx::SqliteConnection;

    use super::dealers::{self, NewDealerProfile};
    use super::legacy::{FuelType, NewCarListing, Transmission};
    use super::listings::{self, NewListing};
    use super::{accounts, catalog};

    pub async fn seed_user(conn: &mut SqliteConnection, username: &str) -> i64 {
        accounts::create_user(conn, username, &format!("{}@example.com", username), "unused")
            .await
            .unwrap()
            .id
    }

    /// A user with a dealer profile; returns the dealer id.
    pub async fn seed_dealer(conn: &mut SqliteConnection, username: &str) -> i64 {
        let user_id = seed_user(conn, username).await;
        let profile = NewDealerProfile {
            dealership_name: format!("{} Motors", username),
            phone: String::new(),
            whatsapp: String::new(),
            email_public: String::new(),
            city: "Arusha".to_string(),
            region: String::new(),
            country: "Tanzania".to_string(),
            bio: String::new(),
        };
        dealers::create_dealer_profile(conn, user_id, &profile)
            .await
            .unwrap()
            .id
    }

    /// A draft universal listing; returns its id.
    pub async fn seed_listing(
        conn: &mut SqliteConnection,
        dealer_id: i64,
        category_id: i64,
        title: &str,
    ) -> i64 {
        let category = catalog::get_category_by_id(conn, category_id).await.unwrap();
        let input = NewListing {
            category_slug: category.slug.clone(),
            title: title.to_string(),
            price: Decimal::new(1_000_000, 2),
            currency: "USD".to_string(),
            city: "Arusha".to_string(),
            region: String::new(),
            country: "Tanzania".to_string(),
            description: String::new(),
            attributes: vec![],
        };
        listings::create_listing(conn, dealer_id, None, &category, &input)
            .await
            .unwrap()
            .id
    }

    pub fn new_car(title: &str, make: &str, model: &str) -> NewCarListing {
        NewCarListing {
            title: title.to_string(),
            price: Decimal::new(1_850_000, 2),
            currency: "USD".to_string(),
            city: "Dar es Salaam".to_string(),
            region: String::new(),
            country: "Tanzania".to_string(),
            year: 2017,
            make: make.to_string(),
            model: model.to_string(),
            trim: String::new(),
            mileage: None,
            fuel_type: FuelType::Petrol,
            transmission: Transmission::Auto,
            body_type: String::new(),
            color: String::new(),
            vin: String::new(),
            description: String::new(),
        }
    }
}
