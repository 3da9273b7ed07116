// Listing views - API-facing shapes assembled from several stores
//
// A view carries the listing plus its dealer, images with public URLs and, for
// universal listings, category and attribute values. `is_favorited` is computed
// for the current viewer and is false for anonymous requests.

use serde::Serialize;
use serde_json::Value;
use sqlx::SqliteConnection;

use crate::core::Pagination;
use crate::domains::attributes::{self, ListingAttributeValue};
use crate::domains::catalog::{self, Category, CategoryAttribute};
use crate::domains::dealers::{self, DealerProfile};
use crate::domains::images::{self, ListingImage};
use crate::domains::leads::InquiryLead;
use crate::domains::legacy::{self, CarListing};
use crate::domains::listings::{self, Listing};
use crate::domains::projection::{merge_newest_first, ListingCard};
use crate::domains::{favorites, ListingGeneration};
use crate::error::{AppError, AppResult};
use crate::infrastructure::media::BlobStore;

#[derive(Debug, Clone, Serialize)]
pub struct ImageView {
    #[serde(flatten)]
    pub image: ListingImage,
    pub image_url: String,
    pub thumbnail_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttributeValueView {
    pub id: i64,
    pub attribute: CategoryAttribute,
    /// Plain JSON scalar of the typed value
    pub value: Value,
}

impl From<ListingAttributeValue> for AttributeValueView {
    fn from(value: ListingAttributeValue) -> Self {
        Self {
            id: value.id,
            value: value.value.to_json(),
            attribute: value.attribute,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ListingView {
    #[serde(flatten)]
    pub listing: Listing,
    pub dealer: DealerProfile,
    pub category: Category,
    pub images: Vec<ImageView>,
    pub attribute_values: Vec<AttributeValueView>,
    pub is_favorited: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CarListingView {
    #[serde(flatten)]
    pub listing: CarListing,
    pub dealer: DealerProfile,
    pub images: Vec<ImageView>,
    pub is_favorited: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeadView {
    #[serde(flatten)]
    pub lead: InquiryLead,
    pub listing: Option<ListingCard>,
    pub dealer: DealerProfile,
}

/// Builds views for one request
pub struct ListingViewService<'a> {
    blobs: &'a dyn BlobStore,
    viewer: Option<i64>,
}

impl<'a> ListingViewService<'a> {
    pub fn new(blobs: &'a dyn BlobStore, viewer: Option<i64>) -> Self {
        Self { blobs, viewer }
    }

    pub fn image_view(&self, image: ListingImage) -> ImageView {
        ImageView {
            image_url: self.blobs.url(&image.image_ref),
            thumbnail_url: image.thumbnail_ref.as_deref().map(|r| self.blobs.url(r)),
            image,
        }
    }

    async fn image_views(
        &self,
        conn: &mut SqliteConnection,
        generation: ListingGeneration,
        listing_id: i64,
    ) -> AppResult<Vec<ImageView>> {
        let rows = images::list_images(conn, generation, listing_id).await?;
        Ok(rows.into_iter().map(|image| self.image_view(image)).collect())
    }

    async fn is_favorited(
        &self,
        conn: &mut SqliteConnection,
        generation: ListingGeneration,
        listing_id: i64,
    ) -> AppResult<bool> {
        match self.viewer {
            Some(user_id) => favorites::is_favorited(conn, generation, user_id, listing_id).await,
            None => Ok(false),
        }
    }

    pub async fn listing(&self, conn: &mut SqliteConnection, listing: Listing) -> AppResult<ListingView> {
        let dealer = load_dealer(conn, listing.dealer_id).await?;
        let category = catalog::get_category_by_id(conn, listing.category_id).await?;
        let images = self
            .image_views(conn, ListingGeneration::Universal, listing.id)
            .await?;
        let attribute_values = attributes::values_for_listing(conn, listing.id)
            .await?
            .into_iter()
            .map(AttributeValueView::from)
            .collect();
        let is_favorited = self
            .is_favorited(conn, ListingGeneration::Universal, listing.id)
            .await?;

        Ok(ListingView {
            listing,
            dealer,
            category,
            images,
            attribute_values,
            is_favorited,
        })
    }

    pub async fn listings(
        &self,
        conn: &mut SqliteConnection,
        rows: Vec<Listing>,
    ) -> AppResult<Vec<ListingView>> {
        let mut views = Vec::with_capacity(rows.len());
        for listing in rows {
            views.push(self.listing(conn, listing).await?);
        }
        Ok(views)
    }

    pub async fn car_listing(
        &self,
        conn: &mut SqliteConnection,
        listing: CarListing,
    ) -> AppResult<CarListingView> {
        let dealer = load_dealer(conn, listing.dealer_id).await?;
        let images = self.image_views(conn, ListingGeneration::Legacy, listing.id).await?;
        let is_favorited = self
            .is_favorited(conn, ListingGeneration::Legacy, listing.id)
            .await?;
        Ok(CarListingView {
            listing,
            dealer,
            images,
            is_favorited,
        })
    }

    pub async fn car_listings(
        &self,
        conn: &mut SqliteConnection,
        rows: Vec<CarListing>,
    ) -> AppResult<Vec<CarListingView>> {
        let mut views = Vec::with_capacity(rows.len());
        for listing in rows {
            views.push(self.car_listing(conn, listing).await?);
        }
        Ok(views)
    }

    pub async fn leads(
        &self,
        conn: &mut SqliteConnection,
        leads: Vec<InquiryLead>,
    ) -> AppResult<Vec<LeadView>> {
        let mut views = Vec::with_capacity(leads.len());
        for lead in leads {
            let listing = legacy::get_car_listing(conn, lead.listing_id)
                .await?
                .map(|car| ListingCard::from_projection(&car));
            let dealer = load_dealer(conn, lead.dealer_id).await?;
            views.push(LeadView {
                lead,
                listing,
                dealer,
            });
        }
        Ok(views)
    }
}

async fn load_dealer(conn: &mut SqliteConnection, dealer_id: i64) -> AppResult<DealerProfile> {
    dealers::get_dealer(conn, dealer_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Dealer {} not found.", dealer_id)))
}

/// A dealer's listings of both generations as cards, newest first.
///
/// Each generation contributes at most `pagination.end()` rows, which is enough to
/// cut the requested window out of the merged sequence.
pub async fn dealer_listing_cards(
    conn: &mut SqliteConnection,
    dealer_id: i64,
    pagination: Pagination,
) -> AppResult<Vec<ListingCard>> {
    let window = Pagination::new(pagination.end().min(u32::MAX as u64) as u32, 0);

    let mut cards: Vec<ListingCard> = legacy::list_for_dealer(conn, dealer_id, window)
        .await?
        .iter()
        .map(ListingCard::from_projection)
        .collect();
    cards.extend(
        listings::list_for_dealer(conn, dealer_id, window)
            .await?
            .iter()
            .map(ListingCard::from_projection),
    );

    Ok(merge_newest_first(cards)
        .into_iter()
        .skip(pagination.offset as usize)
        .take(pagination.limit as usize)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::attributes::AttributeInput;
    use crate::domains::catalog::{get_or_create_category, upsert_attribute, AttributeDataType, AttributeSpec};
    use crate::domains::fixtures::{new_car, seed_dealer, seed_listing, seed_user};
    use crate::domains::leads::{self, NewInquiry};
    use crate::domains::listings::ListingStatus;
    use crate::infrastructure::database::MarketDatabase;
    use crate::infrastructure::media::FsBlobStore;

    #[tokio::test]
    async fn test_listing_view_collects_relations() {
        let db = MarketDatabase::new_in_memory().await.unwrap();
        let blobs = FsBlobStore::new("/tmp/unused", "/media/");
        let mut conn = db.acquire().await.unwrap();
        let dealer = seed_dealer(&mut conn, "dealer").await;
        let buyer = seed_user(&mut conn, "buyer").await;
        let (cars, _) = get_or_create_category(&mut conn, "Cars", "cars").await.unwrap();
        upsert_attribute(&mut conn, cars.id, &AttributeSpec::new("mileage", "Mileage", AttributeDataType::Int))
            .await
            .unwrap();
        let id = seed_listing(&mut conn, dealer, cars.id, "Toyota Vitz").await;
        attributes::upsert_attributes(&mut conn, id, cars.id, &[AttributeInput::new("mileage", "42000")])
            .await
            .unwrap();
        images::add_images(
            &mut conn,
            ListingGeneration::Universal,
            id,
            &["listings/v2/1/a.jpg".to_string()],
            false,
            0,
        )
        .await
        .unwrap();
        listings::set_status(&mut conn, id, dealer, ListingStatus::Published).await.unwrap();
        favorites::toggle(&mut conn, ListingGeneration::Universal, buyer, id).await.unwrap();

        let listing = listings::get_listing(&mut conn, id).await.unwrap().unwrap();
        let view = ListingViewService::new(&blobs, Some(buyer))
            .listing(&mut conn, listing.clone())
            .await
            .unwrap();
        assert_eq!(view.category.slug, "cars");
        assert_eq!(view.dealer.id, dealer);
        assert_eq!(view.images[0].image_url, "/media/listings/v2/1/a.jpg");
        assert_eq!(view.images[0].thumbnail_url, None);
        assert!(view.images[0].image.is_cover);
        assert_eq!(view.attribute_values[0].attribute.key, "mileage");
        assert_eq!(view.attribute_values[0].value, serde_json::json!(42000));
        assert!(view.is_favorited);

        let anonymous = ListingViewService::new(&blobs, None)
            .listing(&mut conn, listing)
            .await
            .unwrap();
        assert!(!anonymous.is_favorited);

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["slug"], "toyota-vitz");
        assert_eq!(json["images"][0]["is_cover"], true);
    }

    #[tokio::test]
    async fn test_lead_view_and_dealer_cards() {
        let db = MarketDatabase::new_in_memory().await.unwrap();
        let blobs = FsBlobStore::new("/tmp/unused", "/media/");
        let mut conn = db.acquire().await.unwrap();
        let dealer = seed_dealer(&mut conn, "dealer").await;
        let (cars, _) = get_or_create_category(&mut conn, "Cars", "cars").await.unwrap();

        let car = legacy::create_car_listing(&mut conn, dealer, None, &new_car("VW Golf", "VW", "Golf"))
            .await
            .unwrap();
        legacy::set_status(&mut conn, car.id, dealer, ListingStatus::Published)
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let universal = seed_listing(&mut conn, dealer, cars.id, "Mazda Demio").await;

        let lead = leads::create_inquiry(
            &mut conn,
            car.id,
            &NewInquiry {
                name: "Asha".to_string(),
                phone: "+255700000000".to_string(),
                email: String::new(),
                message: "Still available?".to_string(),
                source: "web".to_string(),
            },
        )
        .await
        .unwrap();
        let views = ListingViewService::new(&blobs, None)
            .leads(&mut conn, vec![lead])
            .await
            .unwrap();
        assert_eq!(views[0].listing.as_ref().unwrap().id, car.id);
        assert_eq!(views[0].dealer.id, dealer);

        let cards = dealer_listing_cards(&mut conn, dealer, Pagination::default()).await.unwrap();
        assert_eq!(cards.len(), 2);
        assert_eq!(cards[0].generation, ListingGeneration::Universal);
        assert_eq!(cards[0].id, universal);
        assert_eq!(cards[1].generation, ListingGeneration::Legacy);

        let second = dealer_listing_cards(&mut conn, dealer, Pagination::new(1, 1)).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, car.id);
    }
}
