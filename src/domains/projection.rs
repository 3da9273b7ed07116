// Read-side projection shared by legacy and universal listings
// The two schemas keep separate storage; consumers that only need the common
// fields (dashboards, lead views) go through this trait.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::legacy::CarListing;
use super::listings::{Listing, ListingStatus};
use super::ListingGeneration;

pub trait ListingProjection {
    fn generation(&self) -> ListingGeneration;
    fn id(&self) -> i64;
    fn dealer_id(&self) -> i64;
    fn title(&self) -> &str;
    fn slug(&self) -> &str;
    fn price(&self) -> Decimal;
    fn currency(&self) -> &str;
    fn city(&self) -> &str;
    fn country(&self) -> &str;
    fn status(&self) -> ListingStatus;
    fn is_featured(&self) -> bool;
    fn views_count(&self) -> i64;
    fn created_at(&self) -> DateTime<Utc>;
}

macro_rules! impl_listing_projection {
    ($ty:ty, $generation:expr) => {
        impl ListingProjection for $ty {
            fn generation(&self) -> ListingGeneration {
                $generation
            }
            fn id(&self) -> i64 {
                self.id
            }
            fn dealer_id(&self) -> i64 {
                self.dealer_id
            }
            fn title(&self) -> &str {
                &self.title
            }
            fn slug(&self) -> &str {
                &self.slug
            }
            fn price(&self) -> Decimal {
                self.price
            }
            fn currency(&self) -> &str {
                &self.currency
            }
            fn city(&self) -> &str {
                &self.city
            }
            fn country(&self) -> &str {
                &self.country
            }
            fn status(&self) -> ListingStatus {
                self.status
            }
            fn is_featured(&self) -> bool {
                self.is_featured
            }
            fn views_count(&self) -> i64 {
                self.views_count
            }
            fn created_at(&self) -> DateTime<Utc> {
                self.created_at
            }
        }
    };
}

impl_listing_projection!(Listing, ListingGeneration::Universal);
impl_listing_projection!(CarListing, ListingGeneration::Legacy);

/// Compact, generation-tagged summary of a listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListingCard {
    pub generation: ListingGeneration,
    pub id: i64,
    pub dealer_id: i64,
    pub title: String,
    pub slug: String,
    pub price: Decimal,
    pub currency: String,
    pub city: String,
    pub country: String,
    pub status: ListingStatus,
    pub is_featured: bool,
    pub views_count: i64,
    pub created_at: DateTime<Utc>,
}

impl ListingCard {
    pub fn from_projection<P: ListingProjection + ?Sized>(listing: &P) -> Self {
        Self {
            generation: listing.generation(),
            id: listing.id(),
            dealer_id: listing.dealer_id(),
            title: listing.title().to_string(),
            slug: listing.slug().to_string(),
            price: listing.price(),
            currency: listing.currency().to_string(),
            city: listing.city().to_string(),
            country: listing.country().to_string(),
            status: listing.status(),
            is_featured: listing.is_featured(),
            views_count: listing.views_count(),
            created_at: listing.created_at(),
        }
    }
}

/// Merge cards from both generations, newest first.
pub fn merge_newest_first(mut cards: Vec<ListingCard>) -> Vec<ListingCard> {
    cards.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    cards
}
