// Services - operations that span several domain stores

pub mod car_migration;
pub mod listing_search;
pub mod listing_views;
pub mod thumbnails;

pub use listing_search::{AttributeFilter, CarListingFilter, ListingFilter};
pub use listing_views::ListingViewService;
pub use thumbnails::{ThumbnailContext, ThumbnailQueue};
