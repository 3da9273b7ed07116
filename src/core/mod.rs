// Core types and primitives shared by every domain

pub mod pagination;
pub mod slug;
pub mod strong_types;

pub use pagination::{Page, PageInfo, Pagination};
pub use strong_types::{cents_to_price, price_to_cents, Timestamp};
