// Listing search - filtered, paginated queries over published listings
//
// Universal listings can be filtered by any number of attribute predicates. Each
// predicate is its own join against the attribute value table, so the page query
// selects DISTINCT rows and the count query counts distinct ids.

use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use crate::core::{price_to_cents, Page, Pagination};
use crate::domains::legacy::CarListing;
use crate::domains::listings::Listing;
use crate::error::AppResult;

/// One `(attribute key, value)` predicate. The value is matched case-insensitively
/// as a substring of the stored value's text form.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AttributeFilter {
    pub key: String,
    #[serde(deserialize_with = "string_or_scalar")]
    pub value: String,
}

impl AttributeFilter {
    pub fn new(key: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

fn string_or_scalar<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Bool(b) => Ok(b.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "attribute filter value must be a scalar, got {}",
            other
        ))),
    }
}

/// Filter for universal listings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ListingFilter {
    pub q: Option<String>,
    pub category_slug: Option<String>,
    pub price_min: Option<Decimal>,
    pub price_max: Option<Decimal>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub featured_only: bool,
    pub attributes: Vec<AttributeFilter>,
}

/// Filter for legacy car listings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CarListingFilter {
    pub q: Option<String>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub year_min: Option<i64>,
    pub year_max: Option<i64>,
    pub price_min: Option<Decimal>,
    pub price_max: Option<Decimal>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub featured_only: bool,
}

const ORDER_CLAUSE: &str = " ORDER BY l.is_featured DESC, l.created_at DESC, l.id DESC";

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// `instr(lower(column), lower(?)) > 0`: case-insensitive substring without LIKE
/// wildcard semantics.
fn push_contains(qb: &mut QueryBuilder<'_, Sqlite>, column: &str, needle: &str) {
    qb.push(format!("instr(lower({}), lower(", column));
    qb.push_bind(needle.to_string());
    qb.push(")) > 0");
}

fn push_text_search(qb: &mut QueryBuilder<'_, Sqlite>, columns: &[&str], needle: &str) {
    qb.push(" AND (");
    for (index, column) in columns.iter().enumerate() {
        if index > 0 {
            qb.push(" OR ");
        }
        push_contains(qb, column, needle);
    }
    qb.push(")");
}

fn push_iexact(qb: &mut QueryBuilder<'_, Sqlite>, column: &str, value: Option<&str>) {
    if let Some(value) = value {
        qb.push(format!(" AND lower({}) = lower(", column));
        qb.push_bind(value.to_string());
        qb.push(")");
    }
}

fn push_price_range(
    qb: &mut QueryBuilder<'_, Sqlite>,
    min: Option<Decimal>,
    max: Option<Decimal>,
) -> AppResult<()> {
    if let Some(min) = min {
        qb.push(" AND l.price_cents >= ");
        qb.push_bind(price_to_cents(min)?);
    }
    if let Some(max) = max {
        qb.push(" AND l.price_cents <= ");
        qb.push_bind(price_to_cents(max)?);
    }
    Ok(())
}

fn push_pagination(qb: &mut QueryBuilder<'_, Sqlite>, pagination: Pagination) {
    qb.push(" LIMIT ");
    qb.push_bind(pagination.limit as i64);
    qb.push(" OFFSET ");
    qb.push_bind(pagination.offset as i64);
}

/// FROM, joins and WHERE for universal listings.
fn push_listing_from(qb: &mut QueryBuilder<'_, Sqlite>, filter: &ListingFilter) -> AppResult<()> {
    qb.push(" FROM listings l JOIN categories c ON c.id = l.category_id");

    for (index, predicate) in filter
        .attributes
        .iter()
        .filter(|p| !p.key.trim().is_empty())
        .enumerate()
    {
        let (av, ca) = (format!("av{}", index), format!("ca{}", index));
        qb.push(format!(
            " JOIN listing_attribute_values {av} ON {av}.listing_id = l.id JOIN category_attributes {ca} ON {ca}.id = {av}.attribute_id AND {ca}.key = ",
            av = av,
            ca = ca
        ));
        qb.push_bind(predicate.key.trim().to_string());
        qb.push(" AND ");
        push_contains(qb, &format!("{}.value", av), predicate.value.trim());
    }

    qb.push(" WHERE l.status = 'PUBLISHED'");
    if filter.featured_only {
        qb.push(" AND l.is_featured = 1");
    }
    if let Some(slug) = non_blank(&filter.category_slug) {
        qb.push(" AND c.slug = ");
        qb.push_bind(slug.to_string());
    }
    if let Some(q) = non_blank(&filter.q) {
        push_text_search(
            qb,
            &["l.title", "l.description", "l.city", "l.region", "l.country"],
            q,
        );
    }
    push_price_range(qb, filter.price_min, filter.price_max)?;
    push_iexact(qb, "l.country", non_blank(&filter.country));
    push_iexact(qb, "l.region", non_blank(&filter.region));
    push_iexact(qb, "l.city", non_blank(&filter.city));
    Ok(())
}

/// Published universal listings matching `filter`, featured first then newest.
pub async fn search_listings(
    conn: &mut SqliteConnection,
    filter: &ListingFilter,
    pagination: Pagination,
) -> AppResult<Vec<Listing>> {
    let mut qb = QueryBuilder::<Sqlite>::new("SELECT DISTINCT l.*");
    push_listing_from(&mut qb, filter)?;
    qb.push(ORDER_CLAUSE);
    push_pagination(&mut qb, pagination);

    let listings = qb.build_query_as::<Listing>().fetch_all(&mut *conn).await?;
    Ok(listings)
}

pub async fn count_listings(conn: &mut SqliteConnection, filter: &ListingFilter) -> AppResult<u64> {
    let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(DISTINCT l.id)");
    push_listing_from(&mut qb, filter)?;

    let count: i64 = qb.build_query_scalar().fetch_one(&mut *conn).await?;
    Ok(count.max(0) as u64)
}

/// Total plus the requested window.
pub async fn listings_page(
    conn: &mut SqliteConnection,
    filter: &ListingFilter,
    pagination: Pagination,
) -> AppResult<Page<Listing>> {
    let total = count_listings(conn, filter).await?;
    let results = search_listings(conn, filter, pagination).await?;
    Ok(Page::new(results, total, pagination))
}

fn push_car_from(qb: &mut QueryBuilder<'_, Sqlite>, filter: &CarListingFilter) -> AppResult<()> {
    qb.push(" FROM car_listings l WHERE l.status = 'PUBLISHED'");
    if filter.featured_only {
        qb.push(" AND l.is_featured = 1");
    }
    if let Some(q) = non_blank(&filter.q) {
        push_text_search(
            qb,
            &["l.title", "l.make", "l.model", "l.trim", "l.description"],
            q,
        );
    }
    push_iexact(qb, "l.make", non_blank(&filter.make));
    push_iexact(qb, "l.model", non_blank(&filter.model));
    if let Some(year_min) = filter.year_min {
        qb.push(" AND l.year >= ");
        qb.push_bind(year_min);
    }
    if let Some(year_max) = filter.year_max {
        qb.push(" AND l.year <= ");
        qb.push_bind(year_max);
    }
    push_price_range(qb, filter.price_min, filter.price_max)?;
    push_iexact(qb, "l.country", non_blank(&filter.country));
    push_iexact(qb, "l.region", non_blank(&filter.region));
    push_iexact(qb, "l.city", non_blank(&filter.city));
    Ok(())
}

pub async fn search_car_listings(
    conn: &mut SqliteConnection,
    filter: &CarListingFilter,
    pagination: Pagination,
) -> AppResult<Vec<CarListing>> {
    let mut qb = QueryBuilder::<Sqlite>::new("SELECT l.*");
    push_car_from(&mut qb, filter)?;
    qb.push(ORDER_CLAUSE);
    push_pagination(&mut qb, pagination);

    let listings = qb.build_query_as::<CarListing>().fetch_all(&mut *conn).await?;
    Ok(listings)
}

pub async fn count_car_listings(
    conn: &mut SqliteConnection,
    filter: &CarListingFilter,
) -> AppResult<u64> {
    let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*)");
    push_car_from(&mut qb, filter)?;

    let count: i64 = qb.build_query_scalar().fetch_one(&mut *conn).await?;
    Ok(count.max(0) as u64)
}

pub async fn car_listings_page(
    conn: &mut SqliteConnection,
    filter: &CarListingFilter,
    pagination: Pagination,
) -> AppResult<Page<CarListing>> {
    let total = count_car_listings(conn, filter).await?;
    let results = search_car_listings(conn, filter, pagination).await?;
    Ok(Page::new(results, total, pagination))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::attributes::AttributeInput;
    use crate::domains::catalog::{
        get_or_create_category, upsert_attribute, AttributeDataType, AttributeSpec, Category,
    };
    use crate::domains::fixtures::{new_car, seed_dealer};
    use crate::domains::legacy;
    use crate::domains::listings::{self, ListingStatus, ListingUpdate, NewListing};
    use crate::infrastructure::database::MarketDatabase;

    struct Market {
        db: MarketDatabase,
        dealer: i64,
        cars: Category,
    }

    async fn market() -> Market {
        let db = MarketDatabase::new_in_memory().await.unwrap();
        let mut conn = db.acquire().await.unwrap();
        let dealer = seed_dealer(&mut conn, "dealer").await;
        let (cars, _) = get_or_create_category(&mut conn, "Cars", "cars").await.unwrap();
        for spec in [
            AttributeSpec::new("mileage", "Mileage", AttributeDataType::Int),
            AttributeSpec::new("make", "Make", AttributeDataType::Text),
            AttributeSpec::new("color", "Color", AttributeDataType::Text),
        ] {
            upsert_attribute(&mut conn, cars.id, &spec).await.unwrap();
        }
        drop(conn);
        Market { db, dealer, cars }
    }

    async fn publish(
        m: &Market,
        title: &str,
        price: i64,
        city: &str,
        attributes: Vec<AttributeInput>,
    ) -> Listing {
        let mut conn = m.db.acquire().await.unwrap();
        let input = NewListing {
            category_slug: "cars".to_string(),
            title: title.to_string(),
            price: Decimal::new(price, 0),
            currency: "USD".to_string(),
            city: city.to_string(),
            region: String::new(),
            country: "Tanzania".to_string(),
            description: String::new(),
            attributes,
        };
        let listing = listings::create_listing(&mut conn, m.dealer, None, &m.cars, &input)
            .await
            .unwrap();
        listings::set_status(&mut conn, listing.id, m.dealer, ListingStatus::Published)
            .await
            .unwrap()
    }

    fn ids(listings: &[Listing]) -> Vec<i64> {
        listings.iter().map(|l| l.id).collect()
    }

    #[tokio::test]
    async fn test_attribute_predicate_matches_stringified_value() {
        let m = market().await;
        let rav4 = publish(&m, "Toyota RAV4", 18_500, "Arusha", vec![AttributeInput::new("mileage", 50000)]).await;
        publish(&m, "Subaru Forester", 15_000, "Arusha", vec![AttributeInput::new("mileage", 120000)]).await;
        let mut conn = m.db.acquire().await.unwrap();

        let filter = ListingFilter {
            attributes: vec![AttributeFilter::new("mileage", "50000")],
            ..Default::default()
        };
        let found = search_listings(&mut conn, &filter, Pagination::default()).await.unwrap();
        assert_eq!(ids(&found), vec![rav4.id]);

        let filter = ListingFilter {
            attributes: vec![AttributeFilter::new("mileage", "99999")],
            ..Default::default()
        };
        assert!(search_listings(&mut conn, &filter, Pagination::default()).await.unwrap().is_empty());

        // Unknown keys match nothing rather than failing
        let filter = ListingFilter {
            attributes: vec![AttributeFilter::new("wingspan", "1")],
            ..Default::default()
        };
        let page = listings_page(&mut conn, &filter, Pagination::default()).await.unwrap();
        assert_eq!(page.total_count, 0);
    }

    #[tokio::test]
    async fn test_multiple_predicates_are_anded_without_duplicates() {
        let m = market().await;
        let red_toyota = publish(
            &m,
            "Red Toyota",
            10_000,
            "Moshi",
            vec![AttributeInput::new("make", "Toyota"), AttributeInput::new("color", "Red")],
        )
        .await;
        publish(
            &m,
            "Blue Toyota",
            10_000,
            "Moshi",
            vec![AttributeInput::new("make", "Toyota"), AttributeInput::new("color", "Blue")],
        )
        .await;
        let mut conn = m.db.acquire().await.unwrap();

        let filter = ListingFilter {
            attributes: vec![
                AttributeFilter::new("make", "toyota"),
                AttributeFilter::new("color", "RED"),
            ],
            ..Default::default()
        };
        let page = listings_page(&mut conn, &filter, Pagination::default()).await.unwrap();
        assert_eq!(page.total_count, 1);
        assert_eq!(ids(&page.results), vec![red_toyota.id]);

        let filter = ListingFilter {
            attributes: vec![AttributeFilter::new("make", "Toy")],
            ..Default::default()
        };
        let page = listings_page(&mut conn, &filter, Pagination::default()).await.unwrap();
        assert_eq!(page.total_count, 2);
        assert_eq!(page.results.len(), 2);
    }

    #[tokio::test]
    async fn test_only_published_and_featured_first() {
        let m = market().await;
        let older = publish(&m, "Older", 1_000, "Arusha", vec![]).await;
        let newer = publish(&m, "Newer", 1_000, "Arusha", vec![]).await;
        let featured = publish(&m, "Featured", 1_000, "Arusha", vec![]).await;
        let mut conn = m.db.acquire().await.unwrap();
        listings::update_listing(
            &mut conn,
            featured.id,
            m.dealer,
            &ListingUpdate {
                is_featured: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let draft = listings::create_listing(
            &mut conn,
            m.dealer,
            None,
            &m.cars,
            &NewListing {
                category_slug: "cars".to_string(),
                title: "Draft".to_string(),
                price: Decimal::new(1_000, 0),
                currency: "USD".to_string(),
                city: String::new(),
                region: String::new(),
                country: "Tanzania".to_string(),
                description: String::new(),
                attributes: vec![],
            },
        )
        .await
        .unwrap();

        let all = search_listings(&mut conn, &ListingFilter::default(), Pagination::default())
            .await
            .unwrap();
        assert_eq!(ids(&all), vec![featured.id, newer.id, older.id]);
        assert!(!ids(&all).contains(&draft.id));

        let filter = ListingFilter {
            featured_only: true,
            ..Default::default()
        };
        let only = search_listings(&mut conn, &filter, Pagination::default()).await.unwrap();
        assert_eq!(ids(&only), vec![featured.id]);
    }

    #[tokio::test]
    async fn test_text_price_location_and_category_filters() {
        let m = market().await;
        let cheap = publish(&m, "Cheap Vitz", 4_000, "Arusha", vec![]).await;
        let pricey = publish(&m, "Land Cruiser", 60_000, "Dodoma", vec![]).await;
        let mut conn = m.db.acquire().await.unwrap();

        let by_text = ListingFilter {
            q: Some("cruiser".to_string()),
            ..Default::default()
        };
        assert_eq!(
            ids(&search_listings(&mut conn, &by_text, Pagination::default()).await.unwrap()),
            vec![pricey.id]
        );

        // Free text also covers location columns
        let by_city_text = ListingFilter {
            q: Some("arush".to_string()),
            ..Default::default()
        };
        assert_eq!(
            ids(&search_listings(&mut conn, &by_city_text, Pagination::default()).await.unwrap()),
            vec![cheap.id]
        );

        let by_price = ListingFilter {
            price_min: Some(Decimal::new(5_000, 0)),
            price_max: Some(Decimal::new(60_000, 0)),
            ..Default::default()
        };
        assert_eq!(
            ids(&search_listings(&mut conn, &by_price, Pagination::default()).await.unwrap()),
            vec![pricey.id]
        );

        let by_city = ListingFilter {
            city: Some("dodoma".to_string()),
            ..Default::default()
        };
        assert_eq!(
            ids(&search_listings(&mut conn, &by_city, Pagination::default()).await.unwrap()),
            vec![pricey.id]
        );

        let other_category = ListingFilter {
            category_slug: Some("boats".to_string()),
            ..Default::default()
        };
        assert_eq!(count_listings(&mut conn, &other_category).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_pagination_consistency() {
        let m = market().await;
        for i in 0..5 {
            publish(&m, &format!("Car {}", i), 1_000, "Arusha", vec![]).await;
        }
        let mut conn = m.db.acquire().await.unwrap();
        let filter = ListingFilter::default();

        let first = listings_page(&mut conn, &filter, Pagination::new(2, 0)).await.unwrap();
        assert_eq!(first.total_count, 5);
        assert_eq!(first.results.len(), 2);
        assert!(first.page_info.has_next);
        assert!(!first.page_info.has_prev);

        let last = listings_page(&mut conn, &filter, Pagination::new(2, 4)).await.unwrap();
        assert_eq!(last.total_count, 5);
        assert_eq!(last.results.len(), 1);
        assert!(!last.page_info.has_next);
        assert!(last.page_info.has_prev);

        let beyond = listings_page(&mut conn, &filter, Pagination::new(2, 50)).await.unwrap();
        assert_eq!(beyond.total_count, 5);
        assert!(beyond.results.is_empty());
    }

    #[tokio::test]
    async fn test_car_filter_covers_make_model_and_years() {
        let m = market().await;
        let mut conn = m.db.acquire().await.unwrap();

        let mut rav4 = new_car("Family SUV", "Toyota", "RAV4");
        rav4.year = 2017;
        rav4.trim = "GX".to_string();
        let rav4 = legacy::create_car_listing(&mut conn, m.dealer, None, &rav4).await.unwrap();
        let mut golf = new_car("Hatchback", "VW", "Golf");
        golf.year = 2012;
        let golf = legacy::create_car_listing(&mut conn, m.dealer, None, &golf).await.unwrap();
        for id in [rav4.id, golf.id] {
            legacy::set_status(&mut conn, id, m.dealer, ListingStatus::Published)
                .await
                .unwrap();
        }

        let by_make = CarListingFilter {
            make: Some("toyota".to_string()),
            ..Default::default()
        };
        let found = search_car_listings(&mut conn, &by_make, Pagination::default()).await.unwrap();
        assert_eq!(found.iter().map(|c| c.id).collect::<Vec<_>>(), vec![rav4.id]);

        // q matches trim on legacy rows
        let by_trim = CarListingFilter {
            q: Some("gx".to_string()),
            ..Default::default()
        };
        assert_eq!(count_car_listings(&mut conn, &by_trim).await.unwrap(), 1);

        let by_year = CarListingFilter {
            year_min: Some(2010),
            year_max: Some(2015),
            ..Default::default()
        };
        let page = car_listings_page(&mut conn, &by_year, Pagination::default()).await.unwrap();
        assert_eq!(page.total_count, 1);
        assert_eq!(page.results[0].id, golf.id);
    }
}
