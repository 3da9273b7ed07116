// Legacy car migration - projects CarListing rows into the universal listing tables
//
// One run is one transaction. A dry run executes the same reads and counts inside a
// transaction that is always rolled back. Legacy rows are only ever read.

use serde::Serialize;
use sqlx::SqliteConnection;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::{debug, info, warn};

use crate::core::slug::{base_slug, next_free_slug};
use crate::core::Timestamp;
use crate::domains::attributes::{self, AttributeValue};
use crate::domains::catalog::{self, AttributeDataType, AttributeSpec, Category};
use crate::domains::images::{self, NewImage};
use crate::domains::legacy::{self, CarListing, FuelType, Transmission};
use crate::domains::listings::{self, Listing, ListingDraft};
use crate::domains::{favorites, ListingGeneration};
use crate::error::AppResult;
use crate::infrastructure::database::MarketDatabase;
use crate::infrastructure::job_lock::JobLock;

pub const CARS_CATEGORY_NAME: &str = "Cars";
pub const CARS_CATEGORY_SLUG: &str = "cars";
pub const MIGRATION_LOCK: &str = "migrate_cars_to_v2";

/// Definitions of the ten car attributes, in display order.
pub fn car_attribute_specs() -> Vec<AttributeSpec> {
    use AttributeDataType::{Choice, Int, Text};

    vec![
        AttributeSpec::new("year", "Year", Int).required(true).sort_order(10),
        AttributeSpec::new("make", "Make", Text).required(true).sort_order(20),
        AttributeSpec::new("model", "Model", Text).required(true).sort_order(30),
        AttributeSpec::new("trim", "Trim", Text).sort_order(40),
        AttributeSpec::new("mileage", "Mileage", Int).sort_order(50),
        AttributeSpec::new("fuel_type", "Fuel Type", Choice)
            .choices(&FuelType::ALL)
            .sort_order(60),
        AttributeSpec::new("transmission", "Transmission", Choice)
            .choices(&Transmission::ALL)
            .sort_order(70),
        AttributeSpec::new("body_type", "Body Type", Text).sort_order(80),
        AttributeSpec::new("color", "Color", Text).sort_order(90),
        AttributeSpec::new("vin", "VIN", Text).filterable(false).sort_order(100),
    ]
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationOptions {
    pub dry_run: bool,
    /// Only the first `limit` legacy listings by id.
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub category_id: i64,
    pub attributes_created: usize,
    pub attributes_updated: usize,
    pub listings_created: usize,
    pub listings_skipped: usize,
    pub images_created: usize,
    pub favorites_created: usize,
    pub dry_run: bool,
    /// Legacy listing id to universal listing id, for created and skipped rows.
    pub id_map: BTreeMap<i64, i64>,
}

impl fmt::Display for MigrationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Listings created: {}, skipped(existing): {}, images created: {}, favorites created: {}",
            self.listings_created, self.listings_skipped, self.images_created, self.favorites_created
        )
    }
}

/// Run the migration under the job lock, committing unless this is a dry run.
pub async fn run(db: &MarketDatabase, options: MigrationOptions) -> AppResult<MigrationReport> {
    let lock = JobLock::acquire(db, MIGRATION_LOCK).await?;
    let outcome = run_in_transaction(db, options).await;
    let released = lock.release(db).await;

    let report = outcome?;
    released?;
    Ok(report)
}

async fn run_in_transaction(
    db: &MarketDatabase,
    options: MigrationOptions,
) -> AppResult<MigrationReport> {
    let mut tx = db.begin().await?;
    let report = match migrate(&mut tx, options).await {
        Ok(report) => report,
        Err(e) => {
            warn!(error = %e, "car migration failed, rolling back");
            tx.rollback().await?;
            return Err(e);
        }
    };

    if options.dry_run {
        tx.rollback().await?;
        info!("dry run: no changes written");
    } else {
        tx.commit().await?;
    }
    info!(
        listings_created = report.listings_created,
        listings_skipped = report.listings_skipped,
        images_created = report.images_created,
        favorites_created = report.favorites_created,
        dry_run = report.dry_run,
        "car migration finished"
    );
    Ok(report)
}

/// Make sure the Cars category and its attributes exist with the expected metadata.
pub async fn ensure_cars_schema(
    conn: &mut SqliteConnection,
    report: &mut MigrationReport,
) -> AppResult<Category> {
    let (cars, created) =
        catalog::get_or_create_category(conn, CARS_CATEGORY_NAME, CARS_CATEGORY_SLUG).await?;
    if created {
        info!(category_id = cars.id, "created Cars category");
    }

    for spec in car_attribute_specs() {
        match catalog::upsert_attribute(conn, cars.id, &spec).await? {
            catalog::AttributeUpsert::Created(_) => report.attributes_created += 1,
            catalog::AttributeUpsert::Updated(_) => report.attributes_updated += 1,
            catalog::AttributeUpsert::Unchanged(_) => {}
        }
    }

    report.category_id = cars.id;
    Ok(cars)
}

/// The migration proper, on a caller-owned transaction.
pub async fn migrate(
    conn: &mut SqliteConnection,
    options: MigrationOptions,
) -> AppResult<MigrationReport> {
    let mut report = MigrationReport {
        dry_run: options.dry_run,
        ..Default::default()
    };

    let cars = ensure_cars_schema(conn, &mut report).await?;
    let allowed = catalog::attributes_by_key(conn, cars.id).await?;

    for car in legacy::list_all(conn, options.limit).await? {
        if let Some(existing) = find_migrated(conn, &cars, &car).await? {
            if existing.legacy_listing_id.is_none() && !options.dry_run {
                listings::link_legacy(conn, existing.id, car.id).await?;
            }
            debug!(legacy_id = car.id, listing_id = existing.id, "already migrated");
            report.listings_skipped += 1;
            report.id_map.insert(car.id, existing.id);
            continue;
        }

        if options.dry_run {
            report.listings_created += 1;
            continue;
        }

        let listing_id = copy_listing(conn, &cars, &car).await?;
        attributes::upsert_values(conn, listing_id, &allowed, car_attribute_values(&car)).await?;
        report.images_created += copy_images(conn, car.id, listing_id).await?;

        report.listings_created += 1;
        report.id_map.insert(car.id, listing_id);
    }

    if !options.dry_run {
        report.favorites_created = migrate_favorites(conn, &cars, &report.id_map).await?;
    }
    Ok(report)
}

async fn copy_listing(conn: &mut SqliteConnection, cars: &Category, car: &CarListing) -> AppResult<i64> {
    let mut slug = if car.slug.is_empty() {
        base_slug(&car.title, "listing")
    } else {
        car.slug.clone()
    };
    if listings::slug_exists(conn, &slug).await? {
        slug = next_free_slug(conn, "listings", &slug).await?;
        debug!(legacy_id = car.id, slug = %slug, "legacy slug taken, using a suffixed one");
    }

    let draft = ListingDraft {
        dealer_id: car.dealer_id,
        category_id: cars.id,
        title: car.title.clone(),
        slug,
        price: car.price,
        currency: car.currency.clone(),
        city: car.city.clone(),
        region: car.region.clone(),
        country: car.country.clone(),
        description: car.description.clone(),
        status: car.status,
        is_featured: car.is_featured,
        views_count: car.views_count,
        created_by: car.created_by,
        legacy_listing_id: Some(car.id),
        created_at: Timestamp(car.created_at.timestamp_millis()),
        updated_at: Timestamp(car.updated_at.timestamp_millis()),
    };
    listings::insert_listing(conn, &draft).await
}

/// The ten attribute values of a legacy row. Only an absent mileage is skipped.
fn car_attribute_values(car: &CarListing) -> Vec<(String, AttributeValue)> {
    let mut values = vec![
        ("year", AttributeValue::Int(car.year)),
        ("make", AttributeValue::Text(car.make.clone())),
        ("model", AttributeValue::Text(car.model.clone())),
        ("trim", AttributeValue::Text(car.trim.clone())),
    ];
    if let Some(mileage) = car.mileage {
        values.push(("mileage", AttributeValue::Int(mileage)));
    }
    values.extend([
        ("fuel_type", AttributeValue::Choice(car.fuel_type.as_str().to_string())),
        ("transmission", AttributeValue::Choice(car.transmission.as_str().to_string())),
        ("body_type", AttributeValue::Text(car.body_type.clone())),
        ("color", AttributeValue::Text(car.color.clone())),
        ("vin", AttributeValue::Text(car.vin.clone())),
    ]);

    values
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

/// Duplicate the legacy image rows; the stored files are shared, not copied.
async fn copy_images(conn: &mut SqliteConnection, legacy_id: i64, listing_id: i64) -> AppResult<usize> {
    let legacy_images = images::list_images(conn, ListingGeneration::Legacy, legacy_id).await?;
    for image in &legacy_images {
        let copy = NewImage {
            image_ref: image.image_ref.clone(),
            thumbnail_ref: image.thumbnail_ref.clone(),
            is_cover: image.is_cover,
            sort_order: image.sort_order,
        };
        images::insert_image(conn, ListingGeneration::Universal, listing_id, &copy).await?;
    }
    Ok(legacy_images.len())
}

async fn migrate_favorites(
    conn: &mut SqliteConnection,
    cars: &Category,
    id_map: &BTreeMap<i64, i64>,
) -> AppResult<usize> {
    // Fallback lookups for listings outside this run, resolved once per legacy id
    let mut resolved: HashMap<i64, Option<i64>> = HashMap::new();
    let mut created = 0;

    for favorite in favorites::list_all(conn, ListingGeneration::Legacy).await? {
        let target = match id_map.get(&favorite.listing_id) {
            Some(id) => Some(*id),
            None => match resolved.get(&favorite.listing_id) {
                Some(cached) => *cached,
                None => {
                    let found = resolve_migrated(conn, cars, favorite.listing_id).await?;
                    resolved.insert(favorite.listing_id, found);
                    found
                }
            },
        };

        let Some(listing_id) = target else {
            debug!(legacy_id = favorite.listing_id, "favorite target not migrated, skipping");
            continue;
        };
        if favorites::get_or_create(conn, ListingGeneration::Universal, favorite.user_id, listing_id)
            .await?
        {
            created += 1;
        }
    }
    Ok(created)
}

/// The universal row already holding `car`: by recorded source id, else by the
/// (dealer, category, slug) key among rows with no source recorded.
async fn find_migrated(
    conn: &mut SqliteConnection,
    cars: &Category,
    car: &CarListing,
) -> AppResult<Option<Listing>> {
    if let Some(listing) = listings::find_by_legacy_id(conn, car.id).await? {
        return Ok(Some(listing));
    }
    let listing =
        listings::find_by_dealer_category_slug(conn, car.dealer_id, cars.id, &car.slug).await?;
    Ok(listing.filter(|l| l.legacy_listing_id.is_none()))
}

async fn resolve_migrated(
    conn: &mut SqliteConnection,
    cars: &Category,
    legacy_id: i64,
) -> AppResult<Option<i64>> {
    let Some(car) = legacy::get_car_listing(conn, legacy_id).await? else {
        return Ok(None);
    };
    let listing = find_migrated(conn, cars, &car).await?;
    Ok(listing.map(|l| l.id))
}
