// Database - SQLite pool, schema bootstrap and transaction boundaries
// Store functions across the crate take `&mut SqliteConnection`, so the same code runs
// against a pooled connection or inside a caller-owned transaction.

use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::str::FromStr;
use tracing::info;

use crate::error::{AppError, AppResult};

/// Schema statements, executed in order on startup. All are idempotent.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT NOT NULL UNIQUE,
        email TEXT NOT NULL DEFAULT '',
        password_hash TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS dealer_profiles (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL UNIQUE REFERENCES users(id) ON DELETE CASCADE,
        dealership_name TEXT NOT NULL,
        phone TEXT NOT NULL DEFAULT '',
        whatsapp TEXT NOT NULL DEFAULT '',
        email_public TEXT NOT NULL DEFAULT '',
        city TEXT NOT NULL DEFAULT '',
        region TEXT NOT NULL DEFAULT '',
        country TEXT NOT NULL DEFAULT 'Tanzania',
        bio TEXT NOT NULL DEFAULT '',
        is_verified INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS categories (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        slug TEXT NOT NULL UNIQUE,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS category_attributes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        category_id INTEGER NOT NULL REFERENCES categories(id) ON DELETE CASCADE,
        key TEXT NOT NULL,
        label TEXT NOT NULL,
        data_type TEXT NOT NULL DEFAULT 'text',
        is_filterable INTEGER NOT NULL DEFAULT 1,
        is_required INTEGER NOT NULL DEFAULT 0,
        choices TEXT,
        sort_order INTEGER NOT NULL DEFAULT 0 CHECK (sort_order >= 0),
        UNIQUE (category_id, key)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS listings (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        dealer_id INTEGER NOT NULL REFERENCES dealer_profiles(id) ON DELETE CASCADE,
        category_id INTEGER NOT NULL REFERENCES categories(id) ON DELETE RESTRICT,
        title TEXT NOT NULL,
        slug TEXT NOT NULL,
        price_cents INTEGER NOT NULL,
        currency TEXT NOT NULL DEFAULT 'USD',
        city TEXT NOT NULL DEFAULT '',
        region TEXT NOT NULL DEFAULT '',
        country TEXT NOT NULL DEFAULT 'Tanzania',
        description TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL DEFAULT 'DRAFT',
        is_featured INTEGER NOT NULL DEFAULT 0,
        views_count INTEGER NOT NULL DEFAULT 0 CHECK (views_count >= 0),
        created_by INTEGER REFERENCES users(id) ON DELETE SET NULL,
        legacy_listing_id INTEGER REFERENCES car_listings(id) ON DELETE SET NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_listings_status_created ON listings(status, created_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_listings_location ON listings(country, region, city)",
    "CREATE INDEX IF NOT EXISTS idx_listings_price ON listings(price_cents)",
    "CREATE INDEX IF NOT EXISTS idx_listings_category_status ON listings(category_id, status)",
    "CREATE INDEX IF NOT EXISTS idx_listings_dealer_slug ON listings(dealer_id, category_id, slug)",
    r#"
    CREATE TABLE IF NOT EXISTS listing_attribute_values (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        listing_id INTEGER NOT NULL REFERENCES listings(id) ON DELETE CASCADE,
        attribute_id INTEGER NOT NULL REFERENCES category_attributes(id) ON DELETE CASCADE,
        kind TEXT NOT NULL,
        value TEXT NOT NULL,
        UNIQUE (listing_id, attribute_id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_attribute_values_attribute ON listing_attribute_values(attribute_id)",
    r#"
    CREATE TABLE IF NOT EXISTS listing_images (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        listing_id INTEGER NOT NULL REFERENCES listings(id) ON DELETE CASCADE,
        image_ref TEXT NOT NULL,
        thumbnail_ref TEXT,
        is_cover INTEGER NOT NULL DEFAULT 0,
        sort_order INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL
    )
    "#,
    "CREATE UNIQUE INDEX IF NOT EXISTS uniq_cover_per_listing_v2 ON listing_images(listing_id) WHERE is_cover = 1",
    r#"
    CREATE TABLE IF NOT EXISTS favorites_v2 (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        listing_id INTEGER NOT NULL REFERENCES listings(id) ON DELETE CASCADE,
        created_at INTEGER NOT NULL,
        UNIQUE (user_id, listing_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS car_listings (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        dealer_id INTEGER NOT NULL REFERENCES dealer_profiles(id) ON DELETE CASCADE,
        title TEXT NOT NULL,
        slug TEXT NOT NULL,
        price_cents INTEGER NOT NULL,
        currency TEXT NOT NULL DEFAULT 'USD',
        city TEXT NOT NULL DEFAULT '',
        region TEXT NOT NULL DEFAULT '',
        country TEXT NOT NULL DEFAULT 'Tanzania',
        year INTEGER NOT NULL,
        make TEXT NOT NULL,
        model TEXT NOT NULL,
        trim TEXT NOT NULL DEFAULT '',
        mileage INTEGER CHECK (mileage IS NULL OR mileage >= 0),
        fuel_type TEXT NOT NULL DEFAULT 'PETROL',
        transmission TEXT NOT NULL DEFAULT 'AUTO',
        body_type TEXT NOT NULL DEFAULT '',
        color TEXT NOT NULL DEFAULT '',
        vin TEXT NOT NULL DEFAULT '',
        description TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL DEFAULT 'DRAFT',
        is_featured INTEGER NOT NULL DEFAULT 0,
        views_count INTEGER NOT NULL DEFAULT 0 CHECK (views_count >= 0),
        created_by INTEGER REFERENCES users(id) ON DELETE SET NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_car_listings_status_created ON car_listings(status, created_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_car_listings_make_model ON car_listings(make, model, year)",
    r#"
    CREATE TABLE IF NOT EXISTS car_images (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        listing_id INTEGER NOT NULL REFERENCES car_listings(id) ON DELETE CASCADE,
        image_ref TEXT NOT NULL,
        thumbnail_ref TEXT,
        is_cover INTEGER NOT NULL DEFAULT 0,
        sort_order INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL
    )
    "#,
    "CREATE UNIQUE INDEX IF NOT EXISTS uniq_cover_per_listing ON car_images(listing_id) WHERE is_cover = 1",
    r#"
    CREATE TABLE IF NOT EXISTS favorites (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        listing_id INTEGER NOT NULL REFERENCES car_listings(id) ON DELETE CASCADE,
        created_at INTEGER NOT NULL,
        UNIQUE (user_id, listing_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS inquiry_leads (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        listing_id INTEGER NOT NULL REFERENCES car_listings(id) ON DELETE CASCADE,
        dealer_id INTEGER NOT NULL REFERENCES dealer_profiles(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        phone TEXT NOT NULL DEFAULT '',
        email TEXT NOT NULL DEFAULT '',
        message TEXT NOT NULL DEFAULT '',
        source TEXT NOT NULL DEFAULT 'web',
        created_at INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_inquiry_leads_dealer ON inquiry_leads(dealer_id, created_at DESC)",
    r#"
    CREATE TABLE IF NOT EXISTS job_locks (
        name TEXT PRIMARY KEY,
        acquired_at INTEGER NOT NULL
    )
    "#,
];

/// Columns added after the first release, as (table, column, definition).
const ADDED_COLUMNS: &[(&str, &str, &str)] = &[(
    "listings",
    "legacy_listing_id",
    "INTEGER REFERENCES car_listings(id) ON DELETE SET NULL",
)];

/// Unique indexes, applied once every column they cover exists.
const UNIQUE_INDEXES: &[&str] = &[
    "CREATE UNIQUE INDEX IF NOT EXISTS uniq_listings_slug ON listings(slug)",
    "CREATE UNIQUE INDEX IF NOT EXISTS uniq_car_listings_slug ON car_listings(slug)",
    "CREATE UNIQUE INDEX IF NOT EXISTS uniq_listings_legacy_id ON listings(legacy_listing_id)",
];

/// SQLite-backed marketplace database
pub struct MarketDatabase {
    pool: SqlitePool,
}

impl MarketDatabase {
    /// Connect to a database URL such as `sqlite:data/kira_market.db`, creating the file
    /// (and its directory) if needed, then bootstrap the schema.
    pub async fn connect(url: &str) -> AppResult<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| AppError::DatabaseError(format!("Invalid database URL {}: {}", url, e)))?
            .create_if_missing(true)
            .foreign_keys(true);

        let filename = options.clone().get_filename();
        if let Some(parent) = filename.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    AppError::DatabaseError(format!(
                        "Failed to create database directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to connect to {}: {}", url, e)))?;

        let db = Self { pool };
        db.initialize().await?;
        info!(url, "database ready");
        Ok(db)
    }

    /// Private in-memory database for tests.
    ///
    /// Every connection to `:memory:` is a separate database, so the pool is pinned to
    /// a single connection that never expires.
    pub async fn new_in_memory() -> AppResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| AppError::DatabaseError(format!("Invalid in-memory URL: {}", e)))?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| {
                AppError::DatabaseError(format!("Failed to connect to in-memory SQLite: {}", e))
            })?;

        let db = Self { pool };
        db.initialize().await?;
        Ok(db)
    }

    /// Create all marketplace tables and indexes
    pub async fn initialize(&self) -> AppResult<()> {
        for statement in SCHEMA {
            self.apply(statement).await?;
        }
        for (table, column, definition) in ADDED_COLUMNS {
            if !self.has_column(table, column).await? {
                info!(table, column, "adding column");
                self.apply(&format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, definition))
                    .await?;
            }
        }
        for statement in UNIQUE_INDEXES {
            self.apply(statement).await?;
        }
        Ok(())
    }

    async fn apply(&self, statement: &str) -> AppResult<()> {
        sqlx::query(statement)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to apply schema: {}", e)))?;
        Ok(())
    }

    async fn has_column(&self, table: &str, column: &str) -> AppResult<bool> {
        let found: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pragma_table_info(?) WHERE name = ?")
            .bind(table)
            .bind(column)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to inspect {}: {}", table, e)))?;
        Ok(found > 0)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn acquire(&self) -> AppResult<PoolConnection<Sqlite>> {
        self.pool
            .acquire()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to acquire connection: {}", e)))
    }

    pub async fn begin(&self) -> AppResult<Transaction<'static, Sqlite>> {
        self.pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to begin transaction: {}", e)))
    }

    /// Health check to verify database connectivity
    pub async fn health_check(&self) -> AppResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Database health check failed: {}", e)))?;
        Ok(())
    }
}
