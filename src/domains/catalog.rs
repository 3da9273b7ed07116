// Catalog - categories and their typed attribute definitions

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, SqliteConnection};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::info;

use super::decode_error;
use crate::core::Timestamp;
use crate::error::{AppError, AppResult};

static ATTRIBUTE_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9_-]{1,50}$").expect("valid attribute key pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeDataType {
    Int,
    Float,
    Text,
    Bool,
    Choice,
}

impl AttributeDataType {
    pub fn as_str(self) -> &'static str {
        match self {
            AttributeDataType::Int => "int",
            AttributeDataType::Float => "float",
            AttributeDataType::Text => "text",
            AttributeDataType::Bool => "bool",
            AttributeDataType::Choice => "choice",
        }
    }
}

impl fmt::Display for AttributeDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttributeDataType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "int" => Ok(AttributeDataType::Int),
            "float" => Ok(AttributeDataType::Float),
            "text" => Ok(AttributeDataType::Text),
            "bool" => Ok(AttributeDataType::Bool),
            "choice" => Ok(AttributeDataType::Choice),
            other => Err(AppError::Validation(format!("Unknown attribute data type '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, SqliteRow> for Category {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            slug: row.try_get("slug")?,
            created_at: Timestamp(row.try_get("created_at")?).to_datetime(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryAttribute {
    pub id: i64,
    pub category_id: i64,
    pub key: String,
    pub label: String,
    pub data_type: AttributeDataType,
    pub is_filterable: bool,
    pub is_required: bool,
    pub choices: Option<Vec<String>>,
    pub sort_order: i64,
}

impl<'r> FromRow<'r, SqliteRow> for CategoryAttribute {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let data_type: String = row.try_get("data_type")?;
        let choices: Option<String> = row.try_get("choices")?;
        let choices = choices
            .map(|raw| serde_json::from_str::<Vec<String>>(&raw))
            .transpose()
            .map_err(|e| decode_error("choices", e))?;

        Ok(Self {
            id: row.try_get("id")?,
            category_id: row.try_get("category_id")?,
            key: row.try_get("key")?,
            label: row.try_get("label")?,
            data_type: data_type
                .parse()
                .map_err(|e| decode_error("data_type", e))?,
            is_filterable: row.try_get("is_filterable")?,
            is_required: row.try_get("is_required")?,
            choices,
            sort_order: row.try_get("sort_order")?,
        })
    }
}

/// Desired metadata for one attribute of a category.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AttributeSpec {
    pub key: String,
    pub label: String,
    pub data_type: AttributeDataType,
    #[serde(default = "default_true")]
    pub is_filterable: bool,
    #[serde(default)]
    pub is_required: bool,
    /// `None` leaves stored choices untouched on reconcile.
    #[serde(default)]
    pub choices: Option<Vec<String>>,
    #[serde(default)]
    pub sort_order: i64,
}

fn default_true() -> bool {
    true
}

impl AttributeSpec {
    pub fn new(key: &str, label: &str, data_type: AttributeDataType) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            data_type,
            is_filterable: true,
            is_required: false,
            choices: None,
            sort_order: 0,
        }
    }

    pub fn required(mut self, is_required: bool) -> Self {
        self.is_required = is_required;
        self
    }

    pub fn filterable(mut self, is_filterable: bool) -> Self {
        self.is_filterable = is_filterable;
        self
    }

    pub fn choices(mut self, choices: &[&str]) -> Self {
        self.choices = Some(choices.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn sort_order(mut self, sort_order: i64) -> Self {
        self.sort_order = sort_order;
        self
    }
}

/// Result of reconciling one attribute definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeUpsert {
    Created(i64),
    Updated(i64),
    Unchanged(i64),
}

impl AttributeUpsert {
    pub fn id(self) -> i64 {
        match self {
            AttributeUpsert::Created(id)
            | AttributeUpsert::Updated(id)
            | AttributeUpsert::Unchanged(id) => id,
        }
    }

    pub fn is_created(self) -> bool {
        matches!(self, AttributeUpsert::Created(_))
    }
}

const ATTRIBUTE_COLUMNS: &str =
    "id, category_id, key, label, data_type, is_filterable, is_required, choices, sort_order";

pub async fn find_category(conn: &mut SqliteConnection, slug: &str) -> AppResult<Option<Category>> {
    let category = sqlx::query_as::<_, Category>(
        "SELECT id, name, slug, created_at FROM categories WHERE slug = ?",
    )
    .bind(slug)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(category)
}

pub async fn get_category(conn: &mut SqliteConnection, slug: &str) -> AppResult<Category> {
    find_category(conn, slug)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Category '{}' not found.", slug)))
}

pub async fn get_category_by_id(conn: &mut SqliteConnection, id: i64) -> AppResult<Category> {
    sqlx::query_as::<_, Category>("SELECT id, name, slug, created_at FROM categories WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Category {} not found.", id)))
}

pub async fn list_categories(conn: &mut SqliteConnection) -> AppResult<Vec<Category>> {
    let categories = sqlx::query_as::<_, Category>(
        "SELECT id, name, slug, created_at FROM categories ORDER BY name, id",
    )
    .fetch_all(&mut *conn)
    .await?;
    Ok(categories)
}

/// Fetch the category with `slug`, creating it with `name` when absent.
/// The boolean is true when a row was inserted.
pub async fn get_or_create_category(
    conn: &mut SqliteConnection,
    name: &str,
    slug: &str,
) -> AppResult<(Category, bool)> {
    if let Some(category) = find_category(conn, slug).await? {
        return Ok((category, false));
    }

    sqlx::query("INSERT INTO categories (name, slug, created_at) VALUES (?, ?, ?)")
        .bind(name)
        .bind(slug)
        .bind(Timestamp::now().value())
        .execute(&mut *conn)
        .await?;

    info!(slug, "created category");
    Ok((get_category(conn, slug).await?, true))
}

/// Delete a category. Refused while any listing still references it.
pub async fn delete_category(conn: &mut SqliteConnection, category_id: i64) -> AppResult<()> {
    let referenced: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM listings WHERE category_id = ?")
        .bind(category_id)
        .fetch_one(&mut *conn)
        .await?;
    if referenced > 0 {
        return Err(AppError::Conflict(format!(
            "Category {} is still used by {} listing(s).",
            category_id, referenced
        )));
    }

    let result = sqlx::query("DELETE FROM categories WHERE id = ?")
        .bind(category_id)
        .execute(&mut *conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Category {} not found.", category_id)));
    }
    Ok(())
}

/// Attribute definitions of a category ordered by `(sort_order, id)`.
pub async fn list_attributes(
    conn: &mut SqliteConnection,
    category_id: i64,
) -> AppResult<Vec<CategoryAttribute>> {
    let sql = format!(
        "SELECT {} FROM category_attributes WHERE category_id = ? ORDER BY sort_order, id",
        ATTRIBUTE_COLUMNS
    );
    let attributes = sqlx::query_as::<_, CategoryAttribute>(&sql)
        .bind(category_id)
        .fetch_all(&mut *conn)
        .await?;
    Ok(attributes)
}

/// Attribute definitions of a category indexed by key.
pub async fn attributes_by_key(
    conn: &mut SqliteConnection,
    category_id: i64,
) -> AppResult<HashMap<String, CategoryAttribute>> {
    Ok(list_attributes(conn, category_id)
        .await?
        .into_iter()
        .map(|attribute| (attribute.key.clone(), attribute))
        .collect())
}

async fn find_attribute(
    conn: &mut SqliteConnection,
    category_id: i64,
    key: &str,
) -> AppResult<Option<CategoryAttribute>> {
    let sql = format!(
        "SELECT {} FROM category_attributes WHERE category_id = ? AND key = ?",
        ATTRIBUTE_COLUMNS
    );
    let attribute = sqlx::query_as::<_, CategoryAttribute>(&sql)
        .bind(category_id)
        .bind(key)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(attribute)
}

fn encode_choices(choices: &Option<Vec<String>>) -> AppResult<Option<String>> {
    choices
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| AppError::Internal(format!("Failed to encode choices: {}", e)))
}

/// Create the attribute `(category, spec.key)` or reconcile its metadata to `spec`.
///
/// Reconciling never changes the row id, so stored values stay attached.
pub async fn upsert_attribute(
    conn: &mut SqliteConnection,
    category_id: i64,
    spec: &AttributeSpec,
) -> AppResult<AttributeUpsert> {
    if !ATTRIBUTE_KEY.is_match(&spec.key) {
        return Err(AppError::Validation(format!(
            "Attribute key '{}' must be 1-50 lowercase letters, digits, '_' or '-'.",
            spec.key
        )));
    }
    if spec.sort_order < 0 {
        return Err(AppError::Validation("sort_order cannot be negative.".to_string()));
    }

    let Some(existing) = find_attribute(conn, category_id, &spec.key).await? else {
        let result = sqlx::query(
            r#"
            INSERT INTO category_attributes
                (category_id, key, label, data_type, is_filterable, is_required, choices, sort_order)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(category_id)
        .bind(&spec.key)
        .bind(&spec.label)
        .bind(spec.data_type.as_str())
        .bind(spec.is_filterable)
        .bind(spec.is_required)
        .bind(encode_choices(&spec.choices)?)
        .bind(spec.sort_order)
        .execute(&mut *conn)
        .await?;
        return Ok(AttributeUpsert::Created(result.last_insert_rowid()));
    };

    let choices = match &spec.choices {
        Some(_) => spec.choices.clone(),
        None => existing.choices.clone(),
    };
    let drifted = existing.label != spec.label
        || existing.data_type != spec.data_type
        || existing.is_filterable != spec.is_filterable
        || existing.is_required != spec.is_required
        || existing.sort_order != spec.sort_order
        || existing.choices != choices;
    if !drifted {
        return Ok(AttributeUpsert::Unchanged(existing.id));
    }

    sqlx::query(
        r#"
        UPDATE category_attributes
        SET label = ?, data_type = ?, is_filterable = ?, is_required = ?, choices = ?, sort_order = ?
        WHERE id = ?
        "#,
    )
    .bind(&spec.label)
    .bind(spec.data_type.as_str())
    .bind(spec.is_filterable)
    .bind(spec.is_required)
    .bind(encode_choices(&choices)?)
    .bind(spec.sort_order)
    .bind(existing.id)
    .execute(&mut *conn)
    .await?;

    info!(key = %spec.key, category_id, "reconciled attribute definition");
    Ok(AttributeUpsert::Updated(existing.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database::MarketDatabase;

    #[tokio::test]
    async fn test_get_or_create_category() {
        let db = MarketDatabase::new_in_memory().await.unwrap();
        let mut conn = db.acquire().await.unwrap();

        let (cars, created) = get_or_create_category(&mut conn, "Cars", "cars").await.unwrap();
        assert!(created);
        let (again, created) = get_or_create_category(&mut conn, "Cars", "cars").await.unwrap();
        assert!(!created);
        assert_eq!(cars.id, again.id);

        assert!(matches!(
            get_category(&mut conn, "boats").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_category_in_use_cannot_be_deleted() {
        use crate::domains::fixtures::{seed_dealer, seed_listing};
        use crate::domains::listings;

        let db = MarketDatabase::new_in_memory().await.unwrap();
        let mut conn = db.acquire().await.unwrap();
        let dealer = seed_dealer(&mut conn, "dealer").await;
        let (boats, _) = get_or_create_category(&mut conn, "Boats", "boats").await.unwrap();
        upsert_attribute(&mut conn, boats.id, &AttributeSpec::new("length", "Length", AttributeDataType::Int))
            .await
            .unwrap();
        let listing = seed_listing(&mut conn, dealer, boats.id, "Dhow").await;

        assert!(matches!(
            delete_category(&mut conn, boats.id).await,
            Err(AppError::Conflict(_))
        ));
        // The foreign key refuses a direct delete as well
        let direct = sqlx::query("DELETE FROM categories WHERE id = ?")
            .bind(boats.id)
            .execute(&mut *conn)
            .await;
        assert!(direct.is_err());
        assert_eq!(get_category(&mut conn, "boats").await.unwrap().id, boats.id);

        listings::delete_listing(&mut conn, listing, dealer).await.unwrap();
        delete_category(&mut conn, boats.id).await.unwrap();
        assert!(matches!(
            get_category(&mut conn, "boats").await,
            Err(AppError::NotFound(_))
        ));
        assert!(list_attributes(&mut conn, boats.id).await.unwrap().is_empty());
        assert!(matches!(
            delete_category(&mut conn, boats.id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_attributes_ordered_by_sort_order_then_id() {
        let db = MarketDatabase::new_in_memory().await.unwrap();
        let mut conn = db.acquire().await.unwrap();
        let (cars, _) = get_or_create_category(&mut conn, "Cars", "cars").await.unwrap();

        for spec in [
            AttributeSpec::new("mileage", "Mileage", AttributeDataType::Int).sort_order(50),
            AttributeSpec::new("year", "Year", AttributeDataType::Int).sort_order(10),
            AttributeSpec::new("color", "Color", AttributeDataType::Text).sort_order(10),
        ] {
            upsert_attribute(&mut conn, cars.id, &spec).await.unwrap();
        }

        let keys: Vec<String> = list_attributes(&mut conn, cars.id)
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.key)
            .collect();
        assert_eq!(keys, vec!["year", "color", "mileage"]);
    }

    #[tokio::test]
    async fn test_upsert_attribute_reconciles_in_place() {
        let db = MarketDatabase::new_in_memory().await.unwrap();
        let mut conn = db.acquire().await.unwrap();
        let (cars, _) = get_or_create_category(&mut conn, "Cars", "cars").await.unwrap();

        let spec = AttributeSpec::new("fuel_type", "Fuel", AttributeDataType::Choice)
            .choices(&["PETROL", "DIESEL"])
            .sort_order(60);
        let first = upsert_attribute(&mut conn, cars.id, &spec).await.unwrap();
        assert!(first.is_created());

        let unchanged = upsert_attribute(&mut conn, cars.id, &spec).await.unwrap();
        assert_eq!(unchanged, AttributeUpsert::Unchanged(first.id()));

        // Label drift is reconciled; choices are kept when the desired state leaves them unset
        let mut drifted = spec.clone();
        drifted.label = "Fuel Type".to_string();
        drifted.choices = None;
        let updated = upsert_attribute(&mut conn, cars.id, &drifted).await.unwrap();
        assert_eq!(updated, AttributeUpsert::Updated(first.id()));

        let attributes = list_attributes(&mut conn, cars.id).await.unwrap();
        assert_eq!(attributes.len(), 1);
        assert_eq!(attributes[0].label, "Fuel Type");
        assert_eq!(
            attributes[0].choices,
            Some(vec!["PETROL".to_string(), "DIESEL".to_string()])
        );
    }

    #[tokio::test]
    async fn test_upsert_attribute_rejects_unsafe_keys() {
        let db = MarketDatabase::new_in_memory().await.unwrap();
        let mut conn = db.acquire().await.unwrap();
        let (cars, _) = get_or_create_category(&mut conn, "Cars", "cars").await.unwrap();

        let spec = AttributeSpec::new("Body Type", "Body Type", AttributeDataType::Text);
        assert!(matches!(
            upsert_attribute(&mut conn, cars.id, &spec).await,
            Err(AppError::Validation(_))
        ));
    }
}
