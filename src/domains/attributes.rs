// Attribute values - typed per-listing values for category attributes

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, SqliteConnection};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

use super::catalog::{self, AttributeDataType, CategoryAttribute};
use super::decode_error;
use crate::error::{AppError, AppResult};

/// A stored attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum AttributeValue {
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
    Choice(String),
}

impl AttributeValue {
    pub fn kind(&self) -> AttributeDataType {
        match self {
            AttributeValue::Int(_) => AttributeDataType::Int,
            AttributeValue::Float(_) => AttributeDataType::Float,
            AttributeValue::Text(_) => AttributeDataType::Text,
            AttributeValue::Bool(_) => AttributeDataType::Bool,
            AttributeValue::Choice(_) => AttributeDataType::Choice,
        }
    }

    /// Plain JSON scalar for API responses.
    pub fn to_json(&self) -> Value {
        match self {
            AttributeValue::Int(v) => Value::from(*v),
            AttributeValue::Float(v) => Value::from(*v),
            AttributeValue::Text(v) | AttributeValue::Choice(v) => Value::from(v.as_str()),
            AttributeValue::Bool(v) => Value::from(*v),
        }
    }

    /// Parse the stored text form back into a value of `kind`.
    pub fn from_stored(kind: AttributeDataType, raw: &str) -> AppResult<Self> {
        let invalid = || AppError::Internal(format!("Stored {} value '{}' is corrupt", kind, raw));
        Ok(match kind {
            AttributeDataType::Int => AttributeValue::Int(raw.parse().map_err(|_| invalid())?),
            AttributeDataType::Float => AttributeValue::Float(raw.parse().map_err(|_| invalid())?),
            AttributeDataType::Bool => AttributeValue::Bool(raw.parse().map_err(|_| invalid())?),
            AttributeDataType::Text => AttributeValue::Text(raw.to_string()),
            AttributeDataType::Choice => AttributeValue::Choice(raw.to_string()),
        })
    }

    /// Coerce a client-supplied JSON value to the attribute's data type.
    pub fn coerce(attribute: &CategoryAttribute, raw: &Value) -> AppResult<Self> {
        let mismatch = || {
            AppError::Validation(format!(
                "Attribute '{}' expects a {} value, got {}",
                attribute.key, attribute.data_type, raw
            ))
        };

        let value = match (attribute.data_type, raw) {
            (_, Value::Null) => {
                return Err(AppError::Validation(format!(
                    "Attribute '{}' cannot be null",
                    attribute.key
                )))
            }
            (AttributeDataType::Int, Value::Number(n)) => match n.as_i64() {
                Some(v) => AttributeValue::Int(v),
                None => match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                        AttributeValue::Int(f as i64)
                    }
                    _ => return Err(mismatch()),
                },
            },
            (AttributeDataType::Int, Value::String(s)) => {
                AttributeValue::Int(s.trim().parse().map_err(|_| mismatch())?)
            }
            (AttributeDataType::Float, Value::Number(n)) => {
                AttributeValue::Float(n.as_f64().ok_or_else(mismatch)?)
            }
            (AttributeDataType::Float, Value::String(s)) => {
                let v: f64 = s.trim().parse().map_err(|_| mismatch())?;
                if !v.is_finite() {
                    return Err(mismatch());
                }
                AttributeValue::Float(v)
            }
            (AttributeDataType::Bool, Value::Bool(b)) => AttributeValue::Bool(*b),
            (AttributeDataType::Bool, Value::Number(n)) => match n.as_i64() {
                Some(0) => AttributeValue::Bool(false),
                Some(1) => AttributeValue::Bool(true),
                _ => return Err(mismatch()),
            },
            (AttributeDataType::Bool, Value::String(s)) => {
                match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "1" | "yes" | "y" => AttributeValue::Bool(true),
                    "false" | "0" | "no" | "n" => AttributeValue::Bool(false),
                    _ => return Err(mismatch()),
                }
            }
            (AttributeDataType::Text, Value::String(s)) => AttributeValue::Text(s.clone()),
            (AttributeDataType::Text, Value::Number(n)) => AttributeValue::Text(n.to_string()),
            (AttributeDataType::Text, Value::Bool(b)) => AttributeValue::Text(b.to_string()),
            (AttributeDataType::Choice, Value::String(s)) => AttributeValue::Choice(s.clone()),
            (AttributeDataType::Choice, Value::Number(n)) => AttributeValue::Choice(n.to_string()),
            _ => return Err(mismatch()),
        };

        value.check_against(attribute)?;
        Ok(value)
    }

    /// Verify kind and choice membership for an attribute definition.
    pub fn check_against(&self, attribute: &CategoryAttribute) -> AppResult<()> {
        if self.kind() != attribute.data_type {
            return Err(AppError::Validation(format!(
                "Attribute '{}' expects a {} value, got {}",
                attribute.key,
                attribute.data_type,
                self.kind()
            )));
        }
        if let AttributeValue::Choice(choice) = self {
            if let Some(choices) = attribute.choices.as_ref().filter(|c| !c.is_empty()) {
                if !choices.iter().any(|c| c == choice) {
                    return Err(AppError::Validation(format!(
                        "'{}' is not a valid choice for '{}'. Expected one of: {}",
                        choice,
                        attribute.key,
                        choices.join(", ")
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Stringified form, as stored and as matched by attribute filters.
impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Int(v) => write!(f, "{}", v),
            AttributeValue::Float(v) => write!(f, "{}", v),
            AttributeValue::Text(v) | AttributeValue::Choice(v) => f.write_str(v),
            AttributeValue::Bool(v) => write!(f, "{}", v),
        }
    }
}

/// One `key: value` pair sent by a client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AttributeInput {
    pub key: String,
    pub value: Value,
}

impl AttributeInput {
    pub fn new(key: &str, value: impl Into<Value>) -> Self {
        Self {
            key: key.to_string(),
            value: value.into(),
        }
    }
}

/// A listing's value joined with its attribute definition.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingAttributeValue {
    pub id: i64,
    pub listing_id: i64,
    pub attribute: CategoryAttribute,
    pub value: AttributeValue,
}

impl<'r> FromRow<'r, SqliteRow> for ListingAttributeValue {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let attribute = CategoryAttribute::from_row(row)?;
        let kind: String = row.try_get("kind")?;
        let kind: AttributeDataType = kind.parse().map_err(|e| decode_error("kind", e))?;
        let raw: String = row.try_get("value")?;

        Ok(Self {
            id: row.try_get("value_id")?,
            listing_id: row.try_get("listing_id")?,
            attribute,
            value: AttributeValue::from_stored(kind, &raw).map_err(|e| decode_error("value", e))?,
        })
    }
}

/// Write one value, replacing any existing value for `(listing, attribute)`.
pub async fn set_value(
    conn: &mut SqliteConnection,
    listing_id: i64,
    attribute_id: i64,
    value: &AttributeValue,
) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO listing_attribute_values (listing_id, attribute_id, kind, value)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(listing_id, attribute_id) DO UPDATE SET kind = excluded.kind, value = excluded.value
        "#,
    )
    .bind(listing_id)
    .bind(attribute_id)
    .bind(value.kind().as_str())
    .bind(value.to_string())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Upsert already-typed values. Keys not defined in `allowed` are skipped.
/// Returns the number of values written.
pub async fn upsert_values<I>(
    conn: &mut SqliteConnection,
    listing_id: i64,
    allowed: &HashMap<String, CategoryAttribute>,
    values: I,
) -> AppResult<usize>
where
    I: IntoIterator<Item = (String, AttributeValue)>,
{
    let mut written = 0;
    for (key, value) in values {
        let Some(attribute) = allowed.get(&key) else {
            debug!(key = %key, listing_id, "ignoring unknown attribute key");
            continue;
        };
        value.check_against(attribute)?;
        set_value(conn, listing_id, attribute.id, &value).await?;
        written += 1;
    }
    Ok(written)
}

/// Upsert client-supplied values for a listing of `category_id`.
///
/// Unknown keys are ignored without error. Known keys are coerced to the attribute's
/// data type; a value that cannot be coerced fails the whole call.
pub async fn upsert_attributes(
    conn: &mut SqliteConnection,
    listing_id: i64,
    category_id: i64,
    inputs: &[AttributeInput],
) -> AppResult<usize> {
    if inputs.is_empty() {
        return Ok(0);
    }

    let allowed = catalog::attributes_by_key(conn, category_id).await?;
    let mut typed = Vec::with_capacity(inputs.len());
    for input in inputs {
        if let Some(attribute) = allowed.get(&input.key) {
            typed.push((input.key.clone(), AttributeValue::coerce(attribute, &input.value)?));
        } else {
            debug!(key = %input.key, listing_id, "ignoring unknown attribute key");
        }
    }

    upsert_values(conn, listing_id, &allowed, typed).await
}

/// Values of a listing ordered like its category's attributes.
pub async fn values_for_listing(
    conn: &mut SqliteConnection,
    listing_id: i64,
) -> AppResult<Vec<ListingAttributeValue>> {
    let values = sqlx::query_as::<_, ListingAttributeValue>(
        r#"
        SELECT v.id AS value_id, v.listing_id, v.kind, v.value,
               a.id, a.category_id, a.key, a.label, a.data_type,
               a.is_filterable, a.is_required, a.choices, a.sort_order
        FROM listing_attribute_values v
        JOIN category_attributes a ON a.id = v.attribute_id
        WHERE v.listing_id = ?
        ORDER BY a.sort_order, a.id
        "#,
    )
    .bind(listing_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(values)
}
