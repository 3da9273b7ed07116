// Accounts - user rows and stored credentials

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, SqliteConnection};

use crate::core::Timestamp;
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, SqliteRow> for User {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            email: row.try_get("email")?,
            created_at: Timestamp(row.try_get("created_at")?).to_datetime(),
        })
    }
}

pub async fn create_user(
    conn: &mut SqliteConnection,
    username: &str,
    email: &str,
    password_hash: &str,
) -> AppResult<User> {
    let result = sqlx::query(
        "INSERT INTO users (username, email, password_hash, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(username)
    .bind(email)
    .bind(password_hash)
    .bind(Timestamp::now().value())
    .execute(&mut *conn)
    .await?;

    let id = result.last_insert_rowid();
    get_user(conn, id)
        .await?
        .ok_or_else(|| AppError::Internal(format!("User {} vanished after insert", id)))
}

pub async fn get_user(conn: &mut SqliteConnection, id: i64) -> AppResult<Option<User>> {
    let user = sqlx::query_as::<_, User>(
        "SELECT id, username, email, created_at FROM users WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(user)
}

/// The user and password hash for `username`.
pub async fn find_credentials(
    conn: &mut SqliteConnection,
    username: &str,
) -> AppResult<Option<(User, String)>> {
    let row = sqlx::query(
        "SELECT id, username, email, created_at, password_hash FROM users WHERE username = ?",
    )
    .bind(username)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => {
            let user = User::from_row(&row)?;
            let hash: String = row.try_get("password_hash")?;
            Ok(Some((user, hash)))
        }
        None => Ok(None),
    }
}

pub async fn username_taken(conn: &mut SqliteConnection, username: &str) -> AppResult<bool> {
    let row = sqlx::query("SELECT 1 FROM users WHERE username = ?")
        .bind(username)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.is_some())
}

/// Case-insensitive email lookup. Empty emails never collide.
pub async fn email_taken(conn: &mut SqliteConnection, email: &str) -> AppResult<bool> {
    if email.trim().is_empty() {
        return Ok(false);
    }
    let row = sqlx::query("SELECT 1 FROM users WHERE lower(email) = lower(?)")
        .bind(email.trim())
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.is_some())
}
