// Identity and token service
// Passwords are hashed with Argon2; sessions are stateless HS256 JWT pairs.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use argon2::password_hash::{rand_core::OsRng, SaltString};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, instrument};

use crate::config::SecurityConfig;
use crate::domains::accounts::{self, User};
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// JWT claims
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user id
    pub iat: u64,
    pub exp: u64,
    pub token_type: TokenType,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthTokens {
    pub access: String,
    pub refresh: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthPayload {
    pub user: User,
    pub tokens: AuthTokens,
}

pub struct SecurityService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    config: SecurityConfig,
}

impl SecurityService {
    pub fn new(config: SecurityConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.jwt_secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.jwt_secret.as_bytes());

        Self {
            encoding_key,
            decoding_key,
            config,
        }
    }

    /// Register a new user and sign them in
    #[instrument(skip(self, conn, password))]
    pub async fn register(
        &self,
        conn: &mut SqliteConnection,
        username: &str,
        email: &str,
        password: &str,
    ) -> AppResult<AuthPayload> {
        let username = username.trim();
        let email = email.trim();
        if username.is_empty() {
            return Err(AppError::Validation("Username cannot be empty.".to_string()));
        }
        if password.is_empty() {
            return Err(AppError::Validation("Password cannot be empty.".to_string()));
        }
        if accounts::username_taken(conn, username).await? {
            return Err(AppError::Conflict("Username already taken.".to_string()));
        }
        if accounts::email_taken(conn, email).await? {
            return Err(AppError::Conflict("Email already in use.".to_string()));
        }

        let password_hash = self.hash_password(password)?;
        let user = accounts::create_user(conn, username, email, &password_hash).await?;
        let tokens = self.issue_tokens(user.id)?;

        info!(user_id = user.id, "user registered");
        Ok(AuthPayload { user, tokens })
    }

    /// Check credentials and issue a fresh token pair
    #[instrument(skip(self, conn, password))]
    pub async fn login(
        &self,
        conn: &mut SqliteConnection,
        username: &str,
        password: &str,
    ) -> AppResult<AuthPayload> {
        let invalid = || AppError::AuthenticationRequired("Invalid username or password.".to_string());

        let (user, hash) = accounts::find_credentials(conn, username.trim())
            .await?
            .ok_or_else(invalid)?;
        if !self.verify_password(password, &hash)? {
            return Err(invalid());
        }

        let tokens = self.issue_tokens(user.id)?;
        info!(user_id = user.id, "user logged in");
        Ok(AuthPayload { user, tokens })
    }

    /// Exchange a refresh token for a new access token. The refresh token is returned as is.
    pub fn refresh(&self, refresh_token: &str) -> AppResult<AuthTokens> {
        let user_id = self.validate_token(refresh_token, TokenType::Refresh)?;
        Ok(AuthTokens {
            access: self.create_token(user_id, TokenType::Access)?,
            refresh: refresh_token.to_string(),
        })
    }

    /// Resolve an access token to its user id
    pub fn validate_access_token(&self, token: &str) -> AppResult<i64> {
        self.validate_token(token, TokenType::Access)
    }

    fn validate_token(&self, token: &str, expected: TokenType) -> AppResult<i64> {
        let validation = Validation::new(Algorithm::HS256);
        let token_data = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|e| AppError::AuthenticationRequired(format!("Invalid token: {}", e)))?;

        let claims = token_data.claims;
        if claims.token_type != expected {
            return Err(AppError::AuthenticationRequired("Wrong token type.".to_string()));
        }
        claims
            .sub
            .parse()
            .map_err(|_| AppError::AuthenticationRequired("Malformed token subject.".to_string()))
    }

    fn issue_tokens(&self, user_id: i64) -> AppResult<AuthTokens> {
        Ok(AuthTokens {
            access: self.create_token(user_id, TokenType::Access)?,
            refresh: self.create_token(user_id, TokenType::Refresh)?,
        })
    }

    fn create_token(&self, user_id: i64, token_type: TokenType) -> AppResult<String> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| AppError::Internal(format!("System clock error: {}", e)))?
            .as_secs();
        let ttl = match token_type {
            TokenType::Access => self.config.access_token_ttl_secs,
            TokenType::Refresh => self.config.refresh_token_ttl_secs,
        };

        let claims = Claims {
            sub: user_id.to_string(),
            iat: now,
            exp: now + ttl,
            token_type,
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(format!("Failed to create token: {}", e)))
    }

    /// Hash password securely using Argon2
    fn hash_password(&self, password: &str) -> AppResult<String> {
        let salt = SaltString::generate(&mut OsRng);
        let argon2 = Argon2::default();

        let password_hash = argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))?;

        Ok(password_hash.to_string())
    }

    fn verify_password(&self, password: &str, hash: &str) -> AppResult<bool> {
        let parsed_hash = PasswordHash::new(hash)
            .map_err(|e| AppError::Internal(format!("Invalid password hash: {}", e)))?;

        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok())
    }
}
