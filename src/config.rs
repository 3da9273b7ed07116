use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub security: SecurityConfig,
    pub media: MediaConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub jwt_secret: String,
    pub access_token_ttl_secs: u64,
    pub refresh_token_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    pub root: PathBuf,
    /// Public URL prefix the stored blobs are served under, e.g. `/media/`.
    pub url: String,
    pub thumbnail_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite:data/kira_market.db".to_string(),
            },
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            security: SecurityConfig::default(),
            media: MediaConfig::default(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "change-me".to_string(),
            access_token_ttl_secs: 30 * 60,
            refresh_token_ttl_secs: 7 * 24 * 3600,
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("media"),
            url: "/media/".to_string(),
            thumbnail_size: 700,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let security_defaults = SecurityConfig::default();
        let media_defaults = MediaConfig::default();

        let jwt_secret = env::var("JWT_SECRET").unwrap_or_else(|_| {
            tracing::warn!("JWT_SECRET is not set, using an insecure development secret");
            security_defaults.jwt_secret.clone()
        });

        Ok(Self {
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite:data/kira_market.db".to_string()),
            },
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("SERVER_PORT")
                    .unwrap_or_else(|_| "3000".to_string())
                    .parse()
                    .unwrap_or(3000),
            },
            security: SecurityConfig {
                jwt_secret,
                access_token_ttl_secs: env::var("ACCESS_TOKEN_TTL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(security_defaults.access_token_ttl_secs),
                refresh_token_ttl_secs: env::var("REFRESH_TOKEN_TTL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(security_defaults.refresh_token_ttl_secs),
            },
            media: MediaConfig {
                root: env::var("MEDIA_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or(media_defaults.root),
                url: env::var("MEDIA_URL").unwrap_or(media_defaults.url),
                thumbnail_size: env::var("THUMBNAIL_SIZE")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(media_defaults.thumbnail_size),
            },
        })
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
