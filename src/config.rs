use anyhow::{Context, anyhow};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Clone, Debug)]
pub struct Config {
    pub db_host: String,
    pub db_port: u16,
    pub db_user: String,
    pub db_password: String,
    pub db_name: String,

    pub jwt_secret: String,
    pub server_addr: String,
    pub token_ttl: i64,
    pub csrf_ttl: i64,
    pub cookie_secure: bool,

    // Photo storage
    pub upload_dir: PathBuf,
    pub max_upload: u64,

    // Rate limiting
    pub rate_login_per_min: u32,

    pub api_prefix: String,

    pub log_dir: String,
    pub log_level: tracing::Level,

    // First-boot admin account
    pub admin_username: String,
    pub admin_password: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| -> String {
            lookup(key)
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let port = get("PORT", "8080");
        let server_addr = get("SERVER_ADDR", &format!("0.0.0.0:{}", port));

        Ok(Self {
            db_host: get("DB_HOST", "localhost"),
            db_port: parse_key("DB_PORT", &get("DB_PORT", "3306"))?,
            db_user: get("DB_USER", "suv"),
            db_password: get("DB_PASSWORD", "suv_password"),
            db_name: get("DB_NAME", "suv"),

            jwt_secret: get("JWT_SECRET", "change-me-in-production-32chars!"),
            server_addr,
            token_ttl: parse_key("TOKEN_TTL", &get("TOKEN_TTL", "86400"))?, // 24h
            csrf_ttl: parse_key("CSRF_TTL", &get("CSRF_TTL", "3600"))?,
            cookie_secure: parse_key("COOKIE_SECURE", &get("COOKIE_SECURE", "false"))?,

            upload_dir: PathBuf::from(get("UPLOAD_DIR", "./uploads")),
            max_upload: parse_key("MAX_UPLOAD_BYTES", &get("MAX_UPLOAD_BYTES", "5242880"))?, // 5MB

            rate_login_per_min: parse_key(
                "RATE_LOGIN_PER_MIN",
                &get("RATE_LOGIN_PER_MIN", "60"),
            )?,

            api_prefix: get("API_PREFIX", "/api"),

            log_dir: get("LOG_DIR", "logs"),
            log_level: get("LOG_LEVEL", "debug")
                .parse()
                .map_err(|_| anyhow!("LOG_LEVEL must be one of trace/debug/info/warn/error"))?,

            admin_username: get("ADMIN_USERNAME", "admin"),
            admin_password: get("ADMIN_PASSWORD", "admin123"),
        })
    }

    /// Path of the multipart violation form, the one place a CSRF form field is honoured.
    pub fn violation_form_path(&self) -> String {
        format!("{}/violations", self.api_prefix)
    }
}

fn parse_key<T>(key: &str, raw: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.parse()
        .with_context(|| format!("{} has an invalid value: {:?}", key, raw))
}
