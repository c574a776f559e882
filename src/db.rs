use crate::{auth::password::hash_password, config::Config};
use actix_web::rt::time::sleep;
use anyhow::{Context, anyhow, bail};
use sqlx::{
    Executor, MySqlPool,
    mysql::{MySqlConnectOptions, MySqlPoolOptions},
};
use std::time::Duration;
use tracing::{info, warn};

const MAX_CONNECTIONS: u32 = 25;
const CONN_LIFETIME: Duration = Duration::from_secs(5 * 60);
const CONNECT_ATTEMPTS: u32 = 30;
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(2);

const CREATE_USERS: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id BIGINT UNSIGNED AUTO_INCREMENT PRIMARY KEY,
    username VARCHAR(50) CHARACTER SET utf8mb4 COLLATE utf8mb4_bin NOT NULL UNIQUE,
    password_hash VARCHAR(255) NOT NULL,
    display_name VARCHAR(50) NOT NULL DEFAULT '',
    role ENUM('admin', 'staff') NOT NULL DEFAULT 'staff',
    created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci
"#;

const CREATE_VIOLATIONS: &str = r#"
CREATE TABLE IF NOT EXISTS violations (
    id BIGINT UNSIGNED AUTO_INCREMENT PRIMARY KEY,
    dorm VARCHAR(20) NOT NULL,
    student_name VARCHAR(50) NOT NULL,
    class_name VARCHAR(50) NOT NULL,
    period VARCHAR(20) NOT NULL,
    reason TEXT NOT NULL,
    department VARCHAR(30) NOT NULL,
    inspector VARCHAR(100) NOT NULL,
    photo_path VARCHAR(255) NOT NULL DEFAULT '',
    created_by BIGINT UNSIGNED NOT NULL,
    created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
    INDEX idx_created_at (created_at),
    INDEX idx_student_name (student_name),
    INDEX idx_dorm (dorm),
    INDEX idx_created_by (created_by),
    CONSTRAINT fk_violations_created_by FOREIGN KEY (created_by) REFERENCES users(id)
) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci
"#;

pub fn connect_options(config: &Config) -> MySqlConnectOptions {
    MySqlConnectOptions::new()
        .host(&config.db_host)
        .port(config.db_port)
        .username(&config.db_user)
        .password(&config.db_password)
        .database(&config.db_name)
        .charset("utf8mb4")
}

/// Builds the pool and waits until the database answers.
pub async fn init_db(config: &Config) -> anyhow::Result<MySqlPool> {
    let pool = MySqlPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .max_lifetime(CONN_LIFETIME)
        .idle_timeout(CONN_LIFETIME)
        .connect_lazy_with(connect_options(config));

    for attempt in 1..=CONNECT_ATTEMPTS {
        match sqlx::query("SELECT 1").execute(&pool).await {
            Ok(_) => {
                info!(host = %config.db_host, db = %config.db_name, "Database connected");
                return Ok(pool);
            }
            Err(e) => {
                warn!(attempt, max = CONNECT_ATTEMPTS, error = %e, "Database not ready, retrying");
                sleep(CONNECT_RETRY_DELAY).await;
            }
        }
    }

    Err(anyhow!(
        "database {}:{} unreachable after {} attempts",
        config.db_host,
        config.db_port,
        CONNECT_ATTEMPTS
    ))
}

pub async fn migrate(pool: &MySqlPool) -> anyhow::Result<()> {
    pool.execute(CREATE_USERS)
        .await
        .context("failed to create users table")?;
    pool.execute(CREATE_VIOLATIONS)
        .await
        .context("failed to create violations table")?;

    info!("Schema ready");
    Ok(())
}

const COUNT_ADMINS: &str = "SELECT COUNT(*) FROM users WHERE role = 'admin'";

/// Creates the default admin whenever no admin account exists.
pub async fn seed_admin(pool: &MySqlPool, config: &Config) -> anyhow::Result<()> {
    let admins: i64 = sqlx::query_scalar(COUNT_ADMINS)
        .fetch_one(pool)
        .await
        .context("failed to count admins")?;
    if admins > 0 {
        return Ok(());
    }

    if config.admin_password.chars().count() < 6 {
        bail!("ADMIN_PASSWORD must be at least 6 characters");
    }

    let password = config.admin_password.clone();
    let hash = actix_web::web::block(move || hash_password(&password))
        .await
        .context("password hashing task failed")?
        .map_err(|e| anyhow!("failed to hash admin password: {}", e))?;

    let result = sqlx::query(
        "INSERT INTO users (username, password_hash, display_name, role) VALUES (?, ?, ?, 'admin')",
    )
    .bind(&config.admin_username)
    .bind(&hash)
    .bind("系统管理员")
    .execute(pool)
    .await;

    match result {
        Ok(_) => {
            warn!(
                username = %config.admin_username,
                "Default admin created; change its password after first login"
            );
            Ok(())
        }
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
            warn!(
                username = %config.admin_username,
                "No admin account exists and ADMIN_USERNAME is taken by a staff user; set a different ADMIN_USERNAME"
            );
            Ok(())
        }
        Err(e) => Err(e).context("failed to create default admin"),
    }
}
