//! database.rs
//! Conexión a SQLite y migraciones embebidas.

use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};

pub async fn setup_database(database_url: &str) -> Result<Pool<Sqlite>> {
    let in_memory = database_url.contains(":memory:");

    if !in_memory {
        if let Some(path) = database_url.strip_prefix("sqlite:") {
            if let Some(parent) = std::path::Path::new(path.trim_start_matches("//")).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("No se pudo crear directorio {:?}", parent)
                    })?;
                }
            }
        }
    }

    log::info!("Conectando a SQLite en {}", database_url);

    let options = SqliteConnectOptions::from_str(database_url)
        .context("DATABASE_URL inválida")?
        .create_if_missing(true)
        .foreign_keys(true);

    // En memoria cada conexión es una base distinta: una sola conexión.
    let max_connections = if in_memory { 1 } else { 8 };

    let mut pool_options = SqlitePoolOptions::new().max_connections(max_connections);
    if in_memory {
        // Si la conexión se recicla, la base desaparece con ella.
        pool_options = pool_options.idle_timeout(None).max_lifetime(None);
    }

    let pool = pool_options
        .connect_with(options)
        .await
        .context("No se pudo conectar a la base de datos SQLite")?;

    Ok(pool)
}

/// Corre migraciones con sqlx
pub async fn run_migrations(pool: &Pool<Sqlite>) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("Fallo al correr migraciones")?;
    Ok(())
}

/// Ancho fijo (microsegundos, sufijo Z): las columnas TEXT ordenan cronológicamente.
pub fn fmt_ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn now_rfc3339() -> String {
    fmt_ts(Utc::now())
}

pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .with_context(|| format!("Timestamp inválido en DB: '{raw}'"))
}

pub fn parse_opt_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_ts).transpose()
}
