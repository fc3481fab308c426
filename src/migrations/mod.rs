//! Schema migrations backed by `sqlx::migrate::Migrator`.
//!
//! Migration files live in a directory of `<version>_<name>.up.sql` /
//! `<version>_<name>.down.sql` pairs. Rolling back requires the down script.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use sqlx::migrate::{Migrate, Migrator};
use sqlx::postgres::PgConnection;
use sqlx::Connection;

use crate::error::{DbError, Result};

/// Apply every pending migration. Nothing pending is success.
pub async fn run_migrations(database_url: &str, path: impl AsRef<Path>) -> Result<()> {
    let dir = resolve_dir(path.as_ref())?;
    let migrator = load(&dir).await?;
    let mut conn = open(database_url).await?;

    let result = migrator.run(&mut conn).await;
    close(conn).await;
    result.map_err(|e| DbError::migration("failed to run migrations", e))?;

    tracing::info!(
        path = %dir.display(),
        available = migrator.iter().count(),
        "database migrations applied"
    );
    Ok(())
}

/// Revert the most recently applied migration. Nothing applied is success.
pub async fn rollback_migrations(database_url: &str, path: impl AsRef<Path>) -> Result<()> {
    let dir = resolve_dir(path.as_ref())?;
    let migrator = load(&dir).await?;
    let mut conn = open(database_url).await?;

    let result = rollback_latest(&migrator, &mut conn).await;
    close(conn).await;

    match result? {
        Some(version) => tracing::info!(version, "database migration rolled back"),
        None => tracing::info!("no applied migrations to roll back"),
    }
    Ok(())
}

async fn rollback_latest(migrator: &Migrator, conn: &mut PgConnection) -> Result<Option<i64>> {
    conn.ensure_migrations_table()
        .await
        .map_err(|e| DbError::migration("failed to prepare migrations table", e))?;

    let mut applied: Vec<i64> = conn
        .list_applied_migrations()
        .await
        .map_err(|e| DbError::migration("failed to list applied migrations", e))?
        .into_iter()
        .map(|migration| migration.version)
        .collect();
    applied.sort_unstable();

    let Some(&latest) = applied.last() else {
        return Ok(None);
    };
    let target = applied.iter().rev().nth(1).copied().unwrap_or(0);

    migrator
        .undo(&mut *conn, target)
        .await
        .map_err(|e| DbError::migration("failed to rollback migration", e))?;
    Ok(Some(latest))
}

fn resolve_dir(path: &Path) -> Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir()
            .map_err(|e| DbError::migration("failed to resolve migration path", e))?
            .join(path)
    };

    match fs::metadata(&absolute) {
        Ok(meta) if meta.is_dir() => Ok(absolute),
        Ok(_) => Err(DbError::Migration {
            message: format!("migration path is not a directory: {}", absolute.display()),
            source: None,
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(DbError::Migration {
            message: format!("migration directory does not exist: {}", absolute.display()),
            source: None,
        }),
        Err(e) => Err(DbError::migration("failed to access migration directory", e)),
    }
}

async fn load(dir: &Path) -> Result<Migrator> {
    Migrator::new(dir)
        .await
        .map_err(|e| DbError::migration("failed to load migrations", e))
}

async fn open(database_url: &str) -> Result<PgConnection> {
    PgConnection::connect(database_url)
        .await
        .map_err(|e| DbError::migration("failed to connect for migrations", e))
}

async fn close(conn: PgConnection) {
    if let Err(e) = conn.close().await {
        tracing::warn!(error = %e, "failed to close migration connection");
    }
}
