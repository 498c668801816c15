//! Schema versioning for the attendance store.

use rusqlite::{Connection, OptionalExtension};

use crate::error::{Error, Result};

use super::schema::{CREATE_METADATA_TABLE, SCHEMA_STATEMENTS};

/// The current schema version.
pub const CURRENT_VERSION: i32 = 1;

/// Key used to store the schema version in the metadata table.
const VERSION_KEY: &str = "schema_version";

/// Bring the database schema up to [`CURRENT_VERSION`].
///
/// # Errors
///
/// Returns an error if a migration fails or the stored version is newer than
/// this build understands.
pub fn initialize_schema(conn: &Connection) -> Result<()> {
    conn.execute(CREATE_METADATA_TABLE, [])?;

    let version = schema_version(conn)?;
    if version > CURRENT_VERSION {
        return Err(Error::DatabaseMigration {
            message: format!(
                "database schema version {version} is newer than supported version {CURRENT_VERSION}"
            ),
        });
    }

    for next in (version + 1)..=CURRENT_VERSION {
        apply(conn, next)?;
        set_schema_version(conn, next)?;
    }
    Ok(())
}

/// Stored schema version, 0 for a fresh database.
fn schema_version(conn: &Connection) -> Result<i32> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM metadata WHERE key = ?1",
            [VERSION_KEY],
            |row| row.get(0),
        )
        .optional()?;

    match value {
        None => Ok(0),
        Some(v) => v.parse().map_err(|_| Error::DatabaseMigration {
            message: format!("invalid schema version: {v}"),
        }),
    }
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
        (VERSION_KEY, version.to_string()),
    )?;
    Ok(())
}

fn apply(conn: &Connection, version: i32) -> Result<()> {
    match version {
        1 => {
            for statement in SCHEMA_STATEMENTS {
                conn.execute(statement, [])?;
            }
            Ok(())
        }
        _ => Err(Error::DatabaseMigration {
            message: format!("unknown migration version: {version}"),
        }),
    }
}
