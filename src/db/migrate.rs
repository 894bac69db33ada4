use rusqlite::{params, Connection};

use crate::error::Result;

/// Schema revisions, compiled into the binary and applied in order.
///
/// Each revision runs once per database, inside a transaction, and is
/// recorded in `schema_migrations` by name. Adding a revision means
/// appending a `(name, include_str!(..))` pair; names must stay unique
/// and the list append-only.
const MIGRATIONS: &[(&str, &str)] = &[(
    "001_collections",
    include_str!("../../migrations/001_collections.sql"),
)];

/// Apply all pending schema revisions. Idempotent: revisions already
/// recorded in `schema_migrations` are skipped.
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            name TEXT PRIMARY KEY,
            applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    for (name, sql) in MIGRATIONS {
        let applied: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM schema_migrations WHERE name = ?1)",
            params![name],
            |row| row.get(0),
        )?;
        if applied {
            log::debug!("Migration {} already applied, skipping", name);
            continue;
        }

        log::info!("Applying migration {}", name);
        let tx = conn.transaction()?;
        // execute_batch handles multi-statement revision files
        tx.execute_batch(sql)?;
        tx.execute(
            "INSERT INTO schema_migrations (name) VALUES (?1)",
            params![name],
        )?;
        tx.commit()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_run_migrations_creates_vector_store_schema() {
        let temp_dir = TempDir::new().unwrap();
        let mut conn = Connection::open(temp_dir.path().join("test.db")).unwrap();

        run_migrations(&mut conn).unwrap();

        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap();
        let tables: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        assert!(tables.iter().any(|t| t == "collections"));
        assert!(tables.iter().any(|t| t == "chunks"));
        assert!(tables.iter().any(|t| t == "schema_migrations"));
    }

    #[test]
    fn test_run_migrations_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let mut conn = Connection::open(temp_dir.path().join("test.db")).unwrap();

        run_migrations(&mut conn).unwrap();
        // Second run skips every recorded revision
        run_migrations(&mut conn).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(count as usize, MIGRATIONS.len());
    }

    #[test]
    fn test_revision_names_are_unique_and_ordered() {
        let names: Vec<&str> = MIGRATIONS.iter().map(|(name, _)| *name).collect();
        let mut sorted = names.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(names, sorted);
    }
}
