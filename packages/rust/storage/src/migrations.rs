//! SQL migration definitions for the ConfScout cache database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: enrichment_cache",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Extraction-service responses keyed by sha256(description, model)
CREATE TABLE IF NOT EXISTS enrichment_cache (
    cache_key  TEXT PRIMARY KEY,
    model_id   TEXT NOT NULL,
    value_json TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_enrichment_cache_model ON enrichment_cache(model_id);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Pipeline run history",
            sql: r#"
CREATE TABLE IF NOT EXISTS pipeline_runs (
    id          TEXT PRIMARY KEY,
    started_at  TEXT NOT NULL,
    finished_at TEXT,
    outcome     TEXT,
    stats_json  TEXT
);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_ascend_and_are_recorded() {
        let migrations = all_migrations();
        for (i, migration) in migrations.iter().enumerate() {
            assert_eq!(migration.version as usize, i + 1);
            assert!(migration.sql.contains(&format!(
                "INSERT INTO schema_migrations (version) VALUES ({})",
                migration.version
            )));
        }
    }
}
