/// Ordered schema steps for the shared account store (tenant 0).
/// Append only: a step's position is its version number.
pub const SHARED_MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE account (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        credential_hash TEXT NOT NULL DEFAULT '',
        admin INTEGER NOT NULL DEFAULT 0,
        active INTEGER NOT NULL DEFAULT 1,
        created TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
        schema_version INTEGER NOT NULL DEFAULT 0
    );
    CREATE UNIQUE INDEX idx_account_name ON account(name COLLATE NOCASE);
    "#,
];

/// Ordered schema steps for every per-account store.
pub const TENANT_MIGRATIONS: &[&str] = &[
    r#"
    -- Media items; bytes live on disk under <tenant>/<YYYY-MM-DD>/<id>/<name>
    CREATE TABLE media (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        public INTEGER NOT NULL DEFAULT 0,
        checksum TEXT NOT NULL,
        content_type TEXT NOT NULL,
        created TEXT NOT NULL,
        modified TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
        deleted TEXT,
        size INTEGER NOT NULL DEFAULT 0,
        meta JSON
    );
    CREATE UNIQUE INDEX idx_media_checksum ON media(checksum);
    CREATE INDEX idx_media_modified ON media(modified);
    "#,
    r#"
    -- Remote mirror targets and what has been mirrored to them
    CREATE TABLE sync_location (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        type TEXT NOT NULL,
        deleted TEXT,
        config JSON NOT NULL
    );
    CREATE TABLE sync_media (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        location_id INTEGER NOT NULL,
        media_id INTEGER NOT NULL,
        meta TEXT NOT NULL DEFAULT '',
        UNIQUE(location_id, media_id)
    );
    "#,
    r#"
    CREATE INDEX idx_media_created ON media(deleted, created);
    CREATE INDEX idx_sync_media_media ON sync_media(media_id);
    "#,
];
