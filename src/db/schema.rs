//! SQL DDL for initializing the credential cache.
//! SQLite-first design; can be adapted for other RDBMS.

/// SQLite schema with:
/// - `realm` unique by `name` (upsert target, never duplicated)
/// - `authorization` unique by `(realm_id, region)`
/// - `account` indexed by `(realm_id, name)` and `(realm_id, number)`
/// - `credential` unique by `(account_id, role_name)`
/// - cascading deletes: authorization -> account -> sso_role / credential
///
/// Timestamps are stored as RFC3339 text; a NULL expiry counts as expired.
pub const SQLITE_INIT: &str = r#"
CREATE TABLE IF NOT EXISTS realm (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    start_url TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS authorization (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    realm_id INTEGER NOT NULL REFERENCES realm(id) ON DELETE CASCADE,
    region TEXT NOT NULL,
    client_name TEXT NOT NULL,
    client_id TEXT NULL,
    client_secret TEXT NULL,
    client_secret_expires_at TEXT NULL,
    device_code TEXT NULL,
    device_expires_at TEXT NULL,
    client_access_token TEXT NULL,
    client_access_token_expires_at TEXT NULL,
    UNIQUE (realm_id, region)
);

CREATE TABLE IF NOT EXISTS account (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    authorization_id INTEGER NOT NULL REFERENCES authorization(id) ON DELETE CASCADE,
    realm_id INTEGER NOT NULL REFERENCES realm(id) ON DELETE CASCADE,
    number TEXT NOT NULL,
    name TEXT NOT NULL,
    email TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_account_realm_name ON account(realm_id, name);

CREATE INDEX IF NOT EXISTS idx_account_realm_number ON account(realm_id, number);

CREATE TABLE IF NOT EXISTS sso_role (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id INTEGER NOT NULL REFERENCES account(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    UNIQUE (account_id, name)
);

CREATE TABLE IF NOT EXISTS credential (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id INTEGER NOT NULL REFERENCES account(id) ON DELETE CASCADE,
    role_name TEXT NOT NULL,
    access_key_id TEXT NOT NULL,
    secret_access_key TEXT NOT NULL,
    session_token TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    UNIQUE (account_id, role_name)
);
"#;
