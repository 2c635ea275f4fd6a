use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};

use crate::db::models::{AccountRow, AuthorizationRow, CredentialRow, NewAccount, RealmRow};
use crate::db::schema::SQLITE_INIT;
use crate::error::VelaError;
use crate::gateway::RoleCredentials;

pub type SqlitePool = Pool<Sqlite>;

/// Durable cache of realms, authorizations, accounts, SSO roles, and issued
/// credentials. Pure data access: lookups report absence as `None`, writes
/// commit before returning, deletes cascade to dependents.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) the SQLite database behind `database_url`
    /// and initialize the schema.
    pub async fn connect(database_url: &str) -> Result<Self, VelaError> {
        let connect_opts = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new().connect_with(connect_opts).await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Initialize the schema by executing the bundled DDL.
    async fn init_schema(&self) -> Result<(), VelaError> {
        // execute multiple statements safely (SQLite supports multi-commands but sqlx::query doesn't)
        for stmt in SQLITE_INIT.split(';') {
            let s = stmt.trim();
            if s.is_empty() {
                continue;
            }
            sqlx::query(s).execute(&self.pool).await?;
        }
        Ok(())
    }

    //
    // Realms
    //

    /// Upsert by unique realm name. A second registration with the same name
    /// replaces the start URL in place, never creates a duplicate row.
    pub async fn upsert_realm(&self, name: &str, start_url: &str) -> Result<RealmRow, VelaError> {
        sqlx::query(
            r#"
            INSERT INTO realm (name, start_url) VALUES (?, ?)
            ON CONFLICT(name) DO UPDATE SET start_url = excluded.start_url
            "#,
        )
        .bind(name)
        .bind(start_url)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("SELECT id, name, start_url FROM realm WHERE name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;
        realm_from_row(row)
    }

    pub async fn find_realm(&self, name: &str) -> Result<Option<RealmRow>, VelaError> {
        let row = sqlx::query("SELECT id, name, start_url FROM realm WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.map(realm_from_row).transpose()
    }

    //
    // Authorizations
    //

    pub async fn find_authorization(
        &self,
        realm_id: i64,
        region: &str,
    ) -> Result<Option<AuthorizationRow>, VelaError> {
        let row = sqlx::query(
            r#"SELECT id, realm_id, region, client_name, client_id, client_secret,
               client_secret_expires_at, device_code, device_expires_at,
               client_access_token, client_access_token_expires_at
               FROM authorization WHERE realm_id = ? AND region = ?"#,
        )
        .bind(realm_id)
        .bind(region)
        .fetch_optional(&self.pool)
        .await?;
        row.map(authorization_from_row).transpose()
    }

    /// Upsert by unique (realm, region). The session record is mutated in
    /// place across the device-flow state transitions.
    pub async fn upsert_authorization(
        &self,
        auth: &AuthorizationRow,
    ) -> Result<AuthorizationRow, VelaError> {
        sqlx::query(
            r#"
            INSERT INTO authorization (
                realm_id, region, client_name, client_id, client_secret,
                client_secret_expires_at, device_code, device_expires_at,
                client_access_token, client_access_token_expires_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(realm_id, region) DO UPDATE SET
                client_name=excluded.client_name,
                client_id=excluded.client_id,
                client_secret=excluded.client_secret,
                client_secret_expires_at=excluded.client_secret_expires_at,
                device_code=excluded.device_code,
                device_expires_at=excluded.device_expires_at,
                client_access_token=excluded.client_access_token,
                client_access_token_expires_at=excluded.client_access_token_expires_at
            "#,
        )
        .bind(auth.realm_id)
        .bind(&auth.region)
        .bind(&auth.client_name)
        .bind(&auth.client_id)
        .bind(&auth.client_secret)
        .bind(encode_ts_opt(auth.client_secret_expires_at))
        .bind(&auth.device_code)
        .bind(encode_ts_opt(auth.device_expires_at))
        .bind(&auth.client_access_token)
        .bind(encode_ts_opt(auth.client_access_token_expires_at))
        .execute(&self.pool)
        .await?;

        self.find_authorization(auth.realm_id, &auth.region)
            .await?
            .ok_or_else(|| {
                VelaError::not_found(format!(
                    "authorization for realm id {} in region {} vanished after upsert",
                    auth.realm_id, auth.region
                ))
            })
    }

    /// Delete an authorization; its accounts and their SSO roles and
    /// credentials go with it.
    pub async fn delete_authorization(&self, id: i64) -> Result<(), VelaError> {
        sqlx::query("DELETE FROM authorization WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    //
    // Accounts and SSO roles
    //

    /// Replace the authorization's accounts (and their role sets) with a
    /// fresh listing, in a single transaction. Returns how many accounts
    /// were stored.
    pub async fn replace_accounts(
        &self,
        authorization_id: i64,
        realm_id: i64,
        accounts: &[NewAccount],
    ) -> Result<usize, VelaError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM account WHERE authorization_id = ?")
            .bind(authorization_id)
            .execute(&mut *tx)
            .await?;

        for account in accounts {
            let result = sqlx::query(
                r#"INSERT INTO account (authorization_id, realm_id, number, name, email)
                   VALUES (?, ?, ?, ?, ?)"#,
            )
            .bind(authorization_id)
            .bind(realm_id)
            .bind(&account.number)
            .bind(&account.name)
            .bind(&account.email)
            .execute(&mut *tx)
            .await?;
            let account_id = result.last_insert_rowid();

            for role_name in &account.sso_roles {
                sqlx::query("INSERT INTO sso_role (account_id, name) VALUES (?, ?)")
                    .bind(account_id)
                    .bind(role_name)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(accounts.len())
    }

    pub async fn find_account_by_name(
        &self,
        realm_id: i64,
        name: &str,
    ) -> Result<Option<AccountRow>, VelaError> {
        let row = sqlx::query(
            r#"SELECT id, authorization_id, realm_id, number, name, email
               FROM account WHERE realm_id = ? AND name = ?"#,
        )
        .bind(realm_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.map(account_from_row).transpose()
    }

    pub async fn find_account_by_number(
        &self,
        realm_id: i64,
        number: &str,
    ) -> Result<Option<AccountRow>, VelaError> {
        let row = sqlx::query(
            r#"SELECT id, authorization_id, realm_id, number, name, email
               FROM account WHERE realm_id = ? AND number = ?"#,
        )
        .bind(realm_id)
        .bind(number)
        .fetch_optional(&self.pool)
        .await?;
        row.map(account_from_row).transpose()
    }

    pub async fn list_accounts(&self, realm_id: i64) -> Result<Vec<AccountRow>, VelaError> {
        let rows = sqlx::query(
            r#"SELECT id, authorization_id, realm_id, number, name, email
               FROM account WHERE realm_id = ? ORDER BY name"#,
        )
        .bind(realm_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(account_from_row).collect()
    }

    /// Delete an account; its SSO roles and credentials go with it.
    pub async fn delete_account(&self, id: i64) -> Result<(), VelaError> {
        sqlx::query("DELETE FROM account WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn sso_role_names(&self, account_id: i64) -> Result<Vec<String>, VelaError> {
        let rows = sqlx::query("SELECT name FROM sso_role WHERE account_id = ? ORDER BY name")
            .bind(account_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| row.try_get::<String, _>("name").map_err(VelaError::from))
            .collect()
    }

    pub async fn has_sso_role(&self, account_id: i64, role_name: &str) -> Result<bool, VelaError> {
        let row = sqlx::query("SELECT 1 FROM sso_role WHERE account_id = ? AND name = ?")
            .bind(account_id)
            .bind(role_name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    //
    // Credentials
    //

    pub async fn find_credential(
        &self,
        account_id: i64,
        role_name: &str,
    ) -> Result<Option<CredentialRow>, VelaError> {
        let row = sqlx::query(
            r#"SELECT id, account_id, role_name, access_key_id, secret_access_key,
               session_token, expires_at
               FROM credential WHERE account_id = ? AND role_name = ?"#,
        )
        .bind(account_id)
        .bind(role_name)
        .fetch_optional(&self.pool)
        .await?;
        row.map(credential_from_row).transpose()
    }

    pub async fn insert_credential(
        &self,
        account_id: i64,
        role_name: &str,
        creds: &RoleCredentials,
    ) -> Result<CredentialRow, VelaError> {
        sqlx::query(
            r#"INSERT INTO credential (
                account_id, role_name, access_key_id, secret_access_key,
                session_token, expires_at
            ) VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(account_id)
        .bind(role_name)
        .bind(&creds.access_key_id)
        .bind(&creds.secret_access_key)
        .bind(&creds.session_token)
        .bind(encode_ts(creds.expires_at))
        .execute(&self.pool)
        .await?;

        self.find_credential(account_id, role_name)
            .await?
            .ok_or_else(|| {
                VelaError::not_found(format!(
                    "credential for account id {account_id} role {role_name} vanished after insert"
                ))
            })
    }

    pub async fn delete_credential(&self, id: i64) -> Result<(), VelaError> {
        sqlx::query("DELETE FROM credential WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// All cached credentials joined with their account rows, for listings.
    pub async fn list_credentials(&self) -> Result<Vec<(CredentialRow, AccountRow)>, VelaError> {
        let rows = sqlx::query(
            r#"SELECT c.id, c.account_id, c.role_name, c.access_key_id,
                      c.secret_access_key, c.session_token, c.expires_at,
                      a.id AS a_id, a.authorization_id, a.realm_id, a.number,
                      a.name, a.email
               FROM credential c
               JOIN account a ON a.id = c.account_id
               ORDER BY a.name, c.role_name"#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let credential = credential_from_row_prefixed(&row)?;
                let account = AccountRow {
                    id: row.try_get("a_id")?,
                    authorization_id: row.try_get("authorization_id")?,
                    realm_id: row.try_get("realm_id")?,
                    number: row.try_get("number")?,
                    name: row.try_get("name")?,
                    email: row.try_get("email")?,
                };
                Ok((credential, account))
            })
            .collect()
    }
}

//
// Row decoding. Timestamp parse failures are data corruption and surface as
// decode errors, the same way sqlx reports a mistyped column.
//

fn realm_from_row(row: SqliteRow) -> Result<RealmRow, VelaError> {
    Ok(RealmRow {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        start_url: row.try_get("start_url")?,
    })
}

fn authorization_from_row(row: SqliteRow) -> Result<AuthorizationRow, VelaError> {
    Ok(AuthorizationRow {
        id: row.try_get("id")?,
        realm_id: row.try_get("realm_id")?,
        region: row.try_get("region")?,
        client_name: row.try_get("client_name")?,
        client_id: row.try_get("client_id")?,
        client_secret: row.try_get("client_secret")?,
        client_secret_expires_at: decode_ts_opt(row.try_get("client_secret_expires_at")?)?,
        device_code: row.try_get("device_code")?,
        device_expires_at: decode_ts_opt(row.try_get("device_expires_at")?)?,
        client_access_token: row.try_get("client_access_token")?,
        client_access_token_expires_at: decode_ts_opt(
            row.try_get("client_access_token_expires_at")?,
        )?,
    })
}

fn account_from_row(row: SqliteRow) -> Result<AccountRow, VelaError> {
    Ok(AccountRow {
        id: row.try_get("id")?,
        authorization_id: row.try_get("authorization_id")?,
        realm_id: row.try_get("realm_id")?,
        number: row.try_get("number")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
    })
}

fn credential_from_row(row: SqliteRow) -> Result<CredentialRow, VelaError> {
    credential_from_row_prefixed(&row)
}

fn credential_from_row_prefixed(row: &SqliteRow) -> Result<CredentialRow, VelaError> {
    Ok(CredentialRow {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        role_name: row.try_get("role_name")?,
        access_key_id: row.try_get("access_key_id")?,
        secret_access_key: row.try_get("secret_access_key")?,
        session_token: row.try_get("session_token")?,
        expires_at: decode_ts(row.try_get("expires_at")?)?,
    })
}

fn encode_ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339()
}

fn encode_ts_opt(at: Option<DateTime<Utc>>) -> Option<String> {
    at.map(encode_ts)
}

fn decode_ts(raw: String) -> Result<DateTime<Utc>, VelaError> {
    chrono::DateTime::parse_from_rfc3339(&raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| VelaError::Database(sqlx::Error::Decode(Box::new(e))))
}

fn decode_ts_opt(raw: Option<String>) -> Result<Option<DateTime<Utc>>, VelaError> {
    raw.map(decode_ts).transpose()
}
