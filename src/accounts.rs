//! Accounts live in the shared store (tenant 0), one row per tenant.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::NaiveDateTime;
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::store::{TenantId, TenantStore, SHARED_TENANT};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: TenantId,
    pub name: String,
    #[serde(skip_serializing, default)]
    pub credential_hash: String,
    pub admin: bool,
    pub active: bool,
    pub created: Option<NaiveDateTime>,
    /// Number of tenant migration steps applied to this account's store.
    pub schema_version: i64,
}

/// Lookup key for [`TenantStore::get_account`].
#[derive(Debug, Clone, Copy)]
pub enum AccountKey<'a> {
    Id(TenantId),
    Name(&'a str),
}

impl Account {
    /// A new, active, non-admin account. Persisted by `save_account`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            credential_hash: String::new(),
            admin: false,
            active: true,
            created: None,
            schema_version: 0,
        }
    }

    /// Hash and store a password (Argon2, PHC string format).
    pub fn set_password(&mut self, password: &str) -> Result<()> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| Error::Credential(e.to_string()))?;
        self.credential_hash = hash.to_string();
        Ok(())
    }

    pub fn verify_password(&self, password: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(&self.credential_hash) else {
            return false;
        };
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            credential_hash: row.get(2)?,
            admin: row.get(3)?,
            active: row.get(4)?,
            created: row.get(5)?,
            schema_version: row.get(6)?,
        })
    }
}

const ACCOUNT_COLUMNS: &str =
    "id, name, credential_hash, admin, active, created, schema_version";

impl TenantStore {
    pub fn get_account(&self, key: AccountKey<'_>) -> Result<Account> {
        let shared = self.acquire(SHARED_TENANT)?;
        let account = shared.with(|conn| {
            let found = match key {
                AccountKey::Id(id) => conn
                    .query_row(
                        &format!("SELECT {ACCOUNT_COLUMNS} FROM account WHERE id = ?"),
                        [id],
                        Account::from_row,
                    )
                    .optional()?,
                AccountKey::Name(name) => conn
                    .query_row(
                        &format!(
                            "SELECT {ACCOUNT_COLUMNS} FROM account WHERE name = ? COLLATE NOCASE"
                        ),
                        [name],
                        Account::from_row,
                    )
                    .optional()?,
            };
            Ok(found)
        })?;
        account.ok_or(Error::NotFound)
    }

    pub fn list_accounts(&self) -> Result<Vec<Account>> {
        let shared = self.acquire(SHARED_TENANT)?;
        shared.with(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {ACCOUNT_COLUMNS} FROM account ORDER BY id"))?;
            let accounts = stmt
                .query_map([], Account::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(accounts)
        })
    }

    /// Insert the account when its id is 0 (assigning the new id), update it
    /// otherwise. `schema_version` is owned by the store and never written
    /// from here.
    pub fn save_account(&self, account: &mut Account) -> Result<()> {
        let shared = self.acquire(SHARED_TENANT)?;
        let now = self.clock().now_naive();
        shared.with(|conn| {
            if account.id == 0 {
                conn.execute(
                    "INSERT INTO account (name, credential_hash, admin, active, created)
                     VALUES (?, ?, ?, ?, ?)",
                    params![
                        account.name,
                        account.credential_hash,
                        account.admin,
                        account.active,
                        now
                    ],
                )?;
                account.id = conn.last_insert_rowid();
                account.created = Some(now);
            } else {
                let updated = conn.execute(
                    "UPDATE account SET name = ?, credential_hash = ?, admin = ?, active = ?
                     WHERE id = ?",
                    params![
                        account.name,
                        account.credential_hash,
                        account.admin,
                        account.active,
                        account.id
                    ],
                )?;
                if updated == 0 {
                    return Err(Error::NotFound);
                }
            }
            Ok(())
        })
    }
}
