//! Credential storage.
//!
//! The auth service only needs three lookups, so they sit behind a trait:
//! the Postgres implementation goes through the query builder, tests use an
//! in-memory map.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::models::{AuthUser, Role};
use crate::database::{Database, QueryError};

/// A stored credential, one per registered email
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
}

impl CredentialRecord {
    pub fn user(&self) -> AuthUser {
        AuthUser {
            id: self.id,
            email: self.email.clone(),
            role: self.role,
        }
    }
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<CredentialRecord>, QueryError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<CredentialRecord>, QueryError>;

    /// Store a new credential. A duplicate email fails with a unique-violation
    /// error and leaves the existing record untouched.
    async fn insert(&self, record: &CredentialRecord) -> Result<(), QueryError>;
}

const USERS: &str = "users";
const COLUMNS: &str = "id, email, password_hash, role";

pub struct PgCredentialStore {
    db: Database,
}

impl PgCredentialStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<CredentialRecord>, QueryError> {
        self.db
            .from(USERS)
            .select(COLUMNS)
            .eq("email", email)
            .single()
            .exec::<CredentialRecord>()
            .await
            .into_result()
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<CredentialRecord>, QueryError> {
        self.db
            .from(USERS)
            .select(COLUMNS)
            .eq("id", id)
            .single()
            .exec::<CredentialRecord>()
            .await
            .into_result()
    }

    async fn insert(&self, record: &CredentialRecord) -> Result<(), QueryError> {
        self.db
            .from(USERS)
            .insert(record)
            .returning(false)
            .exec::<serde_json::Value>()
            .await
            .into_result()
            .map(|_| ())
    }
}

#[cfg(test)]
pub use memory::MemoryCredentialStore;

#[cfg(test)]
mod memory {
    use std::collections::HashMap;

    use parking_lot::RwLock;

    use super::*;
    use crate::database::error::CODE_UNIQUE_VIOLATION;

    /// In-memory store keyed by email
    #[derive(Default)]
    pub struct MemoryCredentialStore {
        records: RwLock<HashMap<String, CredentialRecord>>,
    }

    impl MemoryCredentialStore {
        pub fn get(&self, email: &str) -> Option<CredentialRecord> {
            self.records.read().get(email).cloned()
        }

        pub fn set_role(&self, email: &str, role: Role) {
            if let Some(record) = self.records.write().get_mut(email) {
                record.role = role;
            }
        }

        pub fn remove(&self, email: &str) {
            self.records.write().remove(email);
        }
    }

    #[async_trait]
    impl CredentialStore for MemoryCredentialStore {
        async fn find_by_email(
            &self,
            email: &str,
        ) -> Result<Option<CredentialRecord>, QueryError> {
            Ok(self.get(email))
        }

        async fn find_by_id(&self, id: Uuid) -> Result<Option<CredentialRecord>, QueryError> {
            Ok(self.records.read().values().find(|r| r.id == id).cloned())
        }

        async fn insert(&self, record: &CredentialRecord) -> Result<(), QueryError> {
            let mut records = self.records.write();
            if records.contains_key(&record.email) {
                return Err(QueryError::new(
                    "duplicate key value violates unique constraint \"users_email_key\"",
                    CODE_UNIQUE_VIOLATION,
                ));
            }
            records.insert(record.email.clone(), record.clone());
            Ok(())
        }
    }
}
