//! Durable farmer state: one redb file with a bucket of signed contracts and
//! a bucket of one-shot transfer tokens.
//!
//! Writers are serialized by the backend's transaction discipline and readers
//! see consistent snapshots, so callers never take extra locks around single
//! get/put pairs.

use {
    message::Contract,
    redb::{Database, ReadableTable, TableDefinition},
    serde::{Deserialize, Serialize},
    std::path::Path,
};

const CONTRACTS: TableDefinition<&str, &[u8]> = TableDefinition::new("CONTRACT");
const TOKENS: TableDefinition<&str, &[u8]> = TableDefinition::new("TOKEN");

/// The two key spaces of the farmer database.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Bucket {
    Contract,
    Token,
}

impl Bucket {
    fn definition(self) -> TableDefinition<'static, &'static str, &'static [u8]> {
        match self {
            Self::Contract => CONTRACTS,
            Self::Token => TOKENS,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("key not found")]
    NotFound,
    #[error("key already exists")]
    AlreadyExists,
    #[error("storage backend error: {0}")]
    Backend(#[from] redb::Error),
    #[error("corrupt record: {0}")]
    Codec(#[from] serde_json::Error),
}

fn backend(err: impl Into<redb::Error>) -> StoreError {
    StoreError::Backend(err.into())
}

/// The record kept per `data_hash`: the countersigned contract plus the audit
/// tree supplied later by CONSIGN or MIRROR.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageItem {
    pub contract: Contract,
    #[serde(default)]
    pub trees: Vec<String>,
}

impl StorageItem {
    pub fn new(contract: Contract) -> Self {
        Self {
            contract,
            trees: Vec::new(),
        }
    }
}

pub struct Store {
    db: Database,
}

impl Store {
    /// Opens (or creates) the database and ensures both buckets exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::create(path).map_err(backend)?;
        let txn = db.begin_write().map_err(backend)?;
        txn.open_table(CONTRACTS).map_err(backend)?;
        txn.open_table(TOKENS).map_err(backend)?;
        txn.commit().map_err(backend)?;
        Ok(Self { db })
    }

    pub fn get(&self, bucket: Bucket, key: &str) -> Result<Vec<u8>, StoreError> {
        let txn = self.db.begin_read().map_err(backend)?;
        let table = txn.open_table(bucket.definition()).map_err(backend)?;
        table
            .get(key)
            .map_err(backend)?
            .map(|guard| guard.value().to_vec())
            .ok_or(StoreError::NotFound)
    }

    /// Stores `value` under `key`. Without `overwrite` the put fails when the
    /// key is already present and leaves the stored value untouched.
    pub fn put(
        &self,
        bucket: Bucket,
        key: &str,
        value: &[u8],
        overwrite: bool,
    ) -> Result<(), StoreError> {
        let txn = self.db.begin_write().map_err(backend)?;
        {
            let mut table = txn.open_table(bucket.definition()).map_err(backend)?;
            if !overwrite && table.get(key).map_err(backend)?.is_some() {
                return Err(StoreError::AlreadyExists);
            }
            table.insert(key, value).map_err(backend)?;
        }
        txn.commit().map_err(backend)?;
        Ok(())
    }

    /// Removes `key`, reporting whether it was present.
    pub fn delete(&self, bucket: Bucket, key: &str) -> Result<bool, StoreError> {
        let txn = self.db.begin_write().map_err(backend)?;
        let removed = {
            let mut table = txn.open_table(bucket.definition()).map_err(backend)?;
            table.remove(key).map_err(backend)?.is_some()
        };
        txn.commit().map_err(backend)?;
        Ok(removed)
    }

    pub fn storage_item(&self, data_hash: &str) -> Result<StorageItem, StoreError> {
        let raw = self.get(Bucket::Contract, data_hash)?;
        Ok(serde_json::from_slice(&raw)?)
    }

    pub fn put_storage_item(
        &self,
        data_hash: &str,
        item: &StorageItem,
        overwrite: bool,
    ) -> Result<(), StoreError> {
        self.put(
            Bucket::Contract,
            data_hash,
            &serde_json::to_vec(item)?,
            overwrite,
        )
    }

    /// Registers a fresh transfer token. Tokens are single-use capabilities,
    /// so colliding with an existing one is an error.
    pub fn insert_token(&self, token: &str) -> Result<(), StoreError> {
        self.put(Bucket::Token, token, &[], false)
    }

    pub fn has_token(&self, token: &str) -> Result<bool, StoreError> {
        match self.get(Bucket::Token, token) {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound) => Ok(false),
            Err(err) => Err(err),
        }
    }

    pub fn remove_token(&self, token: &str) -> Result<(), StoreError> {
        self.delete(Bucket::Token, token).map(|_| ())
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}
