use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("recipient list encoding error: {0}")]
    RecipientEncoding(#[from] ep_types::RecipientListError),
    #[error("migration error: {0}")]
    Migration(String),
    #[error("query argument encoding error: {0}")]
    Encode(#[from] sqlx::error::BoxDynError),
    #[error("{entity} already exists: {key}")]
    AlreadyExists { entity: &'static str, key: String },
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl StoreError {
    /// True when the underlying driver reported a UNIQUE constraint
    /// violation — the caller maps this to `AlreadyExists` at the call site
    /// where it knows the entity name and key.
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, StoreError::Db(sqlx::Error::Database(db)) if db.is_unique_violation())
    }
}
