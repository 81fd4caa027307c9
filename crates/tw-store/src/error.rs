use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Duplicate entity: {entity} with id {id}")]
    Duplicate { entity: &'static str, id: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[cfg(feature = "mongo")]
    #[error("Database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[cfg(feature = "mongo")]
    #[error("Serialization error: {0}")]
    Serialization(#[from] bson::ser::Error),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { entity, id: id.into() }
    }

    pub fn duplicate(entity: &'static str, id: impl Into<String>) -> Self {
        Self::Duplicate { entity, id: id.into() }
    }

    /// Connectivity-type failure; the operation may succeed if repeated later.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::NotFound { .. } | StoreError::Duplicate { .. } => false,
            StoreError::Unavailable(_) => true,
            #[cfg(feature = "mongo")]
            StoreError::Database(_) => true,
            #[cfg(feature = "mongo")]
            StoreError::Serialization(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
