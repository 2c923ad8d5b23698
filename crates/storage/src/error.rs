/// All errors that can be returned by a `PipelineStorage` implementation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Optimistic concurrency conflict: the stored entity's version moved
    /// past the version the caller read.
    #[error(
        "concurrent conflict on entity {entity_id}: expected version {expected_version}, found {actual_version}"
    )]
    ConcurrentConflict {
        entity_id: String,
        expected_version: i64,
        actual_version: i64,
    },

    /// No tracked entity with the given id.
    #[error("entity not found: {entity_id}")]
    EntityNotFound { entity_id: String },

    /// An entity with this id is already tracked.
    #[error("entity already exists: {entity_id}")]
    AlreadyExists { entity_id: String },

    /// A backend-specific storage error (connection, serialization, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}
