use thiserror::Error;

pub type Result<T> = std::result::Result<T, RuntimeError>;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Core(#[from] sprout_core::Error),

    #[error(transparent)]
    Storage(#[from] sprout_storage_sqlite::StorageError),

    #[error(transparent)]
    Remote(#[from] sprout_remote::RemoteApiError),
}
