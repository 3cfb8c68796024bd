//! Postgres implementations of the storage traits

mod datasources;
mod documents;
mod providers;

pub use datasources::PgDatasourceStore;
pub use documents::PgDocumentStore;
pub use providers::PgEmbeddingProviderStore;

use docpipe_core::CoreError;

/// Surface a domain parse failure as a column decode error
fn decode_error(err: CoreError) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(err))
}
