// ============================================================================
// Driver Seam
// ============================================================================
//
// The database driver is an external collaborator. txsentry only needs a
// transaction boundary per connection name and a typed error it can classify.
//
// ============================================================================

pub mod error;

pub use error::{DatabaseError, DatabaseErrorKind, TransientFailure};

use async_trait::async_trait;
use std::sync::Arc;

/// Transaction boundary capability supplied by the database driver.
///
/// Implementations may nest: a `begin` while a transaction is already open on
/// the same connection opens a savepoint-level transaction.
#[async_trait]
pub trait TransactionRunner: Send + Sync {
    async fn begin(&self, connection: &str) -> Result<(), DatabaseError>;

    async fn commit(&self, connection: &str) -> Result<(), DatabaseError>;

    async fn rollback(&self, connection: &str) -> Result<(), DatabaseError>;
}

#[async_trait]
impl<R: TransactionRunner + ?Sized> TransactionRunner for Arc<R> {
    async fn begin(&self, connection: &str) -> Result<(), DatabaseError> {
        (**self).begin(connection).await
    }

    async fn commit(&self, connection: &str) -> Result<(), DatabaseError> {
        (**self).commit(connection).await
    }

    async fn rollback(&self, connection: &str) -> Result<(), DatabaseError> {
        (**self).rollback(connection).await
    }
}
