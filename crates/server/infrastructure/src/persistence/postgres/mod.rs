//! PostgreSQL adapters

pub mod idempotency;
pub mod migrations;
pub mod orders;
pub mod outbox;
pub mod pool;
pub mod transaction;
pub mod warehouse;

pub use idempotency::PostgresIdempotencyStore;
pub use migrations::{run_migrations, MigrationOptions, EVENT_KEY_INDEX};
pub use orders::{PostgresInventoryRepository, PostgresLedgerRepository, PostgresOrderRepository};
pub use outbox::{PostgresDlqStore, PostgresOutboxStore};
pub use pool::{DatabasePool, DatabasePoolConfig, PoolError};
pub use transaction::{PgTx, PostgresTransactionProvider};
pub use warehouse::PostgresWarehouseSink;
