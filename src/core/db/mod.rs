/// Database Module
///
/// The SQLite side of ColdQuery, split by concern:
/// - **Connection Management** (`connection.rs`): the bounded pool and the autocommit execution path
/// - **Sessions** (`session.rs`, `transaction.rs`): connection-pinned transactions and their state machine
/// - **Query Execution** (`query.rs`, `result.rs`): statement classification, binding and result normalization
/// - **Schema Introspection** (`schema.rs`): catalog listings and table descriptions
///
/// Blocking engine calls go through `worker.rs` so they never stall the runtime.
pub mod connection;
pub mod query;
pub mod result;
pub mod schema;
pub mod session;
pub mod transaction;
pub(crate) mod worker;

pub use connection::{SqliteConnection, SqlitePool, SqlitePoolExecutor};
pub use query::{is_write_statement, quote_identifier, validate_identifier, StatementType};
pub use result::{FieldDescriptor, QueryResult};
pub use session::SqliteSessionExecutor;
pub use transaction::TransactionState;
