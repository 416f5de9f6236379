pub mod database;
pub mod sqlite_storage_gateway;

pub use database::Database;
pub use sqlite_storage_gateway::SqliteStorageGateway;
