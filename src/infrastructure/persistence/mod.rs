pub mod database;
pub mod history_repository;
pub mod pivot_repository;

pub use database::Database;
pub use history_repository::SqliteHistoryStore;
pub use pivot_repository::JsonPivotStore;
