/// Project management module
///
/// Handles tenant scoping and the shared transactional store connection.
/// Every row carries a project id; callers pass the set of projects they may touch.

pub mod database;
pub mod types;

pub use database::DatabaseManager;
pub use types::ProjectScope;
