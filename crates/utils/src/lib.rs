pub mod database;
pub mod properties;

// Re-export commonly used items
pub use crate::database::{ensure_database_exists, read_database, write_database, PROPERTIES_KEY};
pub use crate::properties::{merge_properties_with_deduplication, property_id, MergeStats};
