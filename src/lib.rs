/// Scheduled MySQL backups with age-based rotation
pub mod core;
pub mod utils;
