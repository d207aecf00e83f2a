pub mod config;
pub mod enums;
pub mod schema;
pub mod utils;

pub use config::AppConfig;
pub use utils::DbPool;
