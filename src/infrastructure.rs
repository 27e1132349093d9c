//! Infrastructure layer: configuration, logging and the concrete collaborators
//!
//! Record stores (REST, SQLite, in-memory) and the capture-replaying page
//! extractor implement the domain traits.

pub mod capture_extractor;
pub mod config;
pub mod logging;
pub mod memory_store;
pub mod rest_store;
pub mod sqlite_store;

pub use capture_extractor::CaptureExtractor;
pub use config::{AppConfig, ConfigError, ConfigManager, StoreBackend};
pub use logging::{init_logging, init_logging_with_config, log_system_info};
pub use memory_store::MemoryRecordStore;
pub use rest_store::RestStoreClient;
pub use sqlite_store::SqliteRecordStore;
