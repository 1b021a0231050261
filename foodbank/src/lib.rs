pub mod backup;
pub mod barcode;
pub mod cancel;
pub mod config;
pub mod db;
pub mod error;
pub mod import;
pub mod models;
pub mod store;
pub mod validation;

pub use backup::{Backup, CollectionCounts, ExportFile, ExportFormat};
pub use cancel::CancelFlag;
pub use config::Config;
pub use error::{FoodbankError, Result};
pub use import::{ImportOptions, ImportResult};
pub use models::ImportRow;
pub use store::Store;
pub use validation::ValidationResult;
