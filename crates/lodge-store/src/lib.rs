pub mod config;
pub mod file_sink;

pub use config::StoreConfig;
pub use file_sink::{FileSink, INPUT_FILE};
