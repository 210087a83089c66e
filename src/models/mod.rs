pub mod backup_directory;
pub mod config;
pub mod config_validator;
pub mod error;
pub mod file_record;
pub mod history_entry;
