pub mod archive;
pub mod cancel;
pub mod directory;
pub mod duration;
pub mod engine_lock;
pub mod log_sink;
pub mod progress;
