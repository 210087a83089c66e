pub mod backup;
pub mod copy;
pub mod directories;
pub mod scheduler;
