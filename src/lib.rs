pub mod models;
pub mod repo;
pub mod service;
pub mod utils;
