pub mod cursor;
pub mod queries;
pub mod record;
pub mod sqlite;
pub mod worker;
