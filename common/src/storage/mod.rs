pub mod db;
pub mod raw_data;
pub mod repository;
pub mod store;
pub mod types;
