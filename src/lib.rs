pub mod api;
pub mod collection;
pub mod config;
pub mod db;
pub mod error;
pub mod source;
pub mod status;
pub mod store;
pub mod systems;
