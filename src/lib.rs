pub mod commands;
pub mod connection;
pub mod db;
pub mod engine;
pub mod entity;
pub mod locks;
pub mod reply;
pub mod snapshot;
pub mod timewheel;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Result<T> = std::result::Result<T, Error>;
