pub mod config;
pub mod db;
pub mod directory;
pub mod models;
pub mod notify;
pub mod quorum;
pub mod service;
pub mod tasks;
pub mod voting;
