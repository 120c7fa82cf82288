pub mod audit;
pub mod config;
pub mod db;
pub mod error;
pub mod forms;
pub mod models;
pub mod predict;
pub mod rbac;
pub mod report;
pub mod session;
pub mod upload;
