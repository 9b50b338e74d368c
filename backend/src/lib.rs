//! Volume Keeper - Backend Library
//!
//! Backs up volumes on remote nodes over SSH into local, S3 or SFTP storage,
//! with safe stop/start of live servers and cron schedules with retention.

#[macro_use]
mod macros;

pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod remote;
pub mod services;
pub mod storage;
pub mod store;
pub mod telemetry;

pub use config::Config;
pub use error::{AppError, Result};
