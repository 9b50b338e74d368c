//! Business logic services.

pub mod archive_service;
pub mod backup_service;
pub mod node_service;
pub mod notification_service;
pub mod scheduler_service;
pub mod storage_service;
pub mod workload_service;
