//! Database models (SQLx).

pub mod backup;
pub mod node;
pub mod schedule;
pub mod setting;
