//! 作业存储实现
//!
//! - [`MemoryJobStore`]: 进程内存储，一把粗粒度互斥锁保护全部状态，
//!   适用于嵌入式单节点部署。
//! - [`PostgresJobStore`]: 基于 sqlx 的关系型存储，通过
//!   `SELECT ... FOR UPDATE` 行锁实现 TRIGGER_ACCESS / STATE_ACCESS
//!   两把命名锁，支持多节点集群部署。

pub mod memory;
pub mod migrations;
pub mod postgres;

#[cfg(test)]
mod memory_tests;

pub use memory::MemoryJobStore;
pub use postgres::PostgresJobStore;
