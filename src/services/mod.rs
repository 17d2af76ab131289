//! Upload coordination: legs, the join, persistence and the catalog handoff

pub mod catalog;
pub mod cloud_drive;
pub mod coordinator;
pub mod finalization;
pub mod leg;
pub mod legs;
pub mod object_store;
pub mod persistence_observer;
pub mod task_registry;
pub mod task_store;
pub mod upload_waiter;
pub mod worker_pool;

#[cfg(test)]
mod test_http;
