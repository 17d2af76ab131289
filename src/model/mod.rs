//! This module provides the plain data shared by the upload legs, the aggregator and observers

pub mod error;
pub mod events;
pub mod leg;
pub mod package;
pub mod progress_budget;
pub mod task_id;
pub mod task_record;
pub mod task_status;
pub mod transfer_progress;
