//! Cache layers sitting at the front of the pipeline.

pub mod entry;
pub mod manager;
pub mod preemptive;
pub mod state;
