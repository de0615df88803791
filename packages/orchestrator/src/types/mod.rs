//! Engine data types.

pub mod config;
pub mod ids;
pub mod job_state;
pub mod output;
pub mod phase;
pub mod result;
