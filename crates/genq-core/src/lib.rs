//! genq core: a durable, leader-driven queue for long-running generative
//! image and video jobs.

pub mod artifact;
pub mod config;
pub mod control;
pub mod job;
pub mod lease;
pub mod logging;
pub mod pending_uploads;
pub mod provider;
pub mod scheduler;
pub mod state_db;
pub mod store;
pub mod sync;
