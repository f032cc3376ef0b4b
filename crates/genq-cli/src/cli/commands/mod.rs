//! CLI command handlers, one file per command.

mod action;
mod artifacts;
mod describe;
mod enqueue;
mod generate;
mod pending;
mod run;
mod status;

pub use action::run_action;
pub use artifacts::{run_artifacts_delete, run_artifacts_list};
pub use describe::run_describe;
pub use enqueue::{run_image, run_video, ImageArgs, VideoArgs};
pub use pending::run_pending;
pub use run::run_scheduler;
pub use status::run_status;
