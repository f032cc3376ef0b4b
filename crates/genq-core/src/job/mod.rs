//! Job model: the unit of work tracked from enqueue until removal.

mod id;
mod types;

pub use id::{JobId, TabId};
pub use types::*;
