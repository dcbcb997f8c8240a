//! Core domain model types for fanflow.
//!
//! This module contains the fundamental types shared by every component:
//! - Pipeline state and terminal result enums
//! - Fan-out work items

mod item;
mod status;

pub use item::WorkItem;
pub use status::{PipelineState, RunResult};
