//! Engine module housing the pipeline orchestration.
//!
//! `offline` replays a source deterministically on the calling thread;
//! `core` runs the producer and detection cycle on their own threads.

pub mod core;
pub mod offline;

pub use core::{EngineStats, EngineSummary, MeaEngine, ParamPatch};
pub use offline::{check_source, OfflineRunner, RunReport};
