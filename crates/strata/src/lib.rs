//! Strata - Layered memory for AI agents
//!
//! Memories live in five layers (sensory, working, episodic, semantic and
//! reflective), each with its own admission, eviction and decay rules.
//! Retrieval runs several independent search strategies concurrently and
//! fuses their rankings, so losing one backend narrows results instead of
//! failing the query.

pub mod cache;
pub mod clock;
pub mod config;
pub mod embedding;
pub mod error;
pub mod layers;
pub mod math;
pub mod memory;
pub mod rerank;
pub mod search;
pub mod storage;
pub mod telemetry;
pub mod testing;

pub use config::Config;
pub use error::{Result, StrataError};
