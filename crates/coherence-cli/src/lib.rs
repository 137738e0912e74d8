//! Simulation driver for the coherence crates
//!
//! Runs a fleet of in-process service instances against one shared store and
//! reports whether any interlocked update was lost.
//!
//! ```rust
//! use coherence_cli::{SimConfig, simulation};
//!
//! # async fn example() -> Result<(), coherence_cli::SimError> {
//! let config = SimConfig {
//!     workers: 2,
//!     updates_per_worker: 3,
//!     ..SimConfig::default()
//! };
//! let report = simulation::run(&config).await?;
//! assert_eq!(report.lost_updates, 0);
//! # Ok(())
//! # }
//! ```

#![allow(missing_docs)]

pub mod config;
pub mod error;
pub mod simulation;

pub use config::SimConfig;
pub use error::SimError;
pub use simulation::{SimReport, Tally};
