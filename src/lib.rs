#![deny(missing_docs)]

//! # quorum_tally
//!
//! **quorum_tally** counts votes over a pre-collected batch of proposals and
//! reports the first value whose identifier gathers a quorum.  It is a local,
//! deterministic fold, not a distributed agreement protocol: there is no
//! message passing, leader election or log replication here.
//!
//! ## Features
//!
//! * **Quorum aggregation**: [`aggregate`] and [`QuorumAggregator`] scan
//!   proposals in order, keep a per-call tally and stop at the proposal that
//!   brings its identifier to the threshold.
//! * **Incremental scans**: [`TallyScan`] yields a [`ScanStep`] per consumed
//!   proposal for callers that want partial results.
//! * **Sealed batches**: the [`batch`] module reads and writes a line-oriented
//!   record format protected by a BLAKE2b-256 digest.
//! * **Configuration**: [`AggregatorConfig`] loads JSON settings with
//!   environment overrides.
//!
//! ## Usage
//!
//! ```rust
//! use quorum_tally::{aggregate, Proposal};
//!
//! let votes = vec![
//!     Proposal::new(1, "A", 1_700_000_000_000),
//!     Proposal::new(2, "B", 1_700_000_000_010),
//!     Proposal::new(1, "A", 1_700_000_000_020),
//! ];
//! assert_eq!(aggregate(votes, 2).unwrap(), Some("A"));
//! ```

mod aggregator;
pub mod batch;
pub mod config;
mod io;
pub mod logging;
mod proposal;
mod scan;
mod tally;

pub use aggregator::{aggregate, aggregate_ref, Decision, Quorum, QuorumAggregator, QuorumError};
pub use batch::{
    batch_digest, parse_batch, read_batch_file, write_batch, write_batch_file, BatchDigest,
    BatchError, BatchOptions, ParsedBatch,
};
pub use config::{AggregatorConfig, ConfigError};
pub use io::write_lines;
pub use logging::{init_tracing, LogFormat};
pub use proposal::Proposal;
pub use scan::{ScanStep, TallyScan};
