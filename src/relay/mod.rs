//! Relay pipeline - per-direction discovery, verification, and submission
//!
//! One [`ChainWatcher`](watcher::ChainWatcher) per direction drives candidate
//! events through the [`EventVerifier`](verifier::EventVerifier) and the
//! [`SubmissionExecutor`](executor::SubmissionExecutor), advancing its
//! watermark only once a whole block range has resolved.

pub mod executor;
pub mod verifier;
pub mod watcher;

pub use executor::{SubmissionExecutor, SubmissionOutcome};
pub use verifier::{DropReason, EventVerifier, Verdict};
pub use watcher::{ChainWatcher, Scan, WatcherTiming};
