//! Chronycle - in-process HTTP traffic recorder
//!
//! Decides per request whether to record, captures the request/response
//! pair, and ships it to a remote collector without ever affecting the
//! host application's response.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::cargo)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::multiple_crate_versions
)]

pub mod adapter;
pub mod capture;
pub mod config;
pub mod error;
pub mod filter;
pub mod normalize;
pub mod recorder;

pub use adapter::{AdapterKind, FrameworkAdapter, RecordingHook, RecordingLayer};
pub use capture::{ResponseCapture, ResponseDescriptor};
pub use config::{Pattern, RecorderConfig};
pub use error::{ChronycleError, Result};
pub use filter::{should_record, Decision, FilterPolicy};
pub use normalize::{normalize, RawRequest, RequestDescriptor, RequestParts};
pub use recorder::{DeliveryState, HttpSink, Record, Recorder, Sink};
