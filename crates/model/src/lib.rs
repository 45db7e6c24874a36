#![deny(
    trivial_numeric_casts,
    missing_docs,
    unsafe_code,
    unused_import_braces,
    unused_qualifications,
    unused_extern_crates
)]
#![warn(rust_2021_compatibility, unreachable_pub)]

//! Shared data types for the edge pipeline core: the `Sample` produced by
//! collectors, the persisted row shapes for each table, and `RingSummary`.
//!
//! This crate has no I/O and no async: it is the vocabulary every other
//! crate in the workspace shares.

pub mod ring;
pub mod sample;

pub use ring::{DataCompletenessFlag, IndicatorStats, RingSummary};
pub use sample::{QualityFlag, Sample, SampleMetadata, Table};
