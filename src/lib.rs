#![doc = include_str!("../README.md")]

pub mod assoc;
pub mod cli;
pub mod dataset;
pub mod figures;
pub mod filter;
pub mod manifest;
pub mod pipeline;
pub mod plink;
pub mod report;
pub mod samples;
pub mod table;
pub mod variants;

pub use dataset::{Dataset, SampleId, VariantId};
pub use figures::{Figure, FigureBook};
pub use manifest::FailureSet;
pub use pipeline::{run, QcAxis, QcConfig, RunSummary};
pub use plink::{PlinkOp, PlinkRunner};
