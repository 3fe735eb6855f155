#![forbid(unsafe_code)]

pub mod accumulator;
pub mod error;

pub use accumulator::{
    accumulate, accumulate_each, AccumulateOptions, Accumulation, AccumulationReport, Accumulator, Reference,
};
pub use error::AccumulationError;
