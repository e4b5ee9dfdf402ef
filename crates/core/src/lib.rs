//! Core crate for the snapgrid tiled super-resolution pipeline.

pub mod backend;
pub mod catalog;
pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod pipeline;
pub mod planner;
pub mod registry;
pub mod stitcher;
pub mod tensor;
pub mod types;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;
