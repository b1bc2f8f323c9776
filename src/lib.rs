pub mod batch;
pub mod bow;
pub mod classifier;
pub mod classify;
pub mod cli;
pub mod config;
pub mod dataset;
pub mod decision;
pub mod descriptor;
pub mod error;
pub mod index;
pub mod kmeans;
pub mod report;
pub mod utils;
pub mod vote;

pub use config::Opts;
pub use error::{Error, Result};
