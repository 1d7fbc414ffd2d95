pub mod dataset;
pub mod executor;
