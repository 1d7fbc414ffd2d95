/// Stand-in implementations of core traits for tests and local runs
/// without a compiler.
pub mod executor;
