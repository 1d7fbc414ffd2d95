pub mod case_running;
pub mod validating;
