pub mod cancel;
pub mod domain;
pub mod pipeline;
pub mod reporting;
pub mod traits;
pub mod verdict;
