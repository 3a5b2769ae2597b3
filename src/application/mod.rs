//! Application services layer.

pub mod error;
pub mod generate;
pub mod jobs;
pub mod refresh;
