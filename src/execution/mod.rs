pub mod persistence;
pub mod pipeline;
