pub mod arma;
pub mod engine;
pub mod normalizer;
pub mod optimizer;
pub mod types;
