// dca_core/src/lib.rs

pub mod genes;
pub mod utils;
pub mod engine;
pub mod settings;
pub mod indicators;
pub mod performance;
pub mod walk_forward;
pub mod data_handler;
pub mod optimization;
pub mod combinations;
