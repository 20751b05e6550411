//! Offline trainers for the three ensemble members.
//!
//! Every program reads a class-per-directory image tree, trains one of the
//! networks defined in the backend and writes an artifact the server loads
//! unchanged.

pub mod augment;
pub mod dataset;
pub mod dbn;
pub mod eval;
pub mod export;

pub use augment::Augmenter;
pub use dataset::{Batch, DatasetError, ImageFolder};

/// Seed used for every random choice made during training.
pub const SEED: u64 = 42;

/// Initializes logging for a trainer binary, defaulting to `info`.
pub fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}
