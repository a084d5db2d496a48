//! Language-aware text post-processing.

mod clean;

pub use clean::{CleaningPolicy, clean_text};
