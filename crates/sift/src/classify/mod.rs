//! Pure classification helpers shared by every technique: the category
//! table, response extraction, and convergence scoring.

pub mod category;
pub mod extract;
pub mod score;

pub use category::{Category, definitions_block, keywords_for};
pub use extract::{Extraction, extract, extract_with_fallback};
pub use score::ConvergenceScorer;
