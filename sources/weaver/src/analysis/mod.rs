mod analyzer;
mod types;

pub use analyzer::{Analysis, Analyzer};
pub use types::{AbstractFrame, AbstractType};
