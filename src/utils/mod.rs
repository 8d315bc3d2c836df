pub mod log_sanitizer;
pub mod text;
pub mod value;

pub use log_sanitizer::*;
