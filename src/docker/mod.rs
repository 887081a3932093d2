pub mod parser;

pub use parser::{final_base_image, parse_stages, Stage};
