mod dws_reader;
mod parser;

pub use dws_reader::*;
pub use parser::*;
