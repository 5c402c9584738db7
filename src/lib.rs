#[macro_use]
pub mod util;

pub mod instruction;
pub mod model;
pub mod parser;
