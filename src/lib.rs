pub mod core;
pub mod utils;
