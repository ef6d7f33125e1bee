pub mod config;
pub mod filter;
pub mod output;
pub mod parser;
pub mod plot;
pub mod results;
pub mod scenario;
pub mod stats;
