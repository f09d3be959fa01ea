pub mod access;
pub mod board;
pub mod config;
pub mod errors;
pub mod logging;
pub mod ordering;
