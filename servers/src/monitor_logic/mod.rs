pub mod config;
pub mod downstream;
pub mod error;
pub mod page;
pub mod state;
