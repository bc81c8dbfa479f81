pub mod cache;
pub mod config;
pub mod io;
pub mod state;
pub mod validation;
