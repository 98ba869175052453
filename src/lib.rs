pub mod config;
pub mod error;
pub mod models;
pub mod content;
pub mod search;
pub mod sync;
pub mod task;
pub mod state;

#[cfg(test)]
mod testing;

pub use error::{Result, SyncError};
