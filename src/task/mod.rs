pub mod types;
pub mod models;
pub mod manager;

pub use types::*;
pub use models::*;
pub use manager::*;
