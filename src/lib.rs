pub mod errors;
pub mod handlers;
pub mod models;
pub mod services;
pub mod state;
pub mod store;
pub mod utils;

#[cfg(test)]
mod test_helpers;

// Re-export commonly used types
pub use errors::{SparrowError, SparrowResult, ValidationError};
pub use state::{AppConfig, AppState};
