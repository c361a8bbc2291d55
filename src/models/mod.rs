// src/models/mod.rs
pub mod payment;
pub mod ride;
pub mod user;

pub use payment::*;
pub use ride::*;
pub use user::*;
