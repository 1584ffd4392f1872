pub mod error;
pub mod gateway;
pub mod notes;
pub mod render;
