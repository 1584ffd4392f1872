pub mod credentials;
pub mod error;
pub mod input;
pub(crate) mod lock;
pub mod telemetry;
