//! Turn raw study material into styled HTML notes and typeset them for preview.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
