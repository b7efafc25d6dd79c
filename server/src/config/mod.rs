//! Configuration

pub mod settings;
pub mod value;
