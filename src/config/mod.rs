// src/config/mod.rs
pub mod groups;
pub mod settings;

pub use groups::GroupStore;
pub use settings::Settings;
