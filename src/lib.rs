pub mod config;
pub mod debounce;
pub mod error;
pub mod gui;
pub mod logging;
pub mod markdown;
pub mod ollama;
pub mod registry;
pub mod transcript;
