//! Convolutional state encoder for time-embedded market windows.
mod base;
mod config;
pub use base::Cnn1d;
pub use config::Cnn1dConfig;
