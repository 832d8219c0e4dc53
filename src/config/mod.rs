// src/config/mod.rs
pub mod ai;
pub mod poster;

pub use ai::AiConfig;
pub use poster::{PosterConfig, Tunables, TunablesPatch, MAX_LOOKBACK_DAYS};
