pub mod types;
pub mod config;
pub mod normalize;
pub mod processing;
pub mod data;
pub mod aggregate;
pub mod filter;
pub mod state;
pub mod icons;
pub mod render;
pub mod snapshot;
