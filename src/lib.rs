pub mod binance;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod input;
pub mod model;
pub mod sync;
