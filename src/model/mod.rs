pub mod candle;
pub mod subscription;
