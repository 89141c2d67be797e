pub mod backoff;
pub mod buffer;
pub mod fetcher;
pub mod stream;
pub mod supervisor;
pub mod window;

pub use buffer::{CandleBuffer, MergeOutcome, SymbolSeries};
pub use fetcher::HistoricalFetcher;
pub use stream::{ConnectionHandle, StreamConnector, StreamSink};
pub use supervisor::{StreamSupervisor, SupervisorSettings, SupervisorState, SwitchOutcome};
