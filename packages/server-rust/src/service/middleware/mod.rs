//! Tower middleware layers for the exchange pipeline.

pub mod load_shed;
pub mod metrics;
pub mod pipeline;

pub use load_shed::{LoadShedLayer, LoadShedService};
pub use metrics::{MetricsLayer, MetricsService};
pub use pipeline::{build_exchange_pipeline, ExchangePipeline};
