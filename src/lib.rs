pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod history;
pub mod ingest;
pub mod projects;
pub mod registry;
pub mod service;
pub mod store;
pub mod telemetry;

pub use error::{CoreError, CoreResult};
pub use history::HistoryOptions;
pub use ingest::{IngestOptions, IngestOutcome};
pub use service::MeasurementService;
pub use telemetry::{Measurement, MeasurementBatch, MetricResult};
