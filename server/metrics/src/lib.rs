pub mod config;
pub mod control;
pub mod gateway;
pub mod http;
pub mod labels;
pub mod routing;
pub mod tracker;

pub use config::MetricsConfig;
pub use http::MetricsServer;
pub use labels::{BoundedLabel, LabelPolicy};
