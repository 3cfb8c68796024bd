//! Pipeline metrics
//!
//! Instruments are created through the [`Meter`] trait so pipelines can be
//! handed any metering backend; [`MetricsRegistry`] is the process-local one.

pub mod instruments;
pub mod registry;

pub use instruments::{Counter, Histogram, HistogramTimer, UpDownCounter, UpDownGuard};
pub use registry::{Meter, MetricsConfig, MetricsError, MetricsRegistry};
