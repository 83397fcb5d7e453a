pub mod anomaly;
pub mod graph;
pub mod log_anomaly;
pub mod query;
pub mod stats;
pub mod timeseries;
pub mod trace_anomaly;

pub use anomaly::{
    AnomalyDetectionResult, DetectorConfig, HybridAnomalyDetector, MetricAnomalyDetector,
};
pub use graph::{DependencyAnalysis, ServiceDependencyAnalyzer};
pub use log_anomaly::{LogAnomalyDetector, LogAnomalyOptions, LogAnomalyResult};
pub use query::MetricQuery;
pub use stats::Summary;
pub use timeseries::{AnalysisOptions, TimeSeriesAnalysisResult, TimeSeriesAnalyzer};
pub use trace_anomaly::{TraceAnomalyDetector, TraceAnomalyOptions, TraceAnomalyResult};
