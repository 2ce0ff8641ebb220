mod builder;
mod metrics;
mod trainer;

pub use builder::{PrototypicalTrainer, TrainerBuilder};
pub use metrics::{EpochMetrics, LogSink, MetricsSink, RunningMetrics};
pub use trainer::{DegeneratePolicy, Trainer};
