use log::info;

use crate::arch::loss::EpisodeStats;

/// Sample-weighted running means of the loss and the accuracy over an epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningMetrics {
    loss_sum: f64,
    correct_sum: f64,
    samples: usize,
    batches: usize,
    skipped: usize,
}

impl RunningMetrics {
    /// Creates a new, empty `RunningMetrics`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accounts for the stats of a batch of `samples` samples.
    pub fn record(&mut self, stats: EpisodeStats, samples: usize) {
        self.loss_sum += stats.loss as f64 * samples as f64;
        self.correct_sum += stats.accuracy as f64 * samples as f64;
        self.samples += samples;
        self.batches += 1;
    }

    /// Accounts for a batch that didn't contribute.
    pub fn skip(&mut self) {
        self.skipped += 1;
    }

    /// The mean loss per sample, `NaN` if no sample contributed.
    pub fn loss(&self) -> f32 {
        self.mean(self.loss_sum)
    }

    /// The mean accuracy per sample, `NaN` if no sample contributed.
    pub fn accuracy(&self) -> f32 {
        self.mean(self.correct_sum)
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    pub fn batches(&self) -> usize {
        self.batches
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn mean(&self, sum: f64) -> f32 {
        if self.samples == 0 {
            return f32::NAN;
        }

        (sum / self.samples as f64) as f32
    }
}

/// The aggregate metrics of one epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub train_loss: f32,
    pub train_acc: f32,
    pub test_loss: f32,
    pub test_acc: f32,
    /// The training batches that were skipped for holding a single class.
    pub skipped_batches: usize,
}

/// Receives the metrics of every finished epoch.
pub trait MetricsSink {
    fn record(&mut self, metrics: &EpochMetrics);
}

/// Writes every epoch's metrics to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl MetricsSink for LogSink {
    fn record(&mut self, m: &EpochMetrics) {
        info!(
            "epoch {}: train_loss={:.4} train_acc={:.4} test_loss={:.4} test_acc={:.4} skipped={}",
            m.epoch, m.train_loss, m.train_acc, m.test_loss, m.test_acc, m.skipped_batches
        );
    }
}

impl MetricsSink for Vec<EpochMetrics> {
    fn record(&mut self, metrics: &EpochMetrics) {
        self.push(*metrics);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(loss: f32, accuracy: f32) -> EpisodeStats {
        EpisodeStats {
            loss,
            accuracy,
            classes: 2,
        }
    }

    #[test]
    fn means_are_weighted_by_samples() {
        let mut running = RunningMetrics::new();
        running.record(stats(1., 1.), 3);
        running.record(stats(3., 0.), 1);
        running.skip();

        assert_eq!(running.loss(), 1.5);
        assert_eq!(running.accuracy(), 0.75);
        assert_eq!(running.samples(), 4);
        assert_eq!(running.batches(), 2);
        assert_eq!(running.skipped(), 1);
    }

    #[test]
    fn empty_metrics_are_nan() {
        let running = RunningMetrics::new();
        assert!(running.loss().is_nan());
        assert!(running.accuracy().is_nan());
    }
}
