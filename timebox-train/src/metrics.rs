//! Training metrics tracking.

use serde::{Deserialize, Serialize};

/// Loss history of a run, one entry per completed epoch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub epochs_completed: usize,
    /// Mean batch loss of each epoch.
    pub loss_history: Vec<f64>,
    pub best_epoch: Option<usize>,
    pub best_loss: Option<f64>,
    pub total_training_time_secs: f64,
}

impl TrainingMetrics {
    /// Record an epoch from its batch losses. An epoch with no batches is not recorded.
    pub fn record_epoch(&mut self, batch_losses: &[f64]) {
        if batch_losses.is_empty() {
            return;
        }
        let loss = batch_losses.iter().sum::<f64>() / batch_losses.len() as f64;
        self.loss_history.push(loss);
        self.epochs_completed += 1;

        if self.best_loss.is_none_or(|best| loss < best) {
            self.best_loss = Some(loss);
            self.best_epoch = Some(self.epochs_completed);
        }
    }

    pub fn last_loss(&self) -> Option<f64> {
        self.loss_history.last().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_epoch_tracks_best() {
        let mut metrics = TrainingMetrics::default();
        metrics.record_epoch(&[0.6, 0.4]);
        metrics.record_epoch(&[0.3, 0.3]);
        metrics.record_epoch(&[0.5]);
        assert_eq!(metrics.epochs_completed, 3);
        assert_eq!(metrics.best_epoch, Some(2));
        assert_eq!(metrics.best_loss, Some(0.3));
        assert_eq!(metrics.last_loss(), Some(0.5));
    }

    #[test]
    fn test_empty_epoch_ignored() {
        let mut metrics = TrainingMetrics::default();
        metrics.record_epoch(&[]);
        assert_eq!(metrics.epochs_completed, 0);
        assert!(metrics.best_loss.is_none());
    }
}
