use super::solvers::OptimizationCallback;
use crate::error::Result;
use crate::types::{EvaluationRecord, ParameterVector};
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use tracing::info;

/// Append-only log of every residual evaluation of one calibration run.
///
/// Created with the run, written by the residual evaluator in call order and
/// frozen into a [`Trajectory`] when the run ends.
#[derive(Debug, Default)]
pub struct TrajectoryRecorder {
    records: Vec<EvaluationRecord>,
}

impl TrajectoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an evaluation and return its 1-based call index.
    pub fn record(&mut self, params: &[f64], loss: f64, feasible: bool) -> usize {
        let iteration = self.records.len() + 1;
        self.records.push(EvaluationRecord {
            iteration,
            params: params.to_vec(),
            loss,
            feasible,
        });
        iteration
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[EvaluationRecord] {
        &self.records
    }

    pub fn finish(self, param_names: Vec<String>) -> Trajectory {
        Trajectory {
            param_names,
            records: self.records,
        }
    }
}

/// Read-only trajectory handed out after a run for diagnostics and plotting.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Trajectory {
    param_names: Vec<String>,
    records: Vec<EvaluationRecord>,
}

impl Trajectory {
    pub fn param_names(&self) -> &[String] {
        &self.param_names
    }

    pub fn records(&self) -> &[EvaluationRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Lowest-loss record (first one on ties).
    pub fn best(&self) -> Option<&EvaluationRecord> {
        self.records
            .iter()
            .fold(None, |best: Option<&EvaluationRecord>, r| match best {
                Some(b) if b.loss <= r.loss => Some(b),
                _ => Some(r),
            })
    }

    /// Running minimum of the loss, one entry per record.
    pub fn best_so_far(&self) -> Vec<f64> {
        self.records
            .iter()
            .scan(f64::INFINITY, |best, r| {
                *best = best.min(r.loss);
                Some(*best)
            })
            .collect()
    }

    /// Write `iteration,<param names...>,loss,feasible` rows.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        let mut header = vec!["iteration".to_string()];
        header.extend(self.param_names.iter().cloned());
        header.push("loss".into());
        header.push("feasible".into());
        wtr.write_record(&header)?;

        for r in &self.records {
            let mut row = vec![r.iteration.to_string()];
            row.extend(r.params.iter().map(|p| p.to_string()));
            row.push(r.loss.to_string());
            row.push(r.feasible.to_string());
            wtr.write_record(&row)?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn save_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = std::fs::File::create(path)?;
        self.write_csv(std::io::BufWriter::new(file))
    }
}

/// Logs driver progress and keeps the best cost per iteration
pub struct ProgressCallback {
    param_names: Vec<String>,
    history: Vec<(ParameterVector, f64)>,
}

impl ProgressCallback {
    pub fn new(param_names: Vec<String>) -> Self {
        Self {
            param_names,
            history: Vec::new(),
        }
    }

    /// Best point after each iteration
    pub fn history(&self) -> &[(ParameterVector, f64)] {
        &self.history
    }

    fn format_params(&self, params: &[f64]) -> String {
        self.param_names
            .iter()
            .zip(params)
            .map(|(name, value)| format!("{}={:.6e}", name, value))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl OptimizationCallback for ProgressCallback {
    fn on_iteration(&mut self, iteration: u32, params: &[f64], cost: f64) -> Result<()> {
        info!(
            iteration,
            loss = cost,
            "Iter {:4}: {}",
            iteration,
            self.format_params(params)
        );
        self.history.push((params.to_vec(), cost));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_trajectory() -> Trajectory {
        let mut recorder = TrajectoryRecorder::new();
        recorder.record(&[2e-2, 1.1], 5.0, true);
        recorder.record(&[-1e-3, 1.0], 1e30, false);
        recorder.record(&[1.5e-2, 1.05], 2.0, true);
        recorder.record(&[1.8e-2, 1.02], 3.0, true);
        recorder.finish(vec!["trap_concentration".into(), "detrapping_energy".into()])
    }

    #[test]
    fn test_records_are_numbered_in_call_order() {
        let trajectory = sample_trajectory();
        let indices: Vec<usize> = trajectory.records().iter().map(|r| r.iteration).collect();
        assert_eq!(indices, vec![1, 2, 3, 4]);
        assert!(!trajectory.records()[1].feasible);
    }

    #[test]
    fn test_best_and_running_minimum() {
        let trajectory = sample_trajectory();
        assert_eq!(trajectory.best().unwrap().iteration, 3);
        assert_eq!(trajectory.best_so_far(), vec![5.0, 5.0, 2.0, 2.0]);
        assert!(Trajectory::default().best().is_none());
    }

    #[test]
    fn test_csv_columns_follow_parameter_names() {
        let mut buf = Vec::new();
        sample_trajectory().write_csv(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "iteration,trap_concentration,detrapping_energy,loss,feasible"
        );
        assert_eq!(lines.next().unwrap(), "1,0.02,1.1,5,true");
        assert_eq!(text.lines().count(), 5);
    }

    #[test]
    fn test_progress_callback_keeps_history() {
        let mut cb = ProgressCallback::new(vec!["a".into()]);
        cb.on_iteration(1, &[1.0], 3.0).unwrap();
        cb.on_iteration(2, &[0.5], 1.0).unwrap();
        assert_eq!(cb.history().len(), 2);
        assert_eq!(cb.history()[1], (vec![0.5], 1.0));
    }
}
