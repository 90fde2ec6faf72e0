use crate::error::{CalibrationError, Result};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::Path;

/// Ordered physical parameters handed to the forward simulator,
/// e.g. `[trap_concentration, detrapping_energy]`.
pub type ParameterVector = Vec<f64>;

/// Sentinel loss returned for candidates outside the feasible region.
pub const INFEASIBLE_LOSS: f64 = 1e30;

// ===== PARAMETERS =====

/// One calibrated parameter: name, unit, starting value and admissible range.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(default)]
    pub unit: String,
    pub initial: f64,
    #[serde(default)]
    pub lower: f64,
    /// `None` leaves the parameter unbounded above
    #[serde(default)]
    pub upper: Option<f64>,
}

impl ParameterSpec {
    /// Non-negative parameter with no upper bound.
    pub fn new(name: impl Into<String>, unit: impl Into<String>, initial: f64) -> Self {
        Self {
            name: name.into(),
            unit: unit.into(),
            initial,
            lower: 0.0,
            upper: None,
        }
    }

    pub fn with_bounds(mut self, lower: f64, upper: f64) -> Self {
        self.lower = lower;
        self.upper = Some(upper);
        self
    }

    pub fn bounds(&self) -> (f64, f64) {
        (self.lower, self.upper.unwrap_or(f64::INFINITY))
    }
}

// ===== TIME SERIES =====

/// Samples `(time, value)` with strictly increasing, finite times.
#[derive(Clone, Debug, PartialEq)]
pub struct TimeSeries {
    times: Vec<f64>,
    values: Vec<f64>,
}

impl TimeSeries {
    pub fn new(times: Vec<f64>, values: Vec<f64>) -> Result<Self> {
        if times.len() != values.len() {
            return Err(CalibrationError::InvalidTimeSeries(format!(
                "{} times but {} values",
                times.len(),
                values.len()
            )));
        }
        if times.is_empty() {
            return Err(CalibrationError::InvalidTimeSeries("no samples".into()));
        }
        if let Some(i) = times.iter().position(|t| !t.is_finite()) {
            return Err(CalibrationError::InvalidTimeSeries(format!(
                "non-finite time at sample {}",
                i
            )));
        }
        if let Some(i) = values.iter().position(|v| !v.is_finite()) {
            return Err(CalibrationError::InvalidTimeSeries(format!(
                "non-finite value at t = {}",
                times[i]
            )));
        }
        if let Some(w) = times.windows(2).find(|w| w[1] <= w[0]) {
            return Err(CalibrationError::InvalidTimeSeries(format!(
                "times not strictly increasing: {} followed by {}",
                w[0], w[1]
            )));
        }
        Ok(Self { times, values })
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// First and last sample time.
    pub fn span(&self) -> (f64, f64) {
        (self.times[0], self.times[self.times.len() - 1])
    }

    pub fn max_abs(&self) -> f64 {
        self.values.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.times.iter().copied().zip(self.values.iter().copied())
    }

    pub(crate) fn into_parts(self) -> (Vec<f64>, Vec<f64>) {
        (self.times, self.values)
    }
}

// ===== REFERENCE DATASET =====

#[derive(Serialize, Deserialize)]
struct ReferenceRow {
    time: f64,
    value: f64,
}

/// Measured (or synthetic) curve the simulator is fitted against.
///
/// Stored as a two-column CSV table `time,value`. Floats are written in their
/// shortest round-trip form, so a dataset reloads bit-for-bit.
#[derive(Clone, Debug, PartialEq)]
pub struct ReferenceDataset {
    series: TimeSeries,
}

impl ReferenceDataset {
    pub fn new(series: TimeSeries) -> Self {
        Self { series }
    }

    pub fn series(&self) -> &TimeSeries {
        &self.series
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn write_to<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        for (time, value) in self.series.iter() {
            wtr.serialize(ReferenceRow { time, value })?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn read_from<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let mut times = Vec::new();
        let mut values = Vec::new();
        for row in rdr.deserialize() {
            let row: ReferenceRow = row?;
            times.push(row.time);
            values.push(row.value);
        }
        Ok(Self::new(TimeSeries::new(times, values)?))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = std::fs::File::create(path)?;
        self.write_to(std::io::BufWriter::new(file))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::read_from(std::io::BufReader::new(file))
    }
}

// ===== OPTIMIZATION BOOKKEEPING =====

/// One call to the residual evaluator, numbered in call order from 1.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub iteration: usize,
    pub params: ParameterVector,
    pub loss: f64,
    pub feasible: bool,
}

/// Simplex stopping rule: both spreads must fall below their tolerance.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceCriteria {
    /// Largest coordinate distance between any vertex and the best vertex
    pub xatol: f64,
    /// Largest loss difference between any vertex and the best vertex
    pub fatol: f64,
}

impl Default for ConvergenceCriteria {
    fn default() -> Self {
        Self {
            xatol: 1e-4,
            fatol: 1e-4,
        }
    }
}

impl ConvergenceCriteria {
    pub fn new(xatol: f64, fatol: f64) -> Self {
        Self { xatol, fatol }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, tol) in [("xatol", self.xatol), ("fatol", self.fatol)] {
            if !(tol.is_finite() && tol > 0.0) {
                return Err(CalibrationError::InvalidConfig(format!(
                    "{} must be finite and positive, got {}",
                    name, tol
                )));
            }
        }
        Ok(())
    }

    pub fn is_satisfied(&self, param_spread: f64, loss_spread: f64) -> bool {
        param_spread <= self.xatol && loss_spread <= self.fatol
    }
}

/// Why the driver stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    Converged,
    MaxEvaluations,
    MaxIterations,
}

impl Termination {
    pub fn is_converged(&self) -> bool {
        matches!(self, Self::Converged)
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Self::Converged => "converged",
            Self::MaxEvaluations => "evaluation cap reached",
            Self::MaxIterations => "iteration cap reached",
        }
    }
}

/// Outcome of a calibration run. Check `converged` before trusting `params`.
#[derive(Clone, Debug, Serialize)]
pub struct CalibrationResult {
    pub converged: bool,
    pub termination: Termination,
    pub params: ParameterVector,
    pub param_names: Vec<String>,
    pub loss: f64,
    pub iterations: u32,
    pub evaluations: usize,
    #[serde(skip)]
    pub trajectory: crate::optimization::Trajectory,
}

impl CalibrationResult {
    pub fn get_parameter(&self, name: &str) -> Option<f64> {
        self.param_names
            .iter()
            .position(|n| n == name)
            .map(|i| self.params[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_series_rejects_unsorted_times() {
        let err = TimeSeries::new(vec![0.0, 2.0, 1.0], vec![1.0, 2.0, 3.0]).unwrap_err();
        assert!(matches!(err, CalibrationError::InvalidTimeSeries(_)));
    }

    #[test]
    fn test_time_series_rejects_duplicate_times() {
        assert!(TimeSeries::new(vec![0.0, 1.0, 1.0], vec![1.0, 2.0, 3.0]).is_err());
    }

    #[test]
    fn test_time_series_rejects_length_mismatch_and_empty() {
        assert!(TimeSeries::new(vec![0.0, 1.0], vec![1.0]).is_err());
        assert!(TimeSeries::new(vec![], vec![]).is_err());
        assert!(TimeSeries::new(vec![0.0, 1.0], vec![1.0, f64::NAN]).is_err());
    }

    #[test]
    fn test_time_series_span_and_max_abs() {
        let ts = TimeSeries::new(vec![0.5, 1.0, 4.0], vec![1.0, -3.0, 2.0]).unwrap();
        assert_eq!(ts.span(), (0.5, 4.0));
        assert_eq!(ts.max_abs(), 3.0);
        assert_eq!(ts.len(), 3);
    }

    #[test]
    fn test_reference_dataset_csv_reload_is_exact() {
        let ts = TimeSeries::new(
            vec![0.01, 0.111, 1.2345678901234567],
            vec![1.5e19, -2.25e-7, 0.1 + 0.2],
        )
        .unwrap();
        let dataset = ReferenceDataset::new(ts);

        let mut buf = Vec::new();
        dataset.write_to(&mut buf).unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.starts_with("time,value\n"));

        let reloaded = ReferenceDataset::read_from(buf.as_slice()).unwrap();
        assert_eq!(reloaded, dataset);
    }

    #[test]
    fn test_reference_dataset_rejects_unsorted_file() {
        let text = "time,value\n1.0,2.0\n0.5,3.0\n";
        assert!(ReferenceDataset::read_from(text.as_bytes()).is_err());
    }

    #[test]
    fn test_convergence_criteria_validation() {
        assert!(ConvergenceCriteria::default().validate().is_ok());
        assert!(ConvergenceCriteria::new(0.0, 1.0).validate().is_err());
        assert!(ConvergenceCriteria::new(1e-3, f64::NAN).validate().is_err());
    }

    #[test]
    fn test_convergence_requires_both_tolerances() {
        let c = ConvergenceCriteria::new(1e-3, 1e-2);
        assert!(c.is_satisfied(1e-4, 1e-3));
        assert!(!c.is_satisfied(1e-2, 1e-3));
        assert!(!c.is_satisfied(1e-4, 1.0));
    }

    #[test]
    fn test_parameter_spec_bounds() {
        let p = ParameterSpec::new("detrapping_energy", "eV", 1.1).with_bounds(0.5, 2.0);
        assert_eq!(p.bounds(), (0.5, 2.0));
        let open = ParameterSpec::new("trap_concentration", "", 2e-2);
        assert_eq!(open.bounds(), (0.0, f64::INFINITY));
    }
}
