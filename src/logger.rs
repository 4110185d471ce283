//! CSV trace of closed-loop runs.
use crate::SimulationError;

use nalgebra::DVector;
use std::fs::File;
use std::path::Path;

/// Writes one row per control step: time, tracked position, target, applied action and reward
/// # Example
/// ```
/// use nalgebra::DVector;
/// use quad_mppi::logger::TraceLogger;
/// let dir = std::env::temp_dir().join("quad_mppi_trace_doc.csv");
/// let mut trace = TraceLogger::new(&dir, 2, 2).unwrap();
/// let position = DVector::from_vec(vec![0.0, 1.0]);
/// trace.log_step(0.0, &position, &position, &DVector::zeros(2), 0.9).unwrap();
/// trace.flush().unwrap();
/// ```
pub struct TraceLogger {
    writer: csv::Writer<File>,
    position_dim: usize,
    action_dim: usize,
}

impl TraceLogger {
    /// Creates the file at `path` and writes the header
    /// # Errors
    /// * If the file cannot be created or written
    pub fn new<P: AsRef<Path>>(
        path: P,
        position_dim: usize,
        action_dim: usize,
    ) -> Result<Self, SimulationError> {
        let mut writer = csv::Writer::from_path(path)?;
        let mut header = vec!["time".to_string()];
        header.extend((0..position_dim).map(|i| format!("position_{i}")));
        header.extend((0..position_dim).map(|i| format!("target_{i}")));
        header.extend((0..action_dim).map(|i| format!("action_{i}")));
        header.push("reward".to_string());
        writer.write_record(&header)?;
        Ok(Self {
            writer,
            position_dim,
            action_dim,
        })
    }

    /// Appends one step
    /// # Errors
    /// * If a vector does not match the header, or the row cannot be written
    pub fn log_step(
        &mut self,
        time: f32,
        position: &DVector<f32>,
        target: &DVector<f32>,
        action: &DVector<f32>,
        reward: f32,
    ) -> Result<(), SimulationError> {
        if position.len() != self.position_dim
            || target.len() != self.position_dim
            || action.len() != self.action_dim
        {
            return Err(SimulationError::DimensionMismatch(format!(
                "trace expects {} position and {} action components",
                self.position_dim, self.action_dim
            )));
        }
        let record: Vec<String> = std::iter::once(time)
            .chain(position.iter().copied())
            .chain(target.iter().copied())
            .chain(action.iter().copied())
            .chain(std::iter::once(reward))
            .map(|value| value.to_string())
            .collect();
        self.writer.write_record(&record)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), SimulationError> {
        self.writer.flush()?;
        Ok(())
    }
}
