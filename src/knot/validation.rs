use thiserror::Error;

use super::entities::{Config, Data};

/// Why a config or data batch was turned down. A rejected batch is skipped
/// as a whole; nothing is partially applied.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("batch is empty")]
    Empty,
    #[error("sensor {0} repeated in consecutive entries")]
    RepeatedSensor(i32),
    #[error("sensor {0} reading has no timestamp")]
    MissingTimestamp(i32),
    #[error("sensor {0} reading has no value")]
    MissingValue(i32),
}

pub fn check_config(config: &[Config]) -> Result<(), ValidationError> {
    check_sensor_ids(config.iter().map(|c| c.sensor_id))
}

pub fn check_data(data: &[Data]) -> Result<(), ValidationError> {
    check_sensor_ids(data.iter().map(|d| d.sensor_id))?;
    for reading in data {
        if reading.timestamp.is_none() {
            return Err(ValidationError::MissingTimestamp(reading.sensor_id));
        }
        if reading.value.is_none() {
            return Err(ValidationError::MissingValue(reading.sensor_id));
        }
    }
    Ok(())
}

// Only neighbours are compared; ids need not be sorted
fn check_sensor_ids(ids: impl Iterator<Item = i32>) -> Result<(), ValidationError> {
    let mut last = None;
    for id in ids {
        if last == Some(id) {
            return Err(ValidationError::RepeatedSensor(id));
        }
        last = Some(id);
    }
    match last {
        Some(_) => Ok(()),
        None => Err(ValidationError::Empty),
    }
}
