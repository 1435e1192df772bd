use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::warn;

use crate::simulation::Simulation;

#[derive(Debug, Error)]
pub enum DataError {
    #[error("artefacto de resultados inválido: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(
        "los datos ya fueron normalizados con normalize_index={current} \
         y no se pueden normalizar de nuevo con normalize_index={requested}"
    )]
    AlreadyNormalized { current: usize, requested: usize },

    #[error("no hay una fuente en normalize_index={0}")]
    SourceIndex(usize),

    #[error("el espectro de la fuente es nulo en f={0:e}")]
    ZeroSpectrum(f64),

    #[error("el monitor '{0}' no tiene la misma cantidad de coordenadas y valores")]
    ShapeMismatch(String),

    #[error("no hay log guardado en los resultados")]
    NoLog,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Frequency,
    Time,
}

/// Datos de un monitor: una coordenada (frecuencia o tiempo) por valor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorData {
    pub domain: Domain,
    pub coords: Vec<f64>,
    pub values: Vec<f64>,
}

/// Resultados decodificados de una tarea, junto con la simulación que los
/// produjo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub simulation: Simulation,
    pub monitor_data: BTreeMap<String, MonitorData>,
    #[serde(default)]
    pub log: Option<String>,
    #[serde(default)]
    pub diverged: bool,
    /// Índice de la fuente con la que se normalizó; `None` si no se normalizó
    #[serde(default)]
    pub normalize_index: Option<usize>,
}

impl SimulationResult {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DataError> {
        let result: SimulationResult = serde_json::from_slice(bytes)?;
        for (name, data) in &result.monitor_data {
            if data.coords.len() != data.values.len() {
                return Err(DataError::ShapeMismatch(name.clone()));
            }
        }
        Ok(result)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, DataError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn is_normalized(&self) -> bool {
        self.normalize_index.is_some()
    }

    pub fn get(&self, monitor_name: &str) -> Option<&MonitorData> {
        self.monitor_data.get(monitor_name)
    }

    /// Devuelve una copia con los datos en frecuencia divididos por el
    /// espectro de amplitud de `simulation.sources[normalize_index]`.
    pub fn normalize(&self, normalize_index: Option<usize>) -> Result<Self, DataError> {
        let mut out = self.clone();

        let Some(index) = normalize_index else {
            return Ok(out);
        };

        if let Some(current) = self.normalize_index {
            if current != index {
                return Err(DataError::AlreadyNormalized {
                    current,
                    requested: index,
                });
            }
            return Ok(out);
        }

        if self.simulation.sources.is_empty() {
            warn!(
                "normalize_index={} pero la simulación no tiene fuentes, no se normaliza",
                index
            );
            return Ok(out);
        }

        let source = self
            .simulation
            .sources
            .get(index)
            .ok_or(DataError::SourceIndex(index))?;
        let pulse = &source.source_time;

        for data in out.monitor_data.values_mut() {
            if data.domain != Domain::Frequency {
                continue;
            }
            for (freq, value) in data.coords.iter().zip(data.values.iter_mut()) {
                let amp = pulse.spectrum_amplitude(*freq);
                if amp <= f64::MIN_POSITIVE {
                    return Err(DataError::ZeroSpectrum(*freq));
                }
                *value /= amp;
            }
        }

        out.normalize_index = Some(index);
        Ok(out)
    }

    /// Valor del decaimiento del campo en el último paso registrado en el log.
    pub fn final_decay_value(&self) -> Result<f64, DataError> {
        let log = self.log.as_deref().filter(|l| !l.is_empty()).ok_or(DataError::NoLog)?;
        let last = log
            .lines()
            .filter_map(|line| line.split("field decay: ").nth(1))
            .last();
        Ok(last
            .and_then(|v| v.trim().parse::<f64>().ok())
            .unwrap_or(1.0))
    }
}
