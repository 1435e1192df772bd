use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Velocidad de la luz en µm/s (las longitudes van en micrómetros).
pub const C_0: f64 = 2.997_924_58e14;

pub const MAX_GRID_CELLS: f64 = 20e9;
pub const MAX_TIME_STEPS: f64 = 1e8;
pub const MAX_CELLS_TIMES_STEPS: f64 = 1e17;
pub const MAX_NUM_MEDIUMS: usize = 200;

/// Factor de estabilidad de Courant usado para calcular `dt`.
const COURANT: f64 = 0.99;

pub type Coordinate = [f64; 3];

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("`{field}` debe ser estrictamente positivo (vale {value})")]
    NotPositive { field: String, value: f64 },

    #[error("nombre repetido en {kind}: '{name}'")]
    DuplicateName { kind: &'static str, name: String },

    #[error("{kind} '{name}' queda fuera de los límites de la simulación")]
    OutOfBounds { kind: &'static str, name: String },

    #[error("el monitor '{0}' no tiene frecuencias positivas")]
    NoFrequencies(String),

    #[error("la estructura {index} tiene permitividad {value} < 1")]
    Permittivity { index: usize, value: f64 },

    #[error("la simulación tiene {count} medios distintos, el máximo es {max}")]
    TooManyMediums { count: usize, max: usize },

    #[error("{what}: {value:.2e}, el máximo permitido es {max:.2e}")]
    TooLarge { what: &'static str, value: f64, max: f64 },
}

/// Pulso gaussiano que modula la amplitud de una fuente.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaussianPulse {
    pub freq0: f64,
    pub fwidth: f64,
    #[serde(default = "default_amplitude")]
    pub amplitude: f64,
    #[serde(default)]
    pub phase: f64,
}

fn default_amplitude() -> f64 {
    1.0
}

impl GaussianPulse {
    /// Amplitud del espectro del pulso en la frecuencia `freq`.
    pub fn spectrum_amplitude(&self, freq: f64) -> f64 {
        let x = (freq - self.freq0) / self.fwidth;
        self.amplitude.abs() * (-0.5 * x * x).exp()
    }

    /// Rango de frecuencias con contenido apreciable (±4 anchos).
    pub fn frequency_range(&self) -> (f64, f64) {
        (self.freq0 - 4.0 * self.fwidth, self.freq0 + 4.0 * self.fwidth)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Polarization {
    Ex,
    Ey,
    Ez,
    Hx,
    Hy,
    Hz,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "+")]
    Plus,
    #[serde(rename = "-")]
    Minus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SourceKind {
    PointDipole { polarization: Polarization },
    PlaneWave { direction: Direction, polarization: Polarization },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub name: String,
    pub center: Coordinate,
    #[serde(default)]
    pub size: Coordinate,
    pub source_time: GaussianPulse,
    pub kind: SourceKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Monitor {
    Field {
        name: String,
        center: Coordinate,
        size: Coordinate,
        freqs: Vec<f64>,
    },
    FieldTime {
        name: String,
        center: Coordinate,
        size: Coordinate,
    },
    Flux {
        name: String,
        center: Coordinate,
        size: Coordinate,
        freqs: Vec<f64>,
    },
}

impl Monitor {
    pub fn name(&self) -> &str {
        match self {
            Monitor::Field { name, .. }
            | Monitor::FieldTime { name, .. }
            | Monitor::Flux { name, .. } => name,
        }
    }

    pub fn center(&self) -> Coordinate {
        match self {
            Monitor::Field { center, .. }
            | Monitor::FieldTime { center, .. }
            | Monitor::Flux { center, .. } => *center,
        }
    }

    /// Frecuencias registradas; `None` para monitores en el dominio del tiempo.
    pub fn freqs(&self) -> Option<&[f64]> {
        match self {
            Monitor::Field { freqs, .. } | Monitor::Flux { freqs, .. } => Some(freqs),
            Monitor::FieldTime { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Structure {
    #[serde(default)]
    pub name: Option<String>,
    pub center: Coordinate,
    pub size: Coordinate,
    pub permittivity: f64,
}

/// Especificación completa de una simulación FDTD. Es configuración
/// estática: no tiene comportamiento más allá de `validate()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Simulation {
    #[serde(default)]
    pub center: Coordinate,
    pub size: Coordinate,
    pub grid_size: Coordinate,
    pub run_time: f64,
    #[serde(default)]
    pub structures: Vec<Structure>,
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub monitors: Vec<Monitor>,
}

impl Simulation {
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Codificación canónica que se sube al servicio.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn num_cells(&self) -> f64 {
        (0..3)
            .map(|axis| (self.size[axis] / self.grid_size[axis]).ceil().max(1.0))
            .product()
    }

    /// Paso de tiempo según la condición de Courant.
    pub fn dt(&self) -> f64 {
        let inv: f64 = self.grid_size.iter().map(|dl| 1.0 / (dl * dl)).sum();
        COURANT / (C_0 * inv.sqrt())
    }

    pub fn num_time_steps(&self) -> f64 {
        (self.run_time / self.dt()).ceil()
    }

    fn contains(&self, point: &Coordinate) -> bool {
        (0..3).all(|axis| {
            let half = self.size[axis] / 2.0;
            let rel = point[axis] - self.center[axis];
            rel >= -half && rel <= half
        })
    }

    /// Validación completa; se ejecuta antes de cualquier upload.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for axis in 0..3 {
            positive(&format!("size[{axis}]"), self.size[axis])?;
            positive(&format!("grid_size[{axis}]"), self.grid_size[axis])?;
        }
        positive("run_time", self.run_time)?;

        let mut mediums: Vec<f64> = Vec::new();
        for (index, s) in self.structures.iter().enumerate() {
            if !(s.permittivity >= 1.0) {
                return Err(ValidationError::Permittivity {
                    index,
                    value: s.permittivity,
                });
            }
            if !mediums.contains(&s.permittivity) {
                mediums.push(s.permittivity);
            }
        }
        if mediums.len() > MAX_NUM_MEDIUMS {
            return Err(ValidationError::TooManyMediums {
                count: mediums.len(),
                max: MAX_NUM_MEDIUMS,
            });
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            if !seen.insert(source.name.as_str()) {
                return Err(ValidationError::DuplicateName {
                    kind: "sources",
                    name: source.name.clone(),
                });
            }
            positive(&format!("{}.freq0", source.name), source.source_time.freq0)?;
            positive(&format!("{}.fwidth", source.name), source.source_time.fwidth)?;
            if !self.contains(&source.center) {
                return Err(ValidationError::OutOfBounds {
                    kind: "la fuente",
                    name: source.name.clone(),
                });
            }
        }

        let mut seen = HashSet::new();
        for monitor in &self.monitors {
            if !seen.insert(monitor.name()) {
                return Err(ValidationError::DuplicateName {
                    kind: "monitors",
                    name: monitor.name().to_string(),
                });
            }
            if !self.contains(&monitor.center()) {
                return Err(ValidationError::OutOfBounds {
                    kind: "el monitor",
                    name: monitor.name().to_string(),
                });
            }
            if let Some(freqs) = monitor.freqs() {
                if !freqs.iter().any(|f| *f > 0.0) {
                    return Err(ValidationError::NoFrequencies(monitor.name().to_string()));
                }
            }
        }

        self.validate_size()
    }

    /// Límites de tamaño que impone el servicio antes de aceptar la tarea.
    fn validate_size(&self) -> Result<(), ValidationError> {
        let cells = self.num_cells();
        if cells > MAX_GRID_CELLS {
            return Err(ValidationError::TooLarge {
                what: "celdas de la grilla",
                value: cells,
                max: MAX_GRID_CELLS,
            });
        }

        let steps = self.num_time_steps();
        if steps > MAX_TIME_STEPS {
            return Err(ValidationError::TooLarge {
                what: "pasos de tiempo",
                value: steps,
                max: MAX_TIME_STEPS,
            });
        }

        if cells * steps > MAX_CELLS_TIMES_STEPS {
            return Err(ValidationError::TooLarge {
                what: "celdas * pasos de tiempo",
                value: cells * steps,
                max: MAX_CELLS_TIMES_STEPS,
            });
        }
        Ok(())
    }
}

fn positive(field: &str, value: f64) -> Result<(), ValidationError> {
    if value > 0.0 {
        Ok(())
    } else {
        Err(ValidationError::NotPositive {
            field: field.to_string(),
            value,
        })
    }
}
