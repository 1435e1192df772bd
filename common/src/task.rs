use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identificador que asigna el servicio al subir una simulación.
pub type TaskId = String;

/// Nombre elegido por el usuario; sólo sirve para bookkeeping local.
pub type TaskName = String;

/// Etapas de vida de una tarea remota.
///
/// El orden de declaración de las variantes "normales" coincide con
/// [`TaskStatus::RUN_SEQUENCE`]. `Error`, `Diverged` y `Deleted` quedan
/// fuera de la secuencia y son absorbentes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Draft,
    Queued,
    Preprocess,
    QueuedSolver,
    Running,
    Postprocess,
    Visualize,
    Success,
    Error,
    Diverged,
    Deleted,
}

impl TaskStatus {
    /// Secuencia canónica de avance de una corrida exitosa.
    pub const RUN_SEQUENCE: [TaskStatus; 8] = [
        TaskStatus::Draft,
        TaskStatus::Queued,
        TaskStatus::Preprocess,
        TaskStatus::QueuedSolver,
        TaskStatus::Running,
        TaskStatus::Postprocess,
        TaskStatus::Visualize,
        TaskStatus::Success,
    ];

    /// Estados en los que el monitor de un batch deja de sondear.
    ///
    /// `Draft` está incluido: `start()` siempre lo avanza antes de monitorear,
    /// así que en la práctica sólo se observa si nadie llamó a `start()`.
    pub const END_OF_POLLING: [TaskStatus; 5] = [
        TaskStatus::Success,
        TaskStatus::Error,
        TaskStatus::Diverged,
        TaskStatus::Deleted,
        TaskStatus::Draft,
    ];

    /// Unidades totales de progreso de una tarea (`len(secuencia) - 1`).
    pub fn total_units() -> usize {
        Self::RUN_SEQUENCE.len() - 1
    }

    /// Posición dentro de la secuencia canónica; `None` para los estados
    /// fuera de banda (`error`, `diverged`, `deleted`).
    pub fn progress_index(self) -> Option<usize> {
        Self::RUN_SEQUENCE.iter().position(|s| *s == self)
    }

    pub fn is_end_of_polling(self) -> bool {
        Self::END_OF_POLLING.contains(&self)
    }

    /// Terminado de verdad: ya no habrá más transiciones sin un nuevo envío.
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            TaskStatus::Success | TaskStatus::Error | TaskStatus::Diverged | TaskStatus::Deleted
        )
    }

    pub fn is_failure(self) -> bool {
        matches!(self, TaskStatus::Error | TaskStatus::Diverged)
    }

    /// Etiqueta tal como viaja por el cable.
    pub fn label(self) -> &'static str {
        match self {
            TaskStatus::Draft => "draft",
            TaskStatus::Queued => "queued",
            TaskStatus::Preprocess => "preprocess",
            TaskStatus::QueuedSolver => "queued_solver",
            TaskStatus::Running => "running",
            TaskStatus::Postprocess => "postprocess",
            TaskStatus::Visualize => "visualize",
            TaskStatus::Success => "success",
            TaskStatus::Error => "error",
            TaskStatus::Diverged => "diverged",
            TaskStatus::Deleted => "deleted",
        }
    }

    /// Siguiente estado de la secuencia canónica, si existe.
    pub fn next_in_sequence(self) -> Option<TaskStatus> {
        let idx = self.progress_index()?;
        Self::RUN_SEQUENCE.get(idx + 1).copied()
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Foto del estado remoto de una tarea. Nunca se cachea más allá de la
/// llamada que la produjo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub task_id: TaskId,
    pub task_name: TaskName,
    pub folder_name: String,
    pub status: TaskStatus,

    pub solver_version: Option<String>,
    pub callback_url: Option<String>,

    /// Tamaño de la simulación subida, en bytes
    pub size_bytes: Option<u64>,
    /// Costo estimado en créditos
    pub credits: Option<f64>,

    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Progreso del solver mientras la tarea está en `running`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    /// Fracción completada, en [0, 1]
    pub percent_done: f64,
    /// Decaimiento del campo, >= 0
    pub field_decay: f64,
}

impl RunInfo {
    pub fn new(percent_done: f64, field_decay: f64) -> Self {
        Self {
            percent_done: percent_done.clamp(0.0, 1.0),
            field_decay: field_decay.max(0.0),
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{:.1}% completado, field decay = {:.2e}",
            self.percent_done * 100.0,
            self.field_decay
        )
    }
}

impl Default for RunInfo {
    fn default() -> Self {
        Self {
            percent_done: 0.0,
            field_decay: 1.0,
        }
    }
}
