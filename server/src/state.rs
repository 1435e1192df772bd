// server/src/state.rs

use common::{RunInfo, Simulation, TaskId, TaskInfo};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

/// Ticks que una tarea pasa en `running` antes de postprocesar.
pub const RUNNING_TICKS: u32 = 4;

#[derive(Clone)]
pub struct AppState {
    pub tasks: Arc<Mutex<HashMap<TaskId, TaskRecord>>>,
    /// Tiempo que pasa una tarea en cada status
    pub step: Duration,
    /// Si está, las rutas `/api` exigen `Authorization: Bearer <key>`
    pub api_key: Option<String>,
}

impl AppState {
    pub fn new(step: Duration) -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
            step,
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Lock del mapa de tareas; si otro hilo entró en pánico con el lock
    /// tomado, se sigue con los datos tal como quedaron.
    pub fn tasks(&self) -> MutexGuard<'_, HashMap<TaskId, TaskRecord>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub info: TaskInfo,
    /// `None` hasta que se sube la simulación
    pub simulation: Option<Simulation>,
    pub run_info: RunInfo,
    /// Ticks transcurridos en `running`
    pub running_ticks: u32,
    /// Artefacto de resultados, sólo cuando el status es `success`
    pub artifact: Option<Vec<u8>>,
}

impl TaskRecord {
    pub fn new(info: TaskInfo) -> Self {
        Self {
            info,
            simulation: None,
            run_info: RunInfo::default(),
            running_ticks: 0,
            artifact: None,
        }
    }
}
