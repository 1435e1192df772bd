//! Transporte en memoria para tests: es el dueño de las tareas y reproduce
//! un guion de estados por nombre de tarea.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::{
    Domain, MonitorData, RunInfo, Simulation, SimulationResult, TaskId, TaskInfo, TaskStatus,
};

use crate::error::WebError;
use crate::transport::Transport;

struct ScriptedTask {
    name: String,
    folder: String,
    status: TaskStatus,
    script: VecDeque<TaskStatus>,
    started: bool,
    simulation_json: String,
    submitted_at: DateTime<Utc>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    tasks: HashMap<TaskId, ScriptedTask>,
    scripts: HashMap<String, Vec<TaskStatus>>,
    rejected: HashSet<String>,
    transient_failures: usize,
    /// `None`: error de transporte; `Some(status)`: respuesta del servicio
    failure_status: Option<u16>,
    status_queries: usize,
}

#[derive(Default)]
pub(crate) struct ScriptedTransport {
    state: Mutex<State>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Estados que irá devolviendo `query_status` después de `start`, uno
    /// por consulta; el último se repite.
    pub(crate) fn script(self, name: &str, statuses: &[TaskStatus]) -> Self {
        self.state
            .lock()
            .unwrap()
            .scripts
            .insert(name.to_string(), statuses.to_vec());
        self
    }

    /// El servicio rechaza el upload de esta tarea.
    pub(crate) fn reject(self, name: &str) -> Self {
        self.state.lock().unwrap().rejected.insert(name.to_string());
        self
    }

    /// Las próximas `n` consultas de status fallan con error de transporte.
    pub(crate) fn fail_next_queries(&self, n: usize) {
        let mut state = self.state.lock().unwrap();
        state.transient_failures = n;
        state.failure_status = None;
    }

    /// Las próximas `n` consultas de status responden con `status`.
    pub(crate) fn fail_next_queries_with(&self, n: usize, status: u16) {
        let mut state = self.state.lock().unwrap();
        state.transient_failures = n;
        state.failure_status = Some(status);
    }

    pub(crate) fn status_queries(&self) -> usize {
        self.state.lock().unwrap().status_queries
    }

    pub(crate) fn task_count(&self) -> usize {
        self.state.lock().unwrap().tasks.len()
    }

    /// Corre hacia atrás la fecha de envío de la tarea.
    pub(crate) fn backdate(&self, task_id: &str, days: i64) {
        if let Some(task) = self.state.lock().unwrap().tasks.get_mut(task_id) {
            task.submitted_at = task.submitted_at - Duration::days(days);
        }
    }
}

fn info_for(task_id: &str, task: &ScriptedTask) -> TaskInfo {
    TaskInfo {
        task_id: task_id.to_string(),
        task_name: task.name.clone(),
        folder_name: task.folder.clone(),
        status: task.status,
        solver_version: None,
        callback_url: None,
        size_bytes: Some(task.simulation_json.len() as u64),
        credits: None,
        submitted_at: task.submitted_at,
        started_at: None,
        finished_at: None,
    }
}

/// Artefacto de resultados con un valor constante por frecuencia de cada
/// monitor.
pub(crate) fn artifact_for(simulation: &Simulation) -> Vec<u8> {
    let mut monitor_data = BTreeMap::new();
    for monitor in &simulation.monitors {
        let data = match monitor.freqs() {
            Some(freqs) => MonitorData {
                domain: Domain::Frequency,
                coords: freqs.to_vec(),
                values: vec![1.0; freqs.len()],
            },
            None => MonitorData {
                domain: Domain::Time,
                coords: vec![0.0, 1e-15],
                values: vec![0.0, 1.0],
            },
        };
        monitor_data.insert(monitor.name().to_string(), data);
    }
    let result = SimulationResult {
        simulation: simulation.clone(),
        monitor_data,
        log: Some("field decay: 1e-6".to_string()),
        diverged: false,
        normalize_index: None,
    };
    serde_json::to_vec(&result).unwrap()
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn submit(
        &self,
        simulation_json: &str,
        task_name: &str,
        folder_name: &str,
        _callback_url: Option<&str>,
    ) -> Result<TaskId, WebError> {
        let mut state = self.state.lock().unwrap();
        if state.rejected.contains(task_name) {
            return Err(WebError::Service {
                status: 400,
                message: format!("'{task_name}' rechazada"),
            });
        }

        state.next_id += 1;
        let task_id = format!("task-{}", state.next_id);
        let script = state
            .scripts
            .get(task_name)
            .cloned()
            .unwrap_or_else(|| TaskStatus::RUN_SEQUENCE[1..].to_vec());

        state.tasks.insert(
            task_id.clone(),
            ScriptedTask {
                name: task_name.to_string(),
                folder: folder_name.to_string(),
                status: TaskStatus::Draft,
                script: script.into(),
                started: false,
                simulation_json: simulation_json.to_string(),
                submitted_at: Utc::now(),
            },
        );
        Ok(task_id)
    }

    async fn query_status(&self, task_id: &str) -> Result<TaskInfo, WebError> {
        let mut state = self.state.lock().unwrap();
        state.status_queries += 1;
        if state.transient_failures > 0 {
            state.transient_failures -= 1;
            return Err(match state.failure_status {
                Some(status) => WebError::Service {
                    status,
                    message: "servicio no disponible".to_string(),
                },
                None => WebError::Transport("conexión reseteada".to_string()),
            });
        }

        let task = state
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| WebError::NotFound(task_id.to_string()))?;
        if task.started {
            if let Some(next) = task.script.pop_front() {
                task.status = next;
            }
        }
        Ok(info_for(task_id, task))
    }

    async fn query_run_info(&self, task_id: &str) -> Result<RunInfo, WebError> {
        let state = self.state.lock().unwrap();
        let task = state
            .tasks
            .get(task_id)
            .ok_or_else(|| WebError::NotFound(task_id.to_string()))?;
        Ok(match task.status {
            TaskStatus::Running => RunInfo::new(0.5, 1e-3),
            s if s.progress_index() > TaskStatus::Running.progress_index() => {
                RunInfo::new(1.0, 1e-6)
            }
            _ => RunInfo::default(),
        })
    }

    async fn request_start(&self, task_id: &str) -> Result<(), WebError> {
        let mut state = self.state.lock().unwrap();
        let task = state
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| WebError::NotFound(task_id.to_string()))?;
        task.started = true;
        Ok(())
    }

    async fn fetch_artifact(&self, task_id: &str) -> Result<Vec<u8>, WebError> {
        let state = self.state.lock().unwrap();
        let task = state
            .tasks
            .get(task_id)
            .ok_or_else(|| WebError::NotFound(task_id.to_string()))?;
        if task.status != TaskStatus::Success {
            return Err(WebError::NotReady(format!("status = {}", task.status)));
        }
        let simulation = Simulation::from_json(&task.simulation_json)
            .map_err(|e| WebError::Transport(e.to_string()))?;
        Ok(artifact_for(&simulation))
    }

    async fn request_delete(&self, task_id: &str) -> Result<(), WebError> {
        let mut state = self.state.lock().unwrap();
        state
            .tasks
            .remove(task_id)
            .map(|_| ())
            .ok_or_else(|| WebError::NotFound(task_id.to_string()))
    }

    async fn list_tasks(&self, folder_name: &str) -> Result<Vec<TaskInfo>, WebError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .tasks
            .iter()
            .filter(|(_, t)| t.folder == folder_name)
            .map(|(id, t)| info_for(id, t))
            .collect())
    }
}

/// Simulación mínima válida para los tests del cliente.
pub(crate) fn sample_simulation() -> Simulation {
    let text = r#"{
        "size": [2.0, 2.0, 2.0],
        "grid_size": [0.1, 0.1, 0.1],
        "run_time": 1e-12,
        "sources": [{
            "name": "dipolo",
            "center": [0.0, 0.0, 0.0],
            "source_time": { "freq0": 2e14, "fwidth": 1e13, "amplitude": 2.0 },
            "kind": { "type": "PointDipole", "polarization": "Ez" }
        }],
        "monitors": [
            { "type": "Flux", "name": "flujo", "center": [0.5, 0.0, 0.0],
              "size": [0.0, 1.0, 1.0], "freqs": [2e14] },
            { "type": "FieldTime", "name": "tiempo", "center": [0.0, 0.0, 0.0],
              "size": [0.0, 0.0, 0.0] }
        ]
    }"#;
    Simulation::from_json(text).unwrap()
}
