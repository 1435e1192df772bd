use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use common::{
    RunInfo, Simulation, SimulationResult, TaskId, TaskInfo, TaskName, TaskStatus,
    DEFAULT_DATA_PATH,
};
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{DEFAULT_FOLDER, DEFAULT_REFRESH_MS};
use crate::error::WebError;
use crate::progress::{completed_units, ProgressSink};
use crate::transport::Transport;

/// Cómo terminó un monitoreo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorOutcome {
    /// Todas las tareas observadas llegaron a un estado final.
    Completed,
    /// El token de cancelación se disparó antes.
    Cancelled,
}

/// Maneja el ciclo de vida de una simulación remota:
/// upload -> start -> monitor -> download / load -> delete.
pub struct Job {
    transport: Arc<dyn Transport>,
    simulation: Simulation,
    task_name: TaskName,
    folder_name: String,
    callback_url: Option<String>,
    refresh_interval: Duration,
    /// Se asigna en `upload()` y se borra en `delete()`
    task_id: Option<TaskId>,
}

impl Job {
    pub fn new(
        transport: Arc<dyn Transport>,
        simulation: Simulation,
        task_name: impl Into<TaskName>,
    ) -> Self {
        Self {
            transport,
            simulation,
            task_name: task_name.into(),
            folder_name: DEFAULT_FOLDER.to_string(),
            callback_url: None,
            refresh_interval: Duration::from_millis(DEFAULT_REFRESH_MS),
            task_id: None,
        }
    }

    pub fn with_folder(mut self, folder_name: impl Into<String>) -> Self {
        self.folder_name = folder_name.into();
        self
    }

    /// URL que recibe un PUT cuando la simulación termina.
    pub fn with_callback_url(mut self, url: impl Into<String>) -> Self {
        self.callback_url = Some(url.into());
        self
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Handle para una tarea que ya existe en el servicio.
    pub fn with_task_id(mut self, task_id: impl Into<TaskId>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn task_id(&self) -> Option<&str> {
        self.task_id.as_deref()
    }

    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    pub fn folder_name(&self) -> &str {
        &self.folder_name
    }

    pub fn simulation(&self) -> &Simulation {
        &self.simulation
    }

    fn require_id(&self) -> Result<&str, WebError> {
        self.task_id
            .as_deref()
            .ok_or_else(|| WebError::task_id_unset(&self.task_name))
    }

    /// Valida y sube la simulación. Llamarlo dos veces crea dos tareas.
    pub async fn upload(&mut self) -> Result<(), WebError> {
        self.simulation.validate()?;
        let json = self
            .simulation
            .to_json()
            .map_err(WebError::Encode)?;

        let task_id = self
            .transport
            .submit(
                &json,
                &self.task_name,
                &self.folder_name,
                self.callback_url.as_deref(),
            )
            .await?;

        info!("tarea '{}' subida con id {}", self.task_name, task_id);
        self.task_id = Some(task_id);
        Ok(())
    }

    pub async fn get_info(&self) -> Result<TaskInfo, WebError> {
        let task_id = self.require_id()?;
        self.transport.query_status(task_id).await
    }

    pub async fn status(&self) -> Result<TaskStatus, WebError> {
        Ok(self.get_info().await?.status)
    }

    pub async fn start(&self) -> Result<(), WebError> {
        let task_id = self.require_id()?;
        self.transport.request_start(task_id).await?;
        info!("tarea '{}' ({}) iniciada", self.task_name, task_id);
        Ok(())
    }

    pub async fn get_run_info(&self) -> Result<RunInfo, WebError> {
        let task_id = self.require_id()?;
        self.transport.query_run_info(task_id).await
    }

    /// Sondea el status hasta que la tarea termina (`success`, `error`,
    /// `diverged` o `deleted`). Un error de la simulación no es un error de
    /// esta función: hay que mirar el status al volver.
    pub async fn monitor(
        &self,
        sink: &mut dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<MonitorOutcome, WebError> {
        let task_id = self.require_id()?;
        monitor_task(
            self.transport.as_ref(),
            task_id,
            &self.task_name,
            self.refresh_interval,
            sink,
            cancel,
        )
        .await
    }

    /// Descarga los resultados a `path`. Falla con `NotReady` si la tarea no
    /// llegó a `success`; en ese caso no se crea ningún archivo.
    pub async fn download(&self, path: impl AsRef<Path>) -> Result<(), WebError> {
        let task_id = self.require_id()?;
        download_artifact(self.transport.as_ref(), task_id, path.as_ref()).await
    }

    /// Descarga (si todavía no está en disco) y decodifica los resultados,
    /// normalizando por `simulation.sources[normalize_index]`.
    pub async fn load(
        &self,
        path: impl AsRef<Path>,
        normalize_index: Option<usize>,
    ) -> Result<SimulationResult, WebError> {
        let task_id = self.require_id()?;
        load_artifact(self.transport.as_ref(), task_id, path.as_ref(), normalize_index).await
    }

    /// Borra la tarea en el servicio y olvida el `task_id`. Si el servicio
    /// ya no la conoce no es un error.
    pub async fn delete(&mut self) -> Result<(), WebError> {
        let Some(task_id) = self.task_id.as_deref() else {
            debug!("tarea '{}' sin task_id, nada que borrar", self.task_name);
            return Ok(());
        };

        match self.transport.request_delete(task_id).await {
            Ok(()) => info!("tarea '{}' ({}) borrada", self.task_name, task_id),
            Err(WebError::NotFound(_)) => {
                warn!("tarea {} ya no existía en el servicio", task_id)
            }
            Err(e) => return Err(e),
        }
        self.task_id = None;
        Ok(())
    }

    /// upload -> start -> monitor -> load, todo junto.
    pub async fn run(
        &mut self,
        path: Option<&Path>,
        normalize_index: Option<usize>,
        sink: &mut dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<SimulationResult, WebError> {
        self.upload().await?;
        self.start().await?;
        if self.monitor(sink, cancel).await? == MonitorOutcome::Cancelled {
            return Err(WebError::Cancelled);
        }
        let path = path.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_PATH));
        self.load(&path, normalize_index).await
    }
}

/// Sondea una tarea hasta que termina (`success`, `error`, `diverged` o
/// `deleted`). `name` sólo se usa para el display y los logs.
pub async fn monitor_task(
    transport: &dyn Transport,
    task_id: &str,
    name: &str,
    refresh_interval: Duration,
    sink: &mut dyn ProgressSink,
    cancel: &CancellationToken,
) -> Result<MonitorOutcome, WebError> {
    let total = TaskStatus::total_units();
    let mut completed = 0;
    let mut first = true;

    loop {
        match transport.query_status(task_id).await {
            Ok(info) => {
                completed = completed_units(info.status, completed);
                if first {
                    sink.begin(name, info.status.label(), completed, total);
                    first = false;
                } else {
                    sink.update(name, info.status.label(), completed, total);
                }

                if info.status.is_finished() {
                    sink.finish();
                    return Ok(MonitorOutcome::Completed);
                }

                if info.status == TaskStatus::Running {
                    match transport.query_run_info(task_id).await {
                        Ok(run) => debug!("tarea '{}': {}", name, run.summary()),
                        Err(e) => debug!("sin run info para '{}': {}", name, e),
                    }
                }
            }
            Err(e) if e.is_retryable() => {
                warn!("error consultando '{}', reintentando: {}", name, e);
            }
            Err(e) => return Err(e),
        }

        tokio::select! {
            _ = cancel.cancelled() => return Ok(MonitorOutcome::Cancelled),
            _ = tokio::time::sleep(refresh_interval) => {}
        }
    }
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}

/// Descarga el artefacto de `task_id`. Se escribe primero en un `*.part`
/// hermano y se renombra al final.
pub async fn download_artifact(
    transport: &dyn Transport,
    task_id: &str,
    path: &Path,
) -> Result<(), WebError> {
    let status = transport.query_status(task_id).await?.status;
    if status != TaskStatus::Success {
        return Err(WebError::NotReady(format!(
            "la tarea {task_id} está en estado {status}"
        )));
    }

    let bytes = transport.fetch_artifact(task_id).await?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    let tmp = part_path(path);
    if let Err(e) = fs::write(&tmp, &bytes).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }

    info!("resultados de {} descargados en {}", task_id, path.display());
    Ok(())
}

/// Decodifica el artefacto en `path`, descargándolo antes si no existe.
pub async fn load_artifact(
    transport: &dyn Transport,
    task_id: &str,
    path: &Path,
    normalize_index: Option<usize>,
) -> Result<SimulationResult, WebError> {
    if !fs::try_exists(path).await? {
        download_artifact(transport, task_id, path).await?;
    }
    let bytes = fs::read(path).await?;
    let result = SimulationResult::from_bytes(&bytes)?;
    Ok(result.normalize(normalize_index)?)
}
