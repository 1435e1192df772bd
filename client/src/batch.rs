use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use common::{artifact_path, RunInfo, Simulation, TaskInfo, TaskName, TaskStatus};
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::batch_data::BatchData;
use crate::config::{DEFAULT_FOLDER, DEFAULT_REFRESH_MS};
use crate::error::{BatchError, WebError};
use crate::job::{Job, MonitorOutcome};
use crate::progress::{completed_units, ProgressSink};
use crate::transport::Transport;

/// Etiqueta que se muestra mientras no se pudo leer el status de una tarea.
const UNKNOWN_STATUS: &str = "desconocido";

/// Colección de simulaciones con nombre que se suben, corren y monitorean
/// juntas. Los miembros conservan el orden en que se pasaron.
pub struct Batch {
    transport: Arc<dyn Transport>,
    simulations: Vec<(TaskName, Simulation)>,
    folder_name: String,
    refresh_interval: Duration,
    /// Vacío hasta `upload()`; después, un job por nombre
    jobs: Vec<(TaskName, Job)>,
}

impl Batch {
    /// Un nombre repetido reemplaza a la simulación anterior, en su lugar.
    pub fn new(
        transport: Arc<dyn Transport>,
        simulations: impl IntoIterator<Item = (TaskName, Simulation)>,
    ) -> Self {
        let mut members: Vec<(TaskName, Simulation)> = Vec::new();
        for (name, sim) in simulations {
            match members.iter_mut().find(|(n, _)| *n == name) {
                Some(entry) => entry.1 = sim,
                None => members.push((name, sim)),
            }
        }

        Self {
            transport,
            simulations: members,
            folder_name: DEFAULT_FOLDER.to_string(),
            refresh_interval: Duration::from_millis(DEFAULT_REFRESH_MS),
            jobs: Vec::new(),
        }
    }

    pub fn with_folder(mut self, folder_name: impl Into<String>) -> Self {
        self.folder_name = folder_name.into();
        self
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn simulations(&self) -> &[(TaskName, Simulation)] {
        &self.simulations
    }

    pub fn jobs(&self) -> &[(TaskName, Job)] {
        &self.jobs
    }

    pub fn job(&self, name: &str) -> Option<&Job> {
        self.jobs.iter().find(|(n, _)| n == name).map(|(_, job)| job)
    }

    /// Crea un job por simulación y los sube en paralelo. Si alguno falla,
    /// su job queda en el batch sin `task_id` y el resto se sube igual.
    pub async fn upload(&mut self) -> Result<(), BatchError> {
        self.jobs = self
            .simulations
            .iter()
            .map(|(name, sim)| {
                let job = Job::new(self.transport.clone(), sim.clone(), name.clone())
                    .with_folder(self.folder_name.clone())
                    .with_refresh_interval(self.refresh_interval);
                (name.clone(), job)
            })
            .collect();

        let results = join_all(
            self.jobs
                .iter_mut()
                .map(|(name, job)| async move { (name.clone(), job.upload().await) }),
        )
        .await;

        let failures = collect_failures(results);
        info!(
            "batch subido: {} tareas, {} fallidas",
            self.jobs.len(),
            failures.len()
        );
        BatchError::check(failures)
    }

    pub async fn get_info(&self) -> Result<BTreeMap<TaskName, TaskInfo>, BatchError> {
        let results = join_all(
            self.jobs
                .iter()
                .map(|(name, job)| async move { (name.clone(), job.get_info().await) }),
        )
        .await;
        split_results(results)
    }

    pub async fn start(&self) -> Result<(), BatchError> {
        let results = join_all(
            self.jobs
                .iter()
                .map(|(name, job)| async move { (name.clone(), job.start().await) }),
        )
        .await;
        BatchError::check(collect_failures(results))
    }

    pub async fn get_run_info(&self) -> Result<BTreeMap<TaskName, RunInfo>, BatchError> {
        let results = join_all(
            self.jobs
                .iter()
                .map(|(name, job)| async move { (name.clone(), job.get_run_info().await) }),
        )
        .await;
        split_results(results)
    }

    /// Una vuelta completa de consultas de status, en paralelo y alineada
    /// con `jobs`. No se consultan las tareas que ya terminaron de sondearse
    /// ni las que nunca se subieron.
    async fn poll_round(
        &self,
        previous: &[Option<TaskStatus>],
    ) -> Result<Vec<Option<TaskStatus>>, WebError> {
        let results = join_all(self.jobs.iter().enumerate().map(|(i, (name, job))| async move {
            let prev = previous.get(i).copied().flatten();
            if job.task_id().is_none() || prev.is_some_and(TaskStatus::is_end_of_polling) {
                return Ok(prev);
            }
            match job.status().await {
                Ok(status) => Ok(Some(status)),
                Err(e) if e.is_retryable() => {
                    warn!("error consultando '{}', se reintenta: {}", name, e);
                    Ok(prev)
                }
                Err(WebError::NotFound(msg)) => {
                    warn!("'{}' no existe en el servicio ({}), se considera deleted", name, msg);
                    Ok(Some(TaskStatus::Deleted))
                }
                Err(e) => Err(e),
            }
        }))
        .await;

        results.into_iter().collect()
    }

    /// Sondea todas las tareas subidas cada `refresh_interval` hasta que
    /// todas están en un estado de fin de sondeo (`success`, `error`,
    /// `diverged`, `deleted` o `draft`), informando el progreso de cada una
    /// a `sink`.
    pub async fn monitor(
        &self,
        sink: &mut dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<MonitorOutcome, WebError> {
        info!("monitoreando batch de {} tareas", self.jobs.len());
        let total = TaskStatus::total_units();

        // Unidades de display con el status actual, para no arrancar de cero
        // si una tarea ya venía corriendo
        let mut statuses = self.poll_round(&[]).await?;
        let mut completed = vec![0; self.jobs.len()];
        for (i, (name, job)) in self.jobs.iter().enumerate() {
            if job.task_id().is_none() {
                continue;
            }
            let units = statuses[i].map(|s| completed_units(s, 0)).unwrap_or(0);
            sink.begin(name, label(statuses[i]), units, total);
            completed[i] = units;
        }

        loop {
            let done = self
                .jobs
                .iter()
                .zip(&statuses)
                .all(|((_, job), s)| {
                    job.task_id().is_none() || s.is_some_and(TaskStatus::is_end_of_polling)
                });
            if done {
                break;
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("monitoreo del batch cancelado");
                    return Ok(MonitorOutcome::Cancelled);
                }
                _ = tokio::time::sleep(self.refresh_interval) => {}
            }

            let round = self.poll_round(&statuses).await?;
            for (i, (name, job)) in self.jobs.iter().enumerate() {
                if job.task_id().is_none() || statuses[i].is_some_and(TaskStatus::is_end_of_polling) {
                    continue;
                }
                if let Some(s) = round[i] {
                    completed[i] = completed_units(s, completed[i]);
                }
                sink.update(name, label(round[i]), completed[i], total);
            }
            statuses = round;
        }

        sink.finish();
        info!("batch completo");
        Ok(MonitorOutcome::Completed)
    }

    /// Descarga los resultados de cada tarea a `{dir}/{task_id}.json`.
    pub async fn download(&self, dir: impl AsRef<Path>) -> Result<(), BatchError> {
        let dir = dir.as_ref();
        let results = join_all(self.jobs.iter().map(|(name, job)| async move {
            let result = match job.task_id() {
                Some(id) => job.download(artifact_path(dir, &id.to_string())).await,
                None => Err(WebError::task_id_unset(name)),
            };
            (name.clone(), result)
        }))
        .await;
        BatchError::check(collect_failures(results))
    }

    /// Arma la vista perezosa de resultados; no descarga nada todavía.
    pub fn load(
        &self,
        dir: impl AsRef<Path>,
        normalize_index: Option<usize>,
    ) -> Result<BatchData, BatchError> {
        let (data, failures) = self.collect_data(dir.as_ref(), normalize_index);
        BatchError::check(failures)?;
        Ok(data)
    }

    /// `BatchData` con los miembros que tienen `task_id`; el resto va como
    /// falla.
    fn collect_data(
        &self,
        dir: &Path,
        normalize_index: Option<usize>,
    ) -> (BatchData, Vec<(TaskName, WebError)>) {
        let mut data = BatchData::new(self.transport.clone(), normalize_index);
        let mut failures = Vec::new();

        for (name, job) in &self.jobs {
            match job.task_id() {
                Some(id) => {
                    let id = id.to_string();
                    data.insert(name.clone(), artifact_path(dir, &id), id);
                }
                None => failures.push((name.clone(), WebError::task_id_unset(name))),
            }
        }
        (data, failures)
    }

    /// Borra todas las tareas en el servicio. Los jobs que no se pudieron
    /// borrar quedan en el batch para reintentar.
    pub async fn delete(&mut self) -> Result<(), BatchError> {
        let results = join_all(
            self.jobs
                .iter_mut()
                .map(|(name, job)| async move { (name.clone(), job.delete().await) }),
        )
        .await;

        let failures = collect_failures(results);
        self.jobs
            .retain(|(name, _)| failures.iter().any(|(failed, _)| failed == name));
        BatchError::check(failures)
    }

    /// upload -> start -> monitor -> load. Un miembro que falla no frena a
    /// los demás: los que se subieron se inician, se monitorean y quedan en
    /// el `BatchData` de `BatchRunError::Incomplete`.
    pub async fn run(
        &mut self,
        dir: impl AsRef<Path>,
        normalize_index: Option<usize>,
        sink: &mut dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<BatchData, BatchRunError> {
        let mut failures = match self.upload().await {
            Ok(()) => Vec::new(),
            Err(e) => e.failures,
        };

        let started = join_all(
            self.jobs
                .iter()
                .filter(|(_, job)| job.task_id().is_some())
                .map(|(name, job)| async move { (name.clone(), job.start().await) }),
        )
        .await;
        failures.extend(collect_failures(started));

        if self.monitor(sink, cancel).await? == MonitorOutcome::Cancelled {
            return Err(WebError::Cancelled.into());
        }

        // Los miembros sin task_id ya están en `failures` por el upload
        let (data, _) = self.collect_data(dir.as_ref(), normalize_index);
        match BatchError::check(failures) {
            Ok(()) => Ok(data),
            Err(errors) => {
                warn!("{}", errors);
                Err(BatchRunError::Incomplete { data, errors })
            }
        }
    }
}

/// Error de `Batch::run`.
#[derive(Debug, thiserror::Error)]
pub enum BatchRunError {
    /// Fallaron miembros puntuales; `data` tiene a los que se subieron.
    #[error("{errors}")]
    Incomplete { data: BatchData, errors: BatchError },
    #[error(transparent)]
    Monitor(#[from] WebError),
}

fn label(status: Option<TaskStatus>) -> &'static str {
    status.map(TaskStatus::label).unwrap_or(UNKNOWN_STATUS)
}

fn collect_failures(results: Vec<(TaskName, Result<(), WebError>)>) -> Vec<(TaskName, WebError)> {
    results
        .into_iter()
        .filter_map(|(name, r)| r.err().map(|e| (name, e)))
        .collect()
}

fn split_results<T>(
    results: Vec<(TaskName, Result<T, WebError>)>,
) -> Result<BTreeMap<TaskName, T>, BatchError> {
    let mut ok = BTreeMap::new();
    let mut failures = Vec::new();
    for (name, r) in results {
        match r {
            Ok(v) => {
                ok.insert(name, v);
            }
            Err(e) => failures.push((name, e)),
        }
    }
    BatchError::check(failures)?;
    Ok(ok)
}
