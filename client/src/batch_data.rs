use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::{SimulationResult, TaskId, TaskName};
use futures::stream::{self, BoxStream, StreamExt};

use crate::error::WebError;
use crate::job::load_artifact;
use crate::transport::Transport;

/// Vista perezosa de los resultados de un batch.
///
/// No guarda resultados decodificados: cada acceso vuelve a leer el archivo
/// (descargándolo primero si no existe), así que al iterar hay un solo
/// resultado en memoria a la vez.
pub struct BatchData {
    transport: Arc<dyn Transport>,
    /// Orden de inserción, que es el orden de iteración
    task_paths: Vec<(TaskName, PathBuf)>,
    task_ids: HashMap<TaskName, TaskId>,
    normalize_index: Option<usize>,
}

impl fmt::Debug for BatchData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchData")
            .field("task_paths", &self.task_paths)
            .field("normalize_index", &self.normalize_index)
            .finish()
    }
}

impl BatchData {
    pub fn new(transport: Arc<dyn Transport>, normalize_index: Option<usize>) -> Self {
        Self {
            transport,
            task_paths: Vec::new(),
            task_ids: HashMap::new(),
            normalize_index,
        }
    }

    /// Registra una tarea; si el nombre ya existía se reemplaza su entrada.
    pub fn insert(&mut self, name: TaskName, path: PathBuf, task_id: TaskId) {
        match self.task_paths.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = path,
            None => self.task_paths.push((name.clone(), path)),
        }
        self.task_ids.insert(name, task_id);
    }

    pub fn normalize_index(&self) -> Option<usize> {
        self.normalize_index
    }

    pub fn len(&self) -> usize {
        self.task_paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.task_paths.is_empty()
    }

    pub fn task_names(&self) -> Vec<&str> {
        self.task_paths.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn path(&self, name: &str) -> Option<&Path> {
        self.task_paths
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, p)| p.as_path())
    }

    pub fn task_id(&self, name: &str) -> Option<&str> {
        self.task_ids.get(name).map(String::as_str)
    }

    /// Carga los resultados de `name`. Cada llamada relee el archivo.
    pub async fn get(&self, name: &str) -> Result<SimulationResult, WebError> {
        let path = self
            .path(name)
            .ok_or_else(|| WebError::NotFound(format!("'{name}' no pertenece al batch")))?;
        let task_id = self
            .task_id(name)
            .ok_or_else(|| WebError::task_id_unset(name))?;
        load_artifact(self.transport.as_ref(), task_id, path, self.normalize_index).await
    }

    /// Secuencia perezosa de `(nombre, resultado)` en orden de inserción.
    /// Cada llamada arma una secuencia nueva e independiente.
    pub fn items(&self) -> BoxStream<'_, (TaskName, Result<SimulationResult, WebError>)> {
        stream::iter(self.task_paths.iter())
            .then(move |(name, _)| async move { (name.clone(), self.get(name).await) })
            .boxed()
    }
}
