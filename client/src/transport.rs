use async_trait::async_trait;
use common::{RunInfo, TaskId, TaskInfo};

use crate::error::WebError;

/// Capacidades que la capa de orquestación consume del servicio remoto.
///
/// El transporte es el dueño de la existencia de las tareas; el cliente
/// nunca mantiene un registro propio. Cualquier método puede fallar con
/// `WebError::Transport` (conectividad) o `WebError::Service` (rechazo).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sube la simulación serializada y devuelve el id asignado.
    async fn submit(
        &self,
        simulation_json: &str,
        task_name: &str,
        folder_name: &str,
        callback_url: Option<&str>,
    ) -> Result<TaskId, WebError>;

    async fn query_status(&self, task_id: &str) -> Result<TaskInfo, WebError>;

    async fn query_run_info(&self, task_id: &str) -> Result<RunInfo, WebError>;

    async fn request_start(&self, task_id: &str) -> Result<(), WebError>;

    /// Bytes del artefacto de resultados; `NotReady` si la tarea no terminó.
    async fn fetch_artifact(&self, task_id: &str) -> Result<Vec<u8>, WebError>;

    async fn request_delete(&self, task_id: &str) -> Result<(), WebError>;

    /// Tareas de una carpeta remota.
    async fn list_tasks(&self, folder_name: &str) -> Result<Vec<TaskInfo>, WebError>;
}
