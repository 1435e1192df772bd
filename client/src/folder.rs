use chrono::{Duration, Utc};
use common::TaskId;
use futures::future::join_all;
use tracing::{info, warn};

use crate::error::WebError;
use crate::transport::Transport;

/// Borra las tareas de `folder_name` enviadas hace más de `days_old` días.
/// Devuelve los ids borrados. Se intenta borrar todas antes de reportar
/// el primer error; una tarea que ya no existe no cuenta como error.
pub async fn delete_old(
    transport: &dyn Transport,
    folder_name: &str,
    days_old: u32,
) -> Result<Vec<TaskId>, WebError> {
    let cutoff = Utc::now() - Duration::days(i64::from(days_old));
    let old: Vec<TaskId> = transport
        .list_tasks(folder_name)
        .await?
        .into_iter()
        .filter(|t| t.submitted_at < cutoff)
        .map(|t| t.task_id)
        .collect();

    let results = join_all(old.iter().map(|id| async move {
        (id.clone(), transport.request_delete(id).await)
    }))
    .await;

    let mut deleted = Vec::new();
    let mut first_error = None;
    for (id, result) in results {
        match result {
            Ok(()) | Err(WebError::NotFound(_)) => deleted.push(id),
            Err(e) => {
                warn!("no se pudo borrar {}: {}", id, e);
                first_error.get_or_insert(e);
            }
        }
    }

    if let Some(e) = first_error {
        return Err(e);
    }
    info!(
        "{} tareas de más de {} días borradas de la carpeta {}",
        deleted.len(),
        days_old,
        folder_name
    );
    Ok(deleted)
}
