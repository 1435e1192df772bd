use async_trait::async_trait;
use common::{ErrorBody, RunInfo, TaskCreateRequest, TaskCreateResponse, TaskId, TaskInfo};
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Client, RequestBuilder, Response, StatusCode,
};
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::WebError;
use crate::transport::Transport;

/// `Transport` sobre la API HTTP del servicio de simulación.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    solver_version: Option<String>,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self, WebError> {
        let mut headers = HeaderMap::new();
        if let Some(key) = config.api_key.as_deref() {
            let mut value = HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|_| WebError::Config("la API key no es un header válido".to_string()))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .timeout(config.http_timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| WebError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            solver_version: config.solver_version.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn transport_error(e: reqwest::Error) -> WebError {
    WebError::Transport(e.to_string())
}

/// Envía el request y convierte cualquier status no exitoso en `WebError`.
async fn send(req: RequestBuilder) -> Result<Response, WebError> {
    let resp = req.send().await.map_err(transport_error)?;
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .map(|b| b.error)
        .unwrap_or(body);

    debug!("servicio respondió {}: {}", status, message);

    Err(match status {
        StatusCode::NOT_FOUND => WebError::NotFound(message),
        _ => WebError::Service {
            status: status.as_u16(),
            message,
        },
    })
}

#[async_trait]
impl Transport for HttpTransport {
    async fn submit(
        &self,
        simulation_json: &str,
        task_name: &str,
        folder_name: &str,
        callback_url: Option<&str>,
    ) -> Result<TaskId, WebError> {
        // 1) Crear la tarea en estado draft
        let url = self.url(&format!("/api/v1/folders/{folder_name}/tasks"));
        let req = TaskCreateRequest {
            task_name: task_name.to_string(),
            callback_url: callback_url.map(str::to_string),
            solver_version: self.solver_version.clone(),
        };
        let created: TaskCreateResponse = send(self.client.post(&url).json(&req))
            .await?
            .json()
            .await
            .map_err(transport_error)?;

        // 2) Subir la simulación; si falla, no dejar el draft huérfano
        let url = self.url(&format!("/api/v1/tasks/{}/simulation", created.task_id));
        let uploaded = send(
            self.client
                .put(&url)
                .header(CONTENT_TYPE, "application/json")
                .body(simulation_json.to_string()),
        )
        .await;

        if let Err(e) = uploaded {
            match self.request_delete(&created.task_id).await {
                Ok(()) | Err(WebError::NotFound(_)) => {}
                Err(cleanup) => warn!(
                    "no se pudo borrar el draft {} tras el upload fallido: {}",
                    created.task_id, cleanup
                ),
            }
            return Err(e);
        }

        Ok(created.task_id)
    }

    async fn query_status(&self, task_id: &str) -> Result<TaskInfo, WebError> {
        let url = self.url(&format!("/api/v1/tasks/{task_id}"));
        send(self.client.get(&url))
            .await?
            .json()
            .await
            .map_err(transport_error)
    }

    async fn query_run_info(&self, task_id: &str) -> Result<RunInfo, WebError> {
        let url = self.url(&format!("/api/v1/tasks/{task_id}/run_info"));
        send(self.client.get(&url))
            .await?
            .json()
            .await
            .map_err(transport_error)
    }

    async fn request_start(&self, task_id: &str) -> Result<(), WebError> {
        let url = self.url(&format!("/api/v1/tasks/{task_id}/start"));
        send(self.client.post(&url)).await?;
        Ok(())
    }

    async fn fetch_artifact(&self, task_id: &str) -> Result<Vec<u8>, WebError> {
        let url = self.url(&format!("/api/v1/tasks/{task_id}/output"));
        let resp = match send(self.client.get(&url)).await {
            Ok(resp) => resp,
            Err(WebError::Service { status: 409, message }) => {
                return Err(WebError::NotReady(message))
            }
            Err(e) => return Err(e),
        };
        let bytes = resp.bytes().await.map_err(transport_error)?;
        Ok(bytes.to_vec())
    }

    async fn request_delete(&self, task_id: &str) -> Result<(), WebError> {
        let url = self.url(&format!("/api/v1/tasks/{task_id}"));
        send(self.client.delete(&url)).await?;
        Ok(())
    }

    async fn list_tasks(&self, folder_name: &str) -> Result<Vec<TaskInfo>, WebError> {
        let url = self.url(&format!("/api/v1/folders/{folder_name}/tasks"));
        send(self.client.get(&url))
            .await?
            .json()
            .await
            .map_err(transport_error)
    }
}
