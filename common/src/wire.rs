use serde::{Deserialize, Serialize};

use crate::task::{TaskId, TaskName};

/* --------- Cuerpos de request/response del servicio --------- */

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCreateRequest {
    pub task_name: TaskName,
    pub callback_url: Option<String>,
    pub solver_version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCreateResponse {
    pub task_id: TaskId,
}

/// Cuerpo de error que devuelve el servicio en respuestas no exitosas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self { error: error.into() }
    }
}
