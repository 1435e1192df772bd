use std::fmt;

use common::{DataError, TaskName, ValidationError};
use thiserror::Error;

/// Errores de la capa de orquestación.
#[derive(Debug, Error)]
pub enum WebError {
    /// Falla de conectividad; se puede reintentar.
    #[error("error de transporte: {0}")]
    Transport(String),

    /// El servicio rechazó el pedido; trae el mensaje del servidor.
    #[error("el servicio rechazó el pedido (status {status}): {message}")]
    Service { status: u16, message: String },

    #[error("tarea no encontrada: {0}")]
    NotFound(String),

    #[error("resultados todavía no disponibles: {0}")]
    NotReady(String),

    #[error("simulación inválida: {0}")]
    Validation(#[from] ValidationError),

    #[error("error en los datos de resultados: {0}")]
    Data(#[from] DataError),

    #[error("error de E/S: {0}")]
    Io(#[from] std::io::Error),

    #[error("no se pudo serializar la simulación: {0}")]
    Encode(#[source] serde_json::Error),

    /// Configuración local inutilizable (por ejemplo una API key con
    /// caracteres inválidos para un header).
    #[error("configuración inválida: {0}")]
    Config(String),

    #[error("operación cancelada")]
    Cancelled,
}

impl WebError {
    /// Fallas de conectividad y 5xx del servicio (proxies, reinicios).
    pub fn is_retryable(&self) -> bool {
        match self {
            WebError::Transport(_) => true,
            WebError::Service { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub(crate) fn task_id_unset(name: &str) -> Self {
        WebError::NotFound(format!("la tarea '{name}' no tiene task_id (¿falta upload()?)"))
    }
}

/// Fallas individuales de una operación de batch. La operación se intenta
/// sobre todos los miembros antes de reportar.
#[derive(Debug)]
pub struct BatchError {
    pub failures: Vec<(TaskName, WebError)>,
}

impl BatchError {
    pub fn failed_names(&self) -> Vec<&str> {
        self.failures.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// `Ok(())` si no hubo fallas.
    pub(crate) fn check(failures: Vec<(TaskName, WebError)>) -> Result<(), BatchError> {
        if failures.is_empty() {
            Ok(())
        } else {
            Err(BatchError { failures })
        }
    }
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} tarea(s) del batch fallaron:", self.failures.len())?;
        for (name, err) in &self.failures {
            write!(f, "\n  - {name}: {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for BatchError {}
