use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};

use tracing::{debug, warn};

pub const DEFAULT_API_URL: &str = "http://localhost:8080";
pub const DEFAULT_FOLDER: &str = "default";
pub const DEFAULT_REFRESH_MS: u64 = 2000;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
/// Archivo de credenciales, relativo a `$HOME`.
pub const CREDENTIALS_FILE: &str = ".sim/credentials.json";

/// Configuración del cliente, leída de variables de entorno.
/// - `SIM_API_URL`: URL base del servicio (default http://localhost:8080)
/// - `SIM_FOLDER`: carpeta remota para las tareas nuevas
/// - `SIM_REFRESH_MS`: intervalo de sondeo del monitor
/// - `SIM_HTTP_TIMEOUT_SECS`: timeout por request
/// - `SIM_SOLVER_VERSION`: versión del solver a pedir (opcional)
/// - `SIM_API_KEY`: API key; si no está, se lee `api_key` de
///   `SIM_CREDENTIALS_FILE` (default `$HOME/.sim/credentials.json`)
#[derive(Clone, PartialEq)]
pub struct ClientConfig {
    pub api_url: String,
    pub folder_name: String,
    pub refresh_interval: Duration,
    pub http_timeout: Duration,
    pub solver_version: Option<String>,
    pub api_key: Option<String>,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_url", &self.api_url)
            .field("folder_name", &self.folder_name)
            .field("refresh_interval", &self.refresh_interval)
            .field("http_timeout", &self.http_timeout)
            .field("solver_version", &self.solver_version)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .finish()
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            folder_name: DEFAULT_FOLDER.to_string(),
            refresh_interval: Duration::from_millis(DEFAULT_REFRESH_MS),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            solver_version: None,
            api_key: None,
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Igual que `from_env` pero con una fuente de variables inyectable.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let api_url = lookup("SIM_API_URL")
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or(defaults.api_url);
        let folder_name = lookup("SIM_FOLDER").unwrap_or(defaults.folder_name);

        let refresh_interval = parse_u64(&lookup, "SIM_REFRESH_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.refresh_interval);
        let http_timeout = parse_u64(&lookup, "SIM_HTTP_TIMEOUT_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.http_timeout);

        let solver_version = lookup("SIM_SOLVER_VERSION").filter(|v| !v.is_empty());

        let api_key = lookup("SIM_API_KEY")
            .filter(|k| !k.trim().is_empty())
            .map(|k| k.trim().to_string())
            .or_else(|| {
                let path = lookup("SIM_CREDENTIALS_FILE")
                    .map(PathBuf::from)
                    .or_else(|| lookup("HOME").map(|home| Path::new(&home).join(CREDENTIALS_FILE)))?;
                read_credentials(&path)
            });

        Self {
            api_url,
            folder_name,
            refresh_interval,
            http_timeout,
            solver_version,
            api_key,
        }
    }
}

/// Lee `{"api_key": "..."}` de `path`. Un archivo ausente no es un error;
/// uno ilegible se ignora con un warning.
fn read_credentials(path: &Path) -> Option<String> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("no se pudo leer {}: {}", path.display(), e);
            return None;
        }
    };

    let key = serde_json::from_str::<serde_json::Value>(&text)
        .ok()
        .and_then(|v| v.get("api_key")?.as_str().map(str::to_string))
        .filter(|k| !k.trim().is_empty());
    match key {
        Some(key) => {
            debug!("usando credenciales de {}", path.display());
            Some(key)
        }
        None => {
            warn!("{} no tiene un campo api_key válido", path.display());
            None
        }
    }
}

fn parse_u64<F>(lookup: &F, key: &str) -> Option<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("{}={:?} no es un número válido, usando el valor por defecto", key, raw);
            None
        }
    }
}
