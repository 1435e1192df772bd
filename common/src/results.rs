use std::path::{Path, PathBuf};

use crate::task::TaskId;

/// Extensión de los artefactos de resultados descargados.
pub const RESULT_EXTENSION: &str = "json";

/// Ruta por defecto para los resultados de un único job.
pub const DEFAULT_DATA_PATH: &str = "simulation_data.json";

/// Directorio por defecto para los resultados de un batch.
pub const DEFAULT_DATA_DIR: &str = ".";

/// Ruta determinística de los resultados de una tarea dentro de `dir`:
/// `{dir}/{task_id}.json`
pub fn artifact_path(dir: &Path, task_id: &TaskId) -> PathBuf {
    dir.join(format!("{task_id}.{RESULT_EXTENSION}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_path_usa_task_id_y_extension() {
        let path = artifact_path(Path::new("/tmp/datos"), &"abc-123".to_string());
        assert_eq!(path, PathBuf::from("/tmp/datos/abc-123.json"));
    }
}
