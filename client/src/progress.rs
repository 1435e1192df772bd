use std::collections::HashMap;

use common::TaskStatus;
use tracing::info;

/// Destino abstracto de las actualizaciones de progreso del monitor.
///
/// Cada actualización es `(nombre, etiqueta de status, unidades completadas,
/// unidades totales)`; el núcleo no prescribe cómo se dibuja.
pub trait ProgressSink: Send {
    /// Crea la unidad de display de una tarea antes de la primera vuelta.
    fn begin(&mut self, name: &str, status_label: &str, completed: usize, total: usize) {
        self.update(name, status_label, completed, total);
    }

    fn update(&mut self, name: &str, status_label: &str, completed: usize, total: usize);

    fn finish(&mut self) {}
}

/// Unidades completadas para un status; los estados fuera de la secuencia
/// conservan el valor anterior.
pub fn completed_units(status: TaskStatus, previous: usize) -> usize {
    status.progress_index().unwrap_or(previous)
}

/// Descarta todo.
#[derive(Debug, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn update(&mut self, _name: &str, _status_label: &str, _completed: usize, _total: usize) {}
}

/// Emite un evento de `tracing` cada vez que cambia el status de una tarea.
#[derive(Debug, Default)]
pub struct LogProgress {
    last: HashMap<String, String>,
}

impl ProgressSink for LogProgress {
    fn update(&mut self, name: &str, status_label: &str, completed: usize, total: usize) {
        if self.last.get(name).map(String::as_str) == Some(status_label) {
            return;
        }
        self.last.insert(name.to_string(), status_label.to_string());
        info!(task = name, "status = {} ({}/{})", status_label, completed, total);
    }
}

/// Barra de texto por tarea en stdout, una línea por cambio de status.
#[derive(Debug, Default)]
pub struct ConsoleProgress {
    last: HashMap<String, (String, usize)>,
}

impl ConsoleProgress {
    pub fn render(name: &str, status_label: &str, completed: usize, total: usize) -> String {
        let total = total.max(1);
        let filled = completed.min(total);
        format!(
            "{}: status = {:<13} [{}{}] {}/{}",
            name,
            status_label,
            "#".repeat(filled),
            ".".repeat(total - filled),
            filled,
            total
        )
    }
}

impl ProgressSink for ConsoleProgress {
    fn update(&mut self, name: &str, status_label: &str, completed: usize, total: usize) {
        let current = (status_label.to_string(), completed);
        if self.last.get(name) == Some(&current) {
            return;
        }
        println!("{}", Self::render(name, status_label, completed, total));
        self.last.insert(name.to_string(), current);
    }

    fn finish(&mut self) {
        println!("Batch completo.");
    }
}
