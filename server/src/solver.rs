use std::collections::BTreeMap;

use chrono::Utc;
use common::{Domain, MonitorData, RunInfo, Simulation, SimulationResult, TaskStatus};
use tracing::{debug, info, warn};

use crate::state::{AppState, TaskRecord, RUNNING_TICKS};

/// Muestras por monitor en el dominio del tiempo.
const TIME_SAMPLES: usize = 32;

/// Loop de emulación del solver: cada `state.step` avanza un paso todas
/// las tareas iniciadas que no terminaron.
pub async fn run_solver_loop(state: AppState) {
    loop {
        tokio::time::sleep(state.step).await;
        advance_all(&state);
    }
}

/// Una pasada sobre todas las tareas.
pub fn advance_all(state: &AppState) {
    let mut tasks = state.tasks();
    for (task_id, record) in tasks.iter_mut() {
        let before = record.info.status;
        advance(record);
        if record.info.status != before {
            debug!("tarea {}: {} -> {}", task_id, before, record.info.status);
            if record.info.status.is_finished() {
                info!("tarea {} terminó con status {}", task_id, record.info.status);
            }
        }
    }
}

/// Avanza una tarea un paso en la secuencia canónica. `draft` espera a
/// `start`, y las tareas terminadas no cambian.
pub fn advance(record: &mut TaskRecord) {
    let status = record.info.status;
    if status == TaskStatus::Draft || status.is_finished() {
        return;
    }

    let Some(simulation) = record.simulation.as_ref() else {
        fail(record, TaskStatus::Error);
        return;
    };

    match status {
        TaskStatus::Preprocess if simulation.sources.is_empty() => {
            warn!("tarea {} sin fuentes, falla en preprocess", record.info.task_id);
            fail(record, TaskStatus::Error);
            return;
        }
        TaskStatus::Running if record.running_ticks + 1 < RUNNING_TICKS => {
            record.running_ticks += 1;
            let done = record.running_ticks as f64 / RUNNING_TICKS as f64;
            record.run_info = RunInfo::new(done, (-6.0 * done).exp());
            return;
        }
        _ => {}
    }

    let Some(next) = status.next_in_sequence() else {
        return;
    };

    if next == TaskStatus::Running {
        record.run_info = RunInfo::new(0.0, 1.0);
    }
    if next == TaskStatus::Postprocess {
        record.run_info = RunInfo::new(1.0, (-6.0f64).exp());
    }
    if next == TaskStatus::Success {
        match emulated_result(simulation).to_bytes() {
            Ok(bytes) => record.artifact = Some(bytes),
            Err(e) => {
                warn!("no se pudo generar el artefacto de {}: {}", record.info.task_id, e);
                fail(record, TaskStatus::Error);
                return;
            }
        }
        record.info.finished_at = Some(Utc::now());
    }
    record.info.status = next;
}

fn fail(record: &mut TaskRecord, status: TaskStatus) {
    record.info.status = status;
    record.info.finished_at = Some(Utc::now());
}

/// Resultados sintéticos: los monitores en frecuencia registran la suma de
/// los espectros de las fuentes, y los de tiempo una oscilación amortiguada.
pub fn emulated_result(simulation: &Simulation) -> SimulationResult {
    let mut monitor_data = BTreeMap::new();

    for monitor in &simulation.monitors {
        let data = match monitor.freqs() {
            Some(freqs) => MonitorData {
                domain: Domain::Frequency,
                coords: freqs.to_vec(),
                values: freqs
                    .iter()
                    .map(|f| {
                        simulation
                            .sources
                            .iter()
                            .map(|s| s.source_time.spectrum_amplitude(*f))
                            .sum::<f64>()
                    })
                    .collect(),
            },
            None => {
                let dt = simulation.run_time / TIME_SAMPLES as f64;
                let freq0 = simulation
                    .sources
                    .first()
                    .map(|s| s.source_time.freq0)
                    .unwrap_or(0.0);
                let coords: Vec<f64> = (0..TIME_SAMPLES).map(|i| i as f64 * dt).collect();
                let values = coords
                    .iter()
                    .map(|t| {
                        let decay = (-(t / simulation.run_time) * 6.0).exp();
                        decay * (2.0 * std::f64::consts::PI * freq0 * t).cos()
                    })
                    .collect();
                MonitorData {
                    domain: Domain::Time,
                    coords,
                    values,
                }
            }
        };
        monitor_data.insert(monitor.name().to_string(), data);
    }

    let log = (1..=RUNNING_TICKS)
        .map(|tick| {
            let done = tick as f64 / RUNNING_TICKS as f64;
            format!("- Time step {:>6} / field decay: {:.3e}", tick, (-6.0 * done).exp())
        })
        .collect::<Vec<_>>()
        .join("\n");

    SimulationResult {
        simulation: simulation.clone(),
        monitor_data,
        log: Some(log),
        diverged: false,
        normalize_index: None,
    }
}
