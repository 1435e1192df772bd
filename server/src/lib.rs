//! Servicio de simulación emulado: API HTTP de tareas más un loop que
//! avanza cada tarea iniciada por la secuencia de status.

pub mod handlers;
pub mod solver;
pub mod state;

pub use handlers::build_router;
pub use solver::run_solver_loop;
pub use state::AppState;

/// Dirección por defecto del servicio.
pub const DEFAULT_ADDR: &str = "0.0.0.0:8080";
/// Duración por defecto de cada paso del solver, en milisegundos.
pub const DEFAULT_STEP_MS: u64 = 500;
