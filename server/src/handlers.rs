use axum::{
    extract::{Path, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use common::{
    ErrorBody, RunInfo, Simulation, TaskCreateRequest, TaskCreateResponse, TaskInfo, TaskStatus,
};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::state::{AppState, TaskRecord};

/// Créditos cobrados por cada 1e12 celdas·pasos.
const CREDITS_PER_TERA_STEP: f64 = 0.025;

type ApiError = (StatusCode, Json<ErrorBody>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(ErrorBody::new(message)))
}

fn not_found(task_id: &str) -> ApiError {
    api_error(StatusCode::NOT_FOUND, format!("tarea {task_id} no existe"))
}

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route(
            "/api/v1/folders/:folder/tasks",
            post(create_task).get(list_tasks),
        )
        .route("/api/v1/tasks/:id", get(get_task).delete(delete_task))
        .route("/api/v1/tasks/:id/simulation", put(upload_simulation))
        .route("/api/v1/tasks/:id/run_info", get(get_run_info))
        .route("/api/v1/tasks/:id/start", post(start_task))
        .route("/api/v1/tasks/:id/output", get(get_output))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/health", get(health))
        .merge(api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// Sin api_key configurada el servicio queda abierto
async fn require_api_key(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = state.api_key.as_deref() else {
        return Ok(next.run(req).await);
    };

    let provided = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    if provided == Some(expected) {
        Ok(next.run(req).await)
    } else {
        warn!("request sin credenciales válidas a {}", req.uri().path());
        Err(api_error(StatusCode::UNAUTHORIZED, "credenciales inválidas"))
    }
}

/* ---------------- handlers HTTP ---------------- */

async fn health() -> &'static str {
    "ok"
}

// Crea la tarea en draft, todavía sin simulación
async fn create_task(
    State(state): State<AppState>,
    Path(folder): Path<String>,
    Json(req): Json<TaskCreateRequest>,
) -> Json<TaskCreateResponse> {
    let task_id = uuid::Uuid::new_v4().to_string();

    let info = TaskInfo {
        task_id: task_id.clone(),
        task_name: req.task_name,
        folder_name: folder,
        status: TaskStatus::Draft,
        solver_version: req.solver_version,
        callback_url: req.callback_url,
        size_bytes: None,
        credits: None,
        submitted_at: Utc::now(),
        started_at: None,
        finished_at: None,
    };

    info!(
        "tarea creada {} ({}) en carpeta {}",
        task_id, info.task_name, info.folder_name
    );
    state.tasks().insert(task_id.clone(), TaskRecord::new(info));

    Json(TaskCreateResponse { task_id })
}

async fn list_tasks(
    State(state): State<AppState>,
    Path(folder): Path<String>,
) -> Json<Vec<TaskInfo>> {
    let tasks = state.tasks();
    let mut infos: Vec<TaskInfo> = tasks
        .values()
        .filter(|r| r.info.folder_name == folder)
        .map(|r| r.info.clone())
        .collect();
    infos.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));
    Json(infos)
}

// Recibe el JSON de la simulación y lo valida antes de guardarlo
async fn upload_simulation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: String,
) -> Result<StatusCode, ApiError> {
    let simulation = Simulation::from_json(&body)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("simulación inválida: {e}")))?;
    simulation
        .validate()
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;

    let mut tasks = state.tasks();
    let record = tasks.get_mut(&id).ok_or_else(|| not_found(&id))?;
    if record.info.status != TaskStatus::Draft {
        return Err(api_error(
            StatusCode::CONFLICT,
            format!("tarea {id} ya fue iniciada"),
        ));
    }

    let cell_steps = simulation.num_cells() * simulation.num_time_steps();
    record.info.size_bytes = Some(body.len() as u64);
    record.info.credits = Some(cell_steps / 1e12 * CREDITS_PER_TERA_STEP);
    record.simulation = Some(simulation);

    Ok(StatusCode::NO_CONTENT)
}

async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TaskInfo>, ApiError> {
    let tasks = state.tasks();
    tasks
        .get(&id)
        .map(|r| Json(r.info.clone()))
        .ok_or_else(|| not_found(&id))
}

async fn get_run_info(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RunInfo>, ApiError> {
    let tasks = state.tasks();
    tasks
        .get(&id)
        .map(|r| Json(r.run_info))
        .ok_or_else(|| not_found(&id))
}

// Pasa de draft a queued; si ya estaba iniciada no hace nada
async fn start_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TaskInfo>, ApiError> {
    let mut tasks = state.tasks();
    let record = tasks.get_mut(&id).ok_or_else(|| not_found(&id))?;

    if record.simulation.is_none() {
        return Err(api_error(
            StatusCode::CONFLICT,
            format!("tarea {id} no tiene simulación"),
        ));
    }

    if record.info.status == TaskStatus::Draft {
        record.info.status = TaskStatus::Queued;
        record.info.started_at = Some(Utc::now());
        info!("tarea {} encolada", id);
    }

    Ok(Json(record.info.clone()))
}

async fn get_output(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let tasks = state.tasks();
    let record = tasks.get(&id).ok_or_else(|| not_found(&id))?;

    match (&record.artifact, record.info.status) {
        (Some(bytes), TaskStatus::Success) => Ok((
            [(header::CONTENT_TYPE, "application/json")],
            bytes.clone(),
        )),
        (_, status) => Err(api_error(
            StatusCode::CONFLICT,
            format!("tarea {id} sin resultados (status {status})"),
        )),
    }
}

async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let removed = state.tasks().remove(&id);
    match removed {
        Some(record) => {
            if !record.info.status.is_finished() && record.info.status != TaskStatus::Draft {
                warn!("tarea {} borrada en status {}", id, record.info.status);
            } else {
                info!("tarea {} borrada", id);
            }
            Ok(StatusCode::NO_CONTENT)
        }
        None => Err(not_found(&id)),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use std::time::Duration;
    use tower::ServiceExt;

    pub(crate) fn sample_simulation() -> Simulation {
        let text = r#"{
            "size": [2.0, 2.0, 2.0],
            "grid_size": [0.1, 0.1, 0.1],
            "run_time": 1e-12,
            "sources": [{
                "name": "dipolo",
                "center": [0.0, 0.0, 0.0],
                "source_time": { "freq0": 2e14, "fwidth": 1e13, "amplitude": 2.0 },
                "kind": { "type": "PointDipole", "polarization": "Ez" }
            }],
            "monitors": [
                { "type": "Flux", "name": "flujo", "center": [0.5, 0.0, 0.0],
                  "size": [0.0, 1.0, 1.0], "freqs": [1.9e14, 2e14, 2.1e14] },
                { "type": "FieldTime", "name": "tiempo", "center": [0.0, 0.0, 0.0],
                  "size": [0.0, 0.0, 0.0] }
            ]
        }"#;
        Simulation::from_json(text).unwrap()
    }

    pub(crate) fn sample_info(task_id: &str) -> TaskInfo {
        TaskInfo {
            task_id: task_id.to_string(),
            task_name: "prueba".to_string(),
            folder_name: "default".to_string(),
            status: TaskStatus::Draft,
            solver_version: None,
            callback_url: None,
            size_bytes: None,
            credits: None,
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    async fn call(app: &Router, method: Method, uri: &str, body: String) -> (StatusCode, Vec<u8>) {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    async fn create(app: &Router, name: &str) -> String {
        let req = TaskCreateRequest {
            task_name: name.to_string(),
            callback_url: None,
            solver_version: None,
        };
        let (status, body) = call(
            app,
            Method::POST,
            "/api/v1/folders/default/tasks",
            serde_json::to_string(&req).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        serde_json::from_slice::<TaskCreateResponse>(&body)
            .unwrap()
            .task_id
    }

    fn app() -> (AppState, Router) {
        let state = AppState::new(Duration::from_millis(10));
        let app = build_router(state.clone());
        (state, app)
    }

    #[tokio::test]
    async fn crear_subir_e_iniciar() {
        let (state, app) = app();
        let id = create(&app, "a").await;

        let sim = sample_simulation().to_json().unwrap();
        let (status, _) = call(&app, Method::PUT, &format!("/api/v1/tasks/{id}/simulation"), sim).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = call(&app, Method::POST, &format!("/api/v1/tasks/{id}/start"), String::new()).await;
        assert_eq!(status, StatusCode::OK);
        let info: TaskInfo = serde_json::from_slice(&body).unwrap();
        assert_eq!(info.status, TaskStatus::Queued);
        assert!(info.started_at.is_some());
        assert!(info.size_bytes.unwrap() > 0);

        // Un segundo start no retrocede el status
        state.tasks().get_mut(&id).unwrap().info.status = TaskStatus::Running;
        let (_, body) = call(&app, Method::POST, &format!("/api/v1/tasks/{id}/start"), String::new()).await;
        let info: TaskInfo = serde_json::from_slice(&body).unwrap();
        assert_eq!(info.status, TaskStatus::Running);
    }

    #[tokio::test]
    async fn simulacion_invalida_es_400() {
        let (_, app) = app();
        let id = create(&app, "a").await;

        let mut sim = sample_simulation();
        sim.run_time = -1.0;
        let (status, body) = call(
            &app,
            Method::PUT,
            &format!("/api/v1/tasks/{id}/simulation"),
            sim.to_json().unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let err: ErrorBody = serde_json::from_slice(&body).unwrap();
        assert!(err.error.contains("run_time"), "{}", err.error);

        let (status, _) = call(&app, Method::PUT, &format!("/api/v1/tasks/{id}/simulation"), "{".into()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn start_sin_simulacion_es_409() {
        let (_, app) = app();
        let id = create(&app, "a").await;
        let (status, _) = call(&app, Method::POST, &format!("/api/v1/tasks/{id}/start"), String::new()).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn output_antes_de_success_es_409() {
        let (_, app) = app();
        let id = create(&app, "a").await;
        let (status, _) = call(&app, Method::GET, &format!("/api/v1/tasks/{id}/output"), String::new()).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn tarea_inexistente_es_404() {
        let (_, app) = app();
        for (method, uri) in [
            (Method::GET, "/api/v1/tasks/nada"),
            (Method::GET, "/api/v1/tasks/nada/run_info"),
            (Method::POST, "/api/v1/tasks/nada/start"),
            (Method::DELETE, "/api/v1/tasks/nada"),
        ] {
            let (status, _) = call(&app, method, uri, String::new()).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        }
    }

    #[tokio::test]
    async fn listar_y_borrar_por_carpeta() {
        let (_, app) = app();
        let a = create(&app, "a").await;
        create(&app, "b").await;

        let (_, body) = call(&app, Method::GET, "/api/v1/folders/default/tasks", String::new()).await;
        let infos: Vec<TaskInfo> = serde_json::from_slice(&body).unwrap();
        assert_eq!(infos.len(), 2);

        let (_, body) = call(&app, Method::GET, "/api/v1/folders/otra/tasks", String::new()).await;
        let infos: Vec<TaskInfo> = serde_json::from_slice(&body).unwrap();
        assert!(infos.is_empty());

        let (status, _) = call(&app, Method::DELETE, &format!("/api/v1/tasks/{a}"), String::new()).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = call(&app, Method::GET, &format!("/api/v1/tasks/{a}"), String::new()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn con_api_key_exige_bearer() {
        let state = AppState::new(Duration::from_millis(10)).with_api_key("secreta");
        let app = build_router(state);

        let (status, _) = call(&app, Method::GET, "/api/v1/folders/default/tasks", String::new()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let req = Request::builder()
            .uri("/api/v1/folders/default/tasks")
            .header(header::AUTHORIZATION, "Bearer secreta")
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let req = Request::builder()
            .uri("/api/v1/folders/default/tasks")
            .header(header::AUTHORIZATION, "Bearer otra")
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        // health queda abierto
        let (status, _) = call(&app, Method::GET, "/health", String::new()).await;
        assert_eq!(status, StatusCode::OK);
    }
}
