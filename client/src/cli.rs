use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use client::job::{download_artifact, load_artifact, monitor_task};
use client::{
    delete_old, Batch, BatchRunError, ClientConfig, ConsoleProgress, HttpTransport, Job,
    MonitorOutcome, Transport, WebError,
};
use common::{Simulation, TaskInfo, TaskName, DEFAULT_DATA_DIR};
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Parser)]
#[command(name = "client")]
#[command(about = "CLI para correr simulaciones en el servicio remoto")]
struct Cli {
    /// URL base del servicio (pisa SIM_API_URL)
    #[arg(long, global = true)]
    url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sube una simulación (y opcionalmente la inicia)
    Submit {
        #[arg(value_name = "SIM_JSON")]
        file: PathBuf,
        /// Nombre de la tarea; por defecto, el nombre del archivo
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        folder: Option<String>,
        #[arg(long)]
        callback_url: Option<String>,
        /// Iniciar la tarea apenas se sube
        #[arg(long)]
        start: bool,
    },
    /// Consulta el estado de una tarea
    Status {
        #[arg(value_name = "TASK_ID")]
        id: String,
    },
    /// Inicia una tarea ya subida
    Start {
        #[arg(value_name = "TASK_ID")]
        id: String,
    },
    /// Muestra el progreso de una tarea hasta que termina
    Monitor {
        #[arg(value_name = "TASK_ID")]
        id: String,
    },
    /// Descarga los resultados de una tarea
    Download {
        #[arg(value_name = "TASK_ID")]
        id: String,
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },
    /// Carga (descargando si hace falta) y resume los resultados
    Load {
        #[arg(value_name = "TASK_ID")]
        id: String,
        #[arg(value_name = "PATH")]
        path: PathBuf,
        /// Índice de la fuente para normalizar; negativo = sin normalizar
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        normalize_index: i64,
    },
    /// Borra una tarea en el servicio
    Delete {
        #[arg(value_name = "TASK_ID")]
        id: String,
    },
    /// Corre un batch de simulaciones y descarga los resultados
    Batch {
        #[arg(value_name = "SIM_JSON", required = true)]
        files: Vec<PathBuf>,
        #[arg(long, default_value = DEFAULT_DATA_DIR)]
        dir: PathBuf,
        #[arg(long)]
        folder: Option<String>,
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        normalize_index: i64,
    },
    /// Lista las tareas de una carpeta
    Tasks {
        #[arg(long)]
        folder: Option<String>,
    },
    /// Borra las tareas de una carpeta con más de N días
    DeleteOld {
        #[arg(long)]
        folder: Option<String>,
        #[arg(long, default_value_t = 100)]
        days: u32,
    },
}

fn read_simulation(path: &Path) -> Result<Simulation> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("no se pudo leer {}", path.display()))?;
    Simulation::from_json(&text).with_context(|| format!("{} no es una simulación válida", path.display()))
}

/// Nombre de tarea a partir del nombre del archivo (sin extensión).
fn task_name_for(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "tarea".to_string())
}

fn normalize_arg(value: i64) -> Option<usize> {
    usize::try_from(value).ok()
}

/// Token que se cancela con Ctrl-C.
fn ctrl_c_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C: cancelando el monitoreo");
            trigger.cancel();
        }
    });
    token
}

fn print_info(info: &TaskInfo) {
    println!("Tarea:");
    println!("  id: {}", info.task_id);
    println!("  nombre: {}", info.task_name);
    println!("  carpeta: {}", info.folder_name);
    println!("  estado: {}", info.status);
    if let Some(ref v) = info.solver_version {
        println!("  solver: {}", v);
    }
    if let Some(size) = info.size_bytes {
        println!("  tamaño: {} bytes", size);
    }
    if let Some(credits) = info.credits {
        println!("  créditos: {:.3}", credits);
    }
    println!("  submitted_at: {}", info.submitted_at);
    if let Some(ref started) = info.started_at {
        println!("  iniciado: {}", started);
    }
    if let Some(ref done) = info.finished_at {
        println!("  finalizado: {}", done);
    }
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ClientConfig::from_env();
    if let Some(url) = cli.url {
        config.api_url = url.trim_end_matches('/').to_string();
    }
    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(&config)?);

    match cli.command {
        Commands::Submit {
            file,
            name,
            folder,
            callback_url,
            start,
        } => {
            let simulation = read_simulation(&file)?;
            let name = name.unwrap_or_else(|| task_name_for(&file));

            let mut job = Job::new(transport, simulation, name)
                .with_folder(folder.unwrap_or_else(|| config.folder_name.clone()));
            if let Some(url) = callback_url {
                job = job.with_callback_url(url);
            }

            job.upload().await?;
            if start {
                job.start().await?;
            }
            print_info(&job.get_info().await?);
        }

        Commands::Status { id } => {
            let info = transport.query_status(&id).await?;
            print_info(&info);
            if info.status == common::TaskStatus::Running {
                let run = transport.query_run_info(&id).await?;
                println!("  progreso: {}", run.summary());
            }
        }

        Commands::Start { id } => {
            transport.request_start(&id).await?;
            println!("Tarea {} iniciada", id);
        }

        Commands::Monitor { id } => {
            let cancel = ctrl_c_token();
            let mut progress = ConsoleProgress::default();
            let outcome = monitor_task(
                transport.as_ref(),
                &id,
                &id,
                config.refresh_interval,
                &mut progress,
                &cancel,
            )
            .await?;
            if outcome == MonitorOutcome::Cancelled {
                bail!("monitoreo cancelado");
            }
            let info = transport.query_status(&id).await?;
            println!("Estado final: {}", info.status);
        }

        Commands::Download { id, path } => {
            download_artifact(transport.as_ref(), &id, &path).await?;
            println!("Resultados guardados en {}", path.display());
        }

        Commands::Load {
            id,
            path,
            normalize_index,
        } => {
            let result =
                load_artifact(transport.as_ref(), &id, &path, normalize_arg(normalize_index))
                    .await?;
            println!("Resultados de {}:", id);
            match result.normalize_index {
                Some(i) => println!("  normalizados con la fuente {}", i),
                None => println!("  sin normalizar"),
            }
            if result.diverged {
                println!("  ATENCIÓN: la simulación divergió");
            }
            if let Ok(decay) = result.final_decay_value() {
                println!("  field decay final: {:.2e}", decay);
            }
            for (name, data) in &result.monitor_data {
                println!("  monitor {} ({:?}): {} puntos", name, data.domain, data.values.len());
            }
        }

        Commands::Delete { id } => match transport.request_delete(&id).await {
            Ok(()) => println!("Tarea {} borrada", id),
            Err(WebError::NotFound(_)) => println!("La tarea {} ya no existía", id),
            Err(e) => return Err(e.into()),
        },

        Commands::Batch {
            files,
            dir,
            folder,
            normalize_index,
        } => {
            // En el orden de la línea de comandos
            let mut simulations: Vec<(TaskName, Simulation)> = Vec::new();
            for file in &files {
                let name = task_name_for(file);
                if simulations.iter().any(|(n, _)| *n == name) {
                    bail!("nombre de tarea repetido en el batch: {}", name);
                }
                simulations.push((name, read_simulation(file)?));
            }

            let mut batch = Batch::new(transport, simulations)
                .with_folder(folder.unwrap_or_else(|| config.folder_name.clone()))
                .with_refresh_interval(config.refresh_interval);

            let cancel = ctrl_c_token();
            let mut progress = ConsoleProgress::default();
            let data = match batch
                .run(&dir, normalize_arg(normalize_index), &mut progress, &cancel)
                .await
            {
                Ok(data) => data,
                Err(BatchRunError::Incomplete { data, errors }) => {
                    eprintln!("{}", errors);
                    data
                }
                Err(e) => return Err(e.into()),
            };

            println!("Estado final:");
            for (name, job) in batch.jobs() {
                match job.get_info().await {
                    Ok(info) => println!("  {}: {} ({})", name, info.status, info.task_id),
                    Err(e) => println!("  {}: sin estado ({})", name, e),
                }
            }

            if let Err(e) = batch.download(&dir).await {
                warn!("{}", e);
            }
            println!("Resultados en {}: {} tareas", dir.display(), data.len());
        }

        Commands::DeleteOld { folder, days } => {
            let folder = folder.unwrap_or_else(|| config.folder_name.clone());
            let deleted = delete_old(transport.as_ref(), &folder, days).await?;
            println!(
                "{} tareas con más de {} días borradas de {}",
                deleted.len(),
                days,
                folder
            );
        }

        Commands::Tasks { folder } => {
            let folder = folder.unwrap_or_else(|| config.folder_name.clone());
            let tasks = transport.list_tasks(&folder).await?;
            if tasks.is_empty() {
                println!("No hay tareas en la carpeta {}.", folder);
            } else {
                for t in tasks {
                    println!(
                        "{}  {:<13} {}  ({})",
                        t.task_id,
                        t.status.label(),
                        t.task_name,
                        t.submitted_at.format("%Y-%m-%d %H:%M:%S")
                    );
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_name_sale_del_nombre_de_archivo() {
        assert_eq!(task_name_for(Path::new("/sims/barrido_01.json")), "barrido_01");
    }

    #[test]
    fn normalize_negativo_desactiva() {
        assert_eq!(normalize_arg(-1), None);
        assert_eq!(normalize_arg(2), Some(2));
    }

    #[test]
    fn parsea_batch_con_varios_archivos() {
        let cli = Cli::try_parse_from(["client", "batch", "a.json", "b.json", "--dir", "out"])
            .unwrap();
        match cli.command {
            Commands::Batch { files, dir, .. } => {
                assert_eq!(files.len(), 2);
                assert_eq!(dir, PathBuf::from("out"));
            }
            _ => panic!("se esperaba el subcomando batch"),
        }
    }

    #[test]
    fn parsea_delete_old_con_default() {
        let cli = Cli::try_parse_from(["client", "delete-old", "--folder", "viejas"]).unwrap();
        match cli.command {
            Commands::DeleteOld { folder, days } => {
                assert_eq!(folder.as_deref(), Some("viejas"));
                assert_eq!(days, 100);
            }
            _ => panic!("se esperaba el subcomando delete-old"),
        }
    }
}
