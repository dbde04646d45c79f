use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use batchvideo_core::batch::BatchEvent;
use batchvideo_core::error::AppError;
use batchvideo_core::media::JobId;
use batchvideo_core::sidecar_api::{self, ConfigureParams, SidecarSession};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};

const STARTUP_CLEANUP_MAX_AGE_HOURS: u64 = 24;

#[derive(Debug, Deserialize)]
struct RpcRequest {
    id: u64,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, serde::Serialize)]
struct RpcSuccess {
    id: u64,
    result: Value,
}

#[derive(Debug, serde::Serialize)]
struct RpcFailure {
    id: u64,
    error: RpcErrorPayload,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct RpcErrorPayload {
    summary: String,
    detail: String,
}

#[derive(Debug, serde::Serialize)]
struct RpcEvent {
    event: String,
    payload: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
enum MediaInspectParams {
    Metadata {
        #[serde(rename = "inputPath")]
        input_path: PathBuf,
    },
    CommandPreview {
        #[serde(rename = "jobId")]
        job_id: Option<JobId>,
        #[serde(rename = "inputPath")]
        input_path: Option<PathBuf>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddParams {
    paths: Vec<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobParams {
    job_id: JobId,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct CancelParams {
    job_id: Option<JobId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DiscardParams {
    path: PathBuf,
}

type SharedWriter = Arc<Mutex<io::Stdout>>;

fn write_json_line<T: serde::Serialize>(writer: &mut impl Write, value: &T) -> io::Result<()> {
    serde_json::to_writer(&mut *writer, value)
        .map_err(|e| io::Error::other(format!("serialize response: {}", e)))?;
    writer.write_all(b"\n")?;
    writer.flush()
}

fn write_json_line_shared<T: serde::Serialize>(writer: &SharedWriter, value: &T) -> io::Result<()> {
    let mut guard = writer.lock();
    write_json_line(&mut *guard, value)
}

fn emit_rpc_event(writer: &SharedWriter, event: &str, payload: Value) {
    let message = RpcEvent {
        event: event.to_string(),
        payload,
    };
    if let Err(e) = write_json_line_shared(writer, &message) {
        log::warn!(target: "batchvideo::sidecar", "failed to emit {}: {}", event, e);
    }
}

fn error_payload(err: &AppError) -> RpcErrorPayload {
    let payload = sidecar_api::error_payload(err);
    RpcErrorPayload {
        summary: payload.summary,
        detail: payload.detail,
    }
}

fn params_from_value<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, AppError> {
    serde_json::from_value(params)
        .map_err(|e| AppError::invalid_input(format!("Invalid params payload: {}", e)))
}

fn to_result_value<T: serde::Serialize>(value: T, what: &str) -> Result<Value, AppError> {
    serde_json::to_value(value)
        .map_err(|e| AppError::from(format!("Failed to serialize {}: {}", what, e)))
}

fn is_async_request(method: &str) -> bool {
    method == "batch.process"
}

fn dispatch_sync(
    method: &str,
    params: Value,
    session: &SidecarSession,
) -> Result<Value, AppError> {
    match method {
        "app.capabilities" => to_result_value(sidecar_api::app_capabilities(), "app capabilities"),
        "media.inspect" => {
            let parsed: MediaInspectParams = params_from_value(params)?;
            match parsed {
                MediaInspectParams::Metadata { input_path } => {
                    let result = sidecar_api::get_video_metadata(input_path)?;
                    to_result_value(result, "metadata")
                }
                MediaInspectParams::CommandPreview { job_id, input_path } => {
                    let command = match job_id {
                        Some(job_id) => session.batch().command_preview(&job_id)?,
                        None => session.command_preview(input_path),
                    };
                    Ok(Value::String(command))
                }
            }
        }
        "batch.add" => {
            let parsed: AddParams = params_from_value(params)?;
            let job_ids = session.add(parsed.paths)?;
            Ok(json!({ "jobIds": job_ids }))
        }
        "batch.remove" => {
            let parsed: JobParams = params_from_value(params)?;
            session.remove(&parsed.job_id)?;
            Ok(json!({ "removed": true, "jobId": parsed.job_id }))
        }
        "batch.clear" => Ok(json!({ "removed": session.clear() })),
        "batch.configure" => {
            let parsed: ConfigureParams = params_from_value(params)?;
            to_result_value(session.configure(parsed)?, "batch state")
        }
        "batch.state" => to_result_value(session.state(), "batch state"),
        "batch.thumbnail" => {
            let parsed: JobParams = params_from_value(params)?;
            let path = session.thumbnail(&parsed.job_id)?;
            Ok(json!({ "jobId": parsed.job_id, "path": path }))
        }
        "batch.cancel" => {
            let parsed: CancelParams = if params.is_null() {
                CancelParams::default()
            } else {
                params_from_value(params)?
            };
            to_result_value(session.cancel(parsed.job_id)?, "cancel result")
        }
        "file.discard" => {
            let parsed: DiscardParams = params_from_value(params)?;
            sidecar_api::discard_file(parsed.path)?;
            Ok(json!({ "discarded": true }))
        }
        _ => Err(AppError::invalid_input(format!("Unknown method: {}", method))),
    }
}

fn respond(writer: &SharedWriter, id: u64, result: Result<Value, AppError>) {
    let written = match result {
        Ok(result) => write_json_line_shared(writer, &RpcSuccess { id, result }),
        Err(err) => write_json_line_shared(
            writer,
            &RpcFailure {
                id,
                error: error_payload(&err),
            },
        ),
    };
    if let Err(e) = written {
        log::error!(target: "batchvideo::sidecar", "failed to write response {}: {}", id, e);
    }
}

fn handle_batch_process(
    request: RpcRequest,
    writer: &SharedWriter,
    session: &SidecarSession,
    runtime: &tokio::runtime::Handle,
) {
    let result = runtime
        .block_on(session.process())
        .and_then(|summary| to_result_value(summary, "batch summary"));
    respond(writer, request.id, result);
}

/// Forget workers that already exited; only live ones are joined at shutdown.
fn prune_finished(workers: &mut Vec<thread::JoinHandle<()>>) {
    workers.retain(|worker| !worker.is_finished());
}

fn main() -> io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let _enter = runtime.enter();

    sidecar_api::cleanup_startup_temp(Duration::from_secs(STARTUP_CLEANUP_MAX_AGE_HOURS * 3600));

    let stdout: SharedWriter = Arc::new(Mutex::new(io::stdout()));
    let session = SidecarSession::default();
    {
        let writer = Arc::clone(&stdout);
        session.batch().subscribe(Arc::new(move |event: &BatchEvent| {
            let (name, payload) = sidecar_api::event_message(event);
            emit_rpc_event(&writer, name, payload);
        }));
    }
    log::info!(
        target: "batchvideo::sidecar",
        "sidecar ready (protocol {})",
        sidecar_api::PROTOCOL_VERSION
    );

    let stdin = io::stdin();
    let mut async_workers: Vec<thread::JoinHandle<()>> = Vec::new();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                let failure = RpcFailure {
                    id: 0,
                    error: RpcErrorPayload {
                        summary: "Invalid input stream".to_string(),
                        detail: err.to_string(),
                    },
                };
                let _ = write_json_line_shared(&stdout, &failure);
                continue;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let request: RpcRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                let failure = RpcFailure {
                    id: 0,
                    error: RpcErrorPayload {
                        summary: "Invalid request".to_string(),
                        detail: err.to_string(),
                    },
                };
                let _ = write_json_line_shared(&stdout, &failure);
                continue;
            }
        };

        if is_async_request(&request.method) {
            prune_finished(&mut async_workers);
            let writer = Arc::clone(&stdout);
            let session = session.clone();
            let handle = runtime.handle().clone();
            async_workers.push(thread::spawn(move || {
                handle_batch_process(request, &writer, &session, &handle);
            }));
        } else {
            let id = request.id;
            let result = dispatch_sync(&request.method, request.params, &session);
            respond(&stdout, id, result);
        }
    }

    // Host closed stdin: stop whatever is still encoding.
    if session.batch().is_processing() {
        session.batch().cancel();
    }
    for worker in async_workers {
        let _ = worker.join();
    }
    log::info!(target: "batchvideo::sidecar", "sidecar exiting");
    Ok(())
}
