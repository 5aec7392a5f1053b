use actix_web::{get, web, HttpResponse, Responder};
use serde::Serialize;
use tracing::error;

use crate::pipeline::{workspace::check_work_root, UploadPipeline};

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    work_dir: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    active_jobs: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Check the work root off the async executor. Observes only; creating the
/// directory is left to startup.
async fn work_root_writable(pipeline: &UploadPipeline) -> Result<(), String> {
    let root = pipeline.work_root().to_path_buf();
    match web::block(move || check_work_root(&root)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(e) => Err(e.to_string()),
    }
}

/// Health check endpoint
///
/// General health check including work directory writability and the
/// number of transformation processes currently running.
#[get("/health")]
async fn health_check(pipeline: web::Data<UploadPipeline>) -> impl Responder {
    let active_jobs = Some(pipeline.active_jobs());
    match work_root_writable(&pipeline).await {
        Ok(()) => HttpResponse::Ok().json(HealthResponse {
            status: "healthy".to_string(),
            work_dir: "writable".to_string(),
            active_jobs,
            error: None,
        }),
        Err(e) => {
            error!("Health check failed: {}", e);
            HttpResponse::ServiceUnavailable().json(HealthResponse {
                status: "unhealthy".to_string(),
                work_dir: "unavailable".to_string(),
                active_jobs,
                error: Some("Work directory is not writable".to_string()),
            })
        }
    }
}

/// Readiness check endpoint
///
/// Returns 503 while jobs cannot be given a workspace; recovers by itself
/// once the work directory is usable again.
#[get("/ready")]
async fn readiness_check(pipeline: web::Data<UploadPipeline>) -> impl Responder {
    match work_root_writable(&pipeline).await {
        Ok(()) => HttpResponse::Ok().json(HealthResponse {
            status: "ready".to_string(),
            work_dir: "writable".to_string(),
            active_jobs: None,
            error: None,
        }),
        Err(e) => {
            error!("Readiness check failed: work directory unavailable: {}", e);
            HttpResponse::ServiceUnavailable().json(HealthResponse {
                status: "not_ready".to_string(),
                work_dir: "unavailable".to_string(),
                active_jobs: None,
                error: Some("Work directory is not writable".to_string()),
            })
        }
    }
}

/// Liveness check endpoint
///
/// Simple check that the process is alive. Does not check dependencies.
#[get("/live")]
async fn liveness_check() -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "alive".to_string(),
        work_dir: "not_checked".to_string(),
        active_jobs: None,
        error: None,
    })
}

pub fn health_config(config: &mut web::ServiceConfig) {
    config
        .service(health_check)
        .service(readiness_check)
        .service(liveness_check);
}
