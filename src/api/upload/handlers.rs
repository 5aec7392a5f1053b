use actix_multipart::Multipart;
use actix_web::{
    http::header, options, post,
    web::{scope, Data, ServiceConfig},
    HttpResponse,
};
use futures_util::StreamExt;
use tracing::{info, warn};

use crate::pipeline::{ErrorKind, PipelineError, UploadPipeline};

/// Multipart field carrying the table.
pub const FILE_FIELD: &str = "file";

fn malformed(err: impl std::fmt::Display) -> PipelineError {
    warn!("Upload: malformed multipart body: {}", err);
    PipelineError::new(ErrorKind::MalformedUpload)
}

/// Transform an uploaded table
///
/// Expects `multipart/form-data` with a `file` field. The first `file`
/// field is processed; other fields are read and ignored.
///
/// # Returns
/// - `200` with a JSON array of row objects
/// - `400`/`413`/`500` with an [`ErrorResponse`](crate::api::error::ErrorResponse)
#[post("")]
async fn upload_table(
    pipeline: Data<UploadPipeline>,
    mut payload: Multipart,
) -> Result<HttpResponse, PipelineError> {
    while let Some(field) = payload.next().await {
        let mut field = field.map_err(malformed)?;

        if field.name() == Some(FILE_FIELD) {
            info!(
                "Upload: received '{}' field ({})",
                FILE_FIELD,
                field
                    .content_disposition()
                    .and_then(|cd| cd.get_filename())
                    .unwrap_or("unnamed")
            );
            let rows = pipeline.process_upload(&mut field).await?;
            return Ok(HttpResponse::Ok().json(rows));
        }

        // Drain fields we don't use so the next one can be read
        while let Some(chunk) = field.next().await {
            chunk.map_err(malformed)?;
        }
    }

    warn!("Upload: request has no '{}' field", FILE_FIELD);
    Err(PipelineError::new(ErrorKind::NoFileProvided))
}

/// CORS preflight for browser clients
#[options("")]
async fn upload_preflight() -> HttpResponse {
    HttpResponse::NoContent()
        .insert_header((header::ACCESS_CONTROL_ALLOW_METHODS, "POST, OPTIONS"))
        .insert_header((header::ACCESS_CONTROL_ALLOW_HEADERS, "content-type"))
        .finish()
}

pub fn upload_config(config: &mut ServiceConfig) {
    config.service(scope("upload").service(upload_table).service(upload_preflight));
}
