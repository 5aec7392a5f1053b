//! Upload a delimited table, transform it with an external command and
//! return the result as JSON rows.
//!
//! `POST /upload` stores the `file` field in a private job workspace, runs
//! `<command> <args...> <input> <output>`, and decodes the output file.
//! See [`pipeline::UploadPipeline`] for the job lifecycle.

pub mod api;
pub mod cli;
pub mod config;
pub mod logging;
pub mod pipeline;
pub mod shutdown;

use actix_web::web;

/// Register every HTTP route. Expects `web::Data<UploadPipeline>` in app data.
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.configure(api::health::health_config)
        .configure(api::upload::upload_config);
}
