use actix_web::{http::header, middleware, web, App, HttpServer};
use clap::Parser;
use std::io;
use tracing::{info, warn};

use table_transform::{
    cli::Cli,
    config::Config,
    logging, pipeline::{workspace, UploadPipeline},
    routes,
    shutdown::ShutdownCoordinator,
};

#[actix_web::main]
async fn main() -> io::Result<()> {
    let cli = Cli::parse();

    // Load configuration from environment, then apply command-line overrides
    let config = Config::from_env()
        .and_then(|config| config.apply_cli(&cli))
        .map_err(io::Error::other)?;

    if cli.check_config {
        println!("{:#?}", config);
        return Ok(());
    }

    logging::init(&config.log_dir)?;

    info!("Starting table-transform");
    info!("Configuration loaded successfully:");
    info!(
        "  - Transform command: {} {}",
        config.transform_command,
        config.transform_args.join(" ")
    );
    info!("  - Work directory: {}", config.work_dir.display());
    info!("  - Max upload size: {} bytes", config.max_upload_size);
    info!("  - Process timeout: {} s", config.process_timeout_secs);
    info!("  - Max concurrent jobs: {}", config.max_concurrent_jobs);
    info!("  - Malformed rows: {:?}", config.row_policy);

    workspace::ensure_work_root(&config.work_dir)?;
    match workspace::sweep_stale_workspaces(&config.work_dir) {
        Ok(0) => {}
        Ok(n) => warn!("Removed {} job workspaces left over from a previous run", n),
        Err(e) => warn!("Could not sweep work directory: {:?}", e),
    }

    // One pipeline for all server workers so the job limit is global
    let pipeline = web::Data::new(UploadPipeline::new(config.pipeline_settings()));
    let cors_origin = config.cors_allow_origin.clone();

    let server = HttpServer::new(move || {
        let mut cors = middleware::DefaultHeaders::new();
        if let Some(origin) = &cors_origin {
            cors = cors.add((header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone()));
        }

        App::new()
            .app_data(pipeline.clone())
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .configure(routes)
    })
    // Signals are handled by ShutdownCoordinator
    .disable_signals()
    // Let a running transformation finish before workers are torn down
    .shutdown_timeout(config.process_timeout_secs + 5);

    info!("Server starting on http://{}:{}", config.host, config.port);

    // Bind and start the server
    let server = server.bind((config.host.as_str(), config.port))?.run();

    // Get server handle for graceful shutdown
    let server_handle = server.handle();

    // Spawn server in background
    let server_task = tokio::spawn(server);

    let coordinator = ShutdownCoordinator::new(server_handle, server_task, config.work_dir.clone());

    coordinator.wait_for_shutdown().await
}
