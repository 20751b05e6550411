use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use lungscan::routes::configure_routes;
use lungscan::{AnalysisService, AppConfig, UploadStore};
use std::io::{Error, ErrorKind};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = AppConfig::load().map_err(|e| {
        log::error!("Invalid configuration: {}", e);
        Error::new(ErrorKind::InvalidInput, e.to_string())
    })?;

    if let Ok(current_dir) = std::env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    }

    let uploads = UploadStore::open(&config.upload_dir).map_err(|e| {
        log::error!("{}", e);
        Error::new(ErrorKind::Other, e.to_string())
    })?;
    log::info!("Storing uploads in {}", uploads.dir().display());

    let service = match AnalysisService::load(&config.models) {
        Ok(service) => service,
        Err(e) => {
            log::error!("Model loading error: {}", e);
            return Err(Error::new(
                ErrorKind::Other,
                format!("Model loading failed: {}", e),
            ));
        }
    };
    log::info!(
        "Ensemble ready with {:?} over {} classes",
        service.member_kinds(),
        service.expected_classes()
    );

    let service = web::Data::new(service);
    let uploads = web::Data::new(uploads);
    let upload_dir = config.upload_dir.clone();
    let bind_address = config.bind_address();

    log::info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allow_any_method()
                    .allow_any_header()
                    .max_age(3600),
            )
            .app_data(service.clone())
            .app_data(uploads.clone())
            .configure(|cfg| configure_routes(cfg, upload_dir.clone()))
    })
    .bind(&bind_address)?
    .run()
    .await
}
