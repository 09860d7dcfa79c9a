use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware, web};
use detector::config::{PreprocessingConfig, ServerConfig};
use detector::routes::{configure_frontend, configure_routes};
use detector::vision::{Classifier, ImageClassifier, Preprocessor};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = ServerConfig::from_env().map_err(|e| {
        log::error!("{}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
    })?;

    let device = config.device.device();
    let (classifier, manifest) =
        Classifier::load_with_manifest(&config.model_path, config.labels_path.as_deref(), device)
            .map_err(|e| {
                log::error!("Failed to load model at startup: {}", e);
                std::io::Error::other(format!("Model loading failed: {}", e))
            })?;
    log::info!("Serving classes {:?}", classifier.labels().names());

    let preprocessing = match &manifest {
        Some(manifest) => manifest.preprocessing(&PreprocessingConfig::default()),
        None => PreprocessingConfig::default(),
    };
    let preprocessor = web::Data::new(Preprocessor::new(&preprocessing));
    let classifier: Arc<dyn ImageClassifier> = Arc::new(classifier);
    let classifier = web::Data::from(classifier);

    let frontend_dir = config.frontend_dir.clone().filter(|dir| {
        let exists = dir.is_dir();
        if !exists {
            log::warn!("Frontend directory {} not found, serving API only", dir.display());
        }
        exists
    });

    let bind_address = config.bind_address();
    log::info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        let frontend_dir = frontend_dir.clone();
        App::new()
            .wrap(middleware::Logger::default())
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["POST"])
                    .allow_any_header()
                    .max_age(3600),
            )
            .app_data(classifier.clone())
            .app_data(preprocessor.clone())
            .configure(configure_routes)
            .configure(move |cfg| {
                if let Some(dir) = frontend_dir {
                    configure_frontend(cfg, dir);
                }
            })
    })
    .bind(&bind_address)?
    .run()
    .await
}
