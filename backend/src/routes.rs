use std::path::PathBuf;

use actix_files::Files;
use actix_multipart::{Field, Multipart};
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError, web};
use futures::TryStreamExt;
use log::{error, info, warn};
use ndarray::Axis;
use serde_json::json;
use shared::{ErrorResponse, MAX_UPLOAD_BYTES};
use uuid::Uuid;

use crate::vision::model::{ImageClassifier, InferenceError};
use crate::vision::prediction::Prediction;
use crate::vision::preprocess::{PreprocessError, Preprocessor};

/// Multipart field the image is expected in.
pub const UPLOAD_FIELD: &str = "file";

#[derive(Debug, thiserror::Error)]
pub enum PredictError {
    #[error("No file uploaded.")]
    MissingFile,
    #[error("File size exceeds limit.")]
    PayloadTooLarge,
    #[error("Malformed upload: {0}")]
    Upload(String),
    #[error("Invalid image: {0}")]
    Preprocess(#[from] PreprocessError),
    #[error("Inference failed: {0}")]
    Inference(#[from] InferenceError),
    #[error("Inference worker unavailable")]
    Blocking,
}

impl ResponseError for PredictError {
    fn status_code(&self) -> StatusCode {
        match self {
            PredictError::MissingFile | PredictError::Upload(_) | PredictError::Preprocess(_) => {
                StatusCode::BAD_REQUEST
            }
            PredictError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            PredictError::Inference(_) | PredictError::Blocking => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse::new(self.to_string()))
    }
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/predict").route(web::post().to(predict)))
        .service(web::resource("/health").route(web::get().to(health)));
}

/// Serves the compiled browser client at `/`. Register after the API routes.
pub fn configure_frontend(cfg: &mut web::ServiceConfig, frontend_dir: PathBuf) {
    cfg.service(Files::new("/", frontend_dir).index_file("index.html"));
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

async fn predict(
    classifier: web::Data<dyn ImageClassifier>,
    preprocessor: web::Data<Preprocessor>,
    payload: Multipart,
) -> Result<HttpResponse, PredictError> {
    let request_id = Uuid::new_v4();
    let image_data = match read_upload(payload, MAX_UPLOAD_BYTES).await {
        Ok(data) => data,
        Err(e) => {
            warn!("[{}] Rejected upload: {}", request_id, e);
            return Err(e);
        }
    };
    info!("[{}] Received image of {} bytes", request_id, image_data.len());

    let result = web::block(move || run_inference(&**classifier, &preprocessor, &image_data))
        .await
        .map_err(|_| PredictError::Blocking)
        .and_then(|inner| inner);

    match result {
        Ok(prediction) => {
            info!(
                "[{}] Predicted {} with {:.3}% confidence",
                request_id, prediction.label, prediction.confidence
            );
            Ok(HttpResponse::Ok().json(prediction.to_response()))
        }
        Err(e) => {
            if e.status_code().is_server_error() {
                error!("[{}] {}", request_id, e);
            } else {
                warn!("[{}] {}", request_id, e);
            }
            Err(e)
        }
    }
}

fn run_inference(
    classifier: &dyn ImageClassifier,
    preprocessor: &Preprocessor,
    image_data: &[u8],
) -> Result<Prediction, PredictError> {
    let tensor = preprocessor.preprocess_bytes(image_data)?;
    let batch = tensor.insert_axis(Axis(0));
    let mut predictions = classifier.predict(batch.view())?;
    predictions
        .pop()
        .ok_or(PredictError::Inference(InferenceError::Shape(vec![0])))
}

/// Reads the image part of a multipart body, failing as soon as it grows past
/// `limit` bytes. Takes the `file` field, or the first file part otherwise.
pub async fn read_upload(mut payload: Multipart, limit: usize) -> Result<Vec<u8>, PredictError> {
    let mut fallback: Option<Vec<u8>> = None;

    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|e| PredictError::Upload(e.to_string()))?
    {
        let is_upload_field = field.name() == Some(UPLOAD_FIELD);
        let is_file = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .is_some();

        if is_upload_field {
            return read_field(&mut field, limit).await;
        }
        if is_file && fallback.is_none() {
            fallback = Some(read_field(&mut field, limit).await?);
        } else {
            while field
                .try_next()
                .await
                .map_err(|e| PredictError::Upload(e.to_string()))?
                .is_some()
            {}
        }
    }

    fallback.ok_or(PredictError::MissingFile)
}

async fn read_field(field: &mut Field, limit: usize) -> Result<Vec<u8>, PredictError> {
    let mut data = Vec::new();
    while let Some(chunk) = field
        .try_next()
        .await
        .map_err(|e| PredictError::Upload(e.to_string()))?
    {
        if data.len() + chunk.len() > limit {
            return Err(PredictError::PayloadTooLarge);
        }
        data.extend_from_slice(&chunk);
    }
    Ok(data)
}
