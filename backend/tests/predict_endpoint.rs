use std::io::Cursor;
use std::sync::Arc;

use actix_web::http::{StatusCode, header};
use actix_web::{App, test, web};
use detector::config::PreprocessingConfig;
use detector::routes::configure_routes;
use detector::vision::{ImageClassifier, InferenceError, LabelMap, Preprocessor};
use image::{ImageFormat, Rgb, RgbImage};
use ndarray::{Array2, ArrayView4};
use shared::{ErrorResponse, MAX_UPLOAD_BYTES, PredictionResponse};

const BOUNDARY: &str = "detector-test-boundary";

/// Returns the same logits for every image in the batch.
struct FixedClassifier {
    labels: LabelMap,
    logits: Vec<f32>,
}

impl FixedClassifier {
    fn new(logits: &[f32]) -> Self {
        Self {
            labels: LabelMap::default(),
            logits: logits.to_vec(),
        }
    }
}

impl ImageClassifier for FixedClassifier {
    fn labels(&self) -> &LabelMap {
        &self.labels
    }

    fn logits(&self, batch: ArrayView4<'_, f32>) -> Result<Array2<f32>, InferenceError> {
        let n = batch.shape()[0];
        let width = self.logits.len();
        Ok(Array2::from_shape_fn((n, width), |(_, j)| self.logits[j]))
    }
}

fn png_bytes() -> Vec<u8> {
    let image = RgbImage::from_fn(40, 24, |x, y| Rgb([(x * 6) as u8, (y * 10) as u8, 128]));
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

/// Binary PGM padded with a header comment so the file is exactly `len`
/// bytes: 1022 x 6156 pixels plus a 24 byte header is 6 MiB.
fn pgm_of_exact_size(len: usize) -> Vec<u8> {
    let header = b"P5\n#12345\n1022 6156\n255\n";
    let pixels = 1022 * 6156;
    assert_eq!(header.len() + pixels, MAX_UPLOAD_BYTES);
    let mut bytes = header.to_vec();
    bytes.resize(header.len() + pixels, 90);
    bytes.resize(len, 0);
    bytes
}

fn multipart(name: &str, filename: Option<&str>, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    let disposition = match filename {
        Some(filename) => format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            name, filename
        ),
        None => format!("Content-Disposition: form-data; name=\"{}\"\r\n", name),
    };
    body.extend_from_slice(disposition.as_bytes());
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

async fn post_predict(
    classifier: FixedClassifier,
    body: Vec<u8>,
) -> actix_web::dev::ServiceResponse {
    let classifier: Arc<dyn ImageClassifier> = Arc::new(classifier);
    let preprocessor = Preprocessor::new(&PreprocessingConfig {
        image_size: 32,
        ..PreprocessingConfig::default()
    });
    let app = test::init_service(
        App::new()
            .app_data(web::Data::from(classifier))
            .app_data(web::Data::new(preprocessor))
            .configure(configure_routes),
    )
    .await;
    let req = test::TestRequest::post()
        .uri("/predict")
        .insert_header((
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        ))
        .set_payload(body)
        .to_request();
    test::call_service(&app, req).await
}

#[actix_web::test]
async fn fake_logits_report_ai_generated() {
    let body = multipart("file", Some("photo.png"), &png_bytes());
    let resp = post_predict(FixedClassifier::new(&[2.0, 0.0]), body).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let prediction: PredictionResponse = test::read_body_json(resp).await;
    assert!(prediction.is_ai_generated);
    assert_eq!(prediction.confidence, 88.08);
}

#[actix_web::test]
async fn real_logits_report_human_created() {
    let body = multipart("file", Some("photo.png"), &png_bytes());
    let resp = post_predict(FixedClassifier::new(&[-1.0, 3.0]), body).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let json: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(json["isAiGenerated"], false);
    assert_eq!(json["confidence"], 98.201);
}

#[actix_web::test]
async fn first_file_part_is_used_when_no_file_field() {
    let body = multipart("image", Some("photo.png"), &png_bytes());
    let resp = post_predict(FixedClassifier::new(&[2.0, 0.0]), body).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[actix_web::test]
async fn empty_upload_is_rejected() {
    let body = multipart("file", Some("empty.png"), &[]);
    let resp = post_predict(FixedClassifier::new(&[2.0, 0.0]), body).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn undecodable_upload_is_rejected() {
    let body = multipart("file", Some("notes.png"), b"definitely not an image");
    let resp = post_predict(FixedClassifier::new(&[2.0, 0.0]), body).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let error: ErrorResponse = test::read_body_json(resp).await;
    assert!(error.detail.starts_with("Invalid image"));
}

#[actix_web::test]
async fn missing_file_field_is_rejected() {
    let body = multipart("note", None, b"hello");
    let resp = post_predict(FixedClassifier::new(&[2.0, 0.0]), body).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn upload_at_the_limit_is_accepted() {
    let body = multipart("file", Some("big.pgm"), &pgm_of_exact_size(MAX_UPLOAD_BYTES));
    let resp = post_predict(FixedClassifier::new(&[0.0, 1.0]), body).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[actix_web::test]
async fn upload_over_the_limit_is_too_large() {
    let body = multipart(
        "file",
        Some("big.pgm"),
        &pgm_of_exact_size(MAX_UPLOAD_BYTES + 1),
    );
    let resp = post_predict(FixedClassifier::new(&[0.0, 1.0]), body).await;
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let error: ErrorResponse = test::read_body_json(resp).await;
    assert_eq!(error.detail, "File size exceeds limit.");
}

#[actix_web::test]
async fn model_failure_is_a_server_error() {
    let body = multipart("file", Some("photo.png"), &png_bytes());
    let resp = post_predict(FixedClassifier::new(&[f32::NAN, 0.0]), body).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[actix_web::test]
async fn health_reports_ok() {
    let app = test::init_service(App::new().configure(configure_routes)).await;
    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let json: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(json["status"], "ok");
}
