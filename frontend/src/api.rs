use gloo_file::File as GlooFile;
use gloo_net::http::Request;
use shared::{ErrorResponse, PredictionResponse};

pub const PREDICT_URL: &str = "/predict";

/// Uploads one image as the `file` field of a multipart form.
pub async fn predict(file: &GlooFile) -> Result<PredictionResponse, String> {
    let form_data =
        web_sys::FormData::new().map_err(|_| "Failed to create form data.".to_string())?;
    form_data
        .append_with_blob_and_filename("file", file.as_ref(), &file.name())
        .map_err(|_| "Failed to attach file.".to_string())?;

    let response = Request::post(PREDICT_URL)
        .body(form_data)
        .map_err(|e| format!("Failed to build request: {}", e))?
        .send()
        .await
        .map_err(|e| format!("Network error: {}", e))?;

    if response.ok() {
        return response
            .json::<PredictionResponse>()
            .await
            .map_err(|e| format!("Failed to parse response: {}", e));
    }

    let status = response.status();
    let detail = match response.json::<ErrorResponse>().await {
        Ok(error) => error.detail,
        Err(_) => response.status_text(),
    };
    Err(format!("Server error: {} - {}", status, detail))
}
