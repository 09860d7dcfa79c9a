use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

/// Largest upload accepted by `POST /predict`.
pub const MAX_UPLOAD_BYTES: usize = 6 * 1024 * 1024;

/// Binary class of an image. Serialized lowercase, matching the dataset
/// directory names.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ClassLabel {
    Fake,
    Real,
}

impl ClassLabel {
    pub fn is_ai_generated(self) -> bool {
        matches!(self, ClassLabel::Fake)
    }

    pub fn display_name(self) -> &'static str {
        match self {
            ClassLabel::Fake => "AI Generated",
            ClassLabel::Real => "Human Created",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PredictionResponse {
    pub is_ai_generated: bool,
    /// Winning class probability in percent, rounded to 3 decimals.
    pub confidence: f64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ErrorResponse {
    pub detail: String,
}

impl ErrorResponse {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}
