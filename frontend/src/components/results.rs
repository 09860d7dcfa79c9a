use shared::{ClassLabel, PredictionResponse};
use yew::prelude::*;

use crate::Model;

/// Result card for the selected image.
pub fn render_results(model: &Model) -> Html {
    let Some(selected_id) = model.selected_file_id else {
        return html! {};
    };
    let Some(result) = model.results.get(&selected_id) else {
        return html! {
            <p class="no-results-message">{"No analysis result available for the selected image."}</p>
        };
    };
    let filename = model
        .files
        .get(&selected_id)
        .map_or_else(|| "Analyzed Image".to_string(), |fd| fd.file.name());

    render_result_card(result, &filename)
}

fn render_result_card(result: &PredictionResponse, filename: &str) -> Html {
    let label = if result.is_ai_generated {
        ClassLabel::Fake
    } else {
        ClassLabel::Real
    };
    let icon = if result.is_ai_generated {
        "fa-solid fa-robot"
    } else {
        "fa-solid fa-camera"
    };
    let confidence = result.confidence.clamp(0.0, 100.0);

    html! {
        <div class={classes!("results-container", if result.is_ai_generated { "ai-detected" } else { "not-ai" })}>
            <div class="result-header">
                <h2 title={format!("Analysis results for: {}", filename)}>
                    <i class={icon}></i>{ format!(" {}", label.display_name()) }
                    <span class="analyzed-filename-display">{ format!("({})", filename) }</span>
                </h2>
                <div class="confidence-meter">
                    <div class="meter-label">{"Confidence:"}</div>
                    <div class="meter">
                        <div class="meter-fill" style={format!("width: {}%", confidence)}></div>
                    </div>
                    <div class="meter-value">{ format!("{:.3}%", confidence) }</div>
                </div>
            </div>
        </div>
    }
}
