use yew::prelude::*;

use super::utils::{debounce, truncate_name};
use crate::{FileData, MAX_FILES, Model, Msg};

pub fn render_preview_area(model: &Model, ctx: &Context<Model>) -> Html {
    if model.files.is_empty() {
        return html! {};
    }

    let link = ctx.link().clone();
    let mut sorted_files: Vec<&FileData> = model.files.values().collect();
    sorted_files.sort_by_key(|fd| fd.id);

    html! {
        <div id="preview-container">
            { render_selected_image_preview(model) }
            <h2>{ format!("Previews: {} / {}", model.files.len(), MAX_FILES) }</h2>
            <div id="image-previews">
                { for sorted_files.iter().map(|fd| render_preview_item(ctx, model, fd)) }
            </div>
            <div class="button-container">
                <button
                    id="clear-all-btn"
                    class="analyze-btn"
                    style="background-color: var(--clear-color);"
                    onclick={debounce(300, {
                        let link = link.clone();
                        move || link.send_message(Msg::ClearAllFiles)
                    })}
                >
                    <i class="fa-solid fa-trash"></i>{" Clear All"}
                </button>
                <button
                    class="analyze-btn"
                    onclick={debounce(300, {
                        let link = link.clone();
                        move || link.send_message(Msg::AnalyzeSelected)
                    })}
                    disabled={model.loading() || model.selected_file_id.is_none()}
                >
                    { render_analyze_button_content(model) }
                </button>
                <button
                    class="analyze-btn"
                    style="background-color: var(--primary-color);"
                    onclick={debounce(300, {
                        let link = link.clone();
                        move || link.send_message(Msg::AnalyzeAll)
                    })}
                    disabled={model.loading()}
                >
                    <i class="fa-solid fa-magnifying-glass"></i>{" Analyze All"}
                </button>
            </div>
        </div>
    }
}

fn render_preview_item(ctx: &Context<Model>, model: &Model, file_data: &FileData) -> Html {
    let file_id = file_data.id;
    let link = ctx.link();
    let is_selected = model.selected_file_id == Some(file_id);
    let verdict = model.results.get(&file_id).map(|r| {
        if r.is_ai_generated { "badge-ai" } else { "badge-real" }
    });

    html! {
        <div
            class={classes!("preview-item", is_selected.then_some("selected"), verdict)}
            key={file_id.to_string()}
            onclick={link.callback(move |_| Msg::SelectFile(file_id))}
            title={format!("Click to select for analysis: {}", file_data.file.name())}
        >
            {
                match &file_data.preview_url {
                    Some(url) => html! { <img src={url.to_string()} alt={file_data.file.name()} /> },
                    None => html! { <div class="preview-placeholder preview-placeholder-centered">{"..."}</div> },
                }
            }
            <button
                class="remove-btn"
                title="Remove this image"
                onclick={link.callback(move |e: MouseEvent| {
                    e.stop_propagation();
                    Msg::RemoveFile(file_id)
                })}
            >
                <i class="fa-solid fa-times" style="font-size: 10px;"></i>
            </button>
        </div>
    }
}

fn render_selected_image_preview(model: &Model) -> Html {
    let Some(id) = model.selected_file_id else {
        return html! {
            <div class="select-preview">
                <p>{"Select an image preview below"}</p>
            </div>
        };
    };
    match model.files.get(&id).and_then(|fd| fd.preview_url.as_ref()) {
        Some(url) => html! {
            <img id="actual-image-preview" src={url.to_string()} alt="Image Preview" />
        },
        None => html! {
            <div class="unavailable-preview">
                <p>{"Preview unavailable"}</p>
            </div>
        },
    }
}

fn render_analyze_button_content(model: &Model) -> Html {
    if model.loading() {
        return html! { <><i class="fa-solid fa-spinner fa-spin"></i>{" Analyzing..."}</> };
    }
    let filename = model
        .selected_file_id
        .and_then(|id| model.files.get(&id))
        .map(|fd| fd.file.name())
        .unwrap_or_else(|| "Selected Image".to_string());

    html! {
        <>
            <i class="fa-solid fa-magnifying-glass"></i>
            { format!(" Analyze \"{}\"", truncate_name(&filename, 20)) }
        </>
    }
}
