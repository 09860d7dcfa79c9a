use gloo_file::{File as GlooFile, ObjectUrl};
use shared::PredictionResponse;
use wasm_bindgen_futures::spawn_local;
use web_sys::{ClipboardEvent, DragEvent, FileList};
use yew::html::Scope;
use yew::prelude::*;

use super::utils::{extract_image_files, generate_id};
use crate::{FileData, MAX_FILES, Model, Msg, api};

pub fn handle_files_added(model: &mut Model, files: Vec<GlooFile>) -> bool {
    let available_slots = MAX_FILES.saturating_sub(model.files.len());
    if files.len() > available_slots {
        model.error = Some(format!(
            "Upload limit exceeded. You can only add {} more images.",
            available_slots
        ));
        return true;
    }

    model.error = None;
    for file in files {
        let id = generate_id();
        let preview_url = Some(ObjectUrl::from(file.clone()));
        model.files.insert(
            id,
            FileData {
                id,
                file,
                preview_url,
            },
        );
        model.selected_file_id = Some(id);
    }
    true
}

pub fn handle_remove_file(model: &mut Model, id: u64) -> bool {
    if model.files.remove(&id).is_none() {
        return false;
    }
    model.results.remove(&id);

    if model.files.is_empty() {
        model.selected_file_id = None;
        model.results.clear();
        model.error = None;
    } else if model.selected_file_id == Some(id) {
        model.selected_file_id = model.files.keys().max().copied();
    }
    true
}

pub fn handle_select_file(model: &mut Model, id: u64) -> bool {
    if model.selected_file_id == Some(id) || !model.files.contains_key(&id) {
        return false;
    }
    model.selected_file_id = Some(id);
    model.error = None;
    true
}

pub fn handle_clear_all_files(model: &mut Model) -> bool {
    model.files.clear();
    model.selected_file_id = None;
    model.results.clear();
    model.error = None;
    true
}

pub fn handle_analyze_selected(model: &mut Model, ctx: &Context<Model>) -> bool {
    let Some(file_data) = model.selected_file_id.and_then(|id| model.files.get(&id)) else {
        model.error = Some("No file selected for analysis.".into());
        return true;
    };
    let (id, file) = (file_data.id, file_data.file.clone());
    model.error = None;
    model.pending_requests += 1;
    send_prediction_request(ctx, id, file);
    true
}

pub fn handle_analyze_all(model: &mut Model, ctx: &Context<Model>) -> bool {
    if model.files.is_empty() {
        return false;
    }
    model.error = None;
    for file_data in model.files.values() {
        model.pending_requests += 1;
        send_prediction_request(ctx, file_data.id, file_data.file.clone());
    }
    true
}

pub fn handle_prediction_result(model: &mut Model, id: u64, response: PredictionResponse) -> bool {
    model.pending_requests = model.pending_requests.saturating_sub(1);
    // The file may have been removed while the request was in flight.
    if model.files.contains_key(&id) {
        model.results.insert(id, response);
    }
    true
}

pub fn handle_prediction_failed(model: &mut Model, id: u64, error: String) -> bool {
    model.pending_requests = model.pending_requests.saturating_sub(1);
    let name = model
        .files
        .get(&id)
        .map(|fd| fd.file.name())
        .unwrap_or_else(|| "image".to_string());
    log::error!("Prediction for {} failed: {}", name, error);
    model.error = Some(format!("{}: {}", name, error));
    true
}

pub fn handle_drop(model: &mut Model, ctx: &Context<Model>, event: DragEvent) -> bool {
    event.prevent_default();
    model.is_dragging = false;
    if let Some(file_list) = event.data_transfer().and_then(|dt| dt.files()) {
        process_file_list(ctx.link(), &file_list);
    }
    true
}

pub fn handle_paste(ctx: &Context<Model>, event: ClipboardEvent) -> bool {
    match event.clipboard_data().and_then(|dt| dt.files()) {
        Some(file_list) if file_list.length() > 0 => {
            event.prevent_default();
            process_file_list(ctx.link(), &file_list);
            true
        }
        _ => false,
    }
}

pub fn process_file_list(link: &Scope<Model>, file_list: &FileList) {
    let (accepted, rejected) = extract_image_files(file_list);
    if !rejected.is_empty() {
        link.send_message(Msg::SetError(Some(rejected.join(" "))));
    }
    if !accepted.is_empty() {
        link.send_message(Msg::FilesAdded(accepted));
    }
}

fn send_prediction_request(ctx: &Context<Model>, id: u64, file: GlooFile) {
    let link = ctx.link().clone();
    spawn_local(async move {
        match api::predict(&file).await {
            Ok(response) => link.send_message(Msg::PredictionResult(id, response)),
            Err(error) => link.send_message(Msg::PredictionFailed(id, error)),
        }
    });
}
