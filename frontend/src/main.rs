mod api;
mod components;

use std::collections::HashMap;

use components::handlers;
use components::header::render_header;
use components::preview_area::render_preview_area;
use components::results::render_results;
use components::theme_toggle::{Theme, render_theme_toggle};
use components::upload_section::render_upload_section;
use components::utils::render_error_message;
use gloo_events::EventListener;
use gloo_file::{File as GlooFile, ObjectUrl};
use shared::PredictionResponse;
use wasm_bindgen::JsCast;
use web_sys::{ClipboardEvent, DragEvent};
use yew::prelude::*;

/// Images that can be queued at once.
pub const MAX_FILES: usize = 15;

#[derive(Clone)]
pub struct FileData {
    pub id: u64,
    pub file: GlooFile,
    pub preview_url: Option<ObjectUrl>,
}

pub enum Msg {
    FilesAdded(Vec<GlooFile>),
    RemoveFile(u64),
    SelectFile(u64),
    ClearAllFiles,

    AnalyzeSelected,
    AnalyzeAll,
    PredictionResult(u64, PredictionResponse),
    PredictionFailed(u64, String),

    SetError(Option<String>),
    SetDragging(bool),
    ToggleTheme,

    HandleDrop(DragEvent),
    HandlePaste(ClipboardEvent),
}

pub struct Model {
    pub files: HashMap<u64, FileData>,
    pub selected_file_id: Option<u64>,
    pub results: HashMap<u64, PredictionResponse>,
    pub pending_requests: usize,
    pub error: Option<String>,
    pub is_dragging: bool,
    pub theme: Theme,
    _paste_listener: Option<EventListener>,
}

impl Model {
    pub fn loading(&self) -> bool {
        self.pending_requests > 0
    }
}

impl Component for Model {
    type Message = Msg;
    type Properties = ();

    fn create(ctx: &Context<Self>) -> Self {
        let paste_listener = web_sys::window().map(|window| {
            let link = ctx.link().clone();
            EventListener::new(&window, "paste", move |event| {
                if let Some(clipboard_event) = event.dyn_ref::<ClipboardEvent>() {
                    link.send_message(Msg::HandlePaste(clipboard_event.clone()));
                }
            })
        });

        let theme = Theme::load();
        theme.apply();

        Self {
            files: HashMap::new(),
            selected_file_id: None,
            results: HashMap::new(),
            pending_requests: 0,
            error: None,
            is_dragging: false,
            theme,
            _paste_listener: paste_listener,
        }
    }

    fn update(&mut self, ctx: &Context<Self>, msg: Self::Message) -> bool {
        match msg {
            Msg::FilesAdded(files) => handlers::handle_files_added(self, files),
            Msg::RemoveFile(id) => handlers::handle_remove_file(self, id),
            Msg::SelectFile(id) => handlers::handle_select_file(self, id),
            Msg::ClearAllFiles => handlers::handle_clear_all_files(self),

            Msg::AnalyzeSelected => handlers::handle_analyze_selected(self, ctx),
            Msg::AnalyzeAll => handlers::handle_analyze_all(self, ctx),
            Msg::PredictionResult(id, response) => {
                handlers::handle_prediction_result(self, id, response)
            }
            Msg::PredictionFailed(id, error) => handlers::handle_prediction_failed(self, id, error),

            Msg::SetError(error) => {
                self.error = error;
                true
            }
            Msg::SetDragging(is_dragging) => {
                self.is_dragging = is_dragging;
                true
            }
            Msg::ToggleTheme => {
                self.theme = self.theme.toggled();
                self.theme.apply();
                self.theme.store();
                true
            }

            Msg::HandleDrop(event) => handlers::handle_drop(self, ctx, event),
            Msg::HandlePaste(event) => handlers::handle_paste(ctx, event),
        }
    }

    fn view(&self, ctx: &Context<Self>) -> Html {
        html! {
            <div class="container">
                { render_header() }
                <div class="top-right">
                    { render_theme_toggle(self.theme, ctx.link()) }
                </div>

                <main class="main-content">
                    { render_upload_section(self, ctx) }
                    { render_preview_area(self, ctx) }
                    { render_error_message(self) }
                    { render_results(self) }
                </main>

                <footer class="app-footer">
                    <p>{"EfficientNet-B0 AI image detector | Rust + WASM"}</p>
                </footer>
            </div>
        }
    }
}

fn main() {
    wasm_logger::init(wasm_logger::Config::default());
    log::info!("App starting...");
    yew::Renderer::<Model>::new().render();
}
