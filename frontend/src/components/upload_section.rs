use wasm_bindgen::JsCast;
use web_sys::{DragEvent, HtmlInputElement};
use yew::prelude::*;

use super::handlers::process_file_list;
use super::utils::debounce;
use crate::{MAX_FILES, Model, Msg};

pub fn render_upload_section(model: &Model, ctx: &Context<Model>) -> Html {
    if model.files.len() >= MAX_FILES {
        return html! {
            <div class="upload-section">
                <p class="limit-reached">{ format!("You have reached the maximum of {} images.", MAX_FILES) }</p>
            </div>
        };
    }

    let link = ctx.link();
    let handle_change = {
        let link = link.clone();
        Callback::from(move |e: Event| {
            let input: HtmlInputElement = e.target_unchecked_into();
            match input.files() {
                Some(files) if files.length() > 0 => process_file_list(&link, &files),
                _ => link.send_message(Msg::SetError(Some("No valid image files selected.".into()))),
            }
            input.set_value("");
        })
    };

    let handle_drag_over = link.callback(|e: DragEvent| {
        e.prevent_default();
        Msg::SetDragging(true)
    });
    let handle_drag_leave = link.callback(|e: DragEvent| {
        e.prevent_default();
        Msg::SetDragging(false)
    });
    let handle_drop = link.callback(Msg::HandleDrop);

    let open_file_picker = || {
        let input = web_sys::window()
            .and_then(|w| w.document())
            .and_then(|d| d.get_element_by_id("file-input"))
            .and_then(|el| el.dyn_into::<web_sys::HtmlElement>().ok());
        if let Some(input) = input {
            input.click();
        }
    };

    html! {
        <div class="upload-section">
            <input
                type="file"
                id="file-input"
                multiple=true
                accept="image/*"
                style="display: none;"
                onchange={handle_change}
            />

            <button
                id="upload-button"
                class="analyze-btn"
                onclick={debounce(300, open_file_picker)}
            >
                <i class="fa-solid fa-upload"></i> {" Select Images"}
            </button>

            <div
                id="drop-zone"
                class={classes!("upload-area", model.is_dragging.then_some("drag-over"))}
                ondragover={handle_drag_over}
                ondragleave={handle_drag_leave}
                ondrop={handle_drop}
                onclick={debounce(300, open_file_picker)}
            >
                <div class="upload-placeholder">
                    <i class="fa-solid fa-cloud-arrow-up"></i>
                    <p>{"Drag & drop images here, paste, or click"}</p>
                    <p class="file-types">{"JPG, PNG, BMP, TIFF, WEBP, GIF up to 6 MiB"}</p>
                </div>
            </div>
        </div>
    }
}
