use yew::prelude::*;

pub fn render_header() -> Html {
    html! {
        <header class="app-header">
            <h1><i class="fa-solid fa-robot"></i> {" AI Image Detector"}</h1>
            <p class="subtitle">{"Find out whether an image was generated by AI. Select, drop or paste images."}</p>
        </header>
    }
}
