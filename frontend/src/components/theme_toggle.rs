use gloo_storage::{LocalStorage, Storage};
use yew::html::Scope;
use yew::prelude::*;

use crate::{Model, Msg};

const STORAGE_KEY: &str = "detector.theme";
const DARK_CLASS: &str = "dark-mode";

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Theme {
    Light,
    Dark,
}

impl Theme {
    /// Last theme the user picked, light otherwise.
    pub fn load() -> Self {
        match LocalStorage::get::<String>(STORAGE_KEY).as_deref() {
            Ok("dark") => Theme::Dark,
            _ => Theme::Light,
        }
    }

    pub fn store(self) {
        let value = match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        };
        if let Err(e) = LocalStorage::set(STORAGE_KEY, value) {
            log::warn!("Failed to persist theme: {}", e);
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }

    /// Toggles the dark-mode class on `<body>`.
    pub fn apply(self) {
        let Some(body) = web_sys::window()
            .and_then(|w| w.document())
            .and_then(|d| d.body())
        else {
            return;
        };
        let classes = body.class_list();
        let result = match self {
            Theme::Dark => classes.add_1(DARK_CLASS),
            Theme::Light => classes.remove_1(DARK_CLASS),
        };
        if result.is_err() {
            log::warn!("Failed to apply theme {:?}", self);
        }
    }
}

pub fn render_theme_toggle(theme: Theme, link: &Scope<Model>) -> Html {
    let (title, icon, alt) = match theme {
        Theme::Light => (
            "Switch to Dark Mode",
            "https://cdnjs.cloudflare.com/ajax/libs/twemoji/14.0.2/svg/2600.svg",
            "Sun Icon",
        ),
        Theme::Dark => (
            "Switch to Light Mode",
            "https://cdnjs.cloudflare.com/ajax/libs/twemoji/14.0.2/svg/1f319.svg",
            "Moon Icon",
        ),
    };
    html! {
        <button
            id="theme-toggle"
            class="theme-toggle"
            onclick={link.callback(|_| Msg::ToggleTheme)}
            {title}
        >
            <img src={icon} {alt} class="toggle-icon" />
        </button>
    }
}
