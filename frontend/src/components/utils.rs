use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use gloo_file::File as GlooFile;
use gloo_timers::callback::Timeout;
use js_sys::Date;
use shared::MAX_UPLOAD_BYTES;
use web_sys::FileList;
use yew::prelude::*;

use crate::Model;

pub fn generate_id() -> u64 {
    static ID_COUNTER: AtomicU64 = AtomicU64::new(0);
    let now = Date::now() as u64;
    let count = ID_COUNTER.fetch_add(1, Ordering::SeqCst);
    now * 1000 + (count % 1000)
}

// Swallows repeated clicks within `duration` ms.
pub fn debounce<F>(duration: u32, callback: F) -> Callback<MouseEvent>
where
    F: Fn() + Clone + 'static,
{
    let timeout = Rc::new(RefCell::new(None::<Timeout>));

    Callback::from(move |_| {
        let mut timeout_ref = timeout.borrow_mut();
        if let Some(old_timeout) = timeout_ref.take() {
            old_timeout.cancel();
        }
        let inner_callback = callback.clone();
        *timeout_ref = Some(Timeout::new(duration, move || inner_callback()));
    })
}

/// Mirrors the server's checks so obviously bad files never leave the page.
pub fn validate_upload(name: &str, mime: &str, size: u64) -> Result<(), String> {
    if !mime.starts_with("image/") {
        return Err(format!("Skipped non-image file: {}", name));
    }
    if size == 0 {
        return Err(format!("Skipped empty file: {}", name));
    }
    if size > MAX_UPLOAD_BYTES as u64 {
        return Err(format!(
            "Skipped {}: larger than {} MiB",
            name,
            MAX_UPLOAD_BYTES / (1024 * 1024)
        ));
    }
    Ok(())
}

/// Splits a file list into acceptable images and rejection messages.
pub fn extract_image_files(file_list: &FileList) -> (Vec<GlooFile>, Vec<String>) {
    let mut accepted = Vec::new();
    let mut rejected = Vec::new();
    for file in (0..file_list.length()).filter_map(|i| file_list.item(i)) {
        let file = GlooFile::from(file);
        match validate_upload(&file.name(), &file.raw_mime_type(), file.size()) {
            Ok(()) => accepted.push(file),
            Err(reason) => {
                log::warn!("{}", reason);
                rejected.push(reason);
            }
        }
    }
    (accepted, rejected)
}

pub fn truncate_name(name: &str, max_chars: usize) -> String {
    if name.chars().count() > max_chars {
        let head: String = name.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", head)
    } else {
        name.to_string()
    }
}

pub fn render_error_message(model: &Model) -> Html {
    if let Some(error_msg) = &model.error {
        html! {
            <div class="error-message">
                <i class="fa-solid fa-circle-exclamation"></i>
                <p>{ error_msg }</p>
            </div>
        }
    } else {
        html! {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uploads_are_checked_against_server_limits() {
        assert!(validate_upload("a.png", "image/png", 1024).is_ok());
        assert!(validate_upload("a.png", "image/png", MAX_UPLOAD_BYTES as u64).is_ok());
        assert!(validate_upload("a.png", "image/png", MAX_UPLOAD_BYTES as u64 + 1).is_err());
        assert!(validate_upload("a.png", "image/png", 0).is_err());
        assert!(validate_upload("a.txt", "text/plain", 10).is_err());
    }

    #[test]
    fn long_names_are_truncated_on_char_boundaries() {
        assert_eq!(truncate_name("short.png", 20), "short.png");
        assert_eq!(truncate_name("ééééééééééééééééééééééé.png", 10), "ééééééé...");
    }
}
