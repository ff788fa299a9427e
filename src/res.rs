use axum::{
    debug_handler,
    http::header,
    response::{Html, IntoResponse},
};

#[macro_export]
macro_rules! include_res {
    (bytes, $p:expr) => {
        include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/res", $p))
    };
    (str, $p:expr) => {
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/res", $p))
    };
}

/// Fills the `{flash}` slot of a form page.
pub fn form_page(template: &str, flash: Option<&str>) -> Html<String> {
    let flash = flash
        .map(|message| format!(r#"<p class="flash">{}</p>"#, escape_html(message)))
        .unwrap_or_default();
    Html(template.replace("{flash}", &flash))
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    // writing into a String cannot fail
    let _ = pulldown_cmark_escape::escape_html(&mut escaped, text);
    escaped
}

#[debug_handler]
pub async fn chat_script() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/javascript; charset=utf-8")],
        include_res!(str, "/static/chat.js"),
    )
}
