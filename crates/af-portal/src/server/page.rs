use af_session::{
    flash::{take_flashes, Flash},
    SessionContext,
};
use axum::response::{Html, IntoResponse, Response};
use serde::Serialize;
use serde_json::{json, Value};
use tower_sessions::Session;
use tracing::warn;

const PORTAL_NAME: &str = "AF Portal";

/// Minimal page shell: names the template, carries its data as JSON and the
/// pending flash messages. Rendering proper happens in the browser.
#[derive(Debug, Clone)]
pub(crate) struct Page {
    template: &'static str,
    title: &'static str,
    context: Value,
    viewer: Value,
    flashes: Vec<Flash>,
}

impl Page {
    pub fn new(template: &'static str, title: &'static str) -> Self {
        Self { template, title, context: json!({}), viewer: Value::Null, flashes: vec![] }
    }

    pub fn not_found() -> Self {
        Self::new("404.html", "Page not found")
    }

    pub fn bad_request() -> Self {
        Self::new("400.html", "Bad request")
    }

    pub fn internal_server_error() -> Self {
        Self::new("500.html", "Something went wrong")
    }

    /// Adds `value` to the template data under `key`.
    pub fn with(mut self, key: &str, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or_else(|e| {
            warn!(error = %e, "unable to serialize page data {key}.");
            Value::Null
        });
        if let Value::Object(context) = &mut self.context {
            context.insert(key.to_owned(), value);
        }
        self
    }

    /// Drains the session's flash messages and records who is looking at the page.
    pub async fn for_session(mut self, session: &Session) -> Self {
        match take_flashes(session).await {
            Ok(flashes) => self.flashes = flashes,
            Err(e) => warn!(error = %e, "unable to read flash messages."),
        }
        match SessionContext::load(session).await {
            Ok(context) if context.is_authenticated => {
                self.viewer = json!({
                    "name": context.name,
                    "unix_name": context.unix_name,
                    "role": context.role,
                });
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "unable to read session context."),
        }
        self
    }

    fn render(&self) -> String {
        let flashes: String = self
            .flashes
            .iter()
            .map(|flash| {
                let category = serde_json::to_value(flash.category)
                    .ok()
                    .and_then(|category| category.as_str().map(str::to_owned))
                    .unwrap_or_default();
                format!("<li class=\"flash flash-{category}\">{}</li>", escape_html(&flash.message))
            })
            .collect();
        let data = json!({ "context": self.context, "viewer": self.viewer }).to_string().replace("</", "<\\/");

        format!(
            "<!DOCTYPE html>\n<html lang=\"en\">\n<head><meta charset=\"utf-8\"><title>{title} | {PORTAL_NAME}</title></head>\n\
             <body data-template=\"{template}\">\n<ul class=\"flashes\">{flashes}</ul>\n\
             <script id=\"page-data\" type=\"application/json\">{data}</script>\n</body>\n</html>\n",
            title = escape_html(self.title),
            template = self.template,
        )
    }
}

impl IntoResponse for Page {
    fn into_response(self) -> Response {
        Html(self.render()).into_response()
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
