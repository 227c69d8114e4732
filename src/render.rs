//! Content Renderer
//!
//! Markdown files are served as styled HTML unless the request carries the
//! `raw` query flag. Anything the renderer cannot or should not handle is
//! declined and falls through to the static file service.

use std::path::{Component, Path, PathBuf};

use axum::{
    http::{Method, StatusCode, Uri},
    response::{Html, IntoResponse, Response},
};
use percent_encoding::percent_decode_str;
use pulldown_cmark::{html, Options, Parser};

/// Query flag requesting the unrendered file
pub const RAW_FLAG: &str = "raw";

/// File extensions rendered as Markdown
const MARKDOWN_EXTENSIONS: &[&str] = &["md", "markdown"];

/// Layout applied to every rendered page
const BASE_STYLE: &str = "\
body { max-width: 48rem; margin: 2rem auto; padding: 0 1rem; font-family: sans-serif; line-height: 1.5; }
.wolfserve-toolbar { text-align: right; font-size: 0.875rem; }
pre { overflow-x: auto; }
table { border-collapse: collapse; }
th, td { border: 1px solid #ccc; padding: 0.25rem 0.5rem; }";

/// Renders Markdown files under a served root
#[derive(Debug, Clone)]
pub struct Renderer {
    root: PathBuf,
    style: Option<String>,
}

impl Renderer {
    pub fn new(root: impl Into<PathBuf>, style: Option<String>) -> Self {
        Self {
            root: root.into(),
            style,
        }
    }

    /// Rendered response, or `None` to pass the request through untouched
    pub async fn render(&self, method: &Method, uri: &Uri) -> Option<Response> {
        if !is_read(method) || has_raw_flag(uri.query()) {
            return None;
        }

        let decoded = percent_decode_str(uri.path()).decode_utf8().ok()?;
        if !is_markdown(&decoded) {
            return None;
        }

        let Some(path) = self.resolve(&decoded) else {
            tracing::debug!("Not rendering {}: outside the served root", decoded);
            return None;
        };

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::debug!("Not rendering {:?}: {}", path, e);
                return None;
            }
        };

        let source = match String::from_utf8(bytes) {
            Ok(source) => source,
            Err(e) => {
                tracing::warn!("Failed to render {:?}: {}", path, e);
                return Some(
                    (StatusCode::INTERNAL_SERVER_ERROR, "failed to render markdown")
                        .into_response(),
                );
            }
        };

        let title = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let raw_href = format!("{}?{}=1", uri.path(), RAW_FLAG);
        let page = page(&title, &markdown_to_html(&source), self.style.as_deref(), &raw_href);

        Some(Html(page).into_response())
    }

    fn resolve(&self, request_path: &str) -> Option<PathBuf> {
        resolve_under(&self.root, request_path)
    }
}

/// Map a decoded request path under `root`, refusing any escape
pub(crate) fn resolve_under(root: &Path, request_path: &str) -> Option<PathBuf> {
    let relative = request_path.trim_start_matches('/');
    let mut path = root.to_path_buf();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(path)
}

/// Only GET and HEAD are rendered; other methods get the file service's answer
pub(crate) fn is_read(method: &Method) -> bool {
    method == Method::GET || method == Method::HEAD
}

fn has_raw_flag(query: Option<&str>) -> bool {
    query
        .unwrap_or_default()
        .split('&')
        .any(|pair| pair.split('=').next() == Some(RAW_FLAG))
}

fn is_markdown(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            MARKDOWN_EXTENSIONS
                .iter()
                .any(|md| ext.eq_ignore_ascii_case(md))
        })
}

/// Convert GitHub-flavoured Markdown to HTML
pub fn markdown_to_html(source: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);

    let parser = Parser::new_ext(source, options);
    let mut out = String::with_capacity(source.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

fn page(title: &str, body: &str, style: Option<&str>, raw_href: &str) -> String {
    let custom = style
        .map(|css| format!("<style>\n{}\n</style>\n", css))
        .unwrap_or_default();

    format!(
        "<!DOCTYPE html>
<html>
<head>
<meta charset=\"utf-8\">
<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">
<title>{title}</title>
<style>
{base}
</style>
{custom}</head>
<body>
<div class=\"wolfserve-toolbar\"><a href=\"{raw}\">view raw</a></div>
<article class=\"markdown-body\">
{body}</article>
</body>
</html>
",
        title = escape_html(title),
        base = BASE_STYLE,
        custom = custom,
        raw = escape_html(raw_href),
        body = body,
    )
}

pub(crate) fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
