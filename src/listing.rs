//! Directory Index
//!
//! Directories without an `index.html` get a plain HTML listing of their
//! entries. Requests for anything else are declined and fall through to the
//! static file service, which also redirects `/dir` to `/dir/`.

use std::path::Path;

use axum::{
    http::{Method, Uri},
    response::{Html, IntoResponse, Response},
};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};

use crate::render::{escape_html, is_read, resolve_under};

/// File served instead of a listing when present
pub const INDEX_FILE: &str = "index.html";

/// Characters escaped in entry links
const HREF: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Listing for a directory request, or `None` to pass it through
pub async fn directory_index(root: &Path, method: &Method, uri: &Uri) -> Option<Response> {
    if !is_read(method) || !uri.path().ends_with('/') {
        return None;
    }

    let decoded = percent_decode_str(uri.path()).decode_utf8().ok()?;
    let dir = resolve_under(root, &decoded)?;
    if !tokio::fs::metadata(&dir).await.ok()?.is_dir() {
        return None;
    }
    if tokio::fs::try_exists(dir.join(INDEX_FILE)).await.unwrap_or(false) {
        return None;
    }

    let names = match read_names(&dir).await {
        Ok(names) => names,
        Err(e) => {
            tracing::warn!("Failed to list {:?}: {}", dir, e);
            return None;
        }
    };

    Some(Html(listing_page(&names)).into_response())
}

/// Sorted entry names, directories suffixed with `/`
async fn read_names(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let mut name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type().await?.is_dir() {
            name.push('/');
        }
        names.push(name);
    }
    names.sort();
    Ok(names)
}

fn listing_page(names: &[String]) -> String {
    let mut out = String::from("<!DOCTYPE html>\n<meta charset=\"utf-8\">\n<pre>\n");
    for name in names {
        out.push_str(&format!(
            "<a href=\"{}\">{}</a>\n",
            escape_html(&utf8_percent_encode(name, HREF).to_string()),
            escape_html(name)
        ));
    }
    out.push_str("</pre>\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use tempfile::tempdir;

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn uri(s: &str) -> Uri {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_lists_sorted_entries() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "").unwrap();
        std::fs::write(dir.path().join("a b.md"), "").unwrap();
        std::fs::create_dir(dir.path().join("docs")).unwrap();

        let response = directory_index(dir.path(), &Method::GET, &uri("/")).await.unwrap();
        let body = body_text(response).await;

        let a = body.find("<a href=\"a%20b.md\">a b.md</a>").unwrap();
        let b = body.find("<a href=\"b.txt\">b.txt</a>").unwrap();
        let docs = body.find("<a href=\"docs/\">docs/</a>").unwrap();
        assert!(a < b && b < docs);
    }

    #[tokio::test]
    async fn test_names_are_escaped() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("<b>&.txt"), "").unwrap();

        let body = body_text(directory_index(dir.path(), &Method::GET, &uri("/")).await.unwrap()).await;
        assert!(body.contains("<a href=\"%3Cb%3E&amp;.txt\">&lt;b&gt;&amp;.txt</a>"));
    }

    #[tokio::test]
    async fn test_declines_when_not_a_listing() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "").unwrap();
        std::fs::create_dir(dir.path().join("site")).unwrap();
        std::fs::write(dir.path().join("site").join(INDEX_FILE), "<p>hi</p>").unwrap();
        std::fs::create_dir(dir.path().join("docs")).unwrap();

        assert!(directory_index(dir.path(), &Method::POST, &uri("/")).await.is_none());
        assert!(directory_index(dir.path(), &Method::GET, &uri("/a.txt")).await.is_none());
        assert!(directory_index(dir.path(), &Method::GET, &uri("/docs")).await.is_none());
        assert!(directory_index(dir.path(), &Method::GET, &uri("/site/")).await.is_none());
        assert!(directory_index(dir.path(), &Method::GET, &uri("/missing/")).await.is_none());
        assert!(directory_index(dir.path(), &Method::GET, &uri("/docs/")).await.is_some());
    }

    #[tokio::test]
    async fn test_declines_traversal() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("root");
        std::fs::create_dir(&root).unwrap();

        assert!(directory_index(&root, &Method::GET, &uri("/../")).await.is_none());
        assert!(directory_index(&root, &Method::GET, &uri("/%2e%2e/")).await.is_none());
        assert!(directory_index(&root, &Method::GET, &uri("/")).await.is_some());
    }
}
