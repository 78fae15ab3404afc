/// MIME type for a file name, `application/octet-stream` when unknown.
pub fn hint_for(name: &str) -> String {
    mime_guess::from_path(name)
        .first()
        .map(|m| m.essence_str().to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string())
}

/// Whether a viewer can render this type inline instead of downloading it.
pub fn is_viewable(mime: &str) -> bool {
    mime.starts_with("text/")
        || mime.starts_with("image/")
        || matches!(
            mime,
            "application/pdf"
                | "application/json"
                | "application/xml"
                | "application/javascript"
                | "text/javascript"
        )
}
