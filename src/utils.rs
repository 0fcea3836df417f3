use url::Url;

pub fn normalize_url(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}

/// Websocket endpoint served next to the REST API: same host, `ws`/`wss`
/// scheme, path `/ws`.
pub fn socket_url(base_url: &str) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(&normalize_url(base_url))?;
    let scheme = if url.scheme() == "http" { "ws" } else { "wss" };
    // http(s) -> ws(s) only changes between special schemes, which url allows
    let _ = url.set_scheme(scheme);
    url.set_path("/ws");
    url.set_query(None);
    Ok(url)
}
