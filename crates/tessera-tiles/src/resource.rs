//! URL helpers for content resources: resolution, server keys and query strings.

/// Whether `uri` carries its own scheme (`http://`, `file://`, `data:` ...).
pub fn is_absolute(uri: &str) -> bool {
    if let Some((scheme, _)) = uri.split_once(':') {
        let valid = !scheme.is_empty()
            && scheme.len() > 1
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        return valid && (uri[scheme.len()..].starts_with("://") || scheme == "data");
    }
    false
}

/// Resolve `uri` relative to the resource `base` it was referenced from.
pub fn resolve_url(base: &str, uri: &str) -> String {
    if is_absolute(uri) || base.is_empty() {
        return uri.to_string();
    }
    let base = strip_query(base);

    if let Some(rest) = uri.strip_prefix('/') {
        if let Some(origin) = origin(base) {
            return format!("{origin}/{rest}");
        }
        return uri.to_string();
    }

    let (prefix, path) = match origin(base) {
        Some(origin) => (origin, &base[origin.len()..]),
        None => ("", base),
    };
    let directory = match path.rfind('/') {
        Some(index) => &path[..=index],
        None => "",
    };
    let joined = format!("{directory}{uri}");
    format!("{prefix}{}", normalize_path(&joined))
}

/// Key used to throttle requests per server: `scheme://host:port` for URLs,
/// `file` for local paths.
pub fn server_key(url: &str) -> String {
    let Some(authority_start) = url.find("://").map(|i| i + 3) else {
        return "file".to_string();
    };
    let scheme = url[..authority_start - 3].to_ascii_lowercase();
    if scheme == "file" {
        return "file".to_string();
    }
    let rest = &url[authority_start..];
    let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let authority = &rest[..end];
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
    let host_port = host_port.to_ascii_lowercase();

    let has_port = match host_port.rfind(':') {
        Some(i) => !host_port[i..].contains(']'),
        None => false,
    };
    if has_port {
        return format!("{scheme}://{host_port}");
    }
    let port = match scheme.as_str() {
        "https" => 443,
        _ => 80,
    };
    format!("{scheme}://{host_port}:{port}")
}

/// Append `key=value` to the query string, before any fragment.
pub fn append_query(url: &str, key: &str, value: &str) -> String {
    let (body, fragment) = match url.find('#') {
        Some(i) => url.split_at(i),
        None => (url, ""),
    };
    let separator = if body.contains('?') { '&' } else { '?' };
    format!(
        "{body}{separator}{}={}{fragment}",
        percent_encode(key),
        percent_encode(value)
    )
}

/// The URL without its query string and fragment.
pub fn strip_query(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    &url[..end]
}

fn origin(url: &str) -> Option<&str> {
    let start = url.find("://")? + 3;
    let end = url[start..]
        .find('/')
        .map_or(url.len(), |i| start + i);
    Some(&url[..end])
}

fn normalize_path(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if matches!(segments.last(), Some(&last) if last != "..") {
                    segments.pop();
                } else if !absolute {
                    segments.push("..");
                }
            }
            other => segments.push(other),
        }
    }
    let joined = segments.join("/");
    if absolute {
        format!("/{joined}")
    } else {
        joined
    }
}

fn percent_encode(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for byte in text.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}
