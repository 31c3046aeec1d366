use crate::errors::ProxyError;
use http::uri::Uri;

/// Builds the URI of an upstream request: the path of `base` followed by
/// `path` and the original query.
pub fn upstream_uri(base: &str, path: &str, query: Option<&str>) -> Result<Uri, ProxyError> {
    let base_uri: Uri = base.parse()?;
    let scheme = base_uri
        .scheme_str()
        .ok_or_else(|| ProxyError::InvalidUpstream(base.to_string()))?;
    if scheme != "http" {
        return Err(ProxyError::UnsupportedScheme(scheme.to_string()));
    }
    let authority = base_uri
        .authority()
        .ok_or_else(|| ProxyError::InvalidUpstream(base.to_string()))?;

    let prefix = base_uri.path().trim_end_matches('/');
    let path = match path {
        "" => "/",
        p if p.starts_with('/') => p,
        _ => return Err(ProxyError::InvalidUpstream(format!("{base} {path}"))),
    };

    let mut uri = format!("{scheme}://{authority}{prefix}{path}");
    if let Some(query) = query {
        uri.push('?');
        uri.push_str(query);
    }
    Ok(uri.parse()?)
}
