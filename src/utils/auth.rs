//! Authentication and attribution headers for API requests.

/// Optional app attribution sent to OpenRouter-style providers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attribution {
    /// Sent as `HTTP-Referer`.
    pub referer: Option<String>,
    /// Sent as `X-Title`.
    pub title: Option<String>,
}

impl Attribution {
    pub fn new(referer: Option<String>, title: Option<String>) -> Self {
        Self {
            referer: referer.filter(|value| !value.trim().is_empty()),
            title: title.filter(|value| !value.trim().is_empty()),
        }
    }
}

/// Add a standard `Authorization: Bearer` header.
pub fn add_auth_headers(request: reqwest::RequestBuilder, api_key: &str) -> reqwest::RequestBuilder {
    request.header("Authorization", format!("Bearer {api_key}"))
}

pub fn add_attribution_headers(
    mut request: reqwest::RequestBuilder,
    attribution: &Attribution,
) -> reqwest::RequestBuilder {
    if let Some(referer) = &attribution.referer {
        request = request.header("HTTP-Referer", referer);
    }
    if let Some(title) = &attribution.title {
        request = request.header("X-Title", title);
    }
    request
}
