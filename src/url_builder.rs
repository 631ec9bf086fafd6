use crate::ids::RequestId;
use url::Url;

const SCHEME: &str = "https";
const BASE_PATH: &str = "ee";
const VERSION: &str = "v1";
const DEFAULT_ENDPOINT: &str = "interact";

const PROD_DOMAIN: &str = "edge.adobedc.net";
const PRE_PROD_DOMAIN: &str = "edge.adobedc.net-pre-prod";
const INT_DOMAIN: &str = "edge-int.adobedc.net";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    Prod,
    PreProd,
    Int,
}

impl Environment {
    /// `prod`, unset, or unrecognized all resolve to production (§4.3).
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("pre-prod") => Environment::PreProd,
            Some("int") => Environment::Int,
            _ => Environment::Prod,
        }
    }

    fn fixed_domain(self) -> Option<&'static str> {
        match self {
            Environment::Prod => None,
            Environment::PreProd => Some(PRE_PROD_DOMAIN),
            Environment::Int => Some(INT_DOMAIN),
        }
    }
}

/// Parameters for a single URL composition (C3). One of these is built per
/// hit from the snapshots the dispatch core already has in hand.
#[derive(Clone, Debug, Default)]
pub struct UrlParams {
    pub environment: Option<String>,
    /// `edge.domain` config override; only honored in production (§4.3).
    pub domain_override: Option<String>,
    pub location_hint: Option<String>,
    /// Configured or overridden datastream id; always present, goes in `configId`.
    pub config_id: String,
    /// Verbatim `request.path` override (e.g. `va/v1/sessionstart`), replacing
    /// the `{version}/{endpoint}` tail.
    pub path_override: Option<String>,
    pub request_id: Option<RequestId>,
}

/// Composes endpoint URLs (C3) from environment, domain, path, optional
/// location hint, and datastream id (§4.3, §6 wire protocol).
pub fn build_url(params: &UrlParams) -> anyhow::Result<Url> {
    let environment = Environment::parse(params.environment.as_deref());
    let domain = match environment.fixed_domain() {
        Some(fixed) => fixed,
        None => params.domain_override.as_deref().unwrap_or(PROD_DOMAIN),
    };

    let mut url = Url::parse(&format!("{}://{}", SCHEME, domain))?;
    {
        let mut segments = url.path_segments_mut().map_err(|_| anyhow::anyhow!("cannot-be-a-base URL"))?;
        segments.push(BASE_PATH);
        if let Some(hint) = params.location_hint.as_deref().filter(|h| !h.is_empty()) {
            segments.push(hint);
        }
        match params.path_override.as_deref() {
            Some(path) => {
                for segment in path.split('/').filter(|s| !s.is_empty()) {
                    segments.push(segment);
                }
            }
            None => {
                segments.push(VERSION);
                segments.push(DEFAULT_ENDPOINT);
            }
        }
    }

    url.query_pairs_mut().append_pair("configId", &params.config_id);
    if let Some(request_id) = &params.request_id {
        url.query_pairs_mut().append_pair("requestId", request_id.as_ref());
    }
    Ok(url)
}
