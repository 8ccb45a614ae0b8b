use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::redirect::Policy;
use reqwest::Client;
use tracing::debug;

use crate::error::ProbeError;
use crate::probe::{HttpRequest, HttpResponse, WebClient};

/// Bodies past this size are cut; titles and fingerprints live near the top.
const MAX_BODY_BYTES: usize = 512 * 1024;

/// reqwest-backed [`WebClient`].
///
/// Certificate errors are ignored: scan targets routinely serve self-signed
/// certificates and the probe only reads what the server volunteers.
#[derive(Debug, Clone)]
pub struct HttpClient {
    follow: Client,
    no_follow: Client,
}

impl HttpClient {
    pub fn new() -> Result<Self, ProbeError> {
        let build = |redirect: Policy| {
            Client::builder()
                .danger_accept_invalid_certs(true)
                .redirect(redirect)
                .build()
        };
        Ok(Self {
            follow: build(Policy::limited(5))?,
            no_follow: build(Policy::none())?,
        })
    }
}

#[async_trait]
impl WebClient for HttpClient {
    async fn get(&self, request: &HttpRequest) -> Result<HttpResponse, ProbeError> {
        let client = if request.follow_redirects {
            &self.follow
        } else {
            &self.no_follow
        };
        let mut builder = client.get(&request.url).timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        let headers: BTreeMap<String, String> = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (k.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let bytes = resp.bytes().await?;
        let cut = bytes.len().min(MAX_BODY_BYTES);
        let body = String::from_utf8_lossy(&bytes[..cut]).into_owned();
        debug!(url = %request.url, status, bytes = bytes.len(), "http response");

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
