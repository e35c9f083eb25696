//! Download-link resolution.
//!
//! A [`LinkResolver`] turns a [`DownloadDescriptor`] into a URL the archive
//! can be fetched from. Resolvers are strategies: the built-in ones cover
//! pre-resolved links and the Nexus Mods website API; other sources (such
//! as a browser session) plug in the same way.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::config::DEFAULT_STALL_TIMEOUT;
use crate::error::{DownloadError, DownloadResult};
use crate::http::{BoxFuture, HttpTransport};
use crate::nexus::{DownloadDescriptor, NEXUS_BASE_URL};

/// Endpoint the Nexus Mods website uses to generate download links.
pub const GENERATE_DOWNLOAD_URL: &str =
    "https://www.nexusmods.com/Core/Libs/Common/Managers/Downloads?GenerateDownloadUrl";

/// Resolves a descriptor to a download URL.
pub trait LinkResolver: Send + Sync {
    /// Resolve `descriptor` to a URL.
    ///
    /// Errors of kind [`crate::ErrorKind::Authorization`] or
    /// [`crate::ErrorKind::Throttled`] stop the whole download session.
    fn resolve<'a>(&'a self, descriptor: &'a DownloadDescriptor) -> BoxFuture<'a, DownloadResult<String>>;
}

/// Resolver over links known in advance, keyed by file name.
#[derive(Debug, Clone, Default)]
pub struct DirectLinks {
    links: HashMap<String, String>,
}

impl DirectLinks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_link(mut self, file_name: impl Into<String>, url: impl Into<String>) -> Self {
        self.links.insert(file_name.into(), url.into());
        self
    }

    pub fn insert(&mut self, file_name: impl Into<String>, url: impl Into<String>) {
        self.links.insert(file_name.into(), url.into());
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

impl FromIterator<(String, String)> for DirectLinks {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            links: iter.into_iter().collect(),
        }
    }
}

impl LinkResolver for DirectLinks {
    fn resolve<'a>(&'a self, descriptor: &'a DownloadDescriptor) -> BoxFuture<'a, DownloadResult<String>> {
        Box::pin(async move {
            self.links
                .get(&descriptor.file_name)
                .cloned()
                .ok_or_else(|| DownloadError::InvalidResponse {
                    url: descriptor.mod_page_url(),
                    reason: format!("no download link known for {}", descriptor.file_name),
                })
        })
    }
}

/// Resolver calling the Nexus Mods website with a logged-in session cookie.
pub struct NexusApiResolver {
    transport: Arc<dyn HttpTransport>,
    cookie: String,
    endpoint: String,
    stall_timeout: Duration,
}

impl NexusApiResolver {
    /// # Arguments
    ///
    /// * `transport` - HTTP transport used for the form POST
    /// * `cookie` - Value of the `Cookie` header of a logged-in session
    pub fn new(transport: Arc<dyn HttpTransport>, cookie: impl Into<String>) -> Self {
        Self {
            transport,
            cookie: cookie.into(),
            endpoint: GENERATE_DOWNLOAD_URL.to_string(),
            stall_timeout: DEFAULT_STALL_TIMEOUT,
        }
    }

    /// Override the endpoint URL.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Longest pause allowed while reading the response body.
    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }
}

impl LinkResolver for NexusApiResolver {
    fn resolve<'a>(&'a self, descriptor: &'a DownloadDescriptor) -> BoxFuture<'a, DownloadResult<String>> {
        Box::pin(async move {
            let form = vec![
                ("fid".to_string(), descriptor.file_id.clone()),
                ("game_id".to_string(), descriptor.game_id()),
            ];
            let headers = vec![
                ("Origin".to_string(), NEXUS_BASE_URL.to_string()),
                ("Cookie".to_string(), self.cookie.clone()),
            ];

            let response = self
                .transport
                .post_form(&self.endpoint, &form, &headers)
                .await?
                .error_for_status(&self.endpoint)?;
            let body = response.bytes(&self.endpoint, self.stall_timeout).await?;
            tracing::trace!(
                file = %descriptor.file_name,
                response = %String::from_utf8_lossy(&body),
                "Download link response"
            );
            parse_download_url(&body, &self.endpoint)
        })
    }
}

/// Extract the `url` field of a link-generation response.
pub fn parse_download_url(body: &[u8], endpoint: &str) -> DownloadResult<String> {
    let invalid = |reason: String| DownloadError::InvalidResponse {
        url: endpoint.to_string(),
        reason,
    };

    let json: Value = serde_json::from_slice(body)
        .map_err(|e| invalid(format!("response is not JSON: {}", e)))?;
    let object = json
        .as_object()
        .ok_or_else(|| invalid("response is not a JSON object".to_string()))?;
    match object.get("url").and_then(Value::as_str) {
        Some(url) if !url.trim().is_empty() => Ok(url.to_string()),
        _ => Err(invalid(format!("response does not contain a download url: {}", json))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashValue;
    use crate::http::mock::{MockReply, MockTransport};
    use crate::modlist::GameData;
    use crate::ErrorKind;
    use serde_json::json;

    fn descriptor() -> DownloadDescriptor {
        DownloadDescriptor::new(
            "SkyUI.7z",
            GameData::lookup("skyrimse").unwrap(),
            "12604",
            "35407",
            100,
            HashValue::new(7),
        )
    }

    #[test]
    fn test_parse_download_url() {
        let url = parse_download_url(br#"{"url":"https://cdn/SkyUI.7z?md5=x"}"#, "e").unwrap();
        assert_eq!(url, "https://cdn/SkyUI.7z?md5=x");
    }

    #[test]
    fn test_parse_download_url_rejects_malformed() {
        for body in [&b"not json"[..], b"[]", br#"{"error":"nope"}"#, br#"{"url":""}"#, br#"{"url":5}"#] {
            let err = parse_download_url(body, "e").unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Authorization);
            assert!(err.is_fatal());
        }
    }

    #[tokio::test]
    async fn test_nexus_resolver_posts_form_with_session() {
        let transport = Arc::new(MockTransport::new().route(
            GENERATE_DOWNLOAD_URL,
            MockReply::json(json!({ "url": "https://cdn.example/SkyUI.7z" })),
        ));
        let resolver = NexusApiResolver::new(transport.clone(), "sid=abc");

        let url = resolver.resolve(&descriptor()).await.unwrap();
        assert_eq!(url, "https://cdn.example/SkyUI.7z");

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, "POST");
        assert_eq!(
            requests[0].form,
            vec![
                ("fid".to_string(), "35407".to_string()),
                ("game_id".to_string(), "1704".to_string())
            ]
        );
        assert!(requests[0]
            .headers
            .contains(&("Cookie".to_string(), "sid=abc".to_string())));
        assert!(requests[0]
            .headers
            .contains(&("Origin".to_string(), "https://www.nexusmods.com".to_string())));
    }

    #[tokio::test]
    async fn test_nexus_resolver_classifies_rejections() {
        let transport = Arc::new(
            MockTransport::new()
                .route("https://api/throttled", MockReply::Status(429))
                .route("https://api/expired", MockReply::Status(403)),
        );

        let throttled = NexusApiResolver::new(transport.clone(), "c").with_endpoint("https://api/throttled");
        let err = throttled.resolve(&descriptor()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Throttled);

        let expired = NexusApiResolver::new(transport, "c").with_endpoint("https://api/expired");
        let err = expired.resolve(&descriptor()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
    }

    #[tokio::test]
    async fn test_direct_links() {
        let links = DirectLinks::new().with_link("SkyUI.7z", "https://mirror/SkyUI.7z");
        assert_eq!(
            links.resolve(&descriptor()).await.unwrap(),
            "https://mirror/SkyUI.7z"
        );

        let err = DirectLinks::new().resolve(&descriptor()).await.unwrap_err();
        assert!(matches!(err, DownloadError::InvalidResponse { .. }));
    }
}
