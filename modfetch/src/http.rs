//! HTTP transport abstraction.
//!
//! Downloaders talk to the network through [`HttpTransport`] so tests can
//! substitute an in-memory implementation. [`ReqwestTransport`] is the
//! production implementation.
//!
//! Only the request phase (until response headers arrive) is bounded by the
//! request timeout. Response bodies can take arbitrarily long; stalls inside
//! them are detected by [`crate::io::IdleTimeoutReader`].

use std::future::Future;
use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures::TryStreamExt;
use percent_encoding::percent_decode_str;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_DISPOSITION, CONTENT_LENGTH};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::io::StreamReader;

use crate::config::DownloaderConfig;
use crate::error::{DownloadError, DownloadResult};
use crate::io::{IdleTimeoutReader, StreamOrigin};

/// Boxed future returned by [`HttpTransport`] methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Streaming response body.
pub type BodyReader = Pin<Box<dyn AsyncRead + Send>>;

/// A response whose headers have arrived.
pub struct HttpResponse {
    pub status: u16,
    pub content_length: Option<u64>,
    /// File name suggested by `Content-Disposition`, if any.
    pub file_name: Option<String>,
    pub body: BodyReader,
}

impl HttpResponse {
    /// Response with an in-memory body.
    pub fn from_bytes(status: u16, data: impl Into<Bytes>) -> Self {
        let data: Bytes = data.into();
        Self {
            status,
            content_length: Some(data.len() as u64),
            file_name: None,
            body: Box::pin(io::Cursor::new(data)),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turn a non-2xx status into the matching [`DownloadError`].
    pub fn error_for_status(self, url: &str) -> DownloadResult<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(DownloadError::from_status(self.status, url))
        }
    }

    /// Read the whole body into memory.
    ///
    /// Fails with [`DownloadError::Stalled`] when no bytes arrive for
    /// `stall_timeout`.
    pub async fn bytes(self, url: &str, stall_timeout: Duration) -> DownloadResult<Vec<u8>> {
        let mut data = Vec::with_capacity(self.content_length.unwrap_or(0).min(1 << 20) as usize);
        IdleTimeoutReader::new(self.body, stall_timeout)
            .read_to_end(&mut data)
            .await
            .map_err(|e| StreamOrigin::Remote(url).read_error(e))?;
        Ok(data)
    }
}

/// Result of a HEAD request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadInfo {
    pub status: u16,
    pub content_length: Option<u64>,
    pub file_name: Option<String>,
}

/// Minimal async HTTP client used by the downloaders.
pub trait HttpTransport: Send + Sync {
    /// Send a GET request and return once headers are received.
    fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, DownloadResult<HttpResponse>>;

    /// Send a HEAD request.
    fn head<'a>(&'a self, url: &'a str) -> BoxFuture<'a, DownloadResult<HeadInfo>>;

    /// Send a URL-encoded form POST with extra headers.
    ///
    /// # Arguments
    ///
    /// * `url` - Target URL
    /// * `form` - Form fields, in order
    /// * `headers` - Additional request headers (e.g. `Cookie`, `Origin`)
    fn post_form<'a>(
        &'a self,
        url: &'a str,
        form: &'a [(String, String)],
        headers: &'a [(String, String)],
    ) -> BoxFuture<'a, DownloadResult<HttpResponse>>;
}

/// [`HttpTransport`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    request_timeout: Duration,
}

impl ReqwestTransport {
    /// Build a client from downloader settings.
    pub fn new(config: &DownloaderConfig) -> DownloadResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));

        let mut builder = reqwest::Client::builder()
            .user_agent(concat!("modfetch/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .connect_timeout(config.http_timeout);
        if config.force_ipv4 {
            // Binding to the IPv4 wildcard restricts connects to IPv4 peers.
            builder = builder.local_address(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        }

        let client = builder.build().map_err(|e| DownloadError::Request {
            url: String::new(),
            reason: format!("failed to create HTTP client: {}", e),
        })?;

        Ok(Self {
            client,
            request_timeout: config.http_timeout,
        })
    }

    /// Wrap an existing client.
    pub fn with_client(client: reqwest::Client, request_timeout: Duration) -> Self {
        Self {
            client,
            request_timeout,
        }
    }

    async fn send(
        &self,
        url: &str,
        request: reqwest::RequestBuilder,
    ) -> DownloadResult<reqwest::Response> {
        match tokio::time::timeout(self.request_timeout, request.send()).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(map_reqwest_error(url, e, self.request_timeout)),
            Err(_) => Err(DownloadError::Timeout {
                url: url.to_string(),
                timeout: self.request_timeout,
            }),
        }
    }

    fn into_response(response: reqwest::Response) -> HttpResponse {
        let status = response.status().as_u16();
        let content_length = response.content_length();
        let file_name = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(file_name_from_disposition);
        let stream = response
            .bytes_stream()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e));

        HttpResponse {
            status,
            content_length,
            file_name,
            body: Box::pin(StreamReader::new(stream)),
        }
    }
}

impl HttpTransport for ReqwestTransport {
    fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, DownloadResult<HttpResponse>> {
        Box::pin(async move {
            tracing::trace!(url, "GET");
            let response = self.send(url, self.client.get(url)).await?;
            Ok(Self::into_response(response))
        })
    }

    fn head<'a>(&'a self, url: &'a str) -> BoxFuture<'a, DownloadResult<HeadInfo>> {
        Box::pin(async move {
            tracing::trace!(url, "HEAD");
            let response = self.send(url, self.client.head(url)).await?;
            let headers = response.headers();
            // HEAD responses have no body, so `content_length()` is not usable.
            let content_length = headers
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok());
            let file_name = headers
                .get(CONTENT_DISPOSITION)
                .and_then(|v| v.to_str().ok())
                .and_then(file_name_from_disposition);
            Ok(HeadInfo {
                status: response.status().as_u16(),
                content_length,
                file_name,
            })
        })
    }

    fn post_form<'a>(
        &'a self,
        url: &'a str,
        form: &'a [(String, String)],
        headers: &'a [(String, String)],
    ) -> BoxFuture<'a, DownloadResult<HttpResponse>> {
        Box::pin(async move {
            tracing::trace!(url, fields = form.len(), "POST");
            let mut request = self.client.post(url).form(form);
            for (name, value) in headers {
                request = request.header(name.as_str(), value.as_str());
            }
            let response = self.send(url, request).await?;
            Ok(Self::into_response(response))
        })
    }
}

fn map_reqwest_error(url: &str, err: reqwest::Error, timeout: Duration) -> DownloadError {
    if err.is_timeout() {
        DownloadError::Timeout {
            url: url.to_string(),
            timeout,
        }
    } else {
        DownloadError::Request {
            url: url.to_string(),
            reason: err.to_string(),
        }
    }
}

/// Last path segment of `url`, percent-decoded, ignoring query and fragment.
pub fn file_name_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let segment = path.rsplit('/').next()?;
    if segment.is_empty() {
        return None;
    }
    let decoded = percent_decode_str(segment).decode_utf8_lossy().to_string();
    Some(decoded)
}

/// File name from a `Content-Disposition` header value.
///
/// Prefers the RFC 5987 `filename*` parameter over plain `filename`.
pub fn file_name_from_disposition(value: &str) -> Option<String> {
    let mut plain = None;
    for param in value.split(';').map(str::trim) {
        let Some((key, raw)) = param.split_once('=') else {
            continue;
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "filename*" => {
                if let Some(encoded) = raw.trim().splitn(3, '\'').nth(2) {
                    let decoded = percent_decode_str(encoded).decode_utf8_lossy().to_string();
                    if !decoded.is_empty() {
                        return Some(decoded);
                    }
                }
            }
            "filename" => {
                let name = raw.trim().trim_matches('"');
                if !name.is_empty() {
                    plain = Some(name.to_string());
                }
            }
            _ => {}
        }
    }
    plain
}

#[cfg(test)]
pub(crate) mod mock {
    //! In-memory [`HttpTransport`] for unit tests.

    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// A canned reply for one request.
    #[derive(Clone)]
    pub enum MockReply {
        /// 200 with this body.
        Body(Bytes),
        /// Status code with an empty body.
        Status(u16),
        /// 200 with chunks delivered after the paired delays.
        Paced(Vec<(Duration, Bytes)>),
        /// Transport failure before headers.
        Fail(String),
    }

    impl MockReply {
        pub fn body(data: impl Into<Bytes>) -> Self {
            MockReply::Body(data.into())
        }

        pub fn json(value: serde_json::Value) -> Self {
            MockReply::Body(Bytes::from(value.to_string()))
        }
    }

    /// A request seen by the mock.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct RecordedRequest {
        pub method: &'static str,
        pub url: String,
        pub form: Vec<(String, String)>,
        pub headers: Vec<(String, String)>,
    }

    /// Replies are queued per URL; the last reply for a URL repeats.
    #[derive(Default)]
    pub struct MockTransport {
        routes: Mutex<HashMap<String, Vec<MockReply>>>,
        requests: Mutex<Vec<RecordedRequest>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue a reply for `url`.
        pub fn route(self, url: impl Into<String>, reply: MockReply) -> Self {
            self.routes
                .lock()
                .unwrap()
                .entry(url.into())
                .or_default()
                .push(reply);
            self
        }

        pub fn requests(&self) -> Vec<RecordedRequest> {
            self.requests.lock().unwrap().clone()
        }

        /// Number of requests of any method made to `url`.
        pub fn count(&self, url: &str) -> usize {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.url == url)
                .count()
        }

        fn next_reply(&self, url: &str) -> Option<MockReply> {
            let mut routes = self.routes.lock().unwrap();
            let queue = routes.get_mut(url)?;
            if queue.len() > 1 {
                Some(queue.remove(0))
            } else {
                queue.first().cloned()
            }
        }

        fn record(
            &self,
            method: &'static str,
            url: &str,
            form: &[(String, String)],
            headers: &[(String, String)],
        ) {
            self.requests.lock().unwrap().push(RecordedRequest {
                method,
                url: url.to_string(),
                form: form.to_vec(),
                headers: headers.to_vec(),
            });
        }

        fn respond(&self, url: &str) -> DownloadResult<HttpResponse> {
            match self.next_reply(url) {
                None => Ok(HttpResponse::from_bytes(404, Bytes::new())),
                Some(MockReply::Body(data)) => Ok(HttpResponse::from_bytes(200, data)),
                Some(MockReply::Status(status)) => Ok(HttpResponse::from_bytes(status, Bytes::new())),
                Some(MockReply::Fail(reason)) => Err(DownloadError::Request {
                    url: url.to_string(),
                    reason,
                }),
                Some(MockReply::Paced(chunks)) => {
                    let total = chunks.iter().map(|(_, c)| c.len() as u64).sum();
                    let stream = futures::stream::unfold(chunks.into_iter(), |mut it| async move {
                        let (delay, data) = it.next()?;
                        tokio::time::sleep(delay).await;
                        Some((Ok::<_, io::Error>(data), it))
                    });
                    Ok(HttpResponse {
                        status: 200,
                        content_length: Some(total),
                        file_name: None,
                        body: Box::pin(StreamReader::new(Box::pin(stream))),
                    })
                }
            }
        }
    }

    impl HttpTransport for MockTransport {
        fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, DownloadResult<HttpResponse>> {
            Box::pin(async move {
                self.record("GET", url, &[], &[]);
                self.respond(url)
            })
        }

        fn head<'a>(&'a self, url: &'a str) -> BoxFuture<'a, DownloadResult<HeadInfo>> {
            Box::pin(async move {
                self.record("HEAD", url, &[], &[]);
                let response = self.respond(url)?;
                Ok(HeadInfo {
                    status: response.status,
                    content_length: response.content_length,
                    file_name: response.file_name,
                })
            })
        }

        fn post_form<'a>(
            &'a self,
            url: &'a str,
            form: &'a [(String, String)],
            headers: &'a [(String, String)],
        ) -> BoxFuture<'a, DownloadResult<HttpResponse>> {
            Box::pin(async move {
                self.record("POST", url, form, headers);
                self.respond(url)
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::{MockReply, MockTransport};
    use super::*;

    #[test]
    fn test_file_name_from_url() {
        assert_eq!(
            file_name_from_url("https://cdn.example/files/My%20Mod-1-0.7z?md5=abc&expires=1"),
            Some("My Mod-1-0.7z".to_string())
        );
        assert_eq!(
            file_name_from_url("https://cdn.example/a/b.zip#frag"),
            Some("b.zip".to_string())
        );
        assert_eq!(file_name_from_url("https://cdn.example/dir/"), None);
    }

    #[test]
    fn test_file_name_from_disposition() {
        assert_eq!(
            file_name_from_disposition("attachment; filename=\"mod.7z\""),
            Some("mod.7z".to_string())
        );
        assert_eq!(
            file_name_from_disposition(
                "attachment; filename=\"fallback.7z\"; filename*=UTF-8''na%C3%AFve.7z"
            ),
            Some("naïve.7z".to_string())
        );
        assert_eq!(file_name_from_disposition("inline"), None);
    }

    #[test]
    fn test_error_for_status() {
        let ok = HttpResponse::from_bytes(200, "x").error_for_status("u");
        assert!(ok.is_ok());

        let err = HttpResponse::from_bytes(429, "")
            .error_for_status("u")
            .err()
            .unwrap();
        assert!(matches!(err, DownloadError::TooManyRequests { .. }));
    }

    #[tokio::test]
    async fn test_response_bytes() {
        let response = HttpResponse::from_bytes(200, "payload");
        assert_eq!(response.content_length, Some(7));
        assert_eq!(
            response.bytes("u", Duration::from_secs(5)).await.unwrap(),
            b"payload"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_bytes_detects_stall() {
        let mock = MockTransport::new().route(
            "http://x/slow",
            MockReply::Paced(vec![
                (Duration::ZERO, Bytes::from_static(b"abc")),
                (Duration::from_secs(3600), Bytes::from_static(b"def")),
            ]),
        );
        let response = mock.get("http://x/slow").await.unwrap();

        let err = response
            .bytes("http://x/slow", Duration::from_secs(5))
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::Stalled { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_mock_queues_then_repeats_last_reply() {
        let mock = MockTransport::new()
            .route("http://x/a", MockReply::Status(503))
            .route("http://x/a", MockReply::body("ok"));

        assert_eq!(mock.get("http://x/a").await.unwrap().status, 503);
        assert_eq!(mock.get("http://x/a").await.unwrap().status, 200);
        assert_eq!(mock.get("http://x/a").await.unwrap().status, 200);
        assert_eq!(mock.get("http://x/missing").await.unwrap().status, 404);
        assert_eq!(mock.count("http://x/a"), 3);
    }

    #[test]
    fn test_reqwest_transport_builds() {
        let config = DownloaderConfig::default().with_http_timeout(Duration::from_secs(5));
        let transport = ReqwestTransport::new(&config).unwrap();
        assert_eq!(transport.request_timeout, Duration::from_secs(5));
    }
}
