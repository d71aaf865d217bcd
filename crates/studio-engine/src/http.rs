use std::time::Duration;

use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response as HttpResponse};
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use studio_contracts::error::{StudioError, StudioResult};
use studio_contracts::media::{parse_data_uri, Credential, ProviderId};
use tracing::debug;

const ERROR_BODY_MAX_CHARS: usize = 512;

/// Response body after content-type sniffing.
#[derive(Debug, Clone, PartialEq)]
pub enum ProxyBody {
    Json(Value),
    Binary { data: Vec<u8>, mime_type: String },
}

/// Blocking client for the per-provider proxy routes
/// (`{base}/api/{provider}/{route}`). Cheap to clone.
#[derive(Debug, Clone)]
pub struct ProxyClient {
    base: String,
    http: HttpClient,
}

impl ProxyClient {
    pub fn new(base: impl Into<String>) -> Self {
        let http = HttpClient::builder()
            .connect_timeout(Duration::from_secs(20))
            .timeout(None)
            .build()
            .unwrap_or_else(|_| HttpClient::new());
        Self {
            base: base.into().trim().trim_end_matches('/').to_string(),
            http,
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn route(&self, provider: ProviderId, route: &str) -> String {
        format!("{}/api/{}/{}", self.base, provider, route.trim_start_matches('/'))
    }

    pub fn post_json(&self, provider: ProviderId, route: &str, body: &Value) -> StudioResult<ProxyBody> {
        let url = self.route(provider, route);
        debug!(%provider, %url, "proxy POST");
        let response = send(provider, self.http.post(&url).json(body))?;
        read_body(provider, response)
    }

    pub fn get(
        &self,
        provider: ProviderId,
        route: &str,
        query: &[(&str, &str)],
        credential: &Credential,
    ) -> StudioResult<ProxyBody> {
        let url = self.route(provider, route);
        debug!(%provider, %url, "proxy GET");
        let request = self
            .http
            .get(&url)
            .query(query)
            .bearer_auth(credential.expose());
        let response = send(provider, request)?;
        read_body(provider, response)
    }

    /// Downloads remote media through the provider's authenticated media
    /// route. `data:` URIs are decoded locally.
    pub fn fetch_media(
        &self,
        provider: ProviderId,
        remote_url: &str,
        credential: &Credential,
    ) -> StudioResult<(Vec<u8>, String)> {
        if let Some((mime_type, data)) = parse_data_uri(remote_url) {
            return Ok((data, mime_type));
        }
        match self.get(provider, "media", &[("url", remote_url)], credential)? {
            ProxyBody::Binary { data, mime_type } => Ok((data, mime_type)),
            ProxyBody::Json(payload) => Err(StudioError::unrecognized(
                provider.as_str(),
                format!("media download returned JSON: {}", truncate_text(&payload.to_string(), 120)),
            )),
        }
    }

    /// Opens a streaming POST. Fails before any body is read when the
    /// status is not 2xx.
    pub fn open_stream(&self, provider: ProviderId, route: &str, body: &Value) -> StudioResult<HttpResponse> {
        let url = self.route(provider, route);
        debug!(%provider, %url, "proxy stream");
        let response = send(
            provider,
            self.http
                .post(&url)
                .header(reqwest::header::ACCEPT, "text/event-stream")
                .json(body),
        )?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(error_from_status(
                provider,
                status.as_u16(),
                &text,
                "Invalid Request",
            ));
        }
        Ok(response)
    }
}

fn send(provider: ProviderId, request: RequestBuilder) -> StudioResult<HttpResponse> {
    request
        .send()
        .map_err(|err| StudioError::Transport(format!("{provider} proxy unreachable: {err}")))
}

fn read_body(provider: ProviderId, response: HttpResponse) -> StudioResult<ProxyBody> {
    let status = response.status();
    let mime_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .unwrap_or_default();
    let bytes = response
        .bytes()
        .map_err(|err| StudioError::Transport(format!("{provider} response body read failed: {err}")))?;

    if !status.is_success() {
        let text = String::from_utf8_lossy(&bytes);
        return Err(error_from_status(provider, status.as_u16(), &text, "Request failed"));
    }
    if is_media_type(&mime_type) {
        return Ok(ProxyBody::Binary {
            data: bytes.to_vec(),
            mime_type: essence(&mime_type).to_string(),
        });
    }
    let parsed: Value = serde_json::from_slice(&bytes).map_err(|err| {
        StudioError::unrecognized(
            provider.as_str(),
            format!("invalid JSON payload ({err}); content-type '{mime_type}'"),
        )
    })?;
    Ok(ProxyBody::Json(parsed))
}

/// `image/*`, `video/*`, `audio/*` and octet streams are passed through as bytes.
pub fn is_media_type(content_type: &str) -> bool {
    let essence = essence(content_type).to_ascii_lowercase();
    essence.starts_with("image/")
        || essence.starts_with("video/")
        || essence.starts_with("audio/")
        || essence == "application/octet-stream"
}

fn essence(content_type: &str) -> &str {
    content_type.split(';').next().unwrap_or_default().trim()
}

/// Maps a non-2xx proxy reply onto the error taxonomy, preferring the
/// provider's own message from `{error: ...}` bodies.
pub fn error_from_status(provider: ProviderId, status: u16, body: &str, fallback: &str) -> StudioError {
    let message = error_message(body).unwrap_or_else(|| {
        let trimmed = body.trim();
        if trimmed.is_empty() || trimmed.starts_with('<') {
            fallback.to_string()
        } else {
            truncate_text(trimmed, ERROR_BODY_MAX_CHARS)
        }
    });
    match status {
        401 | 403 => StudioError::Auth(format!("{provider} rejected the API key: {message}")),
        _ => StudioError::provider(provider.as_str(), Some(status), message),
    }
}

fn error_message(body: &str) -> Option<String> {
    let parsed: Value = serde_json::from_str(body).ok()?;
    let error = parsed.get("error")?;
    let message = match error {
        Value::String(text) => text.clone(),
        Value::Object(obj) => obj
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
        other => other.to_string(),
    };
    let message = message.trim();
    (!message.is_empty()).then(|| truncate_text(message, ERROR_BODY_MAX_CHARS))
}

pub fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use studio_contracts::error::{ErrorKind, StudioError};
    use studio_contracts::media::ProviderId;

    use mockito::Matcher;
    use serde_json::json;
    use studio_contracts::media::Credential;

    use super::{error_from_status, is_media_type, truncate_text, ProxyBody, ProxyClient};

    #[test]
    fn routes_are_namespaced_per_provider() {
        let client = ProxyClient::new("http://localhost:3000/ ");
        assert_eq!(
            client.route(ProviderId::Navy, "/video"),
            "http://localhost:3000/api/navy/video"
        );
        assert_eq!(client.base(), "http://localhost:3000");
    }

    #[test]
    fn provider_message_is_preferred() {
        let err = error_from_status(ProviderId::Chutes, 500, r#"{"error":"model overloaded"}"#, "Request failed");
        assert_eq!(err, StudioError::provider("chutes", Some(500), "model overloaded"));

        let err = error_from_status(
            ProviderId::Gemini,
            400,
            r#"{"error":{"message":"bad aspect ratio","code":400}}"#,
            "Request failed",
        );
        assert!(err.to_string().contains("bad aspect ratio"));

        let err = error_from_status(ProviderId::Navy, 502, "<html>gateway</html>", "Request failed");
        assert!(err.to_string().ends_with("Request failed"));
    }

    #[test]
    fn rejected_key_is_an_auth_error() {
        let err = error_from_status(ProviderId::OpenRouter, 401, "{}", "Request failed");
        assert_eq!(err.kind(), ErrorKind::Auth);
    }

    #[test]
    fn sniffs_binary_content_types() {
        assert!(is_media_type("video/mp4"));
        assert!(is_media_type("image/png; charset=binary"));
        assert!(is_media_type("audio/wav"));
        assert!(!is_media_type("application/json"));
        assert!(!is_media_type(""));
        assert_eq!(truncate_text("abcdef", 3), "abc…");
    }

    #[test]
    fn stream_rejects_non_success_before_reading() -> anyhow::Result<()> {
        let mut server = mockito::Server::new();
        let _bad = server
            .mock("POST", "/api/navy/chat")
            .match_header("accept", "text/event-stream")
            .with_status(400)
            .with_header("content-type", "text/html")
            .with_body("<html>bad</html>")
            .create();
        let _denied = server
            .mock("POST", "/api/gemini/chat")
            .with_status(403)
            .with_body("{}")
            .create();

        let client = ProxyClient::new(server.url());
        let err = client.open_stream(ProviderId::Navy, "chat", &json!({"messages": []})).err();
        assert_eq!(err, Some(StudioError::provider("navy", Some(400), "Invalid Request")));
        let err = client.open_stream(ProviderId::Gemini, "chat", &json!({})).err();
        assert_eq!(err.map(|err| err.kind()), Some(ErrorKind::Auth));
        Ok(())
    }

    #[test]
    fn media_route_must_answer_with_bytes() -> anyhow::Result<()> {
        let mut server = mockito::Server::new();
        let _json = server
            .mock("GET", "/api/navy/media")
            .match_query(Matcher::Any)
            .with_header("content-type", "application/json")
            .with_body(r#"{"status":"expired"}"#)
            .create();
        let client = ProxyClient::new(server.url());
        let err = client
            .fetch_media(ProviderId::Navy, "https://api.navy/v/1.mp4", &Credential::new("nk"))
            .err();
        assert_eq!(err.map(|err| err.kind()), Some(ErrorKind::UnrecognizedShape));

        let (data, mime) = client.fetch_media(ProviderId::Navy, "data:audio/wav;base64,aGk=", &Credential::new("nk"))?;
        assert_eq!((data.as_slice(), mime.as_str()), (&b"hi"[..], "audio/wav"));
        Ok(())
    }

    #[test]
    fn non_json_text_is_an_unrecognized_shape() -> anyhow::Result<()> {
        let mut server = mockito::Server::new();
        let _text = server
            .mock("POST", "/api/chutes/image")
            .with_header("content-type", "text/plain")
            .with_body("queued")
            .create();
        let _bytes = server
            .mock("POST", "/api/chutes/audio")
            .with_header("content-type", "audio/mpeg; charset=binary")
            .with_body(b"ID3")
            .create();
        let client = ProxyClient::new(server.url());
        let err = client.post_json(ProviderId::Chutes, "image", &json!({})).err();
        assert_eq!(err.map(|err| err.kind()), Some(ErrorKind::UnrecognizedShape));
        assert_eq!(
            client.post_json(ProviderId::Chutes, "audio", &json!({}))?,
            ProxyBody::Binary {
                data: b"ID3".to_vec(),
                mime_type: "audio/mpeg".to_string()
            }
        );
        Ok(())
    }

    #[test]
    fn unreachable_proxy_is_a_transport_error() {
        let client = ProxyClient::new("http://127.0.0.1:9");
        let err = client.post_json(ProviderId::Navy, "image", &json!({})).err();
        assert_eq!(err.map(|err| err.kind()), Some(ErrorKind::Transport));
    }
}
