//! Supabase PostgREST client used to apply queued writes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::Value;
use sprout_core::session::SessionProvider;
use sprout_core::sync::RemoteStore;
use sprout_core::DispatchError;

use crate::error::{RemoteApiError, Result};

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_LOG_BODY_CHARS: usize = 512;

/// PostgREST error body.
#[derive(Debug, Deserialize)]
struct PostgrestError {
    #[serde(default)]
    code: Option<String>,
    message: String,
    #[serde(default)]
    details: Option<String>,
}

/// Row-level writes against `{base_url}/rest/v1/{table}`.
///
/// Requests carry the project anon key as `apikey` and the signed-in user's
/// access token as the bearer, falling back to the anon key when signed out.
#[derive(Clone)]
pub struct PostgrestClient {
    client: reqwest::Client,
    base_url: String,
    anon_key: String,
    session: Arc<dyn SessionProvider>,
}

impl PostgrestClient {
    fn log_response(status: reqwest::StatusCode, body: &str) {
        if status.is_success() {
            debug!("[Remote] Response status: {}", status);
            return;
        }

        let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
        if body.chars().count() > MAX_LOG_BODY_CHARS {
            preview.push_str("...");
        }
        debug!("[Remote] Response error ({}): {}", status, preview);
    }

    pub fn new(
        base_url: &str,
        anon_key: &str,
        session: Arc<dyn SessionProvider>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            session,
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn filter_url(&self, table: &str, column: &str, value: &str) -> String {
        format!(
            "{}?{}=eq.{}",
            self.table_url(table),
            urlencoding::encode(column),
            urlencoding::encode(value)
        )
    }

    async fn headers(&self, prefer: &'static str) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("Prefer", HeaderValue::from_static(prefer));

        let api_key = HeaderValue::from_str(&self.anon_key)
            .map_err(|_| RemoteApiError::auth("Invalid API key format"))?;
        headers.insert("apikey", api_key);

        let token = self
            .session
            .access_token()
            .await
            .unwrap_or_else(|| self.anon_key.clone());
        let auth_value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| RemoteApiError::auth("Invalid access token format"))?;
        headers.insert(AUTHORIZATION, auth_value);

        Ok(headers)
    }

    /// Read the body and map non-2xx statuses to [`RemoteApiError::Api`].
    async fn read_response(response: reqwest::Response) -> Result<String> {
        let status = response.status();
        let body = response.text().await?;
        Self::log_response(status, &body);

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<PostgrestError>(&body) {
                let mut message = match error.code {
                    Some(code) => format!("{}: {}", code, error.message),
                    None => error.message,
                };
                if let Some(details) = error.details.filter(|d| !d.is_empty()) {
                    message = format!("{} ({})", message, details);
                }
                return Err(RemoteApiError::api(status.as_u16(), message));
            }
            return Err(RemoteApiError::api(
                status.as_u16(),
                format!("Request failed: {}", body),
            ));
        }

        Ok(body)
    }

    /// POST /rest/v1/{table}
    pub async fn insert_row(&self, table: &str, row: &Value) -> Result<Option<String>> {
        let response = self
            .client
            .post(self.table_url(table))
            .headers(self.headers("return=representation").await?)
            .json(row)
            .send()
            .await?;

        let body = Self::read_response(response).await?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        // The row exists once the backend answered 2xx; an unreadable body
        // only costs the created id.
        let rows: Value = match serde_json::from_str(&body) {
            Ok(rows) => rows,
            Err(err) => {
                warn!("[Remote] Insert into {} succeeded with unreadable body: {}", table, err);
                return Ok(None);
            }
        };
        let created = match &rows {
            Value::Array(rows) => rows.first(),
            single => Some(single),
        };
        Ok(created.and_then(|row| match row.get("id") {
            Some(Value::String(id)) => Some(id.clone()),
            Some(Value::Number(id)) => Some(id.to_string()),
            _ => None,
        }))
    }

    /// PATCH /rest/v1/{table}?id=eq.{id}
    pub async fn update_row(&self, table: &str, id: &str, fields: &Value) -> Result<()> {
        let response = self
            .client
            .patch(self.filter_url(table, "id", id))
            .headers(self.headers("return=minimal").await?)
            .json(fields)
            .send()
            .await?;

        Self::read_response(response).await?;
        Ok(())
    }

    /// DELETE /rest/v1/{table}?{column}=eq.{value}
    pub async fn delete_rows(&self, table: &str, column: &str, value: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.filter_url(table, column, value))
            .headers(self.headers("return=minimal").await?)
            .send()
            .await?;

        Self::read_response(response).await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for PostgrestClient {
    async fn insert(&self, table: &str, row: Value) -> std::result::Result<Option<String>, DispatchError> {
        Ok(self.insert_row(table, &row).await?)
    }

    async fn update(&self, table: &str, id: &str, fields: Value) -> std::result::Result<(), DispatchError> {
        Ok(self.update_row(table, id, &fields).await?)
    }

    async fn delete_where(
        &self,
        table: &str,
        column: &str,
        value: &str,
    ) -> std::result::Result<(), DispatchError> {
        Ok(self.delete_rows(table, column, value).await?)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use sprout_core::session::{AuthSession, SessionStore};
    use sprout_core::sync::SyncRetryClass;
    use std::collections::{HashMap, VecDeque};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::Mutex as TokioMutex;

    #[derive(Debug, Clone)]
    pub(crate) struct CapturedRequest {
        pub method: String,
        pub target: String,
        pub headers: HashMap<String, String>,
        pub body: String,
    }

    fn header_end_offset(buffer: &[u8]) -> Option<usize> {
        buffer.windows(4).position(|window| window == b"\r\n\r\n")
    }

    async fn read_http_request(stream: &mut tokio::net::TcpStream) -> Option<CapturedRequest> {
        let mut buffer = Vec::new();
        loop {
            let mut chunk = [0_u8; 2048];
            let read = stream.read(&mut chunk).await.ok()?;
            if read == 0 {
                return None;
            }
            buffer.extend_from_slice(&chunk[..read]);
            if header_end_offset(&buffer).is_some() {
                break;
            }
        }

        let header_end = header_end_offset(&buffer)?;
        let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
        let mut lines = head.lines();
        let mut request_line = lines.next()?.split_whitespace();
        let method = request_line.next()?.to_string();
        let target = request_line.next()?.to_string();

        let mut headers = HashMap::new();
        for line in lines {
            if let Some((name, value)) = line.split_once(':') {
                headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
            }
        }

        let content_length = headers
            .get("content-length")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0);

        let mut body = buffer[header_end + 4..].to_vec();
        while body.len() < content_length {
            let mut chunk = [0_u8; 2048];
            let read = stream.read(&mut chunk).await.ok()?;
            if read == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..read]);
        }

        Some(CapturedRequest {
            method,
            target,
            headers,
            body: String::from_utf8_lossy(&body).to_string(),
        })
    }

    fn status_text(status: u16) -> &'static str {
        match status {
            200 => "OK",
            201 => "Created",
            204 => "No Content",
            400 => "Bad Request",
            401 => "Unauthorized",
            503 => "Service Unavailable",
            _ => "Error",
        }
    }

    async fn write_http_response(
        stream: &mut tokio::net::TcpStream,
        status: u16,
        body: &str,
    ) -> std::io::Result<()> {
        let response = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            status_text(status),
            body.len(),
            body
        );
        stream.write_all(response.as_bytes()).await?;
        stream.flush().await
    }

    /// Serves scripted `(status, body)` responses in order and records each request.
    pub(crate) async fn start_mock_server(
        responses: Vec<(u16, String)>,
    ) -> (
        String,
        Arc<TokioMutex<Vec<CapturedRequest>>>,
        tokio::task::JoinHandle<()>,
    ) {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("listener addr");
        let captured = Arc::new(TokioMutex::new(Vec::<CapturedRequest>::new()));
        let scripted = Arc::new(TokioMutex::new(VecDeque::from(responses)));
        let captured_clone = Arc::clone(&captured);

        let handle = tokio::spawn(async move {
            loop {
                let (mut stream, _) = match listener.accept().await {
                    Ok(value) => value,
                    Err(_) => break,
                };
                let Some(request) = read_http_request(&mut stream).await else {
                    continue;
                };
                captured_clone.lock().await.push(request);
                let (status, body) = scripted
                    .lock()
                    .await
                    .pop_front()
                    .unwrap_or((500, r#"{"message":"unexpected request"}"#.to_string()));
                let _ = write_http_response(&mut stream, status, &body).await;
            }
        });

        (format!("http://{}", addr), captured, handle)
    }

    fn signed_in() -> Arc<dyn SessionProvider> {
        Arc::new(SessionStore::signed_in(AuthSession {
            user_id: "teacher-1".to_string(),
            access_token: "user-jwt".to_string(),
        }))
    }

    #[tokio::test]
    async fn insert_posts_row_and_returns_created_id() {
        let (base_url, captured, server) = start_mock_server(vec![(
            201,
            r#"[{"id":"obs-42","note":"stacked blocks"}]"#.to_string(),
        )])
        .await;
        let client = PostgrestClient::new(&base_url, "anon-key", signed_in()).unwrap();

        let id = RemoteStore::insert(
            &client,
            "observations",
            json!({ "note": "stacked blocks", "user_id": "teacher-1" }),
        )
        .await
        .unwrap();

        assert_eq!(id.as_deref(), Some("obs-42"));
        let requests = captured.lock().await;
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.method, "POST");
        assert_eq!(request.target, "/rest/v1/observations");
        assert_eq!(request.headers.get("apikey").map(String::as_str), Some("anon-key"));
        assert_eq!(
            request.headers.get("authorization").map(String::as_str),
            Some("Bearer user-jwt")
        );
        assert_eq!(
            request.headers.get("prefer").map(String::as_str),
            Some("return=representation")
        );
        let body: Value = serde_json::from_str(&request.body).unwrap();
        assert_eq!(body["note"], "stacked blocks");
        server.abort();
    }

    #[tokio::test]
    async fn insert_with_unreadable_body_still_succeeds() {
        let (base_url, _captured, server) =
            start_mock_server(vec![(201, "<html>created</html>".to_string())]).await;
        let client = PostgrestClient::new(&base_url, "anon-key", signed_in()).unwrap();

        let id = RemoteStore::insert(&client, "attendance", json!({ "child_id": "c1" }))
            .await
            .unwrap();

        assert_eq!(id, None);
        server.abort();
    }

    #[tokio::test]
    async fn update_and_delete_use_eq_filters() {
        let (base_url, captured, server) =
            start_mock_server(vec![(204, String::new()), (204, String::new())]).await;
        let client =
            PostgrestClient::new(&base_url, "anon-key", Arc::new(SessionStore::new())).unwrap();

        RemoteStore::update(&client, "goals", "g 1", json!({ "status": "met" }))
            .await
            .unwrap();
        RemoteStore::delete_where(&client, "assessments", "observation_id", "obs-1")
            .await
            .unwrap();

        let requests = captured.lock().await;
        assert_eq!(requests[0].method, "PATCH");
        assert_eq!(requests[0].target, "/rest/v1/goals?id=eq.g%201");
        assert_eq!(
            requests[0].headers.get("authorization").map(String::as_str),
            Some("Bearer anon-key")
        );
        assert_eq!(requests[1].method, "DELETE");
        assert_eq!(
            requests[1].target,
            "/rest/v1/assessments?observation_id=eq.obs-1"
        );
        server.abort();
    }

    #[tokio::test]
    async fn error_responses_map_to_retry_classes() {
        let (base_url, _captured, server) = start_mock_server(vec![
            (
                400,
                r#"{"code":"23502","message":"null value in column \"child_id\"","details":null}"#
                    .to_string(),
            ),
            (503, "upstream unavailable".to_string()),
        ])
        .await;
        let client = PostgrestClient::new(&base_url, "anon-key", signed_in()).unwrap();

        let err = RemoteStore::insert(&client, "attendance", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.retry_class(), SyncRetryClass::Permanent);
        assert!(!err.is_permanent(), "remote rejections still get the retry budget");
        assert!(err.to_string().contains("23502"));

        let err = RemoteStore::insert(&client, "attendance", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.retry_class(), SyncRetryClass::Retryable);
        server.abort();
    }

    #[tokio::test]
    async fn unreachable_backend_is_retryable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let client =
            PostgrestClient::new(&format!("http://{}", addr), "anon-key", signed_in()).unwrap();

        let err = RemoteStore::insert(&client, "goals", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Remote { status: None, .. }));
        assert!(err.retry_class().is_retryable());
    }
}
