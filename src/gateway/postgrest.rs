//! PostgREST / Supabase REST gateway.
//!
//! Speaks the table endpoints at `{url}/rest/v1/{table}` with the project
//! key in both the `apikey` and `Authorization` headers. Writes ask for
//! `return=representation` so the caller gets server-generated fields back.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{Filter, RemoteGateway};
use crate::config::RemoteConfig;
use crate::error::GatewayError;

/// HTTP gateway against a PostgREST endpoint.
pub struct PostgrestGateway {
    url: String,
    api_key: String,
    http: reqwest::Client,
}

impl PostgrestGateway {
    /// Create a gateway from the `[remote]` configuration section.
    pub fn new(config: &RemoteConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            http,
        })
    }

    /// Build the PostgREST URL for a table.
    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.url, table)
    }

    /// Get the base headers for authenticated requests.
    fn auth_headers(&self) -> Vec<(&'static str, String)> {
        vec![
            ("apikey", self.api_key.clone()),
            ("Authorization", format!("Bearer {}", self.api_key)),
        ]
    }

    fn request(&self, method: reqwest::Method, table: &str) -> reqwest::RequestBuilder {
        let mut request = self.http.request(method, self.table_url(table));
        for (key, value) in self.auth_headers() {
            request = request.header(key, value);
        }
        request
    }

    /// Send a request and decode the JSON array body.
    ///
    /// An empty body (204, or `return=minimal`) reads as no rows.
    async fn send(
        &self,
        table: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<Vec<Value>, GatewayError> {
        let resp = request
            .send()
            .await
            .map_err(|e| GatewayError::transport(table, e))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| GatewayError::transport(table, e))?;

        if !status.is_success() {
            tracing::debug!(table, status = status.as_u16(), body = %body, "Remote rejected request");
            return Err(GatewayError::rejected(table, status.as_u16(), rejection_cause(&body)));
        }

        if body.trim().is_empty() {
            return Ok(Vec::new());
        }
        match serde_json::from_str::<Value>(&body) {
            Ok(Value::Array(rows)) => Ok(rows),
            Ok(Value::Null) => Ok(Vec::new()),
            Ok(row) => Ok(vec![row]),
            Err(e) => Err(GatewayError::transport(table, format!("invalid response body: {e}"))),
        }
    }
}

/// Pull the human-readable message out of a PostgREST error body.
fn rejection_cause(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_owned))
        .unwrap_or_else(|| body.trim().to_string())
}

#[async_trait]
impl RemoteGateway for PostgrestGateway {
    async fn fetch_all(&self, table: &str) -> Result<Vec<Value>, GatewayError> {
        let request = self
            .request(reqwest::Method::GET, table)
            .query(&[("select", "*")]);
        self.send(table, request).await
    }

    async fn insert(&self, table: &str, row: Value) -> Result<Vec<Value>, GatewayError> {
        let request = self
            .request(reqwest::Method::POST, table)
            .header("Prefer", "return=representation")
            .json(&row);
        self.send(table, request).await
    }

    async fn update(
        &self,
        table: &str,
        filter: &Filter,
        patch: Value,
    ) -> Result<Vec<Value>, GatewayError> {
        let request = self
            .request(reqwest::Method::PATCH, table)
            .query(&[filter.to_query()])
            .header("Prefer", "return=representation")
            .json(&patch);
        self.send(table, request).await
    }

    async fn delete(&self, table: &str, filter: &Filter) -> Result<(), GatewayError> {
        let request = self
            .request(reqwest::Method::DELETE, table)
            .query(&[filter.to_query()]);
        self.send(table, request).await.map(|_| ())
    }

    async fn upsert(&self, table: &str, rows: Vec<Value>) -> Result<Vec<Value>, GatewayError> {
        let request = self
            .request(reqwest::Method::POST, table)
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(&rows);
        self.send(table, request).await
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(url: &str) -> RemoteConfig {
        RemoteConfig {
            url: url.into(),
            api_key: "test-anon-key".into(),
            timeout_secs: 5,
        }
    }

    #[test]
    fn table_url_construction() {
        let gateway = PostgrestGateway::new(&test_config("https://test-project.supabase.co/")).unwrap();
        assert_eq!(
            gateway.table_url("bookings"),
            "https://test-project.supabase.co/rest/v1/bookings"
        );
    }

    #[test]
    fn auth_headers_contain_key() {
        let gateway = PostgrestGateway::new(&test_config("https://x.supabase.co")).unwrap();
        let headers = gateway.auth_headers();
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[0].0, "apikey");
        assert_eq!(headers[0].1, "test-anon-key");
        assert_eq!(headers[1].1, "Bearer test-anon-key");
    }

    #[tokio::test]
    async fn fetch_all_sends_auth_and_decodes_rows() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/services"))
            .and(query_param("select", "*"))
            .and(header("apikey", "test-anon-key"))
            .and(header("authorization", "Bearer test-anon-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": 1, "name": "Signature Wash"},
                {"id": 2, "name": "Interior Detail"}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let gateway = PostgrestGateway::new(&test_config(&server.uri())).unwrap();
        let rows = gateway.fetch_all("services").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["name"], json!("Interior Detail"));
    }

    #[tokio::test]
    async fn insert_asks_for_representation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/notifications"))
            .and(header("prefer", "return=representation"))
            .and(body_json(json!({"title": "Hi", "read": false})))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(json!([{"id": 41, "title": "Hi", "read": false}])),
            )
            .mount(&server)
            .await;

        let gateway = PostgrestGateway::new(&test_config(&server.uri())).unwrap();
        let stored = gateway
            .insert("notifications", json!({"title": "Hi", "read": false}))
            .await
            .unwrap();
        assert_eq!(stored[0]["id"], json!(41));
    }

    #[tokio::test]
    async fn update_encodes_filter() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/rest/v1/bookings"))
            .and(query_param("id", "eq.BK-1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([{"id": "BK-1", "status": "Approved"}])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let gateway = PostgrestGateway::new(&test_config(&server.uri())).unwrap();
        let filter = Filter::eq("id", "BK-1");
        let rows = gateway
            .update("bookings", &filter, json!({"status": "Approved"}))
            .await
            .unwrap();
        assert_eq!(rows[0]["status"], json!("Approved"));
    }

    #[tokio::test]
    async fn delete_accepts_empty_body() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/rest/v1/profiles"))
            .and(query_param("role", "neq.admin"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let gateway = PostgrestGateway::new(&test_config(&server.uri())).unwrap();
        gateway
            .delete("profiles", &Filter::neq("role", "admin"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn upsert_merges_duplicates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/plans"))
            .and(header("prefer", "resolution=merge-duplicates,return=representation"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!([{"id": 1}, {"id": 2}])))
            .mount(&server)
            .await;

        let gateway = PostgrestGateway::new(&test_config(&server.uri())).unwrap();
        let rows = gateway
            .upsert("plans", vec![json!({"id": 1}), json!({"id": 2})])
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn error_body_becomes_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/bookings"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "code": "23505",
                "message": "duplicate key value violates unique constraint"
            })))
            .mount(&server)
            .await;

        let gateway = PostgrestGateway::new(&test_config(&server.uri())).unwrap();
        let err = gateway
            .insert("bookings", json!({"id": "BK-1"}))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            GatewayError::rejected("bookings", 409, "duplicate key value violates unique constraint")
        );
    }

    #[tokio::test]
    async fn unreachable_server_is_transport_error() {
        // Port 9 (discard) on localhost is reliably closed in test sandboxes.
        let gateway = PostgrestGateway::new(&test_config("http://127.0.0.1:9")).unwrap();
        let err = gateway.fetch_all("messages").await.unwrap_err();
        assert!(matches!(err, GatewayError::Transport { .. }));
        assert_eq!(err.table(), "messages");
    }
}
