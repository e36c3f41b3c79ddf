use std::time::Duration;

use reqwest::{Client, Method, StatusCode, header::HeaderMap};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::cloudflare::types::*;
use crate::models::RateLimitPolicy;
use crate::provider::{ProviderError, ProviderResult};

pub const DEFAULT_BASE_URL: &str = "https://api.cloudflare.com/client/v4";
const PER_PAGE: u32 = 100;
const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct CloudflareClient {
    http: Client,
    base_url: String,
    token: String,
    policy: RateLimitPolicy,
}

impl CloudflareClient {
    pub fn new(http: Client, base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            policy: RateLimitPolicy::default(),
        }
    }

    pub fn policy(mut self, policy: RateLimitPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Send a request, retrying HTTP 429 with exponential backoff (or the server's
    /// `Retry-After`) until `max_attempts` is used up.
    async fn execute<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> ProviderResult<CfEnvelope<T>> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let mut req = self
                .http
                .request(method.clone(), &url)
                .bearer_auth(&self.token)
                .timeout(Duration::from_secs(self.policy.timeout_secs))
                .query(query);
            if let Some(body) = body {
                req = req.json(body);
            }

            let res = req.send().await?;
            let status = res.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                let retry_after = retry_after(res.headers());
                if attempt >= max_attempts {
                    warn!(%method, path, attempt, "CloudFlare rate limit, giving up");
                    return Err(ProviderError::RateLimited { retry_after });
                }
                let delay = retry_after
                    .unwrap_or_else(|| backoff_delay(self.policy.base_delay_ms, attempt))
                    .min(MAX_BACKOFF);
                warn!(%method, path, attempt, ?delay, "CloudFlare rate limit, backing off");
                tokio::time::sleep(delay).await;
                continue;
            }

            let text = res.text().await?;
            let parsed = serde_json::from_str::<CfEnvelope<T>>(&text);

            if !status.is_success() {
                let message = match &parsed {
                    Ok(env) if !env.errors.is_empty() => join_messages(&env.errors),
                    _ => text,
                };
                debug!(%method, path, %status, %message, "CloudFlare request failed");
                return Err(ProviderError::from_status(
                    status,
                    format!("CloudFlare: {message}"),
                ));
            }

            let envelope = parsed.map_err(|e| ProviderError::Decode(e.to_string()))?;
            if !envelope.success {
                return Err(ProviderError::Rejected {
                    status: status.as_u16(),
                    message: format!("CloudFlare: {}", join_messages(&envelope.errors)),
                });
            }
            return Ok(envelope);
        }
    }

    async fn result<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> ProviderResult<T> {
        self.execute::<T>(method, path, &[], body)
            .await?
            .result
            .ok_or_else(|| ProviderError::Decode(format!("CloudFlare {path}: missing result")))
    }

    async fn paged<T: DeserializeOwned>(&self, path: &str) -> ProviderResult<Vec<T>> {
        let mut out = Vec::new();
        let mut page = 1u32;
        loop {
            let query = [("page", page.to_string()), ("per_page", PER_PAGE.to_string())];
            let env = self.execute::<Vec<T>>(Method::GET, path, &query, None).await?;
            let batch = env.result.unwrap_or_default();
            let fetched = batch.len() as u32;
            out.extend(batch);

            let last_page = match env.result_info.as_ref().and_then(|i| i.total_pages) {
                Some(total_pages) => page >= total_pages,
                None => fetched < PER_PAGE,
            };
            if last_page || fetched == 0 {
                return Ok(out);
            }
            page += 1;
        }
    }

    pub async fn verify_token(&self) -> ProviderResult<()> {
        self.execute::<Value>(Method::GET, "user/tokens/verify", &[], None)
            .await?;
        Ok(())
    }

    pub async fn list_zones(&self) -> ProviderResult<Vec<CfZone>> {
        self.paged("zones").await
    }

    pub async fn get_zone(&self, zone_id: &str) -> ProviderResult<CfZone> {
        self.result(Method::GET, &format!("zones/{zone_id}"), None)
            .await
    }

    pub async fn create_zone(&self, zone: &CfZoneCreate) -> ProviderResult<CfZone> {
        let body = to_value(zone)?;
        self.result(Method::POST, "zones", Some(&body)).await
    }

    pub async fn delete_zone(&self, zone_id: &str) -> ProviderResult<()> {
        self.execute::<Value>(Method::DELETE, &format!("zones/{zone_id}"), &[], None)
            .await?;
        Ok(())
    }

    pub async fn list_records(&self, zone_id: &str) -> ProviderResult<Vec<CfDnsRecord>> {
        self.paged(&format!("zones/{zone_id}/dns_records")).await
    }

    pub async fn create_record(
        &self,
        zone_id: &str,
        record: &CfRecordBody,
    ) -> ProviderResult<CfDnsRecord> {
        let body = to_value(record)?;
        self.result(
            Method::POST,
            &format!("zones/{zone_id}/dns_records"),
            Some(&body),
        )
        .await
    }

    pub async fn update_record(
        &self,
        zone_id: &str,
        record_id: &str,
        record: &CfRecordBody,
    ) -> ProviderResult<CfDnsRecord> {
        let body = to_value(record)?;
        self.result(
            Method::PUT,
            &format!("zones/{zone_id}/dns_records/{record_id}"),
            Some(&body),
        )
        .await
    }

    pub async fn delete_record(&self, zone_id: &str, record_id: &str) -> ProviderResult<()> {
        self.execute::<Value>(
            Method::DELETE,
            &format!("zones/{zone_id}/dns_records/{record_id}"),
            &[],
            None,
        )
        .await?;
        Ok(())
    }

    pub async fn get_dnssec(&self, zone_id: &str) -> ProviderResult<CfDnssec> {
        self.result(Method::GET, &format!("zones/{zone_id}/dnssec"), None)
            .await
    }

    /// `status` is "active" or "disabled".
    pub async fn set_dnssec(&self, zone_id: &str, status: &str) -> ProviderResult<CfDnssec> {
        let body = serde_json::json!({ "status": status });
        self.result(
            Method::PATCH,
            &format!("zones/{zone_id}/dnssec"),
            Some(&body),
        )
        .await
    }
}

fn to_value<T: serde::Serialize>(v: &T) -> ProviderResult<Value> {
    serde_json::to_value(v).map_err(|e| ProviderError::Decode(e.to_string()))
}

fn join_messages(errors: &[CfMessage]) -> String {
    errors
        .iter()
        .map(|e| format!("{} ({})", e.message, e.code))
        .collect::<Vec<_>>()
        .join("; ")
}

/// 1s, 2s, 4s, ... for base 1000ms.
pub fn backoff_delay(base_delay_ms: u64, attempt: u32) -> Duration {
    let factor = 1u64 << attempt.saturating_sub(1).min(16);
    Duration::from_millis(base_delay_ms.saturating_mul(factor))
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use axum::{Json, Router, extract::State, http::StatusCode as AxumStatus, routing::get};
    use serde_json::json;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/client/v4")
    }

    fn fast_policy(max_attempts: u32) -> RateLimitPolicy {
        RateLimitPolicy {
            max_attempts,
            base_delay_ms: 5,
            timeout_secs: 5,
        }
    }

    fn limited_then_ok(limit: u32) -> Router {
        let hits = Arc::new(AtomicU32::new(0));
        Router::new()
            .route(
                "/client/v4/zones/{id}",
                get(move |State(hits): State<Arc<AtomicU32>>| async move {
                    let n = hits.fetch_add(1, Ordering::SeqCst);
                    if n < limit {
                        return (
                            AxumStatus::TOO_MANY_REQUESTS,
                            Json(json!({"success": false, "errors": [{"code": 971, "message": "slow down"}]})),
                        );
                    }
                    (
                        AxumStatus::OK,
                        Json(json!({
                            "success": true,
                            "errors": [],
                            "result": {"id": "z1", "name": "example.com", "status": "active",
                                       "name_servers": ["ada.ns.cloudflare.com"]}
                        })),
                    )
                }),
            )
            .with_state(hits)
    }

    #[tokio::test]
    async fn retries_after_rate_limit() {
        let base = serve(limited_then_ok(2)).await;
        let client = CloudflareClient::new(Client::new(), base, "token").policy(fast_policy(3));
        let zone = client.get_zone("z1").await.unwrap();
        assert_eq!(zone.name, "example.com");
        assert_eq!(zone.name_servers, vec!["ada.ns.cloudflare.com".to_string()]);
    }

    #[tokio::test]
    async fn surfaces_rate_limit_after_max_attempts() {
        let base = serve(limited_then_ok(10)).await;
        let client = CloudflareClient::new(Client::new(), base, "token").policy(fast_policy(3));
        let err = client.get_zone("z1").await.unwrap_err();
        assert!(matches!(err, ProviderError::RateLimited { .. }));
    }

    #[test]
    fn backoff_doubles() {
        assert_eq!(backoff_delay(1000, 1), Duration::from_secs(1));
        assert_eq!(backoff_delay(1000, 2), Duration::from_secs(2));
        assert_eq!(backoff_delay(1000, 3), Duration::from_secs(4));
    }

    #[test]
    fn retry_after_header_in_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(reqwest::header::RETRY_AFTER, "7".parse().unwrap());
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(7)));
    }
}
