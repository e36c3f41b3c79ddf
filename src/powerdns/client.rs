use std::time::Duration;

use crate::powerdns::types::*;
use crate::provider::{ProviderError, ProviderResult};
use reqwest::{Client, Response};
use serde::Serialize;

#[derive(Clone)]
pub struct PowerDnsClient {
    http: Client,
    base_url: String, // e.g. "http://127.0.0.1:8081/api/v1"
    api_key: String,
    server_id: String, // usually "localhost"
    timeout: Duration,
}

impl PowerDnsClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        server_id: impl Into<String>,
    ) -> Self {
        Self::with_http(Client::new(), base_url, api_key, server_id)
    }

    pub fn with_http(
        http: Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        server_id: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            server_id: server_id.into(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn auth_header(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("X-API-Key", &self.api_key).timeout(self.timeout)
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/servers/{}/{}",
            self.base_url,
            self.server_id,
            path.trim_start_matches('/')
        )
    }

    async fn check(op: &str, res: Response) -> ProviderResult<Response> {
        let status = res.status();
        if status.is_success() {
            return Ok(res);
        }
        let body = res.text().await.unwrap_or_default();
        let message = serde_json::from_str::<PdnsErrorBody>(&body)
            .map(|b| b.error)
            .unwrap_or(body);
        tracing::debug!(op, %status, %message, "PowerDNS request failed");
        Err(ProviderError::from_status(
            status,
            format!("PowerDNS {op}: {message}"),
        ))
    }

    pub async fn server_info(&self) -> ProviderResult<serde_json::Value> {
        let url = format!("{}/servers/{}", self.base_url, self.server_id);
        let res = self.auth_header(self.http.get(url)).send().await?;
        let res = Self::check("server_info", res).await?;
        Ok(res.json().await?)
    }

    pub async fn list_zones(&self) -> ProviderResult<Vec<PdnsZone>> {
        let url = self.url("zones");
        let res = self.auth_header(self.http.get(url)).send().await?;
        let res = Self::check("list_zones", res).await?;
        Ok(res.json::<Vec<PdnsZone>>().await?)
    }

    pub async fn get_zone(&self, name: &str) -> ProviderResult<PdnsZone> {
        let url = self.url(&format!("zones/{}", name));
        let res = self.auth_header(self.http.get(url)).send().await?;
        let res = Self::check("get_zone", res).await?;
        Ok(res.json::<PdnsZone>().await?)
    }

    pub async fn create_zone(&self, z: &PdnsZoneCreate) -> ProviderResult<PdnsZone> {
        let url = self.url("zones");
        let res = self.auth_header(self.http.post(url)).json(z).send().await?;
        let res = Self::check("create_zone", res).await?;
        Ok(res.json::<PdnsZone>().await?)
    }

    pub async fn update_zone(&self, name: &str, update: &PdnsZoneUpdate) -> ProviderResult<()> {
        let url = self.url(&format!("zones/{}", name));
        let res = self
            .auth_header(self.http.put(url))
            .json(update)
            .send()
            .await?;
        Self::check("update_zone", res).await?;
        Ok(())
    }

    pub async fn patch_rrsets(&self, zone_name: &str, rrsets: &[PdnsRrset]) -> ProviderResult<()> {
        #[derive(Serialize)]
        struct PatchBody<'a> {
            rrsets: &'a [PdnsRrset],
        }

        let url = self.url(&format!("zones/{}", zone_name));
        let body = PatchBody { rrsets };
        let res = self
            .auth_header(self.http.patch(url))
            .json(&body)
            .send()
            .await?;
        Self::check("patch_rrsets", res).await?;
        Ok(())
    }

    pub async fn delete_zone(&self, name: &str) -> ProviderResult<()> {
        let url = self.url(&format!("zones/{}", name));
        let res = self.auth_header(self.http.delete(url)).send().await?;
        Self::check("delete_zone", res).await?;
        Ok(())
    }

    pub async fn list_cryptokeys(&self, zone: &str) -> ProviderResult<Vec<PdnsCryptokey>> {
        let url = self.url(&format!("zones/{}/cryptokeys", zone));
        let res = self.auth_header(self.http.get(url)).send().await?;
        let res = Self::check("list_cryptokeys", res).await?;
        Ok(res.json::<Vec<PdnsCryptokey>>().await?)
    }

    pub async fn create_cryptokey(
        &self,
        zone: &str,
        key: &PdnsCryptokeyCreate,
    ) -> ProviderResult<PdnsCryptokey> {
        let url = self.url(&format!("zones/{}/cryptokeys", zone));
        let res = self.auth_header(self.http.post(url)).json(key).send().await?;
        let res = Self::check("create_cryptokey", res).await?;
        Ok(res.json::<PdnsCryptokey>().await?)
    }

    pub async fn set_cryptokey_active(
        &self,
        zone: &str,
        key_id: &str,
        active: bool,
    ) -> ProviderResult<()> {
        let url = self.url(&format!("zones/{}/cryptokeys/{}", zone, key_id));
        let res = self
            .auth_header(self.http.put(url))
            .json(&serde_json::json!({ "active": active }))
            .send()
            .await?;
        Self::check("set_cryptokey_active", res).await?;
        Ok(())
    }

    pub async fn delete_cryptokey(&self, zone: &str, key_id: &str) -> ProviderResult<()> {
        let url = self.url(&format!("zones/{}/cryptokeys/{}", zone, key_id));
        let res = self.auth_header(self.http.delete(url)).send().await?;
        Self::check("delete_cryptokey", res).await?;
        Ok(())
    }
}
