use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::Value;

use super::RemoteStore;
use crate::auth::{parse_api_error, Identity};
use crate::config::SupabaseConfig;
use crate::error::{Error, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Supabase PostgREST client
#[derive(Clone)]
pub struct PostgrestRemote {
    rest_url: String,
    anon_key: String,
    client: Client,
}

impl std::fmt::Debug for PostgrestRemote {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("PostgrestRemote")
            .field("rest_url", &self.rest_url)
            .field("anon_key", &"[REDACTED]")
            .finish()
    }
}

impl PostgrestRemote {
    pub fn new(config: &SupabaseConfig) -> Result<Self> {
        let anon_key = config.anon_key.trim().to_string();
        if anon_key.is_empty() {
            return Err(Error::InvalidInput(
                "Supabase anon key must not be empty".to_string(),
            ));
        }

        Ok(Self {
            rest_url: format!("{}/rest/v1", config.url.trim_end_matches('/')),
            anon_key,
            client: Client::builder().timeout(REQUEST_TIMEOUT).build()?,
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{}", self.rest_url, urlencoding::encode(table))
    }

    fn authorize(&self, request: RequestBuilder, identity: Option<&Identity>) -> RequestBuilder {
        let bearer = identity
            .and_then(|identity| identity.access_token.as_deref())
            .unwrap_or(&self.anon_key);
        request.header("apikey", &self.anon_key).bearer_auth(bearer)
    }

    async fn send(request: RequestBuilder) -> Result<reqwest::Response> {
        let response = request.send().await?;
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(Error::Remote(parse_api_error(status, &body)))
    }
}

#[async_trait]
impl RemoteStore for PostgrestRemote {
    async fn upsert(&self, identity: &Identity, table: &str, rows: Vec<Value>) -> Result<()> {
        let request = self
            .client
            .post(self.table_url(table))
            .query(&[("on_conflict", "id")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&rows);
        Self::send(self.authorize(request, Some(identity))).await?;
        Ok(())
    }

    async fn insert(&self, identity: &Identity, table: &str, row: Value) -> Result<()> {
        let request = self
            .client
            .post(self.table_url(table))
            .header("Prefer", "return=minimal")
            .json(&row);
        Self::send(self.authorize(request, Some(identity))).await?;
        Ok(())
    }

    async fn select(
        &self,
        identity: Option<&Identity>,
        table: &str,
        filters: &[(&str, &str)],
    ) -> Result<Vec<Value>> {
        let mut query = vec![("select".to_string(), "*".to_string())];
        query.extend(
            filters
                .iter()
                .map(|(column, value)| ((*column).to_string(), format!("eq.{value}"))),
        );
        let request = self
            .client
            .get(self.table_url(table))
            .query(&query)
            .header("Accept", "application/json");
        let response = Self::send(self.authorize(request, identity)).await?;
        Ok(response.json::<Vec<Value>>().await?)
    }

    async fn rpc(&self, identity: &Identity, function: &str, params: Value) -> Result<Value> {
        let request = self
            .client
            .post(format!(
                "{}/rpc/{}",
                self.rest_url,
                urlencoding::encode(function)
            ))
            .json(&params);
        let response = Self::send(self.authorize(request, Some(identity))).await?;
        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }
}
