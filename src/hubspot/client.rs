//! HubSpot automation API client
//!
//! Thin reqwest wrapper over the v3 workflows endpoints. Access tokens are
//! resolved outside this service; the client is configured with one.

use crate::{config::HubSpotConfig, hubspot::{external_id_of, WorkflowSource}};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Map, Value};
use std::time::Duration;

/// Top-level keys the platform assigns itself and rejects on create.
const SERVER_ASSIGNED_KEYS: &[&str] = &[
    "id",
    "portalId",
    "insertedAt",
    "updatedAt",
    "createdAt",
    "migrationStatus",
    "originalAuthorUserId",
    "personaTagIds",
];

#[derive(Debug, Clone)]
pub struct HubSpotClient {
    http: reqwest::Client,
    api_base: String,
    access_token: String,
}

impl HubSpotClient {
    pub fn new(config: &HubSpotConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .context("failed to build HubSpot HTTP client")?;

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/automation/v3/workflows{}", self.api_base, path)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.access_token.is_empty() {
            request
        } else {
            request.bearer_auth(&self.access_token)
        }
    }
}

/// Strip server-assigned top-level keys from a stored definition.
pub fn creation_payload(definition: &Value) -> Value {
    match definition {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| !SERVER_ASSIGNED_KEYS.contains(&key.as_str()))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect::<Map<String, Value>>(),
        ),
        other => other.clone(),
    }
}

#[async_trait]
impl WorkflowSource for HubSpotClient {
    async fn fetch_workflow(&self, _owner_id: &str, external_id: &str) -> Result<Option<Value>> {
        let url = self.url(&format!("/{}", external_id));
        tracing::debug!("🌍 HubSpot GET {}", url);

        let response = self
            .authorized(self.http.get(&url))
            .send()
            .await
            .with_context(|| format!("HubSpot request failed for workflow {}", external_id))?;

        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!("📭 HubSpot has no workflow {}", external_id);
            return Ok(None);
        }
        if !response.status().is_success() {
            anyhow::bail!(
                "HubSpot returned {} for workflow {}",
                response.status(),
                external_id
            );
        }

        let doc = response
            .json::<Value>()
            .await
            .context("HubSpot returned a non-JSON workflow body")?;
        Ok(Some(doc))
    }

    async fn list_workflows(&self, _owner_id: &str) -> Result<Vec<Value>> {
        let url = self.url("");
        tracing::debug!("🌍 HubSpot GET {}", url);

        let response = self
            .authorized(self.http.get(&url))
            .send()
            .await
            .context("HubSpot workflow listing failed")?;
        if !response.status().is_success() {
            anyhow::bail!("HubSpot returned {} for workflow listing", response.status());
        }

        let body = response
            .json::<Value>()
            .await
            .context("HubSpot returned a non-JSON listing body")?;

        match body.get("workflows") {
            Some(Value::Array(items)) => Ok(items.clone()),
            _ => anyhow::bail!("HubSpot listing body has no 'workflows' array"),
        }
    }

    async fn create_workflow(&self, _owner_id: &str, definition: &Value) -> Result<String> {
        let url = self.url("");
        tracing::debug!("🌍 HubSpot POST {}", url);

        let response = self
            .authorized(self.http.post(&url))
            .json(&creation_payload(definition))
            .send()
            .await
            .context("HubSpot workflow creation failed")?;
        if !response.status().is_success() {
            anyhow::bail!("HubSpot returned {} when creating a workflow", response.status());
        }

        let created = response
            .json::<Value>()
            .await
            .context("HubSpot returned a non-JSON creation body")?;
        external_id_of(&created).context("HubSpot creation response carries no workflow id")
    }
}
