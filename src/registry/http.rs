//! Deploy API registry client.
//!
//! This module provides the HTTP client for the deploy API's deployment
//! resources. Requests are issued exactly once; there is no retry loop here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, trace};

use crate::config::ClientConfig;
use crate::error::{RegistryError, Result, StepwiseError};

use super::store::DeploymentRegistry;
use super::types::{Deployment, DeploymentKey, DeploymentManifest, DeploymentStatus};

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Header naming the user a request is made for.
const ON_BEHALF_OF_HEADER: &str = "X-On-Behalf-Of";

/// Deploy API registry client.
#[derive(Debug, Clone)]
pub struct HttpRegistry {
    /// HTTP client.
    client: Client,
    /// Deployments collection URL for the configured cluster and namespace.
    base_url: String,
    /// Bearer token.
    api_token: Option<String>,
    /// User the requests are made on behalf of.
    user: Option<String>,
}

/// Deployment resource as returned by the deploy API.
#[derive(Debug, Deserialize)]
struct DeploymentResource {
    application: String,
    version: String,
    release: String,
    replicas: u32,
    #[serde(default)]
    ready_replicas: u32,
    #[serde(default)]
    unavailable_replicas: u32,
    created_at: DateTime<Utc>,
    #[serde(default)]
    progress_failed: bool,
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

/// Deployment list response.
#[derive(Debug, Deserialize)]
struct DeploymentList {
    items: Vec<DeploymentResource>,
}

/// Body for registering a deployment.
#[derive(Debug, Serialize)]
struct CreateDeploymentBody<'a> {
    name: String,
    application: &'a str,
    version: &'a str,
    release: &'a str,
    replicas: u32,
    manifest: &'a serde_json::Value,
}

/// Body for a replica update.
#[derive(Debug, Serialize)]
struct ScaleBody {
    replicas: u32,
}

/// Body for a label update; labels not named are left untouched.
#[derive(Debug, Serialize)]
struct LabelBody<'a> {
    labels: BTreeMap<&'a str, &'a str>,
}

impl From<DeploymentResource> for Deployment {
    fn from(resource: DeploymentResource) -> Self {
        let status = DeploymentStatus::from_counts(
            resource.replicas,
            resource.ready_replicas,
            resource.unavailable_replicas,
        );
        Self {
            key: DeploymentKey {
                application: resource.application,
                version: resource.version,
                release: resource.release,
            },
            desired_replicas: resource.replicas,
            ready_replicas: resource.ready_replicas,
            unavailable_replicas: resource.unavailable_replicas,
            created_at: resource.created_at,
            progress_failed: resource.progress_failed,
            status,
            labels: resource.labels,
        }
    }
}

impl HttpRegistry {
    /// Creates a new registry client from the client configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the deploy API or cluster is not configured, or
    /// the HTTP client cannot be created.
    pub fn new(config: &ClientConfig, api_token: Option<String>) -> Result<Self> {
        Self::with_timeout(config, api_token, DEFAULT_TIMEOUT_SECS)
    }

    /// Creates a registry client with a custom timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the deploy API or cluster is not configured, or
    /// the HTTP client cannot be created.
    pub fn with_timeout(
        config: &ClientConfig,
        api_token: Option<String>,
        timeout_secs: u64,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| RegistryError::network(format!("Failed to create HTTP client: {e}")))?;

        let base_url = format!(
            "{}/kubernetes-clusters/{}/namespaces/{}/deployments",
            config.deploy_api()?.trim_end_matches('/'),
            config.kubernetes_cluster()?,
            config.kubernetes_namespace,
        );

        Ok(Self {
            client,
            base_url,
            api_token,
            user: config.user.clone(),
        })
    }

    /// Returns the URL of a single deployment resource.
    fn deployment_url(&self, key: &DeploymentKey) -> String {
        format!("{}/{}", self.base_url, key.name())
    }

    /// Adds authentication headers.
    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header(header::ACCEPT, "application/json");
        let request = match &self.api_token {
            Some(token) => request.header(header::AUTHORIZATION, format!("Bearer {token}")),
            None => request,
        };
        match &self.user {
            Some(user) => request.header(ON_BEHALF_OF_HEADER, user),
            None => request,
        }
    }

    /// Sends a request and maps non-success statuses to registry errors.
    async fn send(&self, request: RequestBuilder, subject: &str) -> Result<Response> {
        let response = self.authorize(request).send().await.map_err(|e| {
            StepwiseError::Registry(RegistryError::NetworkError {
                message: format!("Request failed: {e}"),
            })
        })?;

        let status = response.status();
        trace!("Deploy API answered {status} for {subject}");

        match status {
            StatusCode::NOT_FOUND => Err(StepwiseError::Registry(RegistryError::NotFound {
                deployment: subject.to_string(),
            })),
            StatusCode::CONFLICT => Err(StepwiseError::Registry(RegistryError::AlreadyExists {
                deployment: subject.to_string(),
            })),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(StepwiseError::Registry(RegistryError::AuthenticationFailed {
                    message: format!("HTTP {status} for {subject}"),
                }))
            }
            s if !s.is_success() => {
                let body = response.text().await.unwrap_or_default();
                Err(StepwiseError::Registry(RegistryError::api_error(s.as_u16(), body)))
            }
            _ => Ok(response),
        }
    }

    /// Decodes a JSON response body.
    async fn decode<T: for<'de> Deserialize<'de>>(response: Response) -> Result<T> {
        response.json().await.map_err(|e| {
            StepwiseError::Registry(RegistryError::InvalidResponse {
                message: format!("Failed to parse response: {e}"),
            })
        })
    }
}

#[async_trait]
impl DeploymentRegistry for HttpRegistry {
    async fn create_deployment(&self, manifest: &DeploymentManifest) -> Result<Deployment> {
        let name = manifest.key.name();
        debug!("Registering deployment {name} with {} replicas", manifest.replicas);

        let body = CreateDeploymentBody {
            name: name.clone(),
            application: &manifest.key.application,
            version: &manifest.key.version,
            release: &manifest.key.release,
            replicas: manifest.replicas,
            manifest: &manifest.body,
        };

        let response = self
            .send(self.client.post(&self.base_url).json(&body), &name)
            .await?;
        let resource: DeploymentResource = Self::decode(response).await?;

        Ok(resource.into())
    }

    async fn set_replicas(&self, key: &DeploymentKey, replicas: u32) -> Result<Deployment> {
        debug!("Setting {key} to {replicas} replicas");

        let response = self
            .send(
                self.client
                    .patch(self.deployment_url(key))
                    .json(&ScaleBody { replicas }),
                &key.name(),
            )
            .await?;
        let resource: DeploymentResource = Self::decode(response).await?;

        Ok(resource.into())
    }

    async fn set_label(&self, key: &DeploymentKey, name: &str, value: &str) -> Result<Deployment> {
        debug!("Labelling {key} with {name}={value}");

        let body = LabelBody {
            labels: BTreeMap::from([(name, value)]),
        };
        let response = self
            .send(
                self.client.patch(self.deployment_url(key)).json(&body),
                &key.name(),
            )
            .await?;
        let resource: DeploymentResource = Self::decode(response).await?;

        Ok(resource.into())
    }

    async fn get_status(&self, key: &DeploymentKey) -> Result<Deployment> {
        let response = self
            .send(self.client.get(self.deployment_url(key)), &key.name())
            .await?;
        let resource: DeploymentResource = Self::decode(response).await?;

        Ok(resource.into())
    }

    async fn delete_deployment(&self, key: &DeploymentKey) -> Result<()> {
        debug!("Deleting deployment {key}");

        self.send(self.client.delete(self.deployment_url(key)), &key.name())
            .await?;

        Ok(())
    }

    async fn list_deployments(&self, application: &str) -> Result<Vec<Deployment>> {
        let response = self
            .send(
                self.client
                    .get(&self.base_url)
                    .query(&[("application", application)]),
                application,
            )
            .await?;
        let list: DeploymentList = Self::decode(response).await?;

        debug!("Found {} deployments of {application}", list.items.len());
        Ok(list.items.into_iter().map(Deployment::from).collect())
    }

    fn backend_type(&self) -> &'static str {
        "http"
    }
}
