// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! GraphQL implementation of [`DirectorClient`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use provisioner_core::input::RuntimeInput;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::debug;

use super::{
    DirectorClient, DirectorError, DirectorRuntime, OneTimeToken, RuntimeStatusCondition,
};

const REGISTER_RUNTIME: &str = r#"
mutation ($in: RuntimeInput!) {
  result: registerRuntime(in: $in) { id }
}"#;

const UNREGISTER_RUNTIME: &str = r#"
mutation ($id: ID!) {
  result: unregisterRuntime(id: $id) { id }
}"#;

const REQUEST_ONE_TIME_TOKEN: &str = r#"
mutation ($id: ID!) {
  result: requestOneTimeTokenForRuntime(id: $id) { token connectorURL }
}"#;

const GET_RUNTIME: &str = r#"
query ($id: ID!) {
  result: runtime(id: $id) { id name description labels }
}"#;

const UPDATE_RUNTIME: &str = r#"
mutation ($id: ID!, $in: RuntimeInput!) {
  result: updateRuntime(id: $id, in: $in) { id }
}"#;

/// Bearer token used against the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub access_token: String,
    /// `None` for tokens that never expire.
    pub expiration: Option<DateTime<Utc>>,
}

impl Token {
    /// Whether the token can be sent at `now`.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.access_token.is_empty() && self.expiration.is_none_or(|expiration| expiration > now)
    }
}

/// Source of access tokens.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> Result<Token, DirectorError>;
}

/// A preconfigured token.
#[derive(Debug, Clone)]
pub struct StaticToken(Token);

impl StaticToken {
    /// Token without expiration.
    pub fn new(access_token: impl Into<String>) -> Self {
        Self(Token {
            access_token: access_token.into(),
            expiration: None,
        })
    }

    pub fn with_expiration(access_token: impl Into<String>, expiration: DateTime<Utc>) -> Self {
        Self(Token {
            access_token: access_token.into(),
            expiration: Some(expiration),
        })
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn token(&self) -> Result<Token, DirectorError> {
        Ok(self.0.clone())
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<i64>,
}

/// OAuth2 client-credentials token source with caching.
pub struct OAuthClient {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    scope: String,
    cached: Mutex<Option<Token>>,
}

impl OAuthClient {
    pub fn new(
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scope: scope.into(),
            cached: Mutex::new(None),
        }
    }

    async fn fetch(&self) -> Result<Token, DirectorError> {
        let params = [
            ("grant_type", "client_credentials"),
            ("scope", self.scope.as_str()),
        ];

        let response = self
            .http
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&params)
            .send()
            .await
            .map_err(|e| DirectorError::Token(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DirectorError::Token(format!(
                "token endpoint returned HTTP {}",
                response.status()
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| DirectorError::Token(e.to_string()))?;

        Ok(Token {
            access_token: body.access_token,
            expiration: body
                .expires_in
                .map(|secs| Utc::now() + chrono::Duration::seconds(secs)),
        })
    }
}

#[async_trait]
impl TokenSource for OAuthClient {
    async fn token(&self) -> Result<Token, DirectorError> {
        let mut cached = self.cached.lock().await;

        // Refresh a little ahead of expiry so the token survives the request.
        let margin = Utc::now() + chrono::Duration::seconds(30);
        if let Some(token) = cached.as_ref()
            && token.is_valid(margin)
        {
            return Ok(token.clone());
        }

        let token = self.fetch().await?;
        debug!(expiration = ?token.expiration, "Fetched director access token");
        *cached = Some(token.clone());
        Ok(token)
    }
}

#[derive(Deserialize)]
struct GraphQlResponse<T> {
    data: Option<ResultData<T>>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Deserialize)]
struct ResultData<T> {
    result: Option<T>,
}

#[derive(Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Deserialize)]
struct IdResult {
    id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResult {
    token: String,
    #[serde(rename = "connectorURL")]
    connector_url: String,
}

/// Directory client speaking GraphQL over HTTP.
pub struct GraphQlDirectorClient {
    http: reqwest::Client,
    url: String,
    tokens: Arc<dyn TokenSource>,
}

impl GraphQlDirectorClient {
    /// Client posting to `url`, authenticated with tokens from `tokens`.
    pub fn new(url: impl Into<String>, tokens: Arc<dyn TokenSource>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            http,
            url: url.into(),
            tokens,
        }
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        name: &'static str,
        query: &str,
        variables: Value,
        tenant: &str,
    ) -> Result<T, DirectorError> {
        let token = self.tokens.token().await?;
        if !token.is_valid(Utc::now()) {
            return Err(DirectorError::Token("token is empty or expired".to_string()));
        }

        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&token.access_token)
            .header("Tenant", tenant)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await
            .map_err(|e| DirectorError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DirectorError::Request(format!(
                "{} returned HTTP {}",
                name, status
            )));
        }

        let body: GraphQlResponse<T> = response
            .json()
            .await
            .map_err(|e| DirectorError::Request(format!("invalid {} response: {}", name, e)))?;

        if !body.errors.is_empty() {
            let messages: Vec<_> = body.errors.into_iter().map(|e| e.message).collect();
            return Err(DirectorError::GraphQl(messages.join("; ")));
        }

        body.data
            .and_then(|data| data.result)
            .ok_or(DirectorError::EmptyResult(name))
    }
}

#[async_trait]
impl DirectorClient for GraphQlDirectorClient {
    async fn create_runtime(
        &self,
        input: &RuntimeInput,
        tenant: &str,
    ) -> Result<String, DirectorError> {
        let variables = json!({
            "in": {
                "name": input.name,
                "description": input.description,
                "labels": input.labels,
            }
        });

        let result: IdResult = self
            .execute("registerRuntime", REGISTER_RUNTIME, variables, tenant)
            .await?;
        debug!(runtime_id = %result.id, "Runtime registered in director");
        Ok(result.id)
    }

    async fn delete_runtime(&self, runtime_id: &str, tenant: &str) -> Result<(), DirectorError> {
        let result: IdResult = self
            .execute(
                "unregisterRuntime",
                UNREGISTER_RUNTIME,
                json!({ "id": runtime_id }),
                tenant,
            )
            .await?;

        if result.id != runtime_id {
            return Err(DirectorError::GraphQl(format!(
                "unregistered runtime {} instead of {}",
                result.id, runtime_id
            )));
        }
        Ok(())
    }

    async fn get_connection_token(
        &self,
        runtime_id: &str,
        tenant: &str,
    ) -> Result<OneTimeToken, DirectorError> {
        let result: TokenResult = self
            .execute(
                "requestOneTimeTokenForRuntime",
                REQUEST_ONE_TIME_TOKEN,
                json!({ "id": runtime_id }),
                tenant,
            )
            .await?;

        Ok(OneTimeToken {
            token: result.token,
            connector_url: result.connector_url,
        })
    }

    async fn get_runtime(
        &self,
        runtime_id: &str,
        tenant: &str,
    ) -> Result<DirectorRuntime, DirectorError> {
        self.execute("runtime", GET_RUNTIME, json!({ "id": runtime_id }), tenant)
            .await
    }

    async fn update_runtime(
        &self,
        runtime_id: &str,
        input: &RuntimeInput,
        condition: RuntimeStatusCondition,
        tenant: &str,
    ) -> Result<(), DirectorError> {
        let variables = json!({
            "id": runtime_id,
            "in": {
                "name": input.name,
                "description": input.description,
                "labels": input.labels,
                "statusCondition": condition,
            }
        });

        let result: IdResult = self
            .execute("updateRuntime", UPDATE_RUNTIME, variables, tenant)
            .await?;
        debug!(runtime_id = %result.id, condition = ?condition, "Runtime updated in director");
        Ok(())
    }
}
