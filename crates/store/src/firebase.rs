use crate::config::FirebaseConfig;
use crate::errors::StoreError;
use crate::paths::segments;
use crate::remote::{ObjectMeta, ObjectStore, RemoteTree};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// Object names are encoded as a single path segment, `/` included.
const OBJECT_NAME: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[derive(Debug, Deserialize)]
struct UploadResponse {
    name: String,
    #[serde(rename = "downloadTokens")]
    download_tokens: Option<String>,
}

/// Firebase Realtime Database and Storage over their REST APIs.
pub struct FirebaseClient {
    agent: ureq::Agent,
    config: FirebaseConfig,
}

impl FirebaseClient {
    pub fn new(config: FirebaseConfig) -> Result<Self, StoreError> {
        if config.database_url.trim().is_empty() {
            return Err(StoreError::NotConfigured(
                "FIREBASE_DATABASE_URL is empty".to_string(),
            ));
        }
        if config.storage_bucket.trim().is_empty() {
            return Err(StoreError::NotConfigured(
                "FIREBASE_STORAGE_BUCKET is empty".to_string(),
            ));
        }

        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build();

        Ok(Self { agent, config })
    }

    /// `{database_url}/{path}.json`
    pub fn database_url(&self, path: &str) -> Result<String, StoreError> {
        let parts = segments(path)?;
        Ok(format!(
            "{}/{}.json",
            self.config.database_url.trim_end_matches('/'),
            parts.join("/")
        ))
    }

    /// `{host}/v0/b/{bucket}/o`, the upload endpoint.
    pub fn upload_url(&self) -> String {
        format!(
            "{}/v0/b/{}/o",
            self.config.storage_host.trim_end_matches('/'),
            self.config.storage_bucket
        )
    }

    /// Public media URL for an object name and its download token.
    pub fn media_url(&self, name: &str, token: &str) -> String {
        format!(
            "{}/{}?alt=media&token={}",
            self.upload_url(),
            utf8_percent_encode(name, OBJECT_NAME),
            utf8_percent_encode(token, OBJECT_NAME)
        )
    }

    fn database_request(&self, method: &str, path: &str) -> Result<ureq::Request, StoreError> {
        let request = self.agent.request(method, &self.database_url(path)?);
        Ok(match &self.config.auth_token {
            Some(token) => request.query("auth", token),
            None => request,
        })
    }
}

impl RemoteTree for FirebaseClient {
    fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        let value: Value = self.database_request("GET", path)?.call()?.into_json()?;
        Ok((!value.is_null()).then_some(value))
    }

    fn set(&self, path: &str, value: &Value) -> Result<(), StoreError> {
        self.database_request("PUT", path)?.send_json(value)?;
        tracing::debug!(path, "Tree node written");
        Ok(())
    }

    fn remove(&self, path: &str) -> Result<(), StoreError> {
        self.database_request("DELETE", path)?.call()?;
        tracing::debug!(path, "Tree node removed");
        Ok(())
    }

    fn get_tagged(&self, path: &str) -> Result<(Option<Value>, String), StoreError> {
        let response = self
            .database_request("GET", path)?
            .set("X-Firebase-ETag", "true")
            .call()?;
        let etag = response
            .header("ETag")
            .map(str::to_string)
            .ok_or(StoreError::MissingField("ETag"))?;
        let value: Value = response.into_json()?;
        Ok(((!value.is_null()).then_some(value), etag))
    }

    fn set_if(&self, path: &str, value: &Value, etag: &str) -> Result<(), StoreError> {
        let result = self
            .database_request("PUT", path)?
            .set("if-match", etag)
            .send_json(value);
        match result {
            Ok(_) => {
                tracing::debug!(path, "Tree node written conditionally");
                Ok(())
            }
            Err(ureq::Error::Status(412, _)) => Err(StoreError::Conflict(path.to_string())),
            Err(e) => Err(e.into()),
        }
    }
}

impl ObjectStore for FirebaseClient {
    fn put(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<ObjectMeta, StoreError> {
        let name = path.trim_matches('/');
        if name.is_empty() {
            return Err(StoreError::InvalidPath(path.to_string()));
        }

        let mut request = self
            .agent
            .post(&self.upload_url())
            .query("name", name)
            .set("Content-Type", content_type);
        if let Some(token) = &self.config.auth_token {
            request = request.set("Authorization", &format!("Bearer {}", token));
        }

        let response: UploadResponse = request.send_bytes(bytes)?.into_json()?;
        tracing::debug!(name = %response.name, size = bytes.len(), "Object uploaded");

        Ok(ObjectMeta {
            path: response.name,
            download_token: response.download_tokens.and_then(first_token),
        })
    }

    fn download_url(&self, meta: &ObjectMeta) -> Result<String, StoreError> {
        let token = meta
            .download_token
            .as_deref()
            .ok_or(StoreError::MissingField("downloadTokens"))?;
        Ok(self.media_url(&meta.path, token))
    }
}

/// Storage may return several comma-separated tokens; any of them works.
fn first_token(tokens: String) -> Option<String> {
    tokens
        .split(',')
        .map(str::trim)
        .find(|t| !t.is_empty())
        .map(str::to_string)
}
