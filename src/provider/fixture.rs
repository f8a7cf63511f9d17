//! Offline provider replaying recorded API responses from disk.
//!
//! Useful for accounts without live API access configured, for demos, and
//! for end-to-end tests: the scanner runs the full discovery/evaluation
//! pipeline against a directory of recorded JSON responses instead of a
//! cloud API.
//!
//! Layout: `<root>/<account>/<region>/<action>.json`. A recording is either
//! a plain JSON body, or an object using one of the reserved shapes:
//!
//! - `{"pages": [body, body, ...]}` — a paginated recording
//! - `{"by_param": {"param": "bucket", "cases": {"b1": body, ...}}}` —
//!   fan-out variants keyed by one call parameter
//! - `{"error": {"kind": "transient", "message": "..."}}` — a scripted
//!   failure (`kind` one of `not_found`, `transient`, `authentication`,
//!   `other`)

use crate::engine::value::Value;
use crate::provider::{CallParams, CallResponse, ProviderClient, ProviderError};
use crate::traits::FileSystem;
use futures::future::BoxFuture;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct FixtureProvider {
    fs: Arc<dyn FileSystem>,
    root: PathBuf,
}

impl FixtureProvider {
    pub fn new(fs: Arc<dyn FileSystem>, root: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            root: root.into(),
        }
    }

    fn recording_path(&self, account: &str, region: &str, action: &str) -> PathBuf {
        self.root
            .join(account)
            .join(region)
            .join(format!("{}.json", action))
    }

    fn load_recording(&self, path: &Path) -> Result<serde_json::Value, ProviderError> {
        if !self.fs.is_file(path) {
            return Err(ProviderError::NotFound(format!(
                "no recording at {}",
                path.display()
            )));
        }

        let contents = self
            .fs
            .read_to_string(path)
            .map_err(|e| ProviderError::Other(format!("{}: {}", path.display(), e)))?;

        serde_json::from_str(&contents)
            .map_err(|e| ProviderError::Other(format!("{}: invalid JSON: {}", path.display(), e)))
    }

    fn replay(
        recording: &serde_json::Value,
        params: &CallParams,
        page_token: Option<&str>,
    ) -> Result<CallResponse, ProviderError> {
        if let Some(object) = recording.as_object() {
            if let Some(error) = object.get("error") {
                return Err(Self::scripted_error(error));
            }

            if let Some(by_param) = object.get("by_param") {
                return Self::replay_by_param(by_param, params, page_token);
            }

            if let Some(pages) = object.get("pages") {
                return Self::replay_pages(pages, page_token);
            }
        }

        Ok(CallResponse::new(Value::from_json(recording)))
    }

    fn replay_by_param(
        by_param: &serde_json::Value,
        params: &CallParams,
        page_token: Option<&str>,
    ) -> Result<CallResponse, ProviderError> {
        let param = by_param
            .get("param")
            .and_then(|p| p.as_str())
            .ok_or_else(|| ProviderError::Other("by_param recording missing 'param'".into()))?;

        let key = params
            .get(param)
            .map(|v| v.to_string())
            .ok_or_else(|| ProviderError::NotFound(format!("call has no '{}' parameter", param)))?;

        let case = by_param
            .get("cases")
            .and_then(|c| c.get(&key))
            .or_else(|| by_param.get("default"));

        match case {
            Some(body) => Self::replay(body, params, page_token),
            None => Err(ProviderError::NotFound(format!(
                "no recorded case for {}={}",
                param, key
            ))),
        }
    }

    fn replay_pages(
        pages: &serde_json::Value,
        page_token: Option<&str>,
    ) -> Result<CallResponse, ProviderError> {
        let pages = pages
            .as_array()
            .ok_or_else(|| ProviderError::Other("'pages' must be an array".into()))?;

        let index: usize = match page_token {
            None => 0,
            Some(token) => token
                .parse()
                .map_err(|_| ProviderError::Other(format!("bad page token '{}'", token)))?,
        };

        let body = pages
            .get(index)
            .ok_or_else(|| ProviderError::Other(format!("page {} out of range", index)))?;

        let next = if index + 1 < pages.len() {
            Some((index + 1).to_string())
        } else {
            None
        };

        Ok(CallResponse {
            body: Value::from_json(body),
            next_page_token: next,
        })
    }

    fn scripted_error(error: &serde_json::Value) -> ProviderError {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("scripted failure")
            .to_string();

        match error.get("kind").and_then(|k| k.as_str()) {
            Some("not_found") => ProviderError::NotFound(message),
            Some("transient") => ProviderError::Transient(message),
            Some("authentication") => ProviderError::Authentication(message),
            _ => ProviderError::Other(message),
        }
    }
}

impl ProviderClient for FixtureProvider {
    fn call<'a>(
        &'a self,
        account: &'a str,
        region: &'a str,
        action: &'a str,
        params: &'a CallParams,
        page_token: Option<&'a str>,
    ) -> BoxFuture<'a, Result<CallResponse, ProviderError>> {
        Box::pin(async move {
            let path = self.recording_path(account, region, action);
            let recording = self.load_recording(&path)?;
            Self::replay(&recording, params, page_token)
        })
    }

    fn verify_access<'a>(&'a self, account: &'a str) -> BoxFuture<'a, Result<(), ProviderError>> {
        Box::pin(async move {
            let account_dir = self.root.join(account);
            if self.fs.is_dir(&account_dir) {
                Ok(())
            } else {
                Err(ProviderError::Authentication(format!(
                    "no recordings for account '{}'",
                    account
                )))
            }
        })
    }
}
