//! Persisted settings: user provider records and session selection.
//!
//! This crate only **reads** the settings file; the interactive
//! configuration UI owns the write path. The fields consumed here are
//! `selectedAuthType`, `currentProvider`, `currentModel`, and
//! `customProviders`. When `selectedAuthType` is `"custom-provider"` the
//! chat loop routes generation through this crate; any other value
//! selects a different generator entirely.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::path::Path;

use crate::error::{AdapterError, Result};

/// The `selectedAuthType` value that routes to this crate.
pub const AUTH_TYPE_CUSTOM_PROVIDER: &str = "custom-provider";

/// One user-defined provider entry.
///
/// `api_key` is either a literal key or a `$ENV_NAME` placeholder; the
/// placeholder is resolved when request headers are built, not here, so
/// env vars rotated between requests are honoured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRecord {
    pub id: String,
    pub name: String,
    pub adapter_type: String,
    pub base_url: String,
    pub api_key: String,
    /// Enabled model ids, first is the default.
    #[serde(default)]
    pub models: Vec<String>,
    /// Per-model partial overrides of the descriptor's catalogue entry,
    /// deep-merged by the resolver.
    #[serde(default)]
    pub model_overrides: HashMap<String, JsonValue>,
    /// Provider-level overrides: `timeout` (ms), `maxRetries`,
    /// `customHeaders`, and whatever future settings the UI grows.
    #[serde(default)]
    pub provider_overrides: serde_json::Map<String, JsonValue>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ProviderRecord {
    /// The first enabled model, if any.
    pub fn default_model(&self) -> Option<&str> {
        self.models.first().map(String::as_str)
    }

    pub fn has_model(&self, model: &str) -> bool {
        self.models.iter().any(|m| m == model)
    }
}

/// The slice of the persisted settings file this crate consumes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub selected_auth_type: Option<String>,
    #[serde(default)]
    pub current_provider: Option<String>,
    #[serde(default)]
    pub current_model: Option<String>,
    #[serde(default)]
    pub custom_providers: HashMap<String, ProviderRecord>,
}

impl Settings {
    /// Read and parse a settings file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            AdapterError::ProviderNotConfigured(format!(
                "settings file {} unreadable: {e}",
                path.display()
            ))
        })?;
        Self::from_json(&text)
    }

    /// Parse settings from JSON text.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Whether the custom-provider auth mode is active.
    pub fn is_custom_provider_selected(&self) -> bool {
        self.selected_auth_type.as_deref() == Some(AUTH_TYPE_CUSTOM_PROVIDER)
    }

    /// Resolve the active provider record and model id.
    ///
    /// Enforces the selection invariant: both `currentProvider` and
    /// `currentModel` must be set, the record must exist, and the model
    /// must be one of the record's enabled models. Violations surface as
    /// [`AdapterError::ProviderNotConfigured`] with a message the
    /// auth-selection UI can show as-is.
    pub fn selection(&self) -> Result<(&ProviderRecord, &str)> {
        let provider_id = self.current_provider.as_deref().ok_or_else(|| {
            AdapterError::ProviderNotConfigured("no provider selected".to_string())
        })?;
        let record = self.custom_providers.get(provider_id).ok_or_else(|| {
            AdapterError::ProviderNotConfigured(format!(
                "selected provider '{provider_id}' has no record"
            ))
        })?;
        let model = self.current_model.as_deref().ok_or_else(|| {
            AdapterError::ProviderNotConfigured(format!(
                "no model selected for provider '{provider_id}'"
            ))
        })?;
        if !record.has_model(model) {
            return Err(AdapterError::ProviderNotConfigured(format!(
                "model '{model}' is not enabled for provider '{provider_id}'"
            )));
        }
        Ok((record, model))
    }
}
