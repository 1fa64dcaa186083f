//! Layered configuration resolution.
//!
//! Merges an adapter descriptor's shipped defaults with the user's
//! provider record. Layering rules, lowest to highest precedence:
//!
//! 1. descriptor defaults (`defaultModels`, `requestHeaders`)
//! 2. record top-level fields
//! 3. record `providerOverrides` / `modelOverrides`
//!
//! Merge semantics: nested maps merge recursively, arrays in the override
//! **replace** the default, an explicit `null` unsets the default, and a
//! numeric `0` is a value, not an absence.
//!
//! API keys of the form `$ENV_NAME` are resolved against the process
//! environment **at header-build time** so a key rotated between requests
//! is picked up; a missing variable degrades to an empty key, which the
//! backend will reject with a normal auth error.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::warn;

use crate::descriptor::{AdapterDescriptor, ModelCard};
use crate::settings::ProviderRecord;

/// Transport timeout applied when neither overrides nor the record set one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(120_000);

/// Default retry budget. Read for diagnostics only; the transport does
/// not retry.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Placeholder in descriptor header values replaced by the resolved key.
const API_KEY_PLACEHOLDER: &str = "{apiKey}";

// ============================================================================
// API key
// ============================================================================

/// Resolve the record's API key, substituting `$ENV_NAME` placeholders.
pub fn resolve_api_key(record: &ProviderRecord) -> String {
    match record.api_key.strip_prefix('$') {
        None => record.api_key.clone(),
        Some(var_name) => match std::env::var(var_name) {
            Ok(value) => value,
            Err(_) => {
                warn!(
                    provider = %record.id,
                    env_var = var_name,
                    "API key environment variable not set; requests will fail authentication"
                );
                String::new()
            }
        },
    }
}

// ============================================================================
// Deep merge
// ============================================================================

/// Merge `overlay` onto `base`.
///
/// Objects merge key-by-key; a `null` overlay value removes the key;
/// arrays and primitives from the overlay replace the base value.
pub fn deep_merge(base: &JsonValue, overlay: &JsonValue) -> JsonValue {
    match (base, overlay) {
        (JsonValue::Object(base_map), JsonValue::Object(overlay_map)) => {
            let mut merged = base_map.clone();
            for (key, overlay_value) in overlay_map {
                if overlay_value.is_null() {
                    merged.remove(key);
                    continue;
                }
                let value = match merged.get(key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => overlay_value.clone(),
                };
                merged.insert(key.clone(), value);
            }
            JsonValue::Object(merged)
        }
        // Arrays replace, never concatenate; so does everything else.
        (_, overlay_value) => overlay_value.clone(),
    }
}

// ============================================================================
// Model config
// ============================================================================

/// Resolve the effective model card for `model_id`.
///
/// Returns `None` when the model appears neither in the descriptor's
/// catalogue nor in the record's enabled list. A model enabled in the
/// record without a catalogue entry starts from an empty card, so
/// overrides alone can describe it.
pub fn resolve_model_config(
    descriptor: &AdapterDescriptor,
    record: &ProviderRecord,
    model_id: &str,
) -> Option<ModelCard> {
    let catalogue_entry = descriptor.default_models.get(model_id);
    if catalogue_entry.is_none() && !record.has_model(model_id) {
        return None;
    }

    let base = catalogue_entry
        .map(|card| serde_json::to_value(card).expect("model card serializes"))
        .unwrap_or_else(|| {
            serde_json::json!({
                "displayName": model_id,
            })
        });

    let merged = match record.model_overrides.get(model_id) {
        Some(overrides) => deep_merge(&base, overrides),
        None => base,
    };

    match serde_json::from_value::<ModelCard>(merged) {
        Ok(card) => Some(card),
        Err(e) => {
            warn!(
                provider = %record.id,
                model = model_id,
                error = %e,
                "model override produced an invalid card; using catalogue entry"
            );
            catalogue_entry.cloned()
        }
    }
}

// ============================================================================
// Provider settings
// ============================================================================

/// Look up a provider setting: `providerOverrides[key]` first, then the
/// record's top-level field of the same name.
pub fn resolve_setting(record: &ProviderRecord, key: &str) -> Option<JsonValue> {
    if let Some(value) = record.provider_overrides.get(key) {
        if !value.is_null() {
            return Some(value.clone());
        }
        // Explicit null unsets: fall through to the default.
        return None;
    }
    let top_level = serde_json::to_value(record).ok()?;
    match top_level.get(key) {
        Some(v) if !v.is_null() => Some(v.clone()),
        _ => None,
    }
}

/// Resolved request timeout in milliseconds. Zero is respected and means
/// an immediate deadline, not "unset".
pub fn resolve_timeout(record: &ProviderRecord, default: Duration) -> Duration {
    match resolve_setting(record, "timeout").and_then(|v| v.as_u64()) {
        Some(ms) => Duration::from_millis(ms),
        None => default,
    }
}

/// Resolved retry budget. Carried in diagnostics; not consulted by the
/// transport.
pub fn resolve_max_retries(record: &ProviderRecord, default: u32) -> u32 {
    resolve_setting(record, "maxRetries")
        .and_then(|v| v.as_u64())
        .map(|n| n as u32)
        .unwrap_or(default)
}

// ============================================================================
// Headers
// ============================================================================

/// Build the header map for one request.
///
/// Starts from `Content-Type: application/json`, merges the descriptor's
/// required headers with `{apiKey}` substituted by the freshly resolved
/// key, then overlays `providerOverrides.customHeaders`. Invalid header
/// names or values are logged and skipped rather than failing the
/// request.
pub fn resolve_headers(descriptor: &AdapterDescriptor, record: &ProviderRecord) -> HeaderMap {
    let api_key = resolve_api_key(record);

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    for (name, template) in &descriptor.request_headers.required {
        let value = template.replace(API_KEY_PLACEHOLDER, &api_key);
        insert_header(&mut headers, name, &value);
    }

    if let Some(JsonValue::Object(custom)) = record.provider_overrides.get("customHeaders") {
        for (name, value) in custom {
            if let Some(value) = value.as_str() {
                insert_header(&mut headers, name, value);
            } else {
                warn!(header = %name, "customHeaders value is not a string; skipped");
            }
        }
    }

    headers
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) {
    let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) else {
        warn!(header = %name, "invalid header name; skipped");
        return;
    };
    let Ok(header_value) = HeaderValue::from_str(value) else {
        warn!(header = %name, "invalid header value; skipped");
        return;
    };
    headers.insert(header_name, header_value);
}
