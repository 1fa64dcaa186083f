//! Adapter registry and factory.
//!
//! Maps adapter types to constructor functions and builds
//! [`ContentGenerator`] instances from user provider records. The
//! registry ships with the built-in `openai`, `anthropic`, and `mock`
//! adapters; applications can register more without touching this module.
//!
//! Construction is pure with respect to its inputs: two calls with equal
//! records yield equivalent instances. Adapters hold no long-lived state,
//! so the chat loop discards and rebuilds them freely when the user
//! switches provider or model.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::canonical::ContentGenerator;
use crate::descriptor::{load_descriptor, AdapterDescriptor};
use crate::error::{AdapterError, Result};
use crate::providers::{AnthropicAdapter, MockAdapter, OpenAiAdapter};
use crate::settings::{ProviderRecord, Settings};

/// Constructor for one adapter type.
pub type AdapterConstructor =
    fn(Arc<AdapterDescriptor>, ProviderRecord, String) -> Result<Box<dyn ContentGenerator>>;

/// Registry of adapter constructors keyed by adapter type.
pub struct AdapterRegistry {
    constructors: HashMap<String, AdapterConstructor>,
}

impl AdapterRegistry {
    /// An empty registry. Most callers want [`with_builtins`](Self::with_builtins).
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Registry pre-populated with the built-in adapters.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("openai", construct_openai);
        registry.register("anthropic", construct_anthropic);
        registry.register("mock", construct_mock);
        registry
    }

    /// Register (or replace) a constructor for an adapter type.
    pub fn register(&mut self, adapter_type: impl Into<String>, ctor: AdapterConstructor) {
        self.constructors.insert(adapter_type.into(), ctor);
    }

    pub fn is_registered(&self, adapter_type: &str) -> bool {
        self.constructors.contains_key(adapter_type)
    }

    /// Registered adapter types, unordered.
    pub fn registered_types(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }

    /// Build an adapter for a provider record.
    ///
    /// `model` defaults to the record's first enabled model. The model
    /// must be one of the record's enabled models; the UI maintains that
    /// invariant, and this is where the core enforces it.
    pub fn make_adapter(
        &self,
        record: &ProviderRecord,
        model: Option<&str>,
    ) -> Result<Box<dyn ContentGenerator>> {
        let ctor = self
            .constructors
            .get(&record.adapter_type)
            .ok_or_else(|| AdapterError::UnknownAdapterType(record.adapter_type.clone()))?;

        let descriptor = load_descriptor(&record.adapter_type)?;

        let model = model
            .or_else(|| record.default_model())
            .ok_or_else(|| {
                AdapterError::ProviderNotConfigured(format!(
                    "provider '{}' has no enabled models",
                    record.id
                ))
            })?;
        if !record.has_model(model) {
            return Err(AdapterError::ProviderNotConfigured(format!(
                "model '{model}' is not enabled for provider '{}'",
                record.id
            )));
        }

        debug!(
            provider = %record.id,
            adapter_type = %record.adapter_type,
            model,
            "constructing adapter"
        );
        ctor(descriptor, record.clone(), model.to_string())
    }

    /// Build the generator for the current session selection.
    ///
    /// This is the entry the auth-mode dispatcher calls when
    /// `selectedAuthType` is `custom-provider`. A `/model` command swaps
    /// the selection and the next request re-enters here.
    pub fn generator_from_settings(
        &self,
        settings: &Settings,
    ) -> Result<Box<dyn ContentGenerator>> {
        if !settings.is_custom_provider_selected() {
            return Err(AdapterError::ProviderNotConfigured(
                "custom-provider auth mode is not active".to_string(),
            ));
        }
        let (record, model) = settings.selection()?;
        self.make_adapter(record, Some(model))
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn construct_openai(
    descriptor: Arc<AdapterDescriptor>,
    record: ProviderRecord,
    model: String,
) -> Result<Box<dyn ContentGenerator>> {
    Ok(Box::new(OpenAiAdapter::new(descriptor, record, model)?))
}

fn construct_anthropic(
    descriptor: Arc<AdapterDescriptor>,
    record: ProviderRecord,
    model: String,
) -> Result<Box<dyn ContentGenerator>> {
    Ok(Box::new(AnthropicAdapter::new(descriptor, record, model)?))
}

fn construct_mock(
    _descriptor: Arc<AdapterDescriptor>,
    _record: ProviderRecord,
    _model: String,
) -> Result<Box<dyn ContentGenerator>> {
    Ok(Box::new(MockAdapter::new()))
}
