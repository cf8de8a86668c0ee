use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use nanoedit_contracts::image_data::ImagePayload;

use crate::config::EditorConfig;
use crate::dryrun::DryrunProvider;
use crate::gemini::GeminiProvider;

/// One edit exchange: the current image plus a single instruction. Nothing
/// from earlier edits travels with it.
#[derive(Debug, Clone)]
pub struct EditRequest {
    pub image: ImagePayload,
    pub prompt: String,
    pub model: String,
    pub aspect_ratio: Option<String>,
}

/// A single output part, in the order the capability returned it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponsePart {
    Image(ImagePayload),
    Text(String),
}

#[derive(Debug, Clone)]
pub struct ProviderEditResponse {
    pub parts: Vec<ResponsePart>,
    /// Set when the capability refused the prompt outright.
    pub block_reason: Option<String>,
}

pub trait ImageEditProvider: Send + Sync {
    fn name(&self) -> &str;
    fn edit(&self, request: &EditRequest) -> Result<ProviderEditResponse>;
}

#[derive(Default)]
pub struct ImageEditProviderRegistry {
    providers: BTreeMap<String, Arc<dyn ImageEditProvider>>,
}

impl ImageEditProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P: ImageEditProvider + 'static>(&mut self, provider: P) {
        self.providers
            .insert(provider.name().to_string(), Arc::new(provider));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ImageEditProvider>> {
        self.providers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }
}

pub fn default_provider_registry(config: &EditorConfig) -> Result<ImageEditProviderRegistry> {
    let mut providers = ImageEditProviderRegistry::new();
    providers.register(DryrunProvider);
    providers.register(GeminiProvider::new(config)?);
    Ok(providers)
}
