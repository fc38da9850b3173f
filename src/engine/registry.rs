use std::time::Duration;

use crate::{
    config::ProviderConfig,
    engine::adapter::{SchemaAdapter, StructuredLimits},
};

#[derive(Debug, Clone)]
pub struct ProviderDescriptor {
    pub name: String,
    pub endpoint: String,
    pub adapter: SchemaAdapter,
    pub timeout_budget: Duration,
}

/// Ordered, read-only list of remote providers. Position is priority.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<ProviderDescriptor>,
}

impl ProviderRegistry {
    pub fn new(providers: Vec<ProviderDescriptor>) -> Self {
        Self { providers }
    }

    pub fn from_config(providers: &[ProviderConfig], limits: &StructuredLimits) -> Self {
        Self::new(
            providers
                .iter()
                .map(|provider| ProviderDescriptor {
                    name: provider.name.clone(),
                    endpoint: provider.endpoint.clone(),
                    adapter: SchemaAdapter::for_format(provider.format, limits),
                    timeout_budget: Duration::from_millis(provider.timeout_ms),
                })
                .collect(),
        )
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProviderDescriptor> {
        self.providers.iter()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
