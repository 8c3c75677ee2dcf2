//! Builds the fixed list of HTTP sources from configuration

use reqwest::Client;
use std::collections::HashSet;
use std::sync::Arc;

use super::error::ConfigError;
use super::orchestrator::EventConsumer;
use super::source::{EventSource, HttpEventSource, HttpSourceOptions};
use super::types::SourceDescriptor;

pub struct SourceRegistry {
    sources: Vec<Arc<dyn EventSource>>,
}

impl SourceRegistry {
    /// One `HttpEventSource` per descriptor, in configuration order
    ///
    /// Names must be non-empty and unique (they key cursors and locks), and
    /// urls must be http(s).
    pub fn from_descriptors(
        client: Client,
        descriptors: &[SourceDescriptor],
        options: &HttpSourceOptions,
    ) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        let mut sources: Vec<Arc<dyn EventSource>> = Vec::with_capacity(descriptors.len());

        for descriptor in descriptors {
            validate(descriptor)?;

            if !seen.insert(descriptor.name.as_str()) {
                return Err(ConfigError::InvalidValue(format!(
                    "duplicate source name: {}",
                    descriptor.name
                )));
            }

            sources.push(Arc::new(HttpEventSource::new(
                client.clone(),
                descriptor.name.clone(),
                descriptor.url.clone(),
                options.clone(),
            )));
        }

        Ok(Self { sources })
    }

    pub fn sources(&self) -> &[Arc<dyn EventSource>] {
        &self.sources
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Hand every source to the consumer, preserving order
    pub fn register_all(&self, consumer: &mut EventConsumer) {
        for source in &self.sources {
            consumer.register_source(source.clone());
        }
    }
}

fn validate(descriptor: &SourceDescriptor) -> Result<(), ConfigError> {
    if descriptor.name.trim().is_empty() {
        return Err(ConfigError::InvalidValue(
            "source name cannot be empty".to_string(),
        ));
    }

    if !descriptor.url.starts_with("http://") && !descriptor.url.starts_with("https://") {
        return Err(ConfigError::InvalidValue(format!(
            "url for source {} must start with http:// or https://, got {}",
            descriptor.name, descriptor.url
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(name: &str, url: &str) -> SourceDescriptor {
        SourceDescriptor {
            name: name.to_string(),
            url: url.to_string(),
        }
    }

    #[test]
    fn test_builds_sources_in_order() {
        let registry = SourceRegistry::from_descriptors(
            Client::new(),
            &[
                descriptor("orders", "http://localhost:3001/events"),
                descriptor("payments", "https://feeds.example.com/payments"),
            ],
            &HttpSourceOptions::default(),
        )
        .unwrap();

        let names: Vec<&str> = registry.sources().iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["orders", "payments"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_empty_config_is_allowed() {
        let registry =
            SourceRegistry::from_descriptors(Client::new(), &[], &HttpSourceOptions::default())
                .unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_rejects_duplicates_and_bad_urls() {
        let dup = SourceRegistry::from_descriptors(
            Client::new(),
            &[descriptor("a", "http://x/1"), descriptor("a", "http://x/2")],
            &HttpSourceOptions::default(),
        );
        assert!(matches!(dup, Err(ConfigError::InvalidValue(_))));

        let bad_url = SourceRegistry::from_descriptors(
            Client::new(),
            &[descriptor("a", "ftp://x/1")],
            &HttpSourceOptions::default(),
        );
        assert!(matches!(bad_url, Err(ConfigError::InvalidValue(_))));

        let blank = SourceRegistry::from_descriptors(
            Client::new(),
            &[descriptor("  ", "http://x/1")],
            &HttpSourceOptions::default(),
        );
        assert!(matches!(blank, Err(ConfigError::InvalidValue(_))));
    }
}
