//! Directory of resource names discovered from the API root.

use std::collections::BTreeMap;
use std::sync::RwLock;

use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::error::ApiError;
use crate::resource::is_internal_field;
use crate::transport::Transport;

/// Name → path mapping published by the root discovery endpoint.
///
/// One instance is shared by every locator of a service and handed to them
/// explicitly. Refreshes merge into the mapping, so a name seen once stays
/// resolvable even if a later document omits it.
#[derive(Debug)]
pub struct ResourceRegistry {
    origin: Url,
    root: String,
    entries: RwLock<BTreeMap<String, String>>,
}

impl ResourceRegistry {
    pub fn new(origin: Url, root: impl Into<String>) -> Self {
        Self {
            origin,
            root: root.into(),
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Origin used to resolve relative paths.
    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Path of the discovery document, relative or absolute.
    pub fn root_path(&self) -> &str {
        &self.root
    }

    pub fn root_url(&self) -> Option<Url> {
        self.resolve(&self.root)
    }

    /// Resolves a relative or absolute path against the origin.
    pub fn resolve(&self, path: &str) -> Option<Url> {
        self.origin.join(path).ok()
    }

    pub fn path(&self, name: &str) -> Option<String> {
        self.read().get(name).cloned()
    }

    /// True once any public key has been discovered.
    pub fn is_loaded(&self) -> bool {
        self.read().keys().any(|key| !is_internal_field(key))
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.read().clone()
    }

    /// Merges a discovery document. Non-string values are not paths and are
    /// skipped. Returns the number of entries written.
    pub fn merge<'a>(&self, document: impl IntoIterator<Item = (&'a String, &'a Value)>) -> usize {
        let mut entries = self
            .entries
            .write()
            .expect("registry lock is not poisoned");
        let mut written = 0;
        for (name, value) in document {
            match value.as_str() {
                Some(path) => {
                    entries.insert(name.clone(), path.to_owned());
                    written += 1;
                }
                None => debug!(%name, "skipping non-path registry entry"),
            }
        }
        written
    }

    /// Fetches the discovery document once and merges it.
    pub async fn refresh(&self, transport: &Transport) -> Result<usize, ApiError> {
        let url = self
            .root_url()
            .ok_or_else(|| ApiError::unresolved(self.root.clone(), self.is_loaded()))?;
        let document = transport.get(&url).await?;
        let Value::Object(map) = document else {
            return Err(ApiError::Decode {
                url: url.to_string(),
                message: String::from("discovery document is not a JSON object"),
            });
        };
        Ok(self.merge(&map))
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, String>> {
        self.entries.read().expect("registry lock is not poisoned")
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn registry() -> ResourceRegistry {
        ResourceRegistry::new(Url::parse("http://h").expect("valid"), "/api/")
    }

    #[test]
    fn internal_keys_do_not_count_as_loaded() {
        let registry = registry();
        let document = json!({ "_meta": "x" });
        registry.merge(document.as_object().expect("object"));

        assert!(!registry.is_loaded());

        let document = json!({ "grupo": "http://h/api/grupo/" });
        registry.merge(document.as_object().expect("object"));
        assert!(registry.is_loaded());
    }

    #[test]
    fn merge_overwrites_and_keeps_missing_names() {
        let registry = registry();
        let first = json!({ "grupo": "/api/grupo/", "encargo": "/api/encargo/" });
        let second = json!({ "grupo": "/api/v2/grupo/", "count": 3 });
        registry.merge(first.as_object().expect("object"));
        let written = registry.merge(second.as_object().expect("object"));

        assert_eq!(written, 1);
        assert_eq!(registry.path("grupo").as_deref(), Some("/api/v2/grupo/"));
        assert_eq!(registry.path("encargo").as_deref(), Some("/api/encargo/"));
        assert_eq!(registry.path("count"), None);
    }

    #[test]
    fn resolves_relative_and_absolute_paths() {
        let registry = registry();

        assert_eq!(
            registry.resolve("/api/grupo/").map(String::from).as_deref(),
            Some("http://h/api/grupo/")
        );
        assert_eq!(
            registry.resolve("https://other/api/x/").map(String::from).as_deref(),
            Some("https://other/api/x/")
        );
        assert_eq!(
            registry.root_url().map(String::from).as_deref(),
            Some("http://h/api/")
        );
    }
}
