//! Identity and URL management for one API resource instance.
//!
//! A locator goes through two independent stages:
//!
//! - **filtered**: query parameters queued with [`ResourceLocator::add_filter`],
//!   possibly before the path is known;
//! - **located**: origin, path and identifier fixed. From then on only the query
//!   string may change; any attempt to move the locator elsewhere is an
//!   [`ApiError::IdentityConflict`].
//!
//! Collections carry no identifier, so their location can be derived from the
//! [`ResourceRegistry`] whenever it is first needed.

use std::fmt::Display;

use url::Url;

use crate::error::ApiError;
use crate::registry::ResourceRegistry;
use crate::scheduler::{ChainKind, RunToken};

/// Whether the resource addresses a single item or a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LocatorKind {
    #[default]
    Item,
    Collection,
}

/// Identifier state of a locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identifier {
    /// The resource type has no identifier (collections).
    None,
    /// Not located yet.
    Unlocated,
    Id(String),
}

/// Input accepted by [`ResourceLocator::locate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocateBy {
    Id(String),
    Href(String),
    Url(Url),
}

impl From<u64> for LocateBy {
    fn from(id: u64) -> Self {
        Self::Id(id.to_string())
    }
}

impl From<Url> for LocateBy {
    fn from(url: Url) -> Self {
        Self::Url(url)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
enum Location {
    #[default]
    Unset,
    /// Placeholder holding filters queued before the path resolved.
    Filters(Vec<(String, String)>),
    Fixed(Url),
}

/// Where one resource instance lives in the API, plus the run tokens of the
/// chains currently repeating on it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceLocator {
    /// Registry name, resolved to a path on demand.
    name: Option<String>,
    /// Explicit path; wins over `name`.
    path: Option<String>,
    kind: LocatorKind,
    location: Location,
    read_run: Option<RunToken>,
    write_run: Option<RunToken>,
}

impl ResourceLocator {
    /// Unlocated item resolved through the registry entry `name`.
    pub fn item_named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Collection resolved through the registry entry `name`.
    pub fn collection_named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            kind: LocatorKind::Collection,
            ..Self::default()
        }
    }

    /// Item bound to an explicit path instead of a registry name.
    pub fn item_at_path(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Collection bound to an explicit path.
    pub fn collection_at_path(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            kind: LocatorKind::Collection,
            ..Self::default()
        }
    }

    /// Fresh, unlocated item locator with the same name/path binding.
    pub fn item_sibling(&self) -> Self {
        Self {
            name: self.name.clone(),
            path: self.path.clone(),
            ..Self::default()
        }
    }

    /// Registry name, if bound by name.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Item or collection.
    pub const fn kind(&self) -> LocatorKind {
        self.kind
    }

    /// Collections never carry an identifier.
    pub fn is_collection(&self) -> bool {
        self.kind == LocatorKind::Collection
    }

    /// True once origin, path and identifier are fixed.
    pub fn is_located(&self) -> bool {
        matches!(self.location, Location::Fixed(_))
    }

    /// Human readable binding, used in error messages and logs.
    pub fn describe(&self) -> String {
        match (&self.location, &self.path, &self.name) {
            (Location::Fixed(url), _, _) => url.to_string(),
            (_, Some(path), _) => path.clone(),
            (_, None, Some(name)) => format!("<{name}>"),
            (_, None, None) => String::from("<unbound>"),
        }
    }

    /// Explicit path if set, otherwise the registry entry for the name.
    pub fn path(&self, registry: &ResourceRegistry) -> Option<String> {
        self.path
            .clone()
            .or_else(|| self.name.as_deref().and_then(|name| registry.path(name)))
    }

    /// [`path`](Self::path) resolved against the registry origin.
    pub fn path_url(&self, registry: &ResourceRegistry) -> Option<Url> {
        self.path(registry).and_then(|path| registry.resolve(&path))
    }

    /// Located URL including filters.
    ///
    /// Collections are located on demand from the registry; items stay `None`
    /// until an identifier or URL is assigned.
    pub fn url(&mut self, registry: &ResourceRegistry) -> Option<Url> {
        if let Location::Fixed(url) = &self.location {
            return Some(url.clone());
        }
        if self.is_collection() {
            let url = self.path_url(registry)?;
            self.fix(url);
            return self.located_url().cloned();
        }
        None
    }

    /// Located URL without attempting any derivation.
    pub fn located_url(&self) -> Option<&Url> {
        match &self.location {
            Location::Fixed(url) => Some(url),
            _ => None,
        }
    }

    /// [`url`](Self::url) as a string.
    pub fn href(&mut self, registry: &ResourceRegistry) -> Option<String> {
        self.url(registry).map(String::from)
    }

    /// Origin plus path, always ending with `/`, without filters. Two locators
    /// with the same resource URL address the same backend entity.
    pub fn resource_url(&mut self, registry: &ResourceRegistry) -> Option<String> {
        self.url(registry).map(|url| resource_key(&url))
    }

    /// Assigns a full URL.
    ///
    /// A located resource only accepts URLs with exactly the same origin and
    /// path (the query may differ). An unlocated one accepts any URL below its
    /// resource path and keeps filters queued earlier unless the URL overrides
    /// them.
    pub fn set_url(&mut self, url: &Url, registry: &ResourceRegistry) -> Result<(), ApiError> {
        if let Some(current) = self.url(registry) {
            if resource_key(&current) == resource_key(url) {
                self.location = Location::Fixed(url.clone());
                return Ok(());
            }
            return Err(ApiError::conflict(
                current,
                url.as_str(),
                "path or identifier is already fixed",
            ));
        }

        let Some(base) = self.path_url(registry) else {
            return Err(ApiError::unresolved(self.describe(), registry.is_loaded()));
        };
        if resource_key(url).starts_with(&resource_key(&base)) {
            self.fix(url.clone());
            Ok(())
        } else {
            Err(ApiError::conflict(
                base,
                url.as_str(),
                "url is outside the resource path",
            ))
        }
    }

    /// Parses `href` relative to the registry origin and assigns it.
    pub fn set_href(&mut self, href: &str, registry: &ResourceRegistry) -> Result<(), ApiError> {
        let url = registry
            .origin()
            .join(href)
            .map_err(|error| ApiError::InvalidLocation {
                value: href.to_owned(),
                reason: error.to_string(),
            })?;
        self.set_url(&url, registry)
    }

    /// Like [`set_href`](Self::set_href) but drops every filter afterwards.
    pub fn set_resource(&mut self, href: &str, registry: &ResourceRegistry) -> Result<(), ApiError> {
        self.set_href(href, registry)?;
        self.clear_filters();
        Ok(())
    }

    /// Fixes the identifier. Only legal once, on an unlocated item.
    pub fn set_identifier(
        &mut self,
        id: impl Display,
        registry: &ResourceRegistry,
    ) -> Result<(), ApiError> {
        let id = id.to_string();
        if self.is_collection() {
            return Err(ApiError::conflict(
                self.describe(),
                id,
                "collections carry no identifier",
            ));
        }
        if let Location::Fixed(current) = &self.location {
            return Err(ApiError::conflict(
                current.as_str(),
                id,
                "identifier is already fixed",
            ));
        }

        let Some(mut url) = self.path_url(registry) else {
            return Err(ApiError::unresolved(self.describe(), registry.is_loaded()));
        };
        url.set_query(None);
        let base = url.to_string();
        url.path_segments_mut()
            .map_err(|()| ApiError::InvalidLocation {
                value: base,
                reason: String::from("url cannot carry path segments"),
            })?
            .pop_if_empty()
            .push(&id)
            .push("");
        self.fix(url);
        Ok(())
    }

    /// Current identifier: the last non-empty path segment once located.
    pub fn identifier(&self) -> Identifier {
        if self.is_collection() {
            return Identifier::None;
        }
        self.located_url()
            .and_then(|url| url.path_segments()?.filter(|segment| !segment.is_empty()).last())
            .map(|segment| Identifier::Id(segment.to_owned()))
            .unwrap_or(Identifier::Unlocated)
    }

    /// Locates by id or hyperlink.
    pub fn locate(&mut self, by: LocateBy, registry: &ResourceRegistry) -> Result<(), ApiError> {
        match by {
            LocateBy::Id(id) => self.set_identifier(id, registry),
            LocateBy::Href(href) => self.set_href(&href, registry),
            LocateBy::Url(url) => self.set_url(&url, registry),
        }
    }

    /// Merges query parameters; same-named keys are overwritten. Works before
    /// the resource is located.
    pub fn add_filter<I, K, V>(&mut self, filters: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: ToString,
    {
        for (key, value) in filters {
            let key = key.into();
            let value = value.to_string();
            if self.location == Location::Unset {
                self.location = Location::Filters(Vec::new());
            }
            match &mut self.location {
                Location::Fixed(url) => set_query_pair(url, &key, &value),
                Location::Filters(pending) => upsert(pending, key, value),
                Location::Unset => {}
            }
        }
        self
    }

    /// Removes every query parameter, leaving path and identifier alone.
    pub fn clear_filters(&mut self) -> &mut Self {
        match &mut self.location {
            Location::Fixed(url) => url.set_query(None),
            Location::Filters(pending) => pending.clear(),
            Location::Unset => {}
        }
        self
    }

    /// Current query parameters, queued or applied, in order.
    pub fn filters(&self) -> Vec<(String, String)> {
        match &self.location {
            Location::Fixed(url) => url.query_pairs().into_owned().collect(),
            Location::Filters(pending) => pending.clone(),
            Location::Unset => Vec::new(),
        }
    }

    /// Value of one query parameter.
    pub fn filter(&self, key: &str) -> Option<String> {
        self.filters()
            .into_iter()
            .find_map(|(k, v)| (k == key).then_some(v))
    }

    /// Token of the chain of `kind` currently running on this resource.
    pub fn run_token(&self, kind: ChainKind) -> Option<&RunToken> {
        match kind {
            ChainKind::Read => self.read_run.as_ref(),
            ChainKind::Write => self.write_run.as_ref(),
        }
    }

    /// A chain of `kind` holds the slot.
    pub fn is_running(&self, kind: ChainKind) -> bool {
        self.run_token(kind).is_some()
    }

    pub(crate) fn set_run_token(&mut self, kind: ChainKind, token: Option<RunToken>) {
        match kind {
            ChainKind::Read => self.read_run = token,
            ChainKind::Write => self.write_run = token,
        }
    }

    fn fix(&mut self, mut url: Url) {
        if let Location::Filters(pending) = &self.location {
            let present: Vec<String> = url.query_pairs().map(|(k, _)| k.into_owned()).collect();
            for (key, value) in pending {
                if !present.contains(key) {
                    set_query_pair(&mut url, key, value);
                }
            }
        }
        self.location = Location::Fixed(url);
    }
}

/// Origin plus path with a trailing slash.
pub(crate) fn resource_key(url: &Url) -> String {
    let mut key = format!("{}{}", url.origin().ascii_serialization(), url.path());
    if !key.ends_with('/') {
        key.push('/');
    }
    key
}

fn upsert(pairs: &mut Vec<(String, String)>, key: String, value: String) {
    match pairs.iter_mut().find(|(k, _)| *k == key) {
        Some(pair) => pair.1 = value,
        None => pairs.push((key, value)),
    }
}

/// Sets `key` to `value`, replacing the first occurrence and dropping the rest.
fn set_query_pair(url: &mut Url, key: &str, value: &str) {
    let mut pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    let mut replaced = false;
    pairs.retain_mut(|(k, v)| {
        if k.as_str() != key {
            return true;
        }
        if replaced {
            return false;
        }
        *v = value.to_owned();
        replaced = true;
        true
    });
    if !replaced {
        pairs.push((key.to_owned(), value.to_owned()));
    }
    url.query_pairs_mut().clear().extend_pairs(pairs);
}
