//! Domain objects bound to API resources.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ApiError;
use crate::locator::ResourceLocator;

pub type JsonObject = Map<String, Value>;

/// Resource shared between the caller and the tasks filling it in.
pub type Shared<T> = Arc<Mutex<T>>;

pub fn shared<T>(resource: T) -> Shared<T> {
    Arc::new(Mutex::new(resource))
}

pub fn lock<T>(resource: &Shared<T>) -> MutexGuard<'_, T> {
    resource.lock().expect("resource lock is not poisoned")
}

/// Fields starting with `_` are client bookkeeping or server-computed values.
/// They are accepted from the backend but never sent back.
pub fn is_internal_field(name: &str) -> bool {
    name.starts_with('_')
}

/// Names starting with `api_` are reserved for the binding layer itself.
pub fn is_framework_field(name: &str) -> bool {
    name.starts_with("api_")
}

/// Removes internal fields at every nesting level.
pub fn outbound_body(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(name, _)| !is_internal_field(name))
                .map(|(name, value)| (name, outbound_body(value)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(outbound_body).collect()),
        other => other,
    }
}

/// A serializable object living at an API location.
///
/// The locator is client state and is never part of the serialized form.
pub trait Resource: Serialize + DeserializeOwned + Send + 'static {
    fn locator(&self) -> &ResourceLocator;

    fn locator_mut(&mut self) -> &mut ResourceLocator;

    /// Overwrites every top-level field present in `fields`. Fields the
    /// backend did not send keep their current value.
    fn merge_fields(&mut self, fields: &JsonObject) -> Result<(), ApiError> {
        let decode_error = |resource: &Self, error: serde_json::Error| ApiError::Decode {
            url: resource.locator().describe(),
            message: error.to_string(),
        };

        let mut current = match serde_json::to_value(&*self) {
            Ok(Value::Object(map)) => map,
            Ok(_) => JsonObject::new(),
            Err(error) => return Err(decode_error(self, error)),
        };
        for (name, value) in fields {
            current.insert(name.clone(), value.clone());
        }

        let mut merged: Self =
            serde_json::from_value(Value::Object(current)).map_err(|error| decode_error(self, error))?;
        std::mem::swap(merged.locator_mut(), self.locator_mut());
        *self = merged;
        Ok(())
    }

    /// Merges a backend answer. `null` (an empty body) leaves the object as is.
    fn merge_value(&mut self, value: &Value) -> Result<(), ApiError> {
        match value {
            Value::Object(fields) => self.merge_fields(fields),
            Value::Null => Ok(()),
            other => Err(ApiError::Decode {
                url: self.locator().describe(),
                message: format!("expected a JSON object, got {other}"),
            }),
        }
    }

    /// Body sent on write/create.
    fn to_outbound(&self) -> Result<Value, ApiError> {
        serde_json::to_value(self)
            .map(outbound_body)
            .map_err(|error| ApiError::Encode {
                url: self.locator().describe(),
                message: error.to_string(),
            })
    }
}

/// Untyped item: any field the backend sends is kept.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiObject {
    #[serde(skip)]
    locator: ResourceLocator,
    #[serde(flatten)]
    pub fields: JsonObject,
}

impl ApiObject {
    pub fn named(name: impl Into<String>) -> Self {
        Self::with_locator(ResourceLocator::item_named(name))
    }

    pub fn at_path(path: impl Into<String>) -> Self {
        Self::with_locator(ResourceLocator::item_at_path(path))
    }

    pub fn with_locator(locator: ResourceLocator) -> Self {
        Self {
            locator,
            fields: JsonObject::new(),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.fields.insert(field.into(), value.into());
        self
    }
}

impl Resource for ApiObject {
    fn locator(&self) -> &ResourceLocator {
        &self.locator
    }

    fn locator_mut(&mut self) -> &mut ResourceLocator {
        &mut self.locator
    }

    fn merge_fields(&mut self, fields: &JsonObject) -> Result<(), ApiError> {
        for (name, value) in fields {
            self.fields.insert(name.clone(), value.clone());
        }
        Ok(())
    }
}

/// Page of a paginated collection: `{count, next, previous, results}`.
///
/// Missing keys decode as `None`; items need no `Default`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "T: Serialize", deserialize = "T: DeserializeOwned"))]
pub struct ApiList<T> {
    #[serde(skip)]
    locator: ResourceLocator,
    /// Total items across every page.
    pub count: Option<u64>,
    /// Absolute or relative link to the following page.
    pub next: Option<String>,
    pub previous: Option<String>,
    pub results: Option<Vec<T>>,
}

impl<T> Default for ApiList<T> {
    fn default() -> Self {
        Self::with_locator(ResourceLocator::collection_at_path(""))
    }
}

impl<T> ApiList<T> {
    pub fn named(name: impl Into<String>) -> Self {
        Self::with_locator(ResourceLocator::collection_named(name))
    }

    pub fn at_path(path: impl Into<String>) -> Self {
        Self::with_locator(ResourceLocator::collection_at_path(path))
    }

    pub fn with_locator(locator: ResourceLocator) -> Self {
        Self {
            locator,
            count: None,
            next: None,
            previous: None,
            results: None,
        }
    }

    pub fn len(&self) -> usize {
        self.results.as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Resource + Clone> ApiList<T> {
    /// Item `index` of the current page as an unlocated object of the same
    /// resource, carrying the listed fields.
    pub fn object(&self, index: usize) -> Option<T> {
        let mut item = self.results.as_ref()?.get(index)?.clone();
        *item.locator_mut() = self.locator.item_sibling();
        Some(item)
    }
}

impl<T> Resource for ApiList<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    fn locator(&self) -> &ResourceLocator {
        &self.locator
    }

    fn locator_mut(&mut self) -> &mut ResourceLocator {
        &mut self.locator
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Ficha {
        #[serde(skip)]
        locator: ResourceLocator,
        #[serde(default)]
        nombre: Option<String>,
        #[serde(default)]
        numero: Option<u32>,
    }

    impl Resource for Ficha {
        fn locator(&self) -> &ResourceLocator {
            &self.locator
        }

        fn locator_mut(&mut self) -> &mut ResourceLocator {
            &mut self.locator
        }
    }

    #[test]
    fn outbound_body_strips_internal_fields_recursively() {
        let body = outbound_body(json!({
            "nombre": "A",
            "_codigo": "E-1",
            "detalle": { "__visible": true, "via": "Mayor" },
            "lineas": [{ "_tmp": 1, "n": 2 }],
        }));

        assert_eq!(
            body,
            json!({ "nombre": "A", "detalle": { "via": "Mayor" }, "lineas": [{ "n": 2 }] })
        );
    }

    #[test]
    fn merge_overwrites_sent_fields_and_keeps_locator() {
        let mut ficha = Ficha {
            locator: ResourceLocator::item_at_path("/api/ficha/"),
            nombre: Some(String::from("viejo")),
            numero: Some(7),
        };

        ficha
            .merge_fields(json!({ "nombre": "nuevo" }).as_object().expect("object"))
            .expect("merge");

        assert_eq!(ficha.nombre.as_deref(), Some("nuevo"));
        assert_eq!(ficha.numero, Some(7));
        assert_eq!(ficha.locator.describe(), "/api/ficha/");
    }

    #[test]
    fn merge_rejects_wrongly_typed_fields() {
        let mut ficha = Ficha::default();

        let error = ficha
            .merge_value(&json!({ "numero": "siete" }))
            .expect_err("type mismatch");
        assert_eq!(error.code(), "api.decode");
        assert!(ficha.merge_value(&Value::Null).is_ok());
    }

    #[test]
    fn list_object_is_an_unlocated_sibling() {
        let mut list: ApiList<ApiObject> = ApiList::named("grupo");
        list.merge_value(&json!({
            "count": 1, "next": null, "previous": null,
            "results": [{ "id": 3, "nombre": "G" }],
        }))
        .expect("merge");

        let item = list.object(0).expect("first item");
        assert_eq!(item.get("nombre"), Some(&json!("G")));
        assert_eq!(item.locator().name(), Some("grupo"));
        assert!(!item.locator().is_collection());
        assert!(list.object(1).is_none());
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Etiqueta {
        #[serde(skip)]
        locator: ResourceLocator,
        texto: String,
    }

    impl Resource for Etiqueta {
        fn locator(&self) -> &ResourceLocator {
            &self.locator
        }

        fn locator_mut(&mut self) -> &mut ResourceLocator {
            &mut self.locator
        }
    }

    fn page_of<T: Resource + Clone>(value: Value) -> Result<ApiList<T>, ApiError> {
        let mut list = ApiList::named("etiqueta");
        list.merge_value(&value)?;
        Ok(list)
    }

    #[test]
    fn lists_hold_items_without_default() {
        let list: ApiList<Etiqueta> = page_of(json!({
            "count": 1,
            "results": [{ "texto": "urgente" }],
        }))
        .expect("page");

        assert_eq!(list.count, Some(1));
        assert_eq!(list.next, None);
        assert_eq!(list.object(0).map(|item| item.texto), Some(String::from("urgente")));
    }

    #[test]
    fn reserved_prefixes() {
        assert!(is_internal_field("_codigo"));
        assert!(is_internal_field("__visible"));
        assert!(!is_internal_field("codigo"));
        assert!(is_framework_field("api_href"));
        assert!(!is_framework_field("apiary"));
    }
}
