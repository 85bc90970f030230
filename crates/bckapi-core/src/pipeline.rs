//! Read, write and create calls against located resources.
//!
//! Every call comes in two forms: an `async` one the caller awaits, and a
//! detached one that returns the object to be filled in right away and hands
//! the work to the service [`Launcher`](crate::launcher::Launcher).

use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::{error, warn};

use crate::error::{ApiError, ApiErrorKind};
use crate::resource::{lock, shared, JsonObject, Resource, Shared};
use crate::service::ApiService;

/// Caller-supplied error handler: turns a failure into a substitute answer.
pub type ErrorHandler =
    Arc<dyn Fn(ApiError) -> BoxFuture<'static, Result<Option<Value>, ApiError>> + Send + Sync>;

/// What to do when a call fails.
#[derive(Clone, Default)]
pub enum OnError {
    /// Record the failure, log it and answer `None`.
    #[default]
    Absorb,
    /// Hand the failure back to the caller.
    Propagate,
    Handle(ErrorHandler),
}

impl OnError {
    pub fn handle<F>(handler: F) -> Self
    where
        F: Fn(ApiError) -> BoxFuture<'static, Result<Option<Value>, ApiError>> + Send + Sync + 'static,
    {
        Self::Handle(Arc::new(handler))
    }
}

impl Debug for OnError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Absorb => f.write_str("Absorb"),
            Self::Propagate => f.write_str("Propagate"),
            Self::Handle(_) => f.write_str("Handle(..)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Operation {
    Read,
    Write,
    Create,
}

impl Operation {
    /// Ledger key of absorbed failures.
    pub(crate) const fn key(self) -> &'static str {
        match self {
            Self::Read => "pipeline.read",
            Self::Write => "pipeline.write",
            Self::Create => "pipeline.create",
        }
    }
}

impl ApiService {
    /// Reads the resource and merges the answer into it. Returns the raw answer,
    /// or `None` when the failure was absorbed.
    pub async fn read_async<T: Resource>(
        &self,
        resource: &Shared<T>,
        on_error: OnError,
    ) -> Result<Option<Value>, ApiError> {
        let answer = self.settle(Operation::Read, resource, on_error.clone()).await?;
        if let Some(value) = &answer {
            let merged = lock(resource).merge_value(value);
            if let Err(error) = merged {
                return self.recover(Operation::Read, error, on_error).await;
            }
        }
        Ok(answer)
    }

    /// PUT of the resource; the answer lands in a new object.
    pub async fn write_async<T: Resource>(
        &self,
        resource: &Shared<T>,
        on_error: OnError,
    ) -> Result<Option<JsonObject>, ApiError> {
        self.settle_into_object(Operation::Write, resource, on_error).await
    }

    /// POST of the resource; the answer lands in a new object.
    pub async fn create_async<T: Resource>(
        &self,
        resource: &Shared<T>,
        on_error: OnError,
    ) -> Result<Option<JsonObject>, ApiError> {
        self.settle_into_object(Operation::Create, resource, on_error).await
    }

    /// Detached read: returns the same resource, filled in once the answer
    /// arrives.
    pub fn read<T: Resource>(&self, resource: Shared<T>, on_error: OnError) -> Shared<T> {
        self.read_then(resource, on_error, |_: &mut T| {})
    }

    /// Detached read running `postprocess` after the merge.
    pub fn read_then<T, P>(&self, resource: Shared<T>, on_error: OnError, postprocess: P) -> Shared<T>
    where
        T: Resource,
        P: FnOnce(&mut T) + Send + 'static,
    {
        let service = self.clone();
        let target = Arc::clone(&resource);
        self.launcher().launch(async move {
            match service.read_async(&target, on_error).await {
                Ok(_) => postprocess(&mut *lock(&target)),
                Err(error) => report_detached(Operation::Read, &error),
            }
        });
        resource
    }

    pub fn write<T: Resource>(&self, resource: &Shared<T>, on_error: OnError) -> Shared<JsonObject> {
        self.detached_into_object(Operation::Write, resource, on_error, |_| {})
    }

    pub fn write_then<T, P>(&self, resource: &Shared<T>, on_error: OnError, postprocess: P) -> Shared<JsonObject>
    where
        T: Resource,
        P: FnOnce(&mut JsonObject) + Send + 'static,
    {
        self.detached_into_object(Operation::Write, resource, on_error, postprocess)
    }

    pub fn create<T: Resource>(&self, resource: &Shared<T>, on_error: OnError) -> Shared<JsonObject> {
        self.detached_into_object(Operation::Create, resource, on_error, |_| {})
    }

    pub fn create_then<T, P>(&self, resource: &Shared<T>, on_error: OnError, postprocess: P) -> Shared<JsonObject>
    where
        T: Resource,
        P: FnOnce(&mut JsonObject) + Send + 'static,
    {
        self.detached_into_object(Operation::Create, resource, on_error, postprocess)
    }

    /// Issues one call without any error handling.
    ///
    /// Creation posts to the located URL or, for an unlocated item, to the
    /// resource path.
    pub(crate) async fn dispatch<T: Resource>(
        &self,
        operation: Operation,
        resource: &Shared<T>,
    ) -> Result<Value, ApiError> {
        let (url, body) = {
            let registry = self.registry();
            let mut guard = lock(resource);
            let mut url = guard.locator_mut().url(registry);
            if url.is_none() && operation == Operation::Create {
                url = guard.locator().path_url(registry);
            }
            let Some(url) = url else {
                return Err(ApiError::unresolved(
                    guard.locator().describe(),
                    registry.is_loaded(),
                ));
            };
            let body = match operation {
                Operation::Read => None,
                Operation::Write | Operation::Create => Some(guard.to_outbound()?),
            };
            (url, body)
        };

        self.meter().record();
        let transport = self.transport();
        match (operation, body) {
            (Operation::Write, Some(body)) => transport.put(&url, &body).await,
            (Operation::Create, Some(body)) => transport.post(&url, &body).await,
            _ => transport.get(&url).await,
        }
    }

    /// Records a failure under `key` and logs it.
    pub(crate) fn absorb(&self, key: &str, error: &ApiError) {
        let record = self.ledger().record_failure(key);
        if error.kind() == ApiErrorKind::TransportFailure {
            self.connectivity().record_failure();
        }
        warn!(key, code = error.code(), failures = record.count, %error, "absorbed api failure");
    }

    async fn settle<T: Resource>(
        &self,
        operation: Operation,
        resource: &Shared<T>,
        on_error: OnError,
    ) -> Result<Option<Value>, ApiError> {
        match self.dispatch(operation, resource).await {
            Ok(value) => Ok(Some(value)),
            Err(error) => self.recover(operation, error, on_error).await,
        }
    }

    async fn recover(
        &self,
        operation: Operation,
        error: ApiError,
        on_error: OnError,
    ) -> Result<Option<Value>, ApiError> {
        if error.kind() == ApiErrorKind::IdentityConflict {
            return Err(error);
        }
        match on_error {
            OnError::Absorb => {
                self.absorb(operation.key(), &error);
                Ok(None)
            }
            OnError::Propagate => Err(error),
            OnError::Handle(handler) => handler(error).await,
        }
    }

    async fn settle_into_object<T: Resource>(
        &self,
        operation: Operation,
        resource: &Shared<T>,
        on_error: OnError,
    ) -> Result<Option<JsonObject>, ApiError> {
        let answer = self.settle(operation, resource, on_error).await?;
        Ok(answer.map(|value| match value {
            Value::Object(fields) => fields,
            _ => JsonObject::new(),
        }))
    }

    fn detached_into_object<T, P>(
        &self,
        operation: Operation,
        resource: &Shared<T>,
        on_error: OnError,
        postprocess: P,
    ) -> Shared<JsonObject>
    where
        T: Resource,
        P: FnOnce(&mut JsonObject) + Send + 'static,
    {
        let result = shared(JsonObject::new());
        let service = self.clone();
        let source = Arc::clone(resource);
        let target = Arc::clone(&result);
        self.launcher().launch(async move {
            match service.settle_into_object(operation, &source, on_error).await {
                Ok(answer) => {
                    let mut target = lock(&target);
                    if let Some(fields) = answer {
                        target.extend(fields);
                    }
                    postprocess(&mut *target);
                }
                Err(error) => report_detached(operation, &error),
            }
        });
        result
    }
}

/// Shallow copy of an answer's top-level fields. Non-object answers are
/// ignored.
pub(crate) fn merge_object(target: &mut JsonObject, value: &Value) -> Result<(), ApiError> {
    if let Value::Object(fields) = value {
        for (name, value) in fields {
            target.insert(name.clone(), value.clone());
        }
    }
    Ok(())
}

fn report_detached(operation: Operation, failure: &ApiError) {
    error!(operation = operation.key(), code = failure.code(), error = %failure, "detached api call failed");
}
