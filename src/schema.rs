use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde::Deserialize;

use crate::form::{FormError, FormResult};
use crate::value::{BoundObject, Value};

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Outcome of an async validator: `Ok(Some(message))` is a validation failure,
/// `Ok(None)` a success and `Err` a rejection whose text becomes the message.
pub type ValidationResult = Result<Option<String>, BoxError>;

pub type ValidationFuture = Pin<Box<dyn Future<Output = ValidationResult> + Send + 'static>>;

pub type ValidatorFn =
    Arc<dyn Fn(&BoundObject, &str) -> Result<Verdict, BoxError> + Send + Sync + 'static>;

/// Clonable settled form of a [`ValidationResult`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum Settlement {
    Succeeded,
    Failed(String),
    Rejected(String),
}

impl Settlement {
    pub(crate) fn from_result(result: ValidationResult) -> Self {
        match result {
            Ok(Some(message)) if !message.is_empty() => Settlement::Failed(message),
            Ok(_) => Settlement::Succeeded,
            Err(error) => Settlement::Rejected(error.to_string()),
        }
    }

    pub(crate) fn into_error(self) -> Option<String> {
        match self {
            Settlement::Succeeded => None,
            Settlement::Failed(message) | Settlement::Rejected(message) => {
                Some(message).filter(|message| !message.is_empty())
            }
        }
    }
}

static CALLBACK_ID_ALLOCATOR: AtomicU64 = AtomicU64::new(1);

/// Callback run by debounced and memoized validators.
///
/// Scheduling state is keyed by the id handed out in [`ValidatorCallback::new`]
/// and shared by clones, so build it once and clone it rather than rebuilding
/// it on every validation pass.
#[derive(Clone)]
pub struct ValidatorCallback {
    id: u64,
    callback: Arc<dyn Fn(&BoundObject, &str) -> ValidationFuture + Send + Sync + 'static>,
}

impl ValidatorCallback {
    pub fn new<F, Fut>(callback: F) -> Self
    where
        F: Fn(&BoundObject, &str) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ValidationResult> + Send + 'static,
    {
        Self {
            id: CALLBACK_ID_ALLOCATOR.fetch_add(1, Ordering::SeqCst),
            callback: Arc::new(move |object: &BoundObject, name: &str| {
                Box::pin(callback(object, name)) as ValidationFuture
            }),
        }
    }

    pub(crate) fn identity(&self) -> u64 {
        self.id
    }

    pub(crate) fn call(&self, object: &BoundObject, name: &str) -> ValidationFuture {
        (self.callback)(object, name)
    }

    pub fn same_as(&self, other: &ValidatorCallback) -> bool {
        self.identity() == other.identity()
    }
}

impl Debug for ValidatorCallback {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ValidatorCallback(#{})", self.identity())
    }
}

/// Debounced or memoized validation. Exactly one of `debounce` and `memoize`
/// must be set, and `callback` is required.
#[derive(Clone, Debug, Default)]
pub struct DeferredSpec {
    pub debounce: Option<Duration>,
    pub memoize: bool,
    pub callback: Option<ValidatorCallback>,
}

impl DeferredSpec {
    pub fn debounce(millis: u64, callback: ValidatorCallback) -> Self {
        Self {
            debounce: Some(Duration::from_millis(millis)),
            memoize: false,
            callback: Some(callback),
        }
    }

    pub fn memoize(callback: ValidatorCallback) -> Self {
        Self {
            debounce: None,
            memoize: true,
            callback: Some(callback),
        }
    }
}

/// Result of a validator function.
pub enum Verdict {
    Valid,
    Invalid(String),
    Pending(ValidationFuture),
    Deferred(DeferredSpec),
}

impl Verdict {
    pub fn pending<Fut>(future: Fut) -> Self
    where
        Fut: Future<Output = ValidationResult> + Send + 'static,
    {
        Verdict::Pending(Box::pin(future))
    }
}

impl From<Option<String>> for Verdict {
    fn from(error: Option<String>) -> Self {
        match error {
            Some(message) => Verdict::Invalid(message),
            None => Verdict::Valid,
        }
    }
}

impl From<&str> for Verdict {
    fn from(message: &str) -> Self {
        Verdict::Invalid(message.to_owned())
    }
}

impl From<DeferredSpec> for Verdict {
    fn from(spec: DeferredSpec) -> Self {
        Verdict::Deferred(spec)
    }
}

impl Debug for Verdict {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Valid => f.write_str("Valid"),
            Verdict::Invalid(message) => f.debug_tuple("Invalid").field(message).finish(),
            Verdict::Pending(_) => f.write_str("Pending"),
            Verdict::Deferred(spec) => f.debug_tuple("Deferred").field(spec).finish(),
        }
    }
}

/// An in-flight validation declared directly in a schema.
///
/// Every field that resolves it awaits the same settlement.
#[derive(Clone)]
pub struct AsyncValidation(Shared<BoxFuture<'static, Settlement>>);

impl AsyncValidation {
    pub fn new<Fut>(future: Fut) -> Self
    where
        Fut: Future<Output = ValidationResult> + Send + 'static,
    {
        Self(future.map(Settlement::from_result).boxed().shared())
    }

    pub(crate) fn settlement(&self) -> Shared<BoxFuture<'static, Settlement>> {
        self.0.clone()
    }
}

#[derive(Clone)]
pub enum ValidatorSpec {
    /// Name of another property whose current value is the error message.
    Literal(String),
    Function(ValidatorFn),
    Async(AsyncValidation),
    Deferred(DeferredSpec),
}

impl ValidatorSpec {
    pub fn literal(key: impl Into<String>) -> Self {
        ValidatorSpec::Literal(key.into())
    }

    pub fn function<F>(validator: F) -> Self
    where
        F: Fn(&BoundObject, &str) -> Result<Verdict, BoxError> + Send + Sync + 'static,
    {
        ValidatorSpec::Function(Arc::new(validator))
    }
}

impl Debug for ValidatorSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidatorSpec::Literal(key) => f.debug_tuple("Literal").field(key).finish(),
            ValidatorSpec::Function(_) => f.write_str("Function"),
            ValidatorSpec::Async(_) => f.write_str("Async"),
            ValidatorSpec::Deferred(spec) => f.debug_tuple("Deferred").field(spec).finish(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct SchemaProperty {
    pub kind: Option<String>,
    pub error: Option<ValidatorSpec>,
    pub hints: BTreeMap<String, Value>,
}

impl SchemaProperty {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn error(mut self, spec: ValidatorSpec) -> Self {
        self.error = Some(spec);
        self
    }

    pub fn validate<F>(self, validator: F) -> Self
    where
        F: Fn(&BoundObject, &str) -> Result<Verdict, BoxError> + Send + Sync + 'static,
    {
        self.error(ValidatorSpec::function(validator))
    }

    pub fn hint(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.hints.insert(key.into(), value.into());
        self
    }
}

#[derive(Clone, Debug, Default)]
pub struct Schema {
    properties: BTreeMap<String, SchemaProperty>,
}

#[derive(Deserialize)]
struct PropertyDecl {
    #[serde(rename = "type")]
    kind: Option<String>,
    error: Option<String>,
    #[serde(flatten)]
    hints: BTreeMap<String, serde_json::Value>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn property(mut self, name: impl Into<String>, property: SchemaProperty) -> Self {
        self.properties.insert(name.into(), property);
        self
    }

    pub fn get(&self, name: &str) -> Option<&SchemaProperty> {
        self.properties.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.properties.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Reads a declarative schema: `type` sets the kind, a string `error`
    /// becomes a literal validator and every other key is kept as a hint.
    pub fn from_json(json: &serde_json::Value) -> FormResult<Self> {
        let decls = BTreeMap::<String, PropertyDecl>::deserialize(json)
            .map_err(|error| FormError::Configuration(format!("invalid schema: {error}")))?;
        let properties = decls
            .into_iter()
            .map(|(name, decl)| {
                let property = SchemaProperty {
                    kind: decl.kind,
                    error: decl.error.map(ValidatorSpec::Literal),
                    hints: decl
                        .hints
                        .into_iter()
                        .map(|(key, value)| (key, Value::from(value)))
                        .collect(),
                };
                (name, property)
            })
            .collect();
        Ok(Self { properties })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settlement_maps_results_to_messages() {
        assert_eq!(Settlement::from_result(Ok(None)), Settlement::Succeeded);
        assert_eq!(
            Settlement::from_result(Ok(Some(String::new()))),
            Settlement::Succeeded
        );
        assert_eq!(
            Settlement::from_result(Ok(Some("taken".into()))).into_error(),
            Some("taken".into())
        );
        assert_eq!(
            Settlement::from_result(Err("async invalid".into())),
            Settlement::Rejected("async invalid".into())
        );
    }

    #[test]
    fn callback_identity_is_shared_by_clones() {
        let first = ValidatorCallback::new(|_, _| async { Ok(None) });
        let clone = first.clone();
        let other = ValidatorCallback::new(|_, _| async { Ok(None) });

        assert!(first.same_as(&clone));
        assert!(!first.same_as(&other));
    }

    #[test]
    fn schema_reads_declarative_json() {
        let schema = Schema::from_json(&serde_json::json!({
            "name": { "type": "text", "error": "altName", "label": "Full name" },
            "agree": { "type": "checkbox" }
        }))
        .expect("valid schema");

        let name = schema.get("name").expect("name property");
        assert_eq!(name.kind.as_deref(), Some("text"));
        assert!(matches!(&name.error, Some(ValidatorSpec::Literal(key)) if key == "altName"));
        assert_eq!(name.hints.get("label"), Some(&Value::from("Full name")));
        assert_eq!(schema.names().collect::<Vec<_>>(), vec!["agree", "name"]);
    }

    #[test]
    fn schema_rejects_malformed_json() {
        let error = Schema::from_json(&serde_json::json!({ "name": { "type": 3 } }))
            .expect_err("type must be a string");
        assert!(matches!(error, FormError::Configuration(_)));
    }
}
