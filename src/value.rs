use std::collections::BTreeMap;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

use serde::ser::{Serialize, Serializer};

use crate::form::{FormError, FormResult};
use crate::schema::{Schema, ValidatorFn, Verdict};

/// A value held by a bound object.
///
/// Lists and objects are reference counted, so cloning a value never copies
/// nested branches.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    List(Arc<Vec<Value>>),
    Object(BoundObject),
}

impl Value {
    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Value::List(Arc::new(items.into_iter().collect()))
    }

    /// `Null`, `false`, `0`, `NaN` and `""` are falsy; everything else is truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(value) => *value,
            Value::Number(value) => *value != 0.0 && !value.is_nan(),
            Value::Text(value) => !value.is_empty(),
            Value::List(_) | Value::Object(_) => true,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BoundObject> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(value) => write!(f, "{value}"),
            Value::Number(value) if value.fract() == 0.0 && value.abs() < 1e15 => {
                write!(f, "{}", *value as i64)
            }
            Value::Number(value) => write!(f, "{value}"),
            Value::Text(value) => f.write_str(value),
            Value::List(items) => {
                for (position, item) in items.iter().enumerate() {
                    if position > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
            Value::Object(object) => write!(f, "[object {}]", object.kind_name()),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(value as f64)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Number(f64::from(value))
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(Arc::new(items))
    }
}

impl From<BoundObject> for Value {
    fn from(object: BoundObject) -> Self {
        Value::Object(object)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(value) => Value::Bool(value),
            serde_json::Value::Number(number) => {
                number.as_f64().map(Value::Number).unwrap_or_default()
            }
            serde_json::Value::String(value) => Value::Text(value),
            serde_json::Value::Array(items) => Value::list(items.into_iter().map(Value::from)),
            serde_json::Value::Object(entries) => {
                let mut object = BoundObject::new();
                for (key, value) in entries {
                    object = object.with(key, Value::from(value));
                }
                Value::Object(object)
            }
        }
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(value) => serializer.serialize_bool(*value),
            Value::Number(value) if value.fract() == 0.0 && value.abs() < 9.0e15 => {
                serializer.serialize_i64(*value as i64)
            }
            Value::Number(value) => serializer.serialize_f64(*value),
            Value::Text(value) => serializer.serialize_str(value),
            Value::List(items) => serializer.collect_seq(items.iter()),
            Value::Object(object) => object.serialize(serializer),
        }
    }
}

#[derive(Clone, Default)]
struct Record {
    kind: Option<Arc<str>>,
    values: BTreeMap<String, Value>,
    schema: Option<Arc<Schema>>,
    methods: BTreeMap<String, ValidatorFn>,
}

/// Handle to an immutable record edited by a form.
///
/// Writes never touch the record behind the handle; [`BoundObject::with_value`]
/// returns a new handle and [`BoundObject::ptr_eq`] tells the two apart.
#[derive(Clone, Default)]
pub struct BoundObject(Arc<Record>);

impl BoundObject {
    pub fn new() -> Self {
        Self::default()
    }

    /// Object with a kind name, reported in diagnostics and errors.
    pub fn named(kind: impl AsRef<str>) -> Self {
        Self(Arc::new(Record {
            kind: Some(Arc::from(kind.as_ref())),
            ..Record::default()
        }))
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        Arc::make_mut(&mut self.0)
            .values
            .insert(name.into(), value.into());
        self
    }

    /// Declares the schema the object carries when no group overrides it.
    pub fn with_schema(mut self, schema: Schema) -> Self {
        Arc::make_mut(&mut self.0).schema = Some(Arc::new(schema));
        self
    }

    /// Declares a named validator a literal `error` key may refer to.
    pub fn with_method<F>(mut self, name: impl Into<String>, method: F) -> Self
    where
        F: Fn(&BoundObject, &str) -> Result<Verdict, crate::schema::BoxError>
            + Send
            + Sync
            + 'static,
    {
        Arc::make_mut(&mut self.0)
            .methods
            .insert(name.into(), Arc::new(method));
        self
    }

    pub fn kind_name(&self) -> &str {
        self.0.kind.as_deref().unwrap_or("Object")
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.values.get(name)
    }

    pub fn method(&self, name: &str) -> Option<&ValidatorFn> {
        self.0.methods.get(name)
    }

    pub fn schema(&self) -> Option<&Arc<Schema>> {
        self.0.schema.as_ref()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.values.is_empty()
    }

    /// Copy of this object with `name` replaced. Nested values are shared.
    pub fn with_value(&self, name: &str, value: Value) -> Self {
        let mut record = Record::clone(&self.0);
        record.values.insert(name.to_owned(), value);
        Self(Arc::new(record))
    }

    pub fn ptr_eq(&self, other: &BoundObject) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

impl PartialEq for BoundObject {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.0.values == other.0.values
    }
}

impl Debug for BoundObject {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(self.kind_name())
            .field("values", &self.0.values)
            .field("schema", &self.0.schema.is_some())
            .field("methods", &self.0.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Serialize for BoundObject {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_map(self.0.values.iter())
    }
}

/// Conversion of a Rust field into a bound value.
pub trait IntoValue {
    fn to_value(&self) -> Value;
}

/// Conversion of a bound value back into a Rust field.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Option<Self>;
}

/// A Rust type that can be edited through a form.
///
/// Usually derived with `#[derive(FormObject)]`.
pub trait FormObject: Sized {
    fn schema() -> Schema;
    fn to_object(&self) -> BoundObject;
    fn from_object(object: &BoundObject) -> FormResult<Self>;
}

pub fn field_from_object<T>(object: &BoundObject, name: &str) -> FormResult<T>
where
    T: FromValue,
{
    let value = object.get(name).cloned().unwrap_or_default();
    T::from_value(&value).ok_or_else(|| FormError::TypeMismatch {
        field: name.to_owned(),
        expected: std::any::type_name::<T>(),
    })
}

impl IntoValue for Value {
    fn to_value(&self) -> Value {
        self.clone()
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Option<Self> {
        Some(value.clone())
    }
}

impl IntoValue for BoundObject {
    fn to_value(&self) -> Value {
        Value::Object(self.clone())
    }
}

impl FromValue for BoundObject {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_object().cloned()
    }
}

impl IntoValue for String {
    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_str().map(str::to_owned)
    }
}

impl IntoValue for bool {
    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_bool()
    }
}

impl IntoValue for f64 {
    fn to_value(&self) -> Value {
        Value::Number(*self)
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_f64()
    }
}

impl IntoValue for i64 {
    fn to_value(&self) -> Value {
        Value::Number(*self as f64)
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Option<Self> {
        value
            .as_f64()
            .filter(|number| number.fract() == 0.0)
            .map(|number| number as i64)
    }
}

impl<T> IntoValue for Option<T>
where
    T: IntoValue,
{
    fn to_value(&self) -> Value {
        self.as_ref().map(IntoValue::to_value).unwrap_or_default()
    }
}

impl<T> FromValue for Option<T>
where
    T: FromValue,
{
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl<T> IntoValue for Vec<T>
where
    T: IntoValue,
{
    fn to_value(&self) -> Value {
        Value::list(self.iter().map(IntoValue::to_value))
    }
}

impl<T> FromValue for Vec<T>
where
    T: FromValue,
{
    fn from_value(value: &Value) -> Option<Self> {
        value.as_list()?.iter().map(T::from_value).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness_matches_form_semantics() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(!Value::from(0).is_truthy());
        assert!(!Value::Number(f64::NAN).is_truthy());
        assert!(!Value::from(false).is_truthy());
        assert!(Value::from("x").is_truthy());
        assert!(Value::from(-1).is_truthy());
        assert!(Value::list([]).is_truthy());
    }

    #[test]
    fn with_value_leaves_original_untouched() {
        let original = BoundObject::named("User").with("name", "John");
        let updated = original.with_value("name", "Jane".into());

        assert!(!original.ptr_eq(&updated));
        assert_eq!(original.get("name"), Some(&Value::from("John")));
        assert_eq!(updated.get("name"), Some(&Value::from("Jane")));
        assert_eq!(updated.kind_name(), "User");
    }

    #[test]
    fn json_bridge_keeps_structure() {
        let json = serde_json::json!({
            "name": "John",
            "age": 42,
            "todos": [{ "title": "write", "done": false }]
        });
        let Value::Object(object) = Value::from(json.clone()) else {
            panic!("json object must convert into a bound object");
        };

        assert_eq!(object.get("age"), Some(&Value::Number(42.0)));
        assert_eq!(object.to_json().expect("serialize"), json);
    }

    #[test]
    fn display_renders_messages() {
        assert_eq!(Value::from("taken").to_string(), "taken");
        assert_eq!(Value::from(3).to_string(), "3");
        assert_eq!(Value::Number(1.5).to_string(), "1.5");
        assert_eq!(Value::Null.to_string(), "");
    }

    #[test]
    fn field_from_object_reports_type_mismatch() {
        let object = BoundObject::new().with("age", "old");
        let error = field_from_object::<i64>(&object, "age").expect_err("must fail");
        assert!(matches!(error, FormError::TypeMismatch { ref field, .. } if field == "age"));

        let missing: Option<String> =
            field_from_object(&object, "nickname").expect("null decodes into None");
        assert_eq!(missing, None);
    }
}
