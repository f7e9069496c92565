pub use crate::form::{
    Element, Field, FieldGroup, FieldProps, Form, FormError, FormObject, FormOptions, FormResult,
    ManualTimer, NativeHandle, Runtime, SubmitState, connect,
};
pub use crate::schema::{
    DeferredSpec, Schema, SchemaProperty, ValidatorCallback, ValidatorSpec, Verdict,
};
pub use crate::value::{BoundObject, FromValue, IntoValue, Value};
