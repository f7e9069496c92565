//! Binds a [`value::BoundObject`] and a [`schema::Schema`] to a tree of
//! fields, writes edits back into the object and tracks per-field
//! validation, including async, debounced and memoized validators.

pub mod form;
pub mod path;
pub mod prelude;
pub mod schema;
pub mod value;
