use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Arc;

use serde::Serialize;

use super::connect::Element;
use super::context::{FormContext, GroupContext, Mutate};
use super::field::Field;
use super::mutator::mutate_object;
use super::root::{FormError, FormResult};
use crate::path::prefix;
use crate::schema::Schema;
use crate::value::{BoundObject, Value};

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum GroupError {
    Message(String),
    Nested(ErrorMap),
    Indexed(BTreeMap<usize, GroupError>),
}

impl GroupError {
    pub fn is_empty(&self) -> bool {
        match self {
            GroupError::Message(message) => message.is_empty(),
            GroupError::Nested(errors) => errors.is_empty(),
            GroupError::Indexed(items) => items.is_empty(),
        }
    }

    pub fn as_message(&self) -> Option<&str> {
        match self {
            GroupError::Message(message) => Some(message),
            _ => None,
        }
    }

    pub fn as_nested(&self) -> Option<&ErrorMap> {
        match self {
            GroupError::Nested(errors) => Some(errors),
            _ => None,
        }
    }

    pub fn at(&self, index: usize) -> Option<&GroupError> {
        match self {
            GroupError::Indexed(items) => items.get(&index),
            _ => None,
        }
    }
}

/// Errors of one group keyed by property name. A key is present only while
/// the property has an error.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ErrorMap(BTreeMap<String, GroupError>);

impl ErrorMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&GroupError> {
        self.0.get(name)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &GroupError)> {
        self.0.iter().map(|(name, error)| (name.as_str(), error))
    }

    /// Sets or clears `errors[name]`, or `errors[name][index]`. Returns
    /// whether the map changed.
    pub fn mutate(&mut self, name: &str, error: Option<GroupError>, index: Option<usize>) -> bool {
        let error = error.filter(|error| !error.is_empty());
        let Some(index) = index else {
            return match error {
                Some(error) if self.0.get(name) == Some(&error) => false,
                Some(error) => {
                    self.0.insert(name.to_owned(), error);
                    true
                }
                None => self.0.remove(name).is_some(),
            };
        };

        match (self.0.entry(name.to_owned()), error) {
            (Entry::Occupied(mut entry), Some(error)) => {
                if let GroupError::Indexed(items) = entry.get_mut() {
                    if items.get(&index) == Some(&error) {
                        return false;
                    }
                    items.insert(index, error);
                } else {
                    entry.insert(GroupError::Indexed(BTreeMap::from([(index, error)])));
                }
                true
            }
            (Entry::Vacant(entry), Some(error)) => {
                entry.insert(GroupError::Indexed(BTreeMap::from([(index, error)])));
                true
            }
            (Entry::Occupied(mut entry), None) => {
                let GroupError::Indexed(items) = entry.get_mut() else {
                    return false;
                };
                let removed = items.remove(&index).is_some();
                if items.is_empty() {
                    entry.remove();
                }
                removed
            }
            (Entry::Vacant(_), None) => false,
        }
    }

    fn remove(&mut self, name: &str) -> bool {
        self.0.remove(name).is_some()
    }
}

#[derive(Debug)]
pub enum Node {
    Field(Field),
    Group(FieldGroup),
}

impl From<Field> for Node {
    fn from(field: Field) -> Self {
        Node::Field(field)
    }
}

impl From<FieldGroup> for Node {
    fn from(group: FieldGroup) -> Self {
        Node::Group(group)
    }
}

impl Node {
    fn name(&self) -> Option<&str> {
        match self {
            Node::Field(field) => Some(field.name()),
            Node::Group(group) => group.name.as_deref(),
        }
    }
}

/// Binds a set of fields to one object and its schema.
///
/// A group nested under another one with a name edits `parent[name]` (or
/// `parent[name][index]`) and hands the updated object to its parent; the
/// outermost group hands it to the form.
#[derive(Debug, Default)]
pub struct FieldGroup {
    name: Option<String>,
    object: Option<BoundObject>,
    schema: Option<Arc<Schema>>,
    prefix: Option<String>,
    index: Option<usize>,
    children: Vec<Node>,
    errors: ErrorMap,
}

impl FieldGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nested(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Binds the group to an explicit object instead of its parent's
    /// property.
    pub fn object(mut self, object: BoundObject) -> Self {
        self.object = Some(object);
        self
    }

    pub fn schema(mut self, schema: Schema) -> Self {
        self.schema = Some(Arc::new(schema));
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn index(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }

    pub fn child(mut self, node: impl Into<Node>) -> Self {
        self.push(node);
        self
    }

    pub fn push(&mut self, node: impl Into<Node>) {
        self.children.push(node.into());
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn errors(&self) -> &ErrorMap {
        &self.errors
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    /// First nested group bound to `name`, optionally at `index`.
    pub fn group_mut(&mut self, name: &str, index: Option<usize>) -> Option<&mut FieldGroup> {
        self.children.iter_mut().find_map(|node| match node {
            Node::Group(group) if group.name.as_deref() == Some(name) && group.index == index => {
                Some(group)
            }
            _ => None,
        })
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.children.iter_mut().find_map(|node| match node {
            Node::Field(field) if field.name() == name => Some(field),
            _ => None,
        })
    }

    /// Unmounts every child bound to `name` and forgets its errors.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.children.len();
        self.children.retain(|node| node.name() != Some(name));
        self.errors.remove(name);
        before - self.children.len()
    }

    pub fn get_schema(&self, object: &BoundObject) -> FormResult<Arc<Schema>> {
        self.schema
            .clone()
            .or_else(|| object.schema().cloned())
            .ok_or_else(|| FormError::UndefinedSchema {
                object: object.kind_name().to_owned(),
            })
    }

    pub fn get_prefix(&self, inherited: Option<&str>) -> String {
        prefix(
            inherited,
            self.name.as_deref(),
            self.prefix.as_deref(),
            self.index,
        )
    }

    pub fn mutate_error(&mut self, name: &str, error: Option<GroupError>, index: Option<usize>) {
        if self.errors.mutate(name, error, index) {
            log::trace!("group error of \"{name}\" changed");
        }
    }

    /// Renders the group as the outermost one of a form bound to `object`.
    pub(crate) fn render_bound(
        &mut self,
        form: &FormContext,
        object: BoundObject,
    ) -> FormResult<Vec<Element>> {
        let object = self.object.clone().unwrap_or(object);
        let root = form.root.clone();
        let bound = object.clone();
        let mutate: Mutate = Arc::new(move |name: &str, value: Value, index: Option<usize>| {
            root.on_form_change(mutate_object(&bound, name, value, index)?)
        });
        let context = GroupContext {
            schema: self.get_schema(&object)?,
            prefix: self.get_prefix(None),
            object,
            mutate,
        };
        self.render_children(form, &context)
    }

    fn render_nested(
        &mut self,
        form: &FormContext,
        parent: &GroupContext,
    ) -> FormResult<Vec<Element>> {
        let object = self.bound_object(parent)?;
        let bound = object.clone();
        let mutate: Mutate = match self.name.clone() {
            Some(name) => {
                let parent = parent.mutate.clone();
                let index = self.index;
                Arc::new(move |field: &str, value: Value, field_index: Option<usize>| {
                    let next = mutate_object(&bound, field, value, field_index)?;
                    parent(&name, Value::Object(next), index)
                })
            }
            None => {
                let root = form.root.clone();
                Arc::new(move |field: &str, value: Value, field_index: Option<usize>| {
                    root.on_form_change(mutate_object(&bound, field, value, field_index)?)
                })
            }
        };
        let context = GroupContext {
            schema: self.get_schema(&object)?,
            prefix: self.get_prefix(Some(&parent.prefix)),
            object,
            mutate,
        };
        self.render_children(form, &context)
    }

    fn bound_object(&self, parent: &GroupContext) -> FormResult<BoundObject> {
        if let Some(object) = &self.object {
            return Ok(object.clone());
        }
        let Some(name) = &self.name else {
            return Ok(parent.object.clone());
        };
        let value = parent.object.get(name);
        let value = match self.index {
            Some(index) => value
                .and_then(Value::as_list)
                .and_then(|items| items.get(index)),
            None => value,
        };
        value
            .and_then(Value::as_object)
            .cloned()
            .ok_or_else(|| FormError::InvalidPath {
                name: name.clone(),
                index: self.index,
            })
    }

    fn render_children(
        &mut self,
        form: &FormContext,
        context: &GroupContext,
    ) -> FormResult<Vec<Element>> {
        let mut elements = Vec::with_capacity(self.children.len());
        for node in &mut self.children {
            match node {
                Node::Field(field) => {
                    let (element, error) = field.render(form, context)?;
                    let name = field.name().to_owned();
                    let index = field.field_index();
                    if self.errors.mutate(&name, error.map(GroupError::Message), index) {
                        log::trace!("group error of \"{name}\" changed");
                    }
                    elements.push(element);
                }
                Node::Group(group) => {
                    elements.extend(group.render_nested(form, context)?);
                    if let Some(name) = group.name.clone() {
                        let nested = GroupError::Nested(group.errors.clone());
                        self.errors.mutate(&name, Some(nested), group.index);
                    }
                }
            }
        }
        Ok(elements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleared_error_leaves_no_key() {
        let mut errors = ErrorMap::new();
        assert!(errors.mutate("name", Some(GroupError::Message("taken".into())), None));
        assert!(!errors.mutate("name", Some(GroupError::Message("taken".into())), None));
        assert!(errors.mutate("name", None, None));

        assert!(!errors.contains_key("name"));
        assert!(!errors.mutate("name", Some(GroupError::Message(String::new())), None));
        assert!(errors.is_empty());
    }

    #[test]
    fn indexed_errors_drop_key_with_last_entry() {
        let mut errors = ErrorMap::new();
        errors.mutate("todos", Some(GroupError::Message("a".into())), Some(0));
        errors.mutate("todos", Some(GroupError::Message("b".into())), Some(2));
        assert_eq!(
            errors.get("todos").and_then(|error| error.at(2)),
            Some(&GroupError::Message("b".into()))
        );

        errors.mutate("todos", None, Some(0));
        assert!(errors.contains_key("todos"));
        errors.mutate("todos", None, Some(2));
        assert!(!errors.contains_key("todos"));
    }

    #[test]
    fn empty_nested_map_counts_as_no_error() {
        let mut errors = ErrorMap::new();
        errors.mutate("address", Some(GroupError::Nested(ErrorMap::new())), None);
        assert!(errors.is_empty());
    }

    #[test]
    fn error_map_serializes_as_nested_json() {
        let mut address = ErrorMap::new();
        address.mutate("street", Some(GroupError::Message("required".into())), None);
        let mut errors = ErrorMap::new();
        errors.mutate("address", Some(GroupError::Nested(address)), None);
        errors.mutate("tags", Some(GroupError::Message("too long".into())), Some(1));

        assert_eq!(
            serde_json::to_value(&errors).expect("serialize"),
            serde_json::json!({
                "address": { "street": "required" },
                "tags": { "1": "too long" }
            })
        );
    }

    #[test]
    fn schema_comes_from_group_then_object() {
        let object = BoundObject::named("Todo");
        let error = FieldGroup::new().get_schema(&object).expect_err("no schema");
        assert_eq!(
            error,
            FormError::UndefinedSchema {
                object: "Todo".into()
            }
        );

        let declared = object.clone().with_schema(Schema::new());
        assert!(FieldGroup::new().get_schema(&declared).is_ok());
        assert!(FieldGroup::new().schema(Schema::new()).get_schema(&object).is_ok());
    }

    #[test]
    fn prefix_includes_name_and_index() {
        let group = FieldGroup::nested("todos").index(3);
        assert_eq!(group.get_prefix(Some("user")), "user[todos][3]");
        assert_eq!(FieldGroup::new().prefix("profile").get_prefix(None), "profile");
    }
}
