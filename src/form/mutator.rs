use std::cmp::Ordering;
use std::sync::Arc;

use super::root::{FormError, FormResult};
use crate::value::{BoundObject, Value};

/// Returns a copy of `root` with `name` (or `name[index]`) set to `value`.
///
/// Neither `root` nor any list inside it is modified; untouched branches are
/// shared with the new object. An index equal to the list length appends.
pub fn mutate_object(
    root: &BoundObject,
    name: &str,
    value: Value,
    index: Option<usize>,
) -> FormResult<BoundObject> {
    let Some(index) = index else {
        return Ok(root.with_value(name, value));
    };
    let invalid_path = || FormError::InvalidPath {
        name: name.to_owned(),
        index: Some(index),
    };
    let Some(Value::List(items)) = root.get(name) else {
        return Err(invalid_path());
    };

    let mut items = Vec::clone(items);
    match index.cmp(&items.len()) {
        Ordering::Less => items[index] = value,
        Ordering::Equal => items.push(value),
        Ordering::Greater => return Err(invalid_path()),
    }
    Ok(root.with_value(name, Value::List(Arc::new(items))))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn todos() -> BoundObject {
        BoundObject::new().with("owner", "ann").with(
            "todos",
            Value::list([Value::from("write"), Value::from("review")]),
        )
    }

    #[test]
    fn replaces_plain_property() {
        let root = todos();
        let next = mutate_object(&root, "owner", "bob".into(), None).expect("mutate");

        assert_eq!(next.get("owner"), Some(&Value::from("bob")));
        assert_eq!(root.get("owner"), Some(&Value::from("ann")));
        assert!(!next.ptr_eq(&root));
    }

    #[test]
    fn same_value_is_deep_equal_but_distinct() {
        let root = todos();
        let owner = root.get("owner").cloned().unwrap_or_default();
        let next = mutate_object(&root, "owner", owner, None).expect("mutate");

        assert_eq!(next, root);
        assert!(!next.ptr_eq(&root));
    }

    #[test]
    fn replaces_list_item_without_touching_original_list() {
        let root = todos();
        let next = mutate_object(&root, "todos", "ship".into(), Some(1)).expect("mutate");

        assert_eq!(
            next.get("todos"),
            Some(&Value::list([Value::from("write"), Value::from("ship")]))
        );
        assert_eq!(
            root.get("todos"),
            Some(&Value::list([Value::from("write"), Value::from("review")]))
        );
        let (Some(Value::List(before)), Some(Value::List(after))) =
            (root.get("todos"), next.get("todos"))
        else {
            panic!("todos must stay a list");
        };
        assert!(!Arc::ptr_eq(before, after));
        assert_eq!(next.get("owner"), root.get("owner"));
    }

    #[test]
    fn index_at_len_appends() {
        let next = mutate_object(&todos(), "todos", "deploy".into(), Some(2)).expect("mutate");
        assert_eq!(
            next.get("todos").and_then(Value::as_list).map(<[Value]>::len),
            Some(3)
        );
    }

    #[test]
    fn index_requires_list() {
        let error = mutate_object(&todos(), "owner", "x".into(), Some(0)).expect_err("not a list");
        assert_eq!(
            error,
            FormError::InvalidPath {
                name: "owner".into(),
                index: Some(0)
            }
        );
        assert!(mutate_object(&todos(), "todos", "x".into(), Some(5)).is_err());
        assert!(mutate_object(&todos(), "missing", "x".into(), Some(0)).is_err());
    }
}
