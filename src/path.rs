use std::fmt::Write;

/// Builds the bracketed path of a field or group, e.g. `user[todos][0][title]`.
///
/// Empty segments are skipped. The first remaining segment is written bare and
/// every later one is wrapped in brackets; an index is appended as a subscript
/// of whatever precedes it.
pub fn prefix(
    parent: Option<&str>,
    name: Option<&str>,
    local: Option<&str>,
    index: Option<usize>,
) -> String {
    let mut path = String::new();
    for segment in [parent, name, local]
        .into_iter()
        .flatten()
        .filter(|segment| !segment.is_empty())
    {
        if path.is_empty() {
            path.push_str(segment);
        } else {
            path.push('[');
            path.push_str(segment);
            path.push(']');
        }
    }
    if let Some(index) = index {
        let _ = write!(path, "[{index}]");
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_name_has_no_brackets() {
        assert_eq!(prefix(None, Some("name"), None, None), "name");
        assert_eq!(prefix(Some(""), Some("name"), Some(""), None), "name");
    }

    #[test]
    fn nested_segments_are_bracketed() {
        assert_eq!(
            prefix(Some("user"), Some("address"), None, None),
            "user[address]"
        );
        assert_eq!(
            prefix(Some("user[address]"), Some("street"), None, None),
            "user[address][street]"
        );
    }

    #[test]
    fn index_subscripts_previous_segment() {
        assert_eq!(prefix(None, Some("todos"), None, Some(0)), "todos[0]");
        assert_eq!(
            prefix(Some("user"), Some("todos"), None, Some(3)),
            "user[todos][3]"
        );
        assert_eq!(
            prefix(Some("todos[0]"), Some("title"), None, None),
            "todos[0][title]"
        );
    }

    #[test]
    fn local_prefix_follows_name() {
        assert_eq!(prefix(None, None, Some("user"), None), "user");
        assert_eq!(
            prefix(Some("form"), Some("owner"), Some("person"), Some(1)),
            "form[owner][person][1]"
        );
    }
}
