use std::any::Any;
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock, RwLock};

use super::field::FieldProps;

/// Whatever a connected component renders. The form never inspects it.
pub type Element = Box<dyn Any + Send>;

/// Presentational component responsible for one field kind.
pub trait FieldComponent: Send + Sync {
    fn render(&self, props: &FieldProps) -> Element;
}

impl<F> FieldComponent for F
where
    F: Fn(&FieldProps) -> Element + Send + Sync,
{
    fn render(&self, props: &FieldProps) -> Element {
        self(props)
    }
}

// Populated at startup and read on every render.
static CONNECTIONS: LazyLock<RwLock<BTreeMap<String, Arc<dyn FieldComponent>>>> =
    LazyLock::new(|| RwLock::new(BTreeMap::new()));

/// Registers `component` for fields of `kind`. A later registration for the
/// same kind replaces the earlier one.
pub fn connect(kind: impl Into<String>, component: impl FieldComponent + 'static) {
    let kind = kind.into();
    let mut connections = match CONNECTIONS.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if connections
        .insert(kind.clone(), Arc::new(component))
        .is_some()
    {
        log::debug!("replacing \"{kind}\" field connection");
    }
}

pub fn disconnect(kind: &str) -> bool {
    match CONNECTIONS.write() {
        Ok(mut guard) => guard.remove(kind).is_some(),
        Err(poisoned) => poisoned.into_inner().remove(kind).is_some(),
    }
}

pub fn connected_kinds() -> Vec<String> {
    match CONNECTIONS.read() {
        Ok(guard) => guard.keys().cloned().collect(),
        Err(poisoned) => poisoned.into_inner().keys().cloned().collect(),
    }
}

pub(crate) fn lookup(kind: &str) -> Option<Arc<dyn FieldComponent>> {
    match CONNECTIONS.read() {
        Ok(guard) => guard.get(kind).cloned(),
        Err(poisoned) => poisoned.into_inner().get(kind).cloned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(tag: &'static str) -> impl Fn(&FieldProps) -> Element + Send + Sync {
        move |_: &FieldProps| Box::new(tag) as Element
    }

    #[test]
    fn connections_are_replaced_and_removed() {
        connect("connect-test-last", tag("first"));
        connect("connect-test-last", tag("second"));

        assert!(connected_kinds().contains(&"connect-test-last".to_owned()));
        assert!(lookup("connect-test-last").is_some());
        assert!(disconnect("connect-test-last"));
        assert!(lookup("connect-test-last").is_none());
        assert!(!disconnect("connect-test-last"));
    }
}
