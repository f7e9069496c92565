use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use super::root::{FormOptions, FormResult};
use super::runtime::Runtime;
use crate::schema::Schema;
use crate::value::{BoundObject, Value};

/// Receiver of everything a form tree reports upward.
pub trait FormRoot: Send + Sync {
    /// A field edit produced `object` as the new root object.
    fn on_form_change(&self, object: BoundObject) -> FormResult<()>;

    /// The field at `path` now reports `error`; `None` clears it.
    fn on_form_validate(&self, path: &str, error: Option<&str>) -> FormResult<()>;
}

/// Write callback a group hands to its children: `(name, value, index)`.
pub type Mutate = Arc<dyn Fn(&str, Value, Option<usize>) -> FormResult<()> + Send + Sync>;

/// Form-wide values shared by every node of one render pass.
#[derive(Clone)]
pub struct FormContext {
    pub root: Arc<dyn FormRoot>,
    pub runtime: Runtime,
    pub options: FormOptions,
    pub incoming: Arc<BTreeMap<String, String>>,
    pub submitted: bool,
}

impl FormContext {
    pub fn new(root: Arc<dyn FormRoot>, runtime: Runtime) -> Self {
        Self {
            root,
            runtime,
            options: FormOptions::default(),
            incoming: Arc::new(BTreeMap::new()),
            submitted: false,
        }
    }

    pub fn options(mut self, options: FormOptions) -> Self {
        self.options = options;
        self
    }

    pub fn incoming(mut self, incoming: Arc<BTreeMap<String, String>>) -> Self {
        self.incoming = incoming;
        self
    }

    pub fn submitted(mut self, submitted: bool) -> Self {
        self.submitted = submitted;
        self
    }

    pub fn incoming_error(&self, path: &str) -> Option<&str> {
        self.incoming
            .get(path)
            .map(String::as_str)
            .filter(|message| !message.is_empty())
    }
}

/// What a group passes to the fields and groups it contains.
#[derive(Clone)]
pub struct GroupContext {
    pub object: BoundObject,
    pub schema: Arc<Schema>,
    pub prefix: String,
    pub mutate: Mutate,
}

impl GroupContext {
    pub fn mutate(&self, name: &str, value: Value, index: Option<usize>) -> FormResult<()> {
        (self.mutate)(name, value, index)
    }
}

impl Debug for GroupContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupContext")
            .field("object", &self.object)
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

/// What a field passes to the component it renders.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FieldContext {
    pub name: String,
}
