use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::connect::Element;
use super::context::{FormContext, FormRoot};
use super::group::{ErrorMap, FieldGroup, Node};
use super::runtime::{RenderSignal, Runtime};
use crate::schema::Schema;
use crate::value::BoundObject;

static FORM_ID_ALLOCATOR: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FormId(pub u64);

impl FormId {
    pub fn next() -> Self {
        Self(FORM_ID_ALLOCATOR.fetch_add(1, Ordering::SeqCst))
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SubmitState {
    Idle,
    Validating,
    Submitting,
    Succeeded,
    Failed,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FormOptions {
    /// Error shown by a field while its validator has not settled.
    pub validating_message: &'static str,
    /// When false the form only reports edits and keeps its object until
    /// [`Form::set_object`] is called.
    pub commit_changes: bool,
}

impl Default for FormOptions {
    fn default() -> Self {
        Self {
            validating_message: "Validating",
            commit_changes: true,
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum FormError {
    StatePoisoned(&'static str),
    UndefinedSchema {
        object: String,
    },
    MissingConnection {
        kind: String,
        field: String,
        object: String,
    },
    Configuration(String),
    InvalidPath {
        name: String,
        index: Option<usize>,
    },
    DetachedField(String),
    Validator {
        field: String,
        message: String,
    },
    TypeMismatch {
        field: String,
        expected: &'static str,
    },
    InvalidStateTransition {
        from: SubmitState,
        to: SubmitState,
    },
    AlreadySubmitting,
}

impl Display for FormError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FormError::StatePoisoned(context) => {
                write!(f, "form state lock poisoned while {context}")
            }
            FormError::UndefinedSchema { object } => {
                write!(f, "undefined schema for \"{object}\" instance")
            }
            FormError::MissingConnection {
                kind,
                field,
                object,
            } => write!(
                f,
                "missing \"{kind}\" connection requested for property \"{field}\" in \"{object}\" instance"
            ),
            FormError::Configuration(message) => {
                write!(f, "invalid validator configuration: {message}")
            }
            FormError::InvalidPath {
                name,
                index: Some(index),
            } => write!(f, "cannot write \"{name}[{index}]\": not a list position"),
            FormError::InvalidPath { name, index: None } => {
                write!(f, "cannot bind \"{name}\": not an object")
            }
            FormError::DetachedField(name) => {
                write!(f, "field \"{name}\" changed without a value or mounted input")
            }
            FormError::Validator { field, message } => {
                write!(f, "validator of \"{field}\" failed: {message}")
            }
            FormError::TypeMismatch { field, expected } => {
                write!(f, "property \"{field}\" is not a {expected}")
            }
            FormError::InvalidStateTransition { from, to } => {
                write!(f, "invalid submit state transition: {from:?} -> {to:?}")
            }
            FormError::AlreadySubmitting => f.write_str("form submit is already in progress"),
        }
    }
}

impl std::error::Error for FormError {}

pub type FormResult<T> = Result<T, FormError>;

pub type ChangeListener = Arc<dyn Fn(&BoundObject) + Send + Sync>;
pub type ValidateListener = Arc<dyn Fn(&str, Option<&str>) + Send + Sync>;

struct FormState {
    object: BoundObject,
    errors: BTreeMap<String, String>,
    incoming: Arc<BTreeMap<String, String>>,
    submitted: bool,
    submit_state: SubmitState,
    submit_count: u32,
}

/// The [`FormRoot`] a [`Form`] hands to its tree.
struct FormDispatch {
    options: FormOptions,
    state: Arc<RwLock<FormState>>,
    render: RenderSignal,
    on_change: Option<ChangeListener>,
    on_validate: Option<ValidateListener>,
}

impl FormRoot for FormDispatch {
    fn on_form_change(&self, object: BoundObject) -> FormResult<()> {
        if self.options.commit_changes {
            write_lock(&self.state, "committing form change")?.object = object.clone();
            self.render.request();
        }
        log::debug!("form object changed to {object:?}");
        if let Some(listener) = &self.on_change {
            listener(&object);
        }
        Ok(())
    }

    fn on_form_validate(&self, path: &str, error: Option<&str>) -> FormResult<()> {
        let changed = {
            let mut state = write_lock(&self.state, "recording field validation")?;
            match error.filter(|message| !message.is_empty()) {
                Some(message) => {
                    state.errors.insert(path.to_owned(), message.to_owned())
                        != Some(message.to_owned())
                }
                None => state.errors.remove(path).is_some(),
            }
        };
        if changed {
            log::debug!("validation of \"{path}\" is now {error:?}");
        }
        if let Some(listener) = &self.on_validate {
            listener(path, error);
        }
        Ok(())
    }
}

/// Root of a form tree: owns the bound object and the aggregate error map,
/// and renders its top-level [`FieldGroup`].
pub struct Form {
    id: FormId,
    options: FormOptions,
    state: Arc<RwLock<FormState>>,
    runtime: Runtime,
    root: FieldGroup,
    on_change: Option<ChangeListener>,
    on_validate: Option<ValidateListener>,
}

impl Form {
    pub fn new(object: BoundObject) -> Self {
        Self::with_runtime(object, Runtime::system())
    }

    pub fn with_runtime(object: BoundObject, runtime: Runtime) -> Self {
        Self {
            id: FormId::next(),
            options: FormOptions::default(),
            state: Arc::new(RwLock::new(FormState {
                object,
                errors: BTreeMap::new(),
                incoming: Arc::new(BTreeMap::new()),
                submitted: false,
                submit_state: SubmitState::Idle,
                submit_count: 0,
            })),
            runtime,
            root: FieldGroup::new(),
            on_change: None,
            on_validate: None,
        }
    }

    pub fn options(mut self, options: FormOptions) -> Self {
        self.options = options;
        self
    }

    pub fn schema(mut self, schema: Schema) -> Self {
        self.root = self.root.schema(schema);
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.root = self.root.prefix(prefix);
        self
    }

    pub fn child(mut self, node: impl Into<Node>) -> Self {
        self.root.push(node);
        self
    }

    pub fn on_change(mut self, listener: impl Fn(&BoundObject) + Send + Sync + 'static) -> Self {
        self.on_change = Some(Arc::new(listener));
        self
    }

    pub fn on_validate(
        mut self,
        listener: impl Fn(&str, Option<&str>) + Send + Sync + 'static,
    ) -> Self {
        self.on_validate = Some(Arc::new(listener));
        self
    }

    pub fn id(&self) -> FormId {
        self.id
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn root(&self) -> &FieldGroup {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut FieldGroup {
        &mut self.root
    }

    /// Unmounts every top-level child bound to `name`.
    pub fn remove(&mut self, name: &str) -> usize {
        self.root.remove(name)
    }

    pub fn context(&self) -> FormResult<FormContext> {
        let state = read_lock(&self.state, "building form context")?;
        let dispatch = FormDispatch {
            options: self.options,
            state: self.state.clone(),
            render: self.runtime.render_signal().clone(),
            on_change: self.on_change.clone(),
            on_validate: self.on_validate.clone(),
        };
        Ok(FormContext::new(Arc::new(dispatch), self.runtime.clone())
            .options(self.options)
            .incoming(state.incoming.clone())
            .submitted(state.submitted))
    }

    /// Renders the whole tree against the current object.
    pub fn render(&mut self) -> FormResult<Vec<Element>> {
        let context = self.context()?;
        let object = self.object()?;
        self.root.render_bound(&context, object)
    }

    /// One host loop turn: advances queued validations and renders again if
    /// anything asked for it.
    pub fn tick(&mut self) -> FormResult<Option<Vec<Element>>> {
        self.runtime.run_until_stalled()?;
        if self.runtime.take_render_request() {
            return self.render().map(Some);
        }
        Ok(None)
    }

    pub fn object(&self) -> FormResult<BoundObject> {
        Ok(read_lock(&self.state, "reading form object")?.object.clone())
    }

    pub fn set_object(&self, object: BoundObject) -> FormResult<()> {
        write_lock(&self.state, "replacing form object")?.object = object;
        self.runtime.render_signal().request();
        Ok(())
    }

    /// Errors reported from outside the tree (e.g. by a server), keyed by
    /// prefixed field path. They rank below a field's explicit error.
    pub fn set_incoming_errors(&self, errors: BTreeMap<String, String>) -> FormResult<()> {
        write_lock(&self.state, "replacing incoming errors")?.incoming = Arc::new(errors);
        self.runtime.render_signal().request();
        Ok(())
    }

    /// Current error of every field that has one, keyed by prefixed path.
    pub fn errors(&self) -> FormResult<BTreeMap<String, String>> {
        Ok(read_lock(&self.state, "reading form errors")?.errors.clone())
    }

    pub fn error(&self, path: &str) -> FormResult<Option<String>> {
        Ok(read_lock(&self.state, "reading field error")?
            .errors
            .get(path)
            .cloned())
    }

    pub fn is_valid(&self) -> FormResult<bool> {
        Ok(read_lock(&self.state, "checking form validity")?
            .errors
            .is_empty())
    }

    /// Errors aggregated by the top-level group, nested by object structure.
    pub fn group_errors(&self) -> &ErrorMap {
        self.root.errors()
    }

    pub fn submit_state(&self) -> FormResult<SubmitState> {
        Ok(read_lock(&self.state, "reading submit state")?.submit_state)
    }

    pub fn submit_count(&self) -> FormResult<u32> {
        Ok(read_lock(&self.state, "reading submit count")?.submit_count)
    }

    /// Marks every field as touched, renders, and calls `f` with the object
    /// when no field reports an error. A field still validating counts as an
    /// error. Returns whether `f` ran.
    pub fn submit(&mut self, f: impl FnOnce(&BoundObject) -> FormResult<()>) -> FormResult<bool> {
        {
            let mut state = write_lock(&self.state, "preparing submit")?;
            if state.submit_state == SubmitState::Submitting {
                return Err(FormError::AlreadySubmitting);
            }
            transition_submit_state(&mut state, SubmitState::Validating)?;
            state.submitted = true;
            state.submit_count = state.submit_count.saturating_add(1);
        }

        self.render()?;
        if !self.is_valid()? {
            let mut state = write_lock(&self.state, "handling submit validation failure")?;
            transition_submit_state(&mut state, SubmitState::Failed)?;
            return Ok(false);
        }

        let object = {
            let mut state = write_lock(&self.state, "moving submit state to submitting")?;
            transition_submit_state(&mut state, SubmitState::Submitting)?;
            state.object.clone()
        };
        let submit_result = f(&object);

        let mut state = write_lock(&self.state, "completing submit")?;
        if submit_result.is_ok() {
            transition_submit_state(&mut state, SubmitState::Succeeded)?;
        } else {
            transition_submit_state(&mut state, SubmitState::Failed)?;
        }
        submit_result.map(|()| true)
    }

    /// Forgets the submitted flag so untouched fields hide their errors again.
    pub fn reset_submit(&self) -> FormResult<()> {
        let mut state = write_lock(&self.state, "resetting submit")?;
        transition_submit_state(&mut state, SubmitState::Idle)?;
        state.submitted = false;
        self.runtime.render_signal().request();
        Ok(())
    }
}

fn transition_submit_state(state: &mut FormState, next: SubmitState) -> FormResult<()> {
    let current = state.submit_state;
    if current == next {
        return Ok(());
    }

    let allowed = matches!(
        (current, next),
        (SubmitState::Idle, SubmitState::Validating)
            | (SubmitState::Validating, SubmitState::Submitting)
            | (SubmitState::Validating, SubmitState::Failed)
            | (SubmitState::Submitting, SubmitState::Succeeded)
            | (SubmitState::Submitting, SubmitState::Failed)
            | (SubmitState::Succeeded, SubmitState::Validating)
            | (SubmitState::Failed, SubmitState::Validating)
            | (_, SubmitState::Idle)
    );
    if !allowed {
        return Err(FormError::InvalidStateTransition {
            from: current,
            to: next,
        });
    }
    state.submit_state = next;
    Ok(())
}

pub(super) fn read_lock<'a, T>(
    lock: &'a RwLock<T>,
    context: &'static str,
) -> FormResult<RwLockReadGuard<'a, T>> {
    lock.read().map_err(|_| FormError::StatePoisoned(context))
}

pub(super) fn write_lock<'a, T>(
    lock: &'a RwLock<T>,
    context: &'static str,
) -> FormResult<RwLockWriteGuard<'a, T>> {
    lock.write().map_err(|_| FormError::StatePoisoned(context))
}
