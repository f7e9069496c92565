use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, RwLock};

use futures::FutureExt;

use super::connect::{Element, lookup};
use super::context::{FieldContext, FormContext, FormRoot, GroupContext, Mutate};
use super::resolver::{Resolution, ValidatorResolver};
use super::root::{FormError, FormResult, read_lock, write_lock};
use super::runtime::RenderSignal;
use super::scheduler::{FieldId, Scheduler};
use crate::path::prefix;
use crate::schema::{Schema, SchemaProperty};
use crate::value::{BoundObject, Value};

/// Host-side input a field can read values and validity from.
///
/// Hosts without native validation keep the defaults.
pub trait NativeHandle: Send + Sync {
    fn value(&self) -> Value;

    fn is_checkbox(&self) -> bool {
        false
    }

    fn checked(&self) -> bool {
        false
    }

    fn validation_message(&self) -> Option<String> {
        None
    }

    fn set_custom_validity(&self, _message: &str) {}
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ValidationTicket(pub u64);

/// Settled async validation waiting to be shown by the next render.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AsyncError {
    Success,
    Message(String),
}

/// Object and schema a validator result belongs to. A render with the same
/// pair reuses the result instead of asking the validator again.
#[derive(Clone)]
struct ValidationInput {
    object: BoundObject,
    schema: Arc<Schema>,
}

impl ValidationInput {
    fn of(group: &GroupContext) -> Self {
        Self {
            object: group.object.clone(),
            schema: group.schema.clone(),
        }
    }

    fn matches(&self, group: &GroupContext) -> bool {
        self.object.ptr_eq(&group.object) && Arc::ptr_eq(&self.schema, &group.schema)
    }
}

struct InFlight {
    ticket: ValidationTicket,
    input: ValidationInput,
}

struct Settled {
    input: ValidationInput,
    error: Option<String>,
}

#[derive(Default)]
pub(crate) struct FieldState {
    touched: bool,
    async_error: Option<AsyncError>,
    in_flight: Option<InFlight>,
    settled: Option<Settled>,
    last_ticket: u64,
    native: Option<Arc<dyn NativeHandle>>,
}

impl FieldState {
    fn issue_ticket(&mut self, input: ValidationInput) -> ValidationTicket {
        self.last_ticket += 1;
        let ticket = ValidationTicket(self.last_ticket);
        self.in_flight = Some(InFlight { ticket, input });
        ticket
    }
}

pub type FieldFocusListener = Arc<dyn Fn(&str) + Send + Sync>;
pub type FieldChangeListener = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// Where the field reported to on its last render. Used on teardown.
struct Binding {
    root: Arc<dyn FormRoot>,
    scheduler: Scheduler,
    path: String,
}

/// A single input bound to one property of the enclosing group's object.
pub struct Field {
    id: FieldId,
    name: String,
    kind: Option<String>,
    error: Option<String>,
    index: Option<usize>,
    props: BTreeMap<String, Value>,
    on_focus: Option<FieldFocusListener>,
    on_change: Option<FieldChangeListener>,
    state: Arc<RwLock<FieldState>>,
    binding: Option<Binding>,
}

impl Field {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: FieldId::next(),
            name: name.into(),
            kind: None,
            error: None,
            index: None,
            props: BTreeMap::new(),
            on_focus: None,
            on_change: None,
            state: Arc::new(RwLock::new(FieldState::default())),
            binding: None,
        }
    }

    /// Overrides the kind declared by the schema.
    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// An explicit error; it wins over incoming, native and schema errors.
    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Binds the field to `object[name][index]` instead of `object[name]`.
    pub fn index(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }

    pub fn prop(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.props.insert(key.into(), value.into());
        self
    }

    pub fn on_focus(mut self, listener: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_focus = Some(Arc::new(listener));
        self
    }

    pub fn on_change(mut self, listener: impl Fn(&str, &Value) + Send + Sync + 'static) -> Self {
        self.on_change = Some(Arc::new(listener));
        self
    }

    pub fn id(&self) -> FieldId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_index(&self) -> Option<usize> {
        self.index
    }

    pub fn set_error(&mut self, error: Option<String>) {
        self.error = error;
    }

    pub fn is_touched(&self) -> bool {
        match self.state.read() {
            Ok(state) => state.touched,
            Err(poisoned) => poisoned.into_inner().touched,
        }
    }

    pub fn is_validating(&self) -> bool {
        match self.state.read() {
            Ok(state) => state.in_flight.is_some(),
            Err(poisoned) => poisoned.into_inner().in_flight.is_some(),
        }
    }

    /// Runs the validation pass and renders the connected component.
    /// Returns the element together with the error the field now shows.
    pub(crate) fn render(
        &mut self,
        form: &FormContext,
        group: &GroupContext,
    ) -> FormResult<(Element, Option<String>)> {
        let path = prefix(Some(&group.prefix), Some(&self.name), None, self.index);
        let property = group.schema.get(&self.name);
        if property.is_none() && self.kind.is_none() {
            log::warn!(
                "undefined property \"{}\" in schema for \"{}\" instance",
                self.name,
                group.object.kind_name()
            );
        }
        let kind = self
            .kind
            .clone()
            .or_else(|| property.and_then(|property| property.kind.clone()))
            .unwrap_or_else(|| "text".to_owned());
        let component = lookup(&kind).ok_or_else(|| FormError::MissingConnection {
            kind: kind.clone(),
            field: self.name.clone(),
            object: group.object.kind_name().to_owned(),
        })?;

        self.rebind(form, &path);
        let error = self.validate(form, group, property, &path)?;

        let state = read_lock(&self.state, "reading field state")?;
        let mut attrs = property
            .map(|property| property.hints.clone())
            .unwrap_or_default();
        attrs.extend(self.props.clone());
        let props = FieldProps {
            name: path,
            kind,
            value: self.current_value(group),
            error: error.clone(),
            validating: state.in_flight.is_some(),
            touched: state.touched || form.submitted,
            attrs,
            context: FieldContext {
                name: self.name.clone(),
            },
            handle: FieldHandle {
                id: self.id,
                name: self.name.clone(),
                index: self.index,
                state: self.state.clone(),
                mutate: group.mutate.clone(),
                render: form.runtime.render_signal().clone(),
                on_focus: self.on_focus.clone(),
                on_change: self.on_change.clone(),
            },
        };
        drop(state);

        Ok((component.render(&props), error))
    }

    fn validate(
        &self,
        form: &FormContext,
        group: &GroupContext,
        property: Option<&SchemaProperty>,
        path: &str,
    ) -> FormResult<Option<String>> {
        let (async_error, native, in_flight) = {
            let mut state = write_lock(&self.state, "starting field validation")?;
            (
                state.async_error.take(),
                state.native.clone(),
                state.in_flight.take(),
            )
        };
        if let Some(native) = &native {
            native.set_custom_validity("");
        }

        let mut pending = None;
        let error = match async_error {
            Some(AsyncError::Success) => None,
            Some(AsyncError::Message(message)) => Some(message),
            None => {
                if let Some(error) = self.error.clone().filter(|error| !error.is_empty()) {
                    Some(error)
                } else if let Some(error) = form.incoming_error(path) {
                    Some(error.to_owned())
                } else if let Some(message) = native
                    .as_ref()
                    .and_then(|native| native.validation_message())
                    .filter(|message| !message.is_empty())
                {
                    Some(message)
                } else if let Some(error) = self.settled_error(group)? {
                    error
                } else if let Some(flight) = in_flight.filter(|flight| flight.input.matches(group)) {
                    write_lock(&self.state, "keeping pending validation")?.in_flight = Some(flight);
                    Some(form.options.validating_message.to_owned())
                } else {
                    write_lock(&self.state, "resetting settled validation")?.settled = None;
                    let resolver = ValidatorResolver::new(
                        form.runtime.scheduler(),
                        self.id,
                        &group.object,
                        &self.name,
                    );
                    match resolver.resolve(property.and_then(|property| property.error.as_ref()))? {
                        Resolution::Ready(error) => error,
                        Resolution::Pending(settlement) => {
                            pending = Some(settlement);
                            Some(form.options.validating_message.to_owned())
                        }
                    }
                }
            }
        };

        if let Some(settlement) = pending {
            let ticket = write_lock(&self.state, "issuing validation ticket")?
                .issue_ticket(ValidationInput::of(group));
            let state = self.state.clone();
            let render = form.runtime.render_signal().clone();
            let path = path.to_owned();
            form.runtime.tasks().spawn(
                async move {
                    let Some(settlement) = settlement.await else {
                        return;
                    };
                    let mut state = match state.write() {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    let Some(flight) = state
                        .in_flight
                        .take_if(|flight| flight.ticket == ticket)
                    else {
                        log::trace!("discarding superseded validation of \"{path}\"");
                        return;
                    };
                    let error = settlement.into_error();
                    state.async_error = Some(match &error {
                        Some(message) => AsyncError::Message(message.clone()),
                        None => AsyncError::Success,
                    });
                    state.settled = Some(Settled {
                        input: flight.input,
                        error,
                    });
                    drop(state);
                    render.request();
                }
                .boxed(),
            )?;
        }

        if let (Some(native), Some(error)) = (&native, &error) {
            native.set_custom_validity(error);
        }
        form.root.on_form_validate(path, error.as_deref())?;
        Ok(error)
    }

    /// The last async result, if it was produced for the object and schema
    /// this render validates.
    fn settled_error(&self, group: &GroupContext) -> FormResult<Option<Option<String>>> {
        let state = read_lock(&self.state, "reading settled validation")?;
        Ok(state
            .settled
            .as_ref()
            .filter(|settled| settled.input.matches(group))
            .map(|settled| settled.error.clone()))
    }

    /// Keeps the teardown target current. A field whose path moved clears
    /// the error it reported under the old one.
    fn rebind(&mut self, form: &FormContext, path: &str) {
        if let Some(previous) = self.binding.as_ref().filter(|binding| binding.path != path) {
            if let Err(error) = previous.root.on_form_validate(&previous.path, None) {
                log::warn!("failed to clear \"{}\" after it moved: {error}", previous.path);
            }
        }
        self.binding = Some(Binding {
            root: form.root.clone(),
            scheduler: form.runtime.scheduler().clone(),
            path: path.to_owned(),
        });
    }

    fn current_value(&self, group: &GroupContext) -> Value {
        let value = group.object.get(&self.name);
        let value = match self.index {
            Some(index) => value
                .and_then(Value::as_list)
                .and_then(|items| items.get(index)),
            None => value,
        };
        match value {
            None | Some(Value::Null) => Value::from(""),
            Some(value) => value.clone(),
        }
    }

    /// Clears the field's reported error and releases its debounce timers,
    /// memoized results and in-flight validation. Runs on drop as well.
    pub fn unmount(&mut self) {
        if let Some(binding) = self.binding.take() {
            if let Err(error) = binding.root.on_form_validate(&binding.path, None) {
                log::warn!("failed to clear \"{}\" on unmount: {error}", binding.path);
            }
            binding.scheduler.clear(self.id);
        }
        let mut state = match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.in_flight = None;
        state.settled = None;
        state.async_error = None;
    }
}

impl Drop for Field {
    fn drop(&mut self) {
        self.unmount();
    }
}

impl Debug for Field {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Field")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

/// Callbacks a rendered component uses to talk back to its field.
#[derive(Clone)]
pub struct FieldHandle {
    id: FieldId,
    name: String,
    index: Option<usize>,
    state: Arc<RwLock<FieldState>>,
    mutate: Mutate,
    render: RenderSignal,
    on_focus: Option<FieldFocusListener>,
    on_change: Option<FieldChangeListener>,
}

impl FieldHandle {
    pub fn id(&self) -> FieldId {
        self.id
    }

    /// Captures the native input and asks for a render so its validity is
    /// taken into account.
    pub fn mount(&self, native: Arc<dyn NativeHandle>) -> FormResult<()> {
        write_lock(&self.state, "mounting field")?.native = Some(native);
        self.render.request();
        Ok(())
    }

    pub fn focus(&self, native: Option<Arc<dyn NativeHandle>>) -> FormResult<()> {
        let was_touched = {
            let mut state = write_lock(&self.state, "focusing field")?;
            if native.is_some() {
                state.native = native;
            }
            std::mem::replace(&mut state.touched, true)
        };
        if !was_touched {
            self.render.request();
        }
        if let Some(listener) = &self.on_focus {
            listener(&self.name);
        }
        Ok(())
    }

    /// Writes `value`, or the native input's current value when `None`,
    /// through the enclosing groups up to the form.
    pub fn change(&self, native: Option<Arc<dyn NativeHandle>>, value: Option<Value>) -> FormResult<()> {
        let value = {
            let mut state = write_lock(&self.state, "changing field")?;
            if native.is_some() {
                state.native = native;
            }
            match (value, &state.native) {
                (Some(value), _) => value,
                (None, Some(native)) if native.is_checkbox() => Value::Bool(native.checked()),
                (None, Some(native)) => native.value(),
                (None, None) => return Err(FormError::DetachedField(self.name.clone())),
            }
        };

        (self.mutate)(&self.name, value.clone(), self.index)?;
        write_lock(&self.state, "touching field")?.touched = true;
        if let Some(listener) = &self.on_change {
            listener(&self.name, &value);
        }
        Ok(())
    }
}

/// Everything a connected component receives for one field.
#[derive(Clone)]
pub struct FieldProps {
    /// Full path of the field, e.g. `todos[0][title]`.
    pub name: String,
    pub kind: String,
    pub value: Value,
    pub error: Option<String>,
    pub validating: bool,
    pub touched: bool,
    /// Schema hints overlaid by the field's own props.
    pub attrs: BTreeMap<String, Value>,
    pub context: FieldContext,
    pub handle: FieldHandle,
}

impl Debug for FieldProps {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldProps")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("value", &self.value)
            .field("error", &self.error)
            .field("validating", &self.validating)
            .field("touched", &self.touched)
            .field("attrs", &self.attrs)
            .finish_non_exhaustive()
    }
}
