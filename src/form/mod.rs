mod connect;
mod context;
mod field;
mod group;
mod mutator;
mod resolver;
mod root;
mod runtime;
mod scheduler;
mod timer;


pub use connect::{Element, FieldComponent, connect, connected_kinds, disconnect};
pub use context::{FieldContext, FormContext, FormRoot, GroupContext, Mutate};
pub use field::{
    AsyncError, Field, FieldChangeListener, FieldFocusListener, FieldHandle, FieldProps,
    NativeHandle, ValidationTicket,
};
pub use formfor_derive::FormObject;
pub use group::{ErrorMap, FieldGroup, GroupError, Node};
pub use mutator::mutate_object;
pub use root::{
    ChangeListener, Form, FormError, FormId, FormOptions, FormResult, SubmitState,
    ValidateListener,
};
pub use runtime::{RenderSignal, Runtime};
pub use scheduler::{CallbackId, FieldId, Scheduler};
pub use timer::{ManualTimer, SystemTimer, Timer};

pub use crate::value::FormObject;
