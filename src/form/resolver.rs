use futures::FutureExt;
use futures::future::BoxFuture;

use super::root::{FormError, FormResult};
use super::scheduler::{FieldId, Scheduler};
use crate::schema::{DeferredSpec, Settlement, ValidatorFn, ValidatorSpec, Verdict};
use crate::value::BoundObject;

/// A validator either answered immediately or left a pending settlement.
/// A pending settlement of `None` means it was cancelled.
pub(crate) enum Resolution {
    Ready(Option<String>),
    Pending(BoxFuture<'static, Option<Settlement>>),
}

pub(crate) struct ValidatorResolver<'a> {
    scheduler: &'a Scheduler,
    field: FieldId,
    object: &'a BoundObject,
    name: &'a str,
}

impl<'a> ValidatorResolver<'a> {
    pub(crate) fn new(
        scheduler: &'a Scheduler,
        field: FieldId,
        object: &'a BoundObject,
        name: &'a str,
    ) -> Self {
        Self {
            scheduler,
            field,
            object,
            name,
        }
    }

    pub(crate) fn resolve(&self, spec: Option<&ValidatorSpec>) -> FormResult<Resolution> {
        match spec {
            None => Ok(Resolution::Ready(None)),
            Some(ValidatorSpec::Literal(key)) => self.resolve_literal(key),
            Some(ValidatorSpec::Function(validator)) => self.resolve_function(validator),
            Some(ValidatorSpec::Async(validation)) => Ok(Resolution::Pending(
                validation.settlement().map(Some).boxed(),
            )),
            Some(ValidatorSpec::Deferred(spec)) => self.resolve_deferred(spec),
        }
    }

    fn resolve_literal(&self, key: &str) -> FormResult<Resolution> {
        if let Some(method) = self.object.method(key) {
            return self.resolve_function(method);
        }
        let error = self
            .object
            .get(key)
            .filter(|value| value.is_truthy())
            .map(ToString::to_string);
        Ok(Resolution::Ready(error))
    }

    fn resolve_function(&self, validator: &ValidatorFn) -> FormResult<Resolution> {
        let verdict = validator(self.object, self.name).map_err(|error| FormError::Validator {
            field: self.name.to_owned(),
            message: error.to_string(),
        })?;
        self.resolve_verdict(verdict)
    }

    fn resolve_verdict(&self, verdict: Verdict) -> FormResult<Resolution> {
        match verdict {
            Verdict::Valid => Ok(Resolution::Ready(None)),
            Verdict::Invalid(message) => Ok(Resolution::Ready(
                Some(message).filter(|message| !message.is_empty()),
            )),
            Verdict::Pending(future) => Ok(Resolution::Pending(
                future
                    .map(|result| Some(Settlement::from_result(result)))
                    .boxed(),
            )),
            Verdict::Deferred(spec) => self.resolve_deferred(&spec),
        }
    }

    fn resolve_deferred(&self, spec: &DeferredSpec) -> FormResult<Resolution> {
        let Some(callback) = spec.callback.as_ref() else {
            return Err(FormError::Configuration(format!(
                "undefined `callback` in deferred validator of \"{}\"",
                self.name
            )));
        };
        let debounce = spec.debounce.filter(|duration| !duration.is_zero());
        match (debounce, spec.memoize) {
            (Some(duration), false) => {
                self.scheduler
                    .debounce(self.field, callback, duration, self.object, self.name)
            }
            (None, true) => self
                .scheduler
                .memoize(self.field, callback, self.object, self.name),
            (Some(_), true) => Err(FormError::Configuration(format!(
                "deferred validator of \"{}\" sets both `debounce` and `memoize`",
                self.name
            ))),
            (None, false) => Err(FormError::Configuration(format!(
                "deferred validator of \"{}\" must set `debounce` or `memoize`",
                self.name
            ))),
        }
    }
}
