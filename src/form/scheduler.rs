use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{AbortHandle, BoxFuture, Shared, abortable};

use super::resolver::Resolution;
use super::root::{FormResult, read_lock, write_lock};
use super::timer::Timer;
use crate::schema::{Settlement, ValidatorCallback};
use crate::value::{BoundObject, Value};

static FIELD_ID_ALLOCATOR: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a mounted field, used to key scheduling state.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FieldId(pub u64);

impl FieldId {
    pub fn next() -> Self {
        Self(FIELD_ID_ALLOCATOR.fetch_add(1, Ordering::SeqCst))
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct CallbackId(u64);

impl CallbackId {
    pub fn of(callback: &ValidatorCallback) -> Self {
        Self(callback.identity())
    }
}

struct DebounceSlot {
    generation: u64,
    handle: AbortHandle,
}

struct MemoSlot {
    argument: Value,
    result: Shared<BoxFuture<'static, Settlement>>,
}

#[derive(Default)]
struct FieldSlots {
    generation: u64,
    debounces: BTreeMap<CallbackId, DebounceSlot>,
    memos: BTreeMap<CallbackId, MemoSlot>,
}

impl FieldSlots {
    fn is_empty(&self) -> bool {
        self.debounces.is_empty() && self.memos.is_empty()
    }
}

/// Debounce timers and memoize caches, keyed by `(field, callback)`.
#[derive(Clone)]
pub struct Scheduler {
    timer: Arc<dyn Timer>,
    slots: Arc<RwLock<BTreeMap<FieldId, FieldSlots>>>,
}

impl Scheduler {
    pub fn new(timer: Arc<dyn Timer>) -> Self {
        Self {
            timer,
            slots: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Restarts the quiet period for `(field, callback)`. The returned
    /// resolution settles with the callback's result once the period elapses,
    /// or with `None` if a later call or [`Scheduler::clear`] cancelled it.
    pub(crate) fn debounce(
        &self,
        field: FieldId,
        callback: &ValidatorCallback,
        duration: Duration,
        object: &BoundObject,
        name: &str,
    ) -> FormResult<Resolution> {
        let key = CallbackId::of(callback);
        let (delay, handle) = abortable(self.timer.delay(duration));
        let generation = {
            let mut slots = write_lock(&self.slots, "scheduling debounced validation")?;
            let slot = slots.entry(field).or_default();
            slot.generation += 1;
            let generation = slot.generation;
            if let Some(previous) = slot
                .debounces
                .insert(key, DebounceSlot { generation, handle })
            {
                log::trace!("restarting debounce window of {key:?} for {field:?}");
                previous.handle.abort();
            }
            generation
        };

        let slots = self.slots.clone();
        let callback = callback.clone();
        let object = object.clone();
        let name = name.to_owned();
        Ok(Resolution::Pending(
            async move {
                delay.await.ok()?;
                release_debounce(&slots, field, key, generation);
                let result = callback.call(&object, &name).await;
                Some(Settlement::from_result(result))
            }
            .boxed(),
        ))
    }

    /// Returns the cached result when the field's current value matches the
    /// last argument seen for `(field, callback)`; otherwise runs the callback
    /// and caches its shared result.
    pub(crate) fn memoize(
        &self,
        field: FieldId,
        callback: &ValidatorCallback,
        object: &BoundObject,
        name: &str,
    ) -> FormResult<Resolution> {
        let key = CallbackId::of(callback);
        let argument = object.get(name).cloned().unwrap_or_default();
        let cached = read_lock(&self.slots, "reading memoized validation")?
            .get(&field)
            .and_then(|slot| slot.memos.get(&key))
            .filter(|memo| memo.argument == argument)
            .map(|memo| memo.result.clone());
        if let Some(result) = cached {
            if let Some(settlement) = result.peek() {
                return Ok(Resolution::Ready(settlement.clone().into_error()));
            }
            return Ok(Resolution::Pending(result.map(Some).boxed()));
        }

        let result = callback
            .call(object, name)
            .map(Settlement::from_result)
            .boxed()
            .shared();
        write_lock(&self.slots, "caching memoized validation")?
            .entry(field)
            .or_default()
            .memos
            .insert(
                key,
                MemoSlot {
                    argument,
                    result: result.clone(),
                },
            );
        Ok(Resolution::Pending(result.map(Some).boxed()))
    }

    /// Cancels pending timers and drops cached results owned by `field`.
    pub fn clear(&self, field: FieldId) {
        let removed = match self.slots.write() {
            Ok(mut slots) => slots.remove(&field),
            Err(poisoned) => poisoned.into_inner().remove(&field),
        };
        if let Some(slot) = removed {
            for debounce in slot.debounces.values() {
                debounce.handle.abort();
            }
        }
    }

    pub fn is_tracking(&self, field: FieldId) -> bool {
        match self.slots.read() {
            Ok(slots) => slots.contains_key(&field),
            Err(poisoned) => poisoned.into_inner().contains_key(&field),
        }
    }
}

fn release_debounce(
    slots: &RwLock<BTreeMap<FieldId, FieldSlots>>,
    field: FieldId,
    key: CallbackId,
    generation: u64,
) {
    let mut slots = match slots.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    let Some(slot) = slots.get_mut(&field) else {
        return;
    };
    if slot
        .debounces
        .get(&key)
        .is_some_and(|debounce| debounce.generation == generation)
    {
        slot.debounces.remove(&key);
    }
    if slot.is_empty() {
        slots.remove(&field);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::ManualTimer;
    use futures::executor::block_on;
    use std::sync::atomic::AtomicUsize;

    fn counting_callback(calls: Arc<AtomicUsize>) -> ValidatorCallback {
        ValidatorCallback::new(move |object: &BoundObject, name: &str| {
            calls.fetch_add(1, Ordering::SeqCst);
            let taken = object.get(name).and_then(|value| value.as_str()) == Some("taken");
            async move { Ok(taken.then(|| "already taken".to_owned())) }
        })
    }

    fn settle(resolution: Resolution) -> Option<Option<String>> {
        match resolution {
            Resolution::Ready(error) => Some(error),
            Resolution::Pending(pending) => block_on(pending).map(Settlement::into_error),
        }
    }

    #[test]
    fn memoize_reuses_result_for_same_argument() {
        let scheduler = Scheduler::new(Arc::new(ManualTimer::new()));
        let calls = Arc::new(AtomicUsize::new(0));
        let callback = counting_callback(calls.clone());
        let field = FieldId::next();
        let object = BoundObject::new().with("login", "taken");

        let first = scheduler
            .memoize(field, &callback, &object, "login")
            .expect("first call");
        assert_eq!(settle(first), Some(Some("already taken".into())));

        let second = scheduler
            .memoize(field, &callback, &object, "login")
            .expect("second call");
        assert!(matches!(&second, Resolution::Ready(Some(message)) if message == "already taken"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let changed = object.with_value("login", "free".into());
        let third = scheduler
            .memoize(field, &callback, &changed, "login")
            .expect("third call");
        assert_eq!(settle(third), Some(None));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn rebuilt_callback_never_sees_previous_results() {
        let scheduler = Scheduler::new(Arc::new(ManualTimer::new()));
        let field = FieldId::next();
        let object = BoundObject::new().with("login", "root");

        let first = ValidatorCallback::new(|_, _| async { Ok(Some("from first".to_owned())) });
        let first_key = CallbackId::of(&first);
        let resolution = scheduler
            .memoize(field, &first, &object, "login")
            .expect("memoize first");
        assert_eq!(settle(resolution), Some(Some("from first".into())));
        drop(first);

        let second = ValidatorCallback::new(|_, _| async { Ok(Some("from second".to_owned())) });
        assert_ne!(CallbackId::of(&second), first_key);
        let resolution = scheduler
            .memoize(field, &second, &object, "login")
            .expect("memoize second");
        assert_eq!(settle(resolution), Some(Some("from second".into())));
    }

    #[test]
    fn memoize_is_scoped_per_field() {
        let scheduler = Scheduler::new(Arc::new(ManualTimer::new()));
        let calls = Arc::new(AtomicUsize::new(0));
        let callback = counting_callback(calls.clone());
        let object = BoundObject::new().with("login", "taken");

        for field in [FieldId::next(), FieldId::next()] {
            let resolution = scheduler
                .memoize(field, &callback, &object, "login")
                .expect("memoize");
            settle(resolution);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn clear_drops_memoized_results() {
        let scheduler = Scheduler::new(Arc::new(ManualTimer::new()));
        let calls = Arc::new(AtomicUsize::new(0));
        let callback = counting_callback(calls.clone());
        let field = FieldId::next();
        let object = BoundObject::new().with("login", "free");

        settle(scheduler.memoize(field, &callback, &object, "login").expect("memoize"));
        assert!(scheduler.is_tracking(field));

        scheduler.clear(field);
        assert!(!scheduler.is_tracking(field));
        scheduler.clear(field);

        settle(scheduler.memoize(field, &callback, &object, "login").expect("memoize"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn debounce_only_runs_latest_call() {
        let timer = ManualTimer::new();
        let scheduler = Scheduler::new(Arc::new(timer.clone()));
        let calls = Arc::new(AtomicUsize::new(0));
        let callback = counting_callback(calls.clone());
        let field = FieldId::next();
        let object = BoundObject::new().with("login", "taken");

        let first = scheduler
            .debounce(field, &callback, Duration::from_millis(500), &object, "login")
            .expect("first debounce");
        timer.advance_millis(100);
        let second = scheduler
            .debounce(field, &callback, Duration::from_millis(500), &object, "login")
            .expect("second debounce");

        assert_eq!(settle(first), None);
        timer.advance_millis(500);
        assert_eq!(settle(second), Some(Some("already taken".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_tracking(field));
    }

    #[test]
    fn cleared_debounce_never_runs() {
        let timer = ManualTimer::new();
        let scheduler = Scheduler::new(Arc::new(timer.clone()));
        let calls = Arc::new(AtomicUsize::new(0));
        let callback = counting_callback(calls.clone());
        let field = FieldId::next();
        let object = BoundObject::new().with("login", "taken");

        let pending = scheduler
            .debounce(field, &callback, Duration::from_millis(500), &object, "login")
            .expect("debounce");
        scheduler.clear(field);
        timer.advance_millis(1_000);

        assert_eq!(settle(pending), None);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
