use std::{
    cell::Cell,
    ptr::{self, NonNull},
    rc::Rc,
};

use crate::{
    ABI_VERSION, AbiError, AbiExports, AbiImports, AbiVersion, EXPORTS_NAME, Erasable, Erased,
    ErasedBox, Heap, HostValue, Interface as _, InterfacePtr, Method, TypeTag, erasable, get,
    get_as, interface,
    lifecycle::{self, HandleState},
    query, query_as, register, wrap, wrap_value,
};

// === Fixtures === //

struct IncrementableTable {
    increment: unsafe fn(NonNull<Erased>),
    value: unsafe fn(NonNull<Erased>) -> u32,
}

#[allow(dead_code)]
struct DecrementableTable {
    decrement: unsafe fn(NonNull<Erased>),
}

struct CallableTable {
    call: Method,
}

interface! {
    Incrementable(IncrementableTable) = TypeTag::new(0x1, 0x1000);
    Decrementable(DecrementableTable) = TypeTag::new(0x2, 0x1000);
    Callable(CallableTable) = TypeTag::new(0x3, 0x1000);
}

const UNRELATED: TypeTag = TypeTag::new(0xdead, 0xbeef);

#[derive(Default)]
struct Drops(Rc<Cell<u32>>);

impl Drops {
    fn count(&self) -> u32 {
        self.0.get()
    }

    fn tracker(&self) -> DropTracker {
        DropTracker(self.0.clone())
    }
}

struct DropTracker(Rc<Cell<u32>>);

impl Drop for DropTracker {
    fn drop(&mut self) {
        self.0.set(self.0.get() + 1);
    }
}

struct Counter {
    count: Cell<u32>,
    _tracker: DropTracker,
}

impl Counter {
    fn new(drops: &Drops) -> Self {
        Self {
            count: Cell::new(0),
            _tracker: drops.tracker(),
        }
    }
}

unsafe fn counter_increment(this: NonNull<Erased>) {
    let counter = unsafe { ErasedBox::<Counter>::value_ref(this) };
    counter.count.set(counter.count.get() + 1);
}

unsafe fn counter_value(this: NonNull<Erased>) -> u32 {
    unsafe { ErasedBox::<Counter>::value_ref(this) }.count.get()
}

unsafe fn counter_call(this: NonNull<Erased>, args: &[HostValue], _w: &mut Heap) -> HostValue {
    let counter = unsafe { ErasedBox::<Counter>::value_ref(this) };
    let delta = args.iter().filter_map(HostValue::as_int).sum::<i64>();

    HostValue::Int(i64::from(counter.count.get()) + delta)
}

static COUNTER_INCREMENTABLE: IncrementableTable = IncrementableTable {
    increment: counter_increment,
    value: counter_value,
};

static COUNTER_CALLABLE: CallableTable = CallableTable { call: counter_call };

impl Erasable for Counter {
    const CONCRETE_TAG: TypeTag = TypeTag::new(0x1, 0x2000);

    fn query(&self, tag: TypeTag) -> Option<InterfacePtr> {
        Incrementable::answer(tag, &COUNTER_INCREMENTABLE)
            .or_else(|| Callable::answer(tag, &COUNTER_CALLABLE))
    }
}

/// Another concrete type, implementing nothing.
struct Opaque;

impl Erasable for Opaque {
    const CONCRETE_TAG: TypeTag = TypeTag::new(0x2, 0x2000);

    fn query(&self, _tag: TypeTag) -> Option<InterfacePtr> {
        None
    }
}

/// Keeps another handle alive for as long as it lives.
struct Holder {
    _inner: HostValue,
    _tracker: DropTracker,
}

impl Erasable for Holder {
    const CONCRETE_TAG: TypeTag = TypeTag::new(0x3, 0x2000);

    fn query(&self, _tag: TypeTag) -> Option<InterfacePtr> {
        None
    }
}

erasable!(Counter, Opaque, Holder);

// === Tests === //

#[test]
fn get_round_trips_the_wrapped_pointer() {
    let drops = Drops::default();
    let mut w = Heap::new();
    let w = &mut w;

    let object = ErasedBox::into_raw(Counter::new(&drops));
    let handle = unsafe { wrap(object, w) };

    assert_eq!(get(&handle, w), Some(object));
    assert_eq!(get(&handle.clone(), w), Some(object));
    assert_eq!(lifecycle::handle_state(&handle, w), Some(HandleState::Live));
    assert_eq!(drops.count(), 0);
}

#[test]
fn query_finds_only_implemented_interfaces() {
    let drops = Drops::default();
    let mut w = Heap::new();
    let w = &mut w;

    let handle = wrap_value(Counter::new(&drops), w);

    let first = query(&handle, Incrementable::TAG, w);
    assert!(first.is_some());
    assert_eq!(query(&handle, Incrementable::TAG, w), first);
    assert_eq!(
        first.map(InterfacePtr::as_ptr),
        Some(ptr::from_ref(&COUNTER_INCREMENTABLE).cast())
    );

    assert!(query(&handle, Decrementable::TAG, w).is_none());
    assert!(query(&handle, UNRELATED, w).is_none());
    assert!(query(&handle, Counter::CONCRETE_TAG, w).is_none());

    let opaque = wrap_value(Opaque, w);
    assert!(query(&opaque, Incrementable::TAG, w).is_none());
}

#[test]
fn typed_views_dispatch_to_the_concrete_type() {
    let drops = Drops::default();
    let mut w = Heap::new();
    let w = &mut w;

    let handle = wrap_value(Counter::new(&drops), w);
    let view = query_as::<Incrementable>(&handle, w).unwrap();

    unsafe {
        (view.increment)(view.object());
        (view.increment)(view.object());
    }

    assert_eq!(unsafe { (view.value)(view.object()) }, 2);
    assert_eq!(get_as::<Counter>(&handle, w).unwrap().count.get(), 2);
    assert!(get_as::<Opaque>(&handle, w).is_none());
    assert!(query_as::<Decrementable>(&handle, w).is_none());
}

#[test]
fn methods_receive_host_arguments_untouched() {
    let drops = Drops::default();
    let mut w = Heap::new();
    let w = &mut w;

    let handle = wrap_value(Counter::new(&drops), w);
    let view = query_as::<Callable>(&handle, w).unwrap();

    let args = [HostValue::Int(3), HostValue::from("ignored"), HostValue::Int(4)];
    let result = unsafe { (view.call)(view.object(), &args, w) };

    assert_eq!(result.as_int(), Some(7));
}

#[test]
fn instances_of_one_type_share_a_vtable() {
    let drops = Drops::default();
    let mut w = Heap::new();
    let w = &mut w;

    let a = wrap_value(Counter::new(&drops), w);
    let b = wrap_value(Counter::new(&drops), w);

    let a_obj = get(&a, w).unwrap();
    let b_obj = get(&b, w).unwrap();

    assert_ne!(a_obj, b_obj);
    assert_eq!(unsafe { a_obj.as_ref() }.base, unsafe { b_obj.as_ref() }.base);
    assert_eq!(
        unsafe { Erased::concrete_tag(a_obj) },
        Some(Counter::CONCRETE_TAG)
    );

    let opaque = wrap_value(Opaque, w);
    let opaque_obj = get(&opaque, w).unwrap();

    assert_ne!(unsafe { opaque_obj.as_ref() }.base, unsafe { a_obj.as_ref() }.base);
}

#[test]
fn finalized_handles_yield_nothing() {
    let drops = Drops::default();
    let mut w = Heap::new();
    let w = &mut w;

    let handle = wrap_value(Counter::new(&drops), w);

    assert!(lifecycle::finalize(&handle, w));
    assert_eq!(drops.count(), 1);

    assert_eq!(get(&handle, w), None);
    assert_eq!(query(&handle, Incrementable::TAG, w), None);
    assert_eq!(query(&handle, UNRELATED, w), None);
    assert!(get_as::<Counter>(&handle, w).is_none());
    assert_eq!(
        lifecycle::handle_state(&handle, w),
        Some(HandleState::Finalized)
    );

    // Finalizing again is a no-op, and so is collecting the handle later.
    assert!(!lifecycle::finalize(&handle, w));

    drop(handle);
    assert_eq!(w.collect(), 1);
    assert_eq!(drops.count(), 1);
}

#[test]
fn finalizing_a_cleared_cell_is_a_no_op() {
    let drops = Drops::default();
    let mut w = Heap::new();
    let w = &mut w;

    let handle = wrap_value(Counter::new(&drops), w);
    let external = handle.as_external().unwrap();

    lifecycle::finalize_cell(w.external_mut(external).unwrap());
    lifecycle::finalize_cell(w.external_mut(external).unwrap());

    assert_eq!(drops.count(), 1);
    assert!(w.external(external).unwrap().addr().is_null());
}

#[test]
fn collection_destroys_unreachable_objects_once() {
    let drops = Drops::default();
    let mut w = Heap::new();
    let w = &mut w;

    let handle = wrap_value(Counter::new(&drops), w);
    let alias = handle.clone();

    drop(handle);
    assert_eq!(w.collect(), 0);
    assert_eq!(drops.count(), 0);
    assert!(get(&alias, w).is_some());

    drop(alias);
    assert_eq!(w.collect(), 1);
    assert_eq!(w.collect(), 0);
    assert_eq!(drops.count(), 1);
    assert_eq!(w.live_externals(), 0);
}

#[test]
fn destructors_may_release_further_handles() {
    let drops = Drops::default();
    let mut w = Heap::new();
    let w = &mut w;

    let inner = wrap_value(Counter::new(&drops), w);
    let outer = wrap_value(
        Holder {
            _inner: inner,
            _tracker: drops.tracker(),
        },
        w,
    );

    drop(outer);

    assert_eq!(w.collect(), 2);
    assert_eq!(drops.count(), 2);
}

#[test]
fn dropping_the_heap_destroys_live_objects() {
    let drops = Drops::default();
    let mut w = Heap::new();

    let handle = wrap_value(Counter::new(&drops), &mut w);
    let finalized = wrap_value(Counter::new(&drops), &mut w);
    lifecycle::finalize(&finalized, &mut w);

    assert_eq!(drops.count(), 1);

    drop(w);

    assert_eq!(drops.count(), 2);
    drop(handle);
    drop(finalized);
    assert_eq!(drops.count(), 2);
}

#[test]
fn foreign_values_yield_nothing() {
    let drops = Drops::default();
    let mut w = Heap::new();
    let w = &mut w;

    let values = [
        HostValue::Nil,
        HostValue::Int(1),
        HostValue::Real(1.5),
        HostValue::from("text"),
    ];

    // Before anything has been wrapped, there isn't even a marker to compare against.
    for value in &values {
        assert_eq!(get(value, w), None);
    }

    let ours = wrap_value(Counter::new(&drops), w);
    let object = get(&ours, w).unwrap();

    let other_marker = w.intern("someone_else::ptr");
    let foreign = HostValue::External(w.make_external(object.as_ptr().cast(), Some(other_marker)));
    let unmarked = HostValue::External(w.make_external(object.as_ptr().cast(), None));
    let symbol = HostValue::Symbol(other_marker);

    for value in values.iter().chain([&foreign, &unmarked, &symbol]) {
        assert_eq!(get(value, w), None);
        assert_eq!(query(value, Incrementable::TAG, w), None);
        assert_eq!(lifecycle::handle_state(value, w), None);
        assert!(!lifecycle::finalize(value, w));
    }

    assert_eq!(drops.count(), 0);
    assert_eq!(get(&ours, w), Some(object));
}

#[test]
fn handles_from_another_heap_yield_nothing() {
    let drops = Drops::default();
    let mut a = Heap::new();
    let mut b = Heap::new();

    let from_a = wrap_value(Counter::new(&drops), &mut a);
    let in_b = wrap_value(Counter::new(&drops), &mut b);
    let object_in_b = get(&in_b, &b).unwrap();

    assert_eq!(get(&from_a, &b), None);
    assert_eq!(query(&from_a, Incrementable::TAG, &b), None);
    assert!(get_as::<Counter>(&from_a, &b).is_none());
    assert_eq!(lifecycle::handle_state(&from_a, &b), None);
    assert!(!lifecycle::finalize(&from_a, &mut b));

    assert_eq!(drops.count(), 0);
    assert_eq!(get(&in_b, &b), Some(object_in_b));
    assert!(get(&from_a, &a).is_some());

    // Releasing the foreign handle only ever concerns the heap which made it.
    drop(from_a);
    assert_eq!(b.collect(), 0);
    assert_eq!(a.collect(), 1);
    assert_eq!(drops.count(), 1);
    assert_eq!(get(&in_b, &b), Some(object_in_b));
}

#[test]
fn exports_start_with_their_version() {
    assert_eq!(std::mem::offset_of!(AbiExports, version), 0);
}

#[test]
fn objects_without_a_vtable_are_never_dispatched() {
    let mut w = Heap::new();
    let w = &mut w;

    let object = NonNull::from(Box::leak(Box::new(Erased { base: ptr::null() })));
    let handle = unsafe { wrap(object, w) };

    assert_eq!(get(&handle, w), Some(object));
    assert_eq!(query(&handle, Incrementable::TAG, w), None);
    assert!(get_as::<Counter>(&handle, w).is_none());

    // No destructor to run, so finalization only clears the handle and the memory is still ours.
    assert!(lifecycle::finalize(&handle, w));
    assert_eq!(get(&handle, w), None);

    drop(unsafe { Box::from_raw(object.as_ptr()) });
}

#[test]
fn register_publishes_the_exports() {
    let drops = Drops::default();
    let mut w = Heap::new();
    let w = &mut w;

    assert_eq!(
        AbiImports::load("producer", w).unwrap_err(),
        AbiError::NotRegistered {
            package: "producer".to_owned()
        }
    );

    register("producer", w);
    register("producer", w);

    let abi = AbiImports::load("producer", w).unwrap();
    assert_eq!(abi.version(), ABI_VERSION);

    let object = ErasedBox::into_raw(Counter::new(&drops));
    let handle = unsafe { abi.wrap(object, w) };

    assert_eq!(abi.get(&handle, w), Some(object));
    assert_eq!(get(&handle, w), Some(object));
    assert!(abi.query(&handle, Incrementable::TAG, w).is_some());
    assert!(abi.query(&handle, Decrementable::TAG, w).is_none());

    let view = abi.query_as::<Incrementable>(&handle, w).unwrap();
    unsafe { (view.increment)(view.object()) };
    assert_eq!(unsafe { (view.value)(view.object()) }, 1);

    assert!(abi.get(&HostValue::Int(0), w).is_none());
}

#[test]
fn load_rejects_incompatible_versions() {
    static FUTURE: AbiExports = AbiExports {
        version: AbiVersion::new(1, 0),
        wrap,
        get,
        query,
    };

    let mut w = Heap::new();
    let w = &mut w;

    w.register_callable("future", EXPORTS_NAME, &FUTURE);
    register("current", w);

    assert_eq!(
        AbiImports::load("future", w).unwrap_err(),
        AbiError::IncompatibleVersion {
            found: AbiVersion::new(1, 0),
            required: ABI_VERSION,
        }
    );

    let newer = AbiVersion::new(ABI_VERSION.major, ABI_VERSION.minor + 1);
    assert!(matches!(
        AbiImports::load_with("current", newer, w),
        Err(AbiError::IncompatibleVersion { .. })
    ));

    let older = AbiVersion::new(ABI_VERSION.major, 0);
    assert!(AbiImports::load_with("current", older, w).is_ok());
}

#[test]
fn version_compatibility() {
    let v = AbiVersion::new(2, 3);

    assert!(v.supports(AbiVersion::new(2, 0)));
    assert!(v.supports(AbiVersion::new(2, 3)));
    assert!(!v.supports(AbiVersion::new(2, 4)));
    assert!(!v.supports(AbiVersion::new(1, 0)));
    assert!(!v.supports(AbiVersion::new(3, 0)));
    assert_eq!(v.to_string(), "2.3");
}
