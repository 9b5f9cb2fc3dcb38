use std::{cell::Cell, ptr::NonNull};

use crossdyn::{
    AbiImports, Erasable, Erased, ErasedBox, Heap, HostValue, Interface as _, InterfacePtr,
    Method, TypeTag, W, erasable, interface, lifecycle,
};

// === Shared interface === //

pub struct CounterTable {
    pub increment: Method,
    pub get: Method,
}

interface! {
    pub AbstractCounter(CounterTable) = TypeTag::new(0x5ca1_ab1e, 0xc0de);
}

// === Producer === //

mod producer {
    use super::*;

    #[derive(Debug)]
    pub struct MyNode {
        pub counter: Cell<i64>,
    }

    impl Drop for MyNode {
        fn drop(&mut self) {
            println!("dropping MyNode with counter = {}", self.counter.get());
        }
    }

    unsafe fn increment(this: NonNull<Erased>, args: &[HostValue], _w: W) -> HostValue {
        let node = unsafe { ErasedBox::<MyNode>::value_ref(this) };
        let by = args.first().and_then(HostValue::as_int).unwrap_or(1);

        node.counter.set(node.counter.get() + by);
        HostValue::Nil
    }

    unsafe fn get(this: NonNull<Erased>, _args: &[HostValue], _w: W) -> HostValue {
        HostValue::Int(unsafe { ErasedBox::<MyNode>::value_ref(this) }.counter.get())
    }

    static MY_NODE_COUNTER: CounterTable = CounterTable { increment, get };

    impl Erasable for MyNode {
        const CONCRETE_TAG: TypeTag = TypeTag::new(0x0001, 0xc0de);

        fn query(&self, tag: TypeTag) -> Option<InterfacePtr> {
            AbstractCounter::answer(tag, &MY_NODE_COUNTER)
        }
    }

    erasable!(MyNode);

    pub fn init(w: W) {
        crossdyn::register("producer", w);
    }

    pub fn new_node(w: W) -> HostValue {
        crossdyn::wrap_value(
            MyNode {
                counter: Cell::new(0),
            },
            w,
        )
    }
}

// === Consumer === //

mod consumer {
    use super::*;

    pub fn bump(abi: AbiImports, value: &HostValue, w: W) -> Option<i64> {
        let counter = abi.query_as::<AbstractCounter>(value, w)?;

        unsafe {
            (counter.increment)(counter.object(), &[], w);
            (counter.increment)(counter.object(), &[HostValue::Int(10)], w);

            (counter.get)(counter.object(), &[], w).as_int()
        }
    }
}

fn main() {
    let mut w = Heap::new();
    let w = &mut w;

    producer::init(w);

    let abi = match AbiImports::load("producer", w) {
        Ok(abi) => abi,
        Err(err) => {
            eprintln!("{err}");
            return;
        }
    };

    let node = producer::new_node(w);

    dbg!(consumer::bump(abi, &node, w));
    dbg!(consumer::bump(abi, &HostValue::from("not a counter"), w));
    dbg!(lifecycle::handle_state(&node, w));

    let alias = node.clone();
    drop(node);
    dbg!(w.collect());

    dbg!(consumer::bump(abi, &alias, w));
    drop(alias);
    dbg!(w.collect());
}
