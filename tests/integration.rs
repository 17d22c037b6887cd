//! Integration tests for the source-chain engine: end-to-end pipelines,
//! chain lifecycle, cleanup and cancellation.

use std::cell::RefCell;
use std::rc::Rc;

use pushweld::prelude::*;

fn collect(source: &Source) -> Rc<RefCell<Vec<Value>>> {
    let items = Rc::new(RefCell::new(Vec::new()));
    let sink = items.clone();
    source.each(move |v| {
        sink.borrow_mut().push(v.clone());
        Ok(())
    });
    items
}

fn ints(values: &[i64]) -> Vec<Value> {
    values.iter().map(|&v| Value::Int(v)).collect()
}

#[test]
fn test_map_prefix_pipeline() {
    let items = Source::from(vec![1i64, 2, 3, 4, 5])
        .map(|v| {
            let n = v.as_f64() as i64;
            Value::Int(n * n)
        })
        .prefix("value: ")
        .get()
        .unwrap();

    assert_eq!(
        items,
        vec![
            Value::from("value: 1"),
            Value::from("value: 4"),
            Value::from("value: 9"),
            Value::from("value: 16"),
            Value::from("value: 25"),
        ]
    );
}

#[test]
fn test_distinct_pipeline_with_undef_and_text() {
    let root = Source::new("root");
    let list = root.distinct().as_list();

    root.emit_many(vec![
        1.into(),
        2.into(),
        3.into(),
        Value::Undef,
        2.into(),
        3.into(),
        Value::Undef,
        "2".into(),
        2.into(),
        4.into(),
        1.into(),
        5.into(),
    ])
    .unwrap();
    root.finish().unwrap();

    assert_eq!(
        list.value(),
        Some(Value::List(vec![
            Value::Int(1),
            Value::Int(2),
            Value::Int(3),
            Value::Undef,
            Value::Int(4),
            Value::Int(5),
        ]))
    );
}

#[test]
fn test_by_line_discards_residue() {
    let root = Source::new("root");
    let list = root.by_line(Some("\n")).as_list();

    root.emit("ab\ncd\nef").unwrap();
    root.finish().unwrap();

    assert_eq!(
        list.value(),
        Some(Value::List(vec![Value::from("ab"), Value::from("cd")]))
    );
}

#[test]
fn test_combine_latest_sums_after_saturation() {
    let a = Source::new("a");
    let b = Source::new("b");
    let combined = a.combine_latest_with(&[b.clone()], |latest| {
        Value::Int(latest[0].as_f64() as i64 + latest[1].as_f64() as i64)
    });
    let items = collect(&combined);

    a.emit(1).unwrap();
    a.emit(2).unwrap();
    b.emit(10).unwrap();
    a.emit(3).unwrap();
    b.emit(20).unwrap();

    assert_eq!(*items.borrow(), ints(&[12, 13, 23]));

    a.finish().unwrap();
    assert!(combined.is_done());
    // the other upstream's edge is cleaned up with the downstream
    assert_eq!(b.callback_count(), 0);
}

#[test]
fn test_nsort_by_orders_numerically() {
    let items = Source::from(vec![3i64, 1, 4, 1, 5, 9, 2, 6])
        .nsort_by(|v| v.clone())
        .get()
        .unwrap();
    assert_eq!(items, ints(&[1, 1, 2, 3, 4, 5, 6, 9]));
}

#[test]
fn test_ordered_futures_emits_in_completion_order() {
    let root = Source::new("root");
    let futures = root.ordered_futures();
    let items = collect(&futures);

    let f1 = Handle::new("f1");
    let f2 = Handle::new("f2");
    let f3 = Handle::new("f3");
    root.emit(f1.clone()).unwrap();
    root.emit(f2.clone()).unwrap();
    root.emit(f3.clone()).unwrap();
    root.finish().unwrap();

    assert!(!futures.is_ready());
    f2.done_with(20).unwrap();
    f1.done_with(10).unwrap();
    assert_eq!(*items.borrow(), ints(&[20, 10]));

    f3.fail(Error::custom("computation failed")).unwrap();
    assert!(futures.is_failed());
    assert_eq!(
        futures.failure().unwrap().error.to_string(),
        "computation failed"
    );
}

#[test]
fn test_skip_then_take_is_a_slice() {
    let items = Source::from((0i64..10).collect::<Vec<_>>())
        .skip(2)
        .take(3)
        .get()
        .unwrap();
    assert_eq!(items, ints(&[2, 3, 4]));
}

#[test]
fn test_downstream_completion_removes_upstream_callbacks() {
    let root = Source::new("root");
    let mapped = root.map(|v| v.clone());
    assert_eq!(root.callback_count(), 1);
    assert_eq!(root.child_count(), 1);

    mapped.finish().unwrap();
    assert_eq!(root.callback_count(), 0);
    assert_eq!(root.child_count(), 0);
    // losing the last child before settling cancels the parent
    assert!(root.is_cancelled());
}

#[test]
fn test_cancelling_the_root_cancels_descendants() {
    let root = Source::new("root");
    let mapped = root.map(|v| v.clone());
    let filtered = mapped.filter(FilterSpec::pred(|_| true));

    root.cancel().unwrap();
    assert!(mapped.is_cancelled());
    assert!(filtered.is_cancelled());
    assert!(filtered.describe().ends_with("(cancelled)"));
}

#[test]
fn test_describe_reflects_chain_and_state() {
    let root = Source::new("numbers");
    let mapped = root.map(|v| v.clone());
    let taken = mapped.take(1);
    assert_eq!(taken.describe(), "numbers=>map=>take(pending)");

    root.emit(1).unwrap();
    assert_eq!(taken.describe(), "numbers=>map=>take(done)");
}

#[test]
fn test_callback_failure_fails_the_chain() {
    let source = Source::from(vec![1i64, 2]);
    let mapped = source.map(|v| v.clone());
    mapped.each(|_| Err(Error::custom("sink exploded")));

    let err = mapped.get().unwrap_err();
    assert_eq!(err.to_string(), "sink exploded");
    assert!(mapped.is_failed());
    assert!(mapped
        .failure()
        .unwrap()
        .tags
        .iter()
        .any(|t| t == "exception in on_item callback"));
}

#[test]
fn test_emit_after_completion_is_rejected() {
    let source = Source::new("root");
    source.finish().unwrap();
    assert!(matches!(
        source.emit(1),
        Err(Error::AlreadyCompleted { .. })
    ));
}

#[test]
fn test_catch_splices_a_replacement_source() {
    let root = Source::new("root");
    let caught = root
        .map(|v| v.clone())
        .catch(|_failure| Some(Source::from(vec![7i64, 8])));
    let items = collect(&caught);

    root.emit(1).unwrap();
    root.fail(Error::custom("upstream died")).unwrap();

    assert_eq!(*items.borrow(), ints(&[1, 7, 8]));
    assert!(caught.is_done());
}

#[test]
fn test_catch_without_replacement_propagates() {
    let root = Source::new("root");
    let caught = root.map(|v| v.clone()).catch(|_failure| None);

    root.fail(Error::custom("upstream died")).unwrap();
    assert!(caught.is_failed());
    assert_eq!(
        caught.failure().unwrap().error.to_string(),
        "upstream died"
    );
}

#[test]
fn test_utf8_round_trip() {
    // the root anchors the chain's lifetime, so it stays bound
    let root = Source::from(vec!["héllo ", "wörld"]);
    let chain = root
        .encode("utf8", &[])
        .unwrap()
        .decode("utf8", &[])
        .unwrap();
    let text = chain.as_string();
    chain.wait().unwrap();
    assert_eq!(text.value(), Some(Value::from("héllo wörld")));
}

#[test]
fn test_utf8_decode_across_chunk_boundaries() {
    // chunksize(3) splits the two-byte characters across chunks; the
    // decoder buffers partial characters, and the 13th byte is the short
    // tail chunksize discards on completion.
    let root = Source::from(vec!["héllo ", "wörld"]);
    let chain = root
        .encode("utf8", &[])
        .unwrap()
        .chunksize(3)
        .unwrap()
        .decode("utf8", &[])
        .unwrap();
    let text = chain.as_string();
    chain.wait().unwrap();
    assert_eq!(text.value(), Some(Value::from("héllo wörl")));
}

#[test]
fn test_base64_round_trip() {
    let payload: Vec<u8> = vec![0, 1, 2, 253, 254, 255];
    let root = Source::from(vec![payload.clone()]);
    let chain = root
        .encode("base64", &[])
        .unwrap()
        .decode("base64", &[])
        .unwrap();
    let items = chain.get().unwrap();
    assert_eq!(items, vec![Value::Bytes(payload)]);
}

#[test]
fn test_reader_roots_emit_fixed_chunks() {
    let payload = vec![b'x'; 5000];
    let items = Source::from(FromInput::reader(std::io::Cursor::new(payload)))
        .get()
        .unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].to_bytes().len(), 4096);
    assert_eq!(items[1].to_bytes().len(), 904);
}

#[test]
fn test_handle_roots_bridge_each_terminal_state() {
    let done = Handle::new("done");
    done.done_with(5).unwrap();
    assert_eq!(Source::from(done).get().unwrap(), ints(&[5]));

    let empty = Handle::new("empty");
    empty.done().unwrap();
    assert_eq!(Source::from(empty).get().unwrap(), Vec::<Value>::new());

    let cancelled = Handle::new("cancelled");
    cancelled.cancel().unwrap();
    assert_eq!(Source::from(cancelled).get().unwrap(), Vec::<Value>::new());

    let failed = Handle::new("failed");
    failed.fail(Error::custom("no value")).unwrap();
    assert!(Source::from(failed).get().is_err());
}

#[test]
fn test_pre_settled_roots() {
    assert_eq!(Source::empty().get().unwrap(), Vec::<Value>::new());
    assert!(Source::throw(Error::custom("bad")).get().is_err());
    assert!(matches!(Source::never().wait(), Err(Error::Stalled { .. })));
}

#[test]
fn test_range_and_repeat_roots() {
    assert_eq!(Source::range(1..4).get().unwrap(), ints(&[1, 2, 3]));
    assert_eq!(
        Source::repeat("ok", 3).get().unwrap(),
        vec![Value::from("ok"), Value::from("ok"), Value::from("ok")]
    );
}

#[test]
fn test_then_and_on_fail_observers() {
    let done_value = Rc::new(RefCell::new(None));
    let seen = done_value.clone();
    let root = Source::new("root");
    root.then(move |v| *seen.borrow_mut() = Some(v.clone()));
    root.finish().unwrap();
    assert_eq!(*done_value.borrow(), Some(Value::Undef));

    let failure_text = Rc::new(RefCell::new(String::new()));
    let seen = failure_text.clone();
    let root = Source::new("root");
    root.on_fail(move |f| *seen.borrow_mut() = f.error.to_string());
    root.fail(Error::custom("went wrong")).unwrap();
    assert_eq!(*failure_text.borrow(), "went wrong");
}

#[test]
fn test_pause_flag_is_advisory() {
    let root = Source::new("root");
    let items = collect(&root);
    root.pause();
    assert!(root.is_paused());
    root.emit(1).unwrap();
    root.resume();
    assert!(!root.is_paused());
    root.emit(2).unwrap();
    assert_eq!(*items.borrow(), ints(&[1, 2]));
}

#[test]
fn test_debounce_is_not_implemented() {
    let root = Source::new("root");
    assert!(matches!(
        root.debounce(100),
        Err(Error::Unimplemented { .. })
    ));
}

#[test]
fn test_replacing_the_handle_factory() {
    set_handle_factory(|_source, label| Handle::new(format!("custom:{}", label)));
    let root = Source::new("root");
    assert_eq!(root.completed().label(), "custom:root");
    set_handle_factory(|_source, label| Handle::new(label));
}

#[test]
fn test_sorting_twice_is_idempotent() {
    let once = Source::from(vec![3i64, 1, 2])
        .nsort_by(|v| v.clone())
        .get()
        .unwrap();
    let twice = Source::from(vec![3i64, 1, 2])
        .nsort_by(|v| v.clone())
        .nsort_by(|v| v.clone())
        .get()
        .unwrap();
    assert_eq!(once, twice);
}
