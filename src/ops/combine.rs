//! Operators coordinating multiple sources or nested completion futures.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::handle::{Failure, Handle};
use crate::source::Source;
use crate::util::{needs_all, needs_any};
use crate::value::Value;

/// Bookkeeping for operators that wait on dynamically created
/// sub-sources or futures: the downstream may finish only once the
/// upstream is done and nothing tracked is still pending.
struct Tracked {
    pending: Cell<usize>,
    upstream_done: Cell<bool>,
}

impl Tracked {
    fn new() -> Rc<Tracked> {
        Rc::new(Tracked {
            pending: Cell::new(0),
            upstream_done: Cell::new(false),
        })
    }

    fn settle_one(&self, down: &Source) {
        self.pending.set(self.pending.get() - 1);
        self.maybe_finish(down);
    }

    fn maybe_finish(&self, down: &Source) {
        if self.upstream_done.get() && self.pending.get() == 0 {
            let _ = down.finish();
        }
    }
}

fn fail_with(down: &Source, failure: Failure) {
    let _ = down
        .completed()
        .fail_tagged(failure.error, failure.tags);
}

/// The dispatch table for [`Source::switch_str`]: ordered cases matched
/// by string equality, with an optional default. An unmatched item with
/// no default is dropped.
pub struct SwitchCases {
    cases: Vec<(String, Rc<dyn Fn(&Value) -> Value>)>,
    fallback: Option<Rc<dyn Fn(&Value) -> Value>>,
}

impl SwitchCases {
    /// An empty dispatch table.
    pub fn new() -> Self {
        SwitchCases {
            cases: Vec::new(),
            fallback: None,
        }
    }

    /// Append a case invoked when the condition's text equals `key`.
    pub fn case<K, F>(mut self, key: K, f: F) -> Self
    where
        K: Into<String>,
        F: Fn(&Value) -> Value + 'static,
    {
        self.cases.push((key.into(), Rc::new(f)));
        self
    }

    /// Set the default invoked when no case matches.
    pub fn default<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> Value + 'static,
    {
        self.fallback = Some(Rc::new(f));
        self
    }

    fn dispatch(&self, key: &Value, item: &Value, down: &Source) -> Result<()> {
        let key_text = key.to_text();
        for (case, f) in &self.cases {
            if *case == key_text {
                return down.emit(f(item));
            }
        }
        if let Some(f) = &self.fallback {
            return down.emit(f(item));
        }
        Ok(())
    }
}

impl Source {
    /// Forward items from this source and all `others` into one
    /// downstream, unordered across upstreams. The downstream completes
    /// when every upstream has completed.
    pub fn merge(&self, others: &[Source]) -> Source {
        let down = self.chained("merge");
        let mut handles = Vec::with_capacity(1 + others.len());
        for upstream in std::iter::once(self).chain(others.iter()) {
            let sink = down.clone();
            upstream.each_while_source(move |v| sink.emit(v.clone()), &down);
            handles.push(upstream.completed());
        }
        let target = down.clone();
        needs_all(&handles).on_ready(move |h| target.adopt_from(h));
        down
    }

    /// Emit the list of latest values once every upstream has emitted.
    pub fn combine_latest(&self, others: &[Source]) -> Source {
        self.combine_latest_with(others, |latest| Value::List(latest.to_vec()))
    }

    /// Track the latest value per upstream; once saturated, every
    /// upstream emission emits `combine(latest…)`. The downstream
    /// completes with the first upstream to complete.
    pub fn combine_latest_with<F>(&self, others: &[Source], combine: F) -> Source
    where
        F: Fn(&[Value]) -> Value + 'static,
    {
        let down = self.chained("combine_latest");
        let combine = Rc::new(combine);
        let sources: Vec<Source> = std::iter::once(self.clone())
            .chain(others.iter().cloned())
            .collect();
        let slots: Rc<RefCell<Vec<Option<Value>>>> =
            Rc::new(RefCell::new(vec![None; sources.len()]));

        for (index, upstream) in sources.iter().enumerate() {
            let slots = slots.clone();
            let sink = down.clone();
            let combine = combine.clone();
            upstream.each_while_source(
                move |v| {
                    let saturated: Option<Vec<Value>> = {
                        let mut slots = slots.borrow_mut();
                        slots[index] = Some(v.clone());
                        slots.iter().cloned().collect()
                    };
                    match saturated {
                        Some(latest) => sink.emit(combine(&latest)),
                        None => Ok(()),
                    }
                },
                &down,
            );
        }

        let handles: Vec<Handle> = sources.iter().map(Source::completed).collect();
        let target = down.clone();
        needs_any(&handles).on_ready(move |h| target.adopt_from(h));
        down
    }

    /// Emit `[x, latest…]` for each primary item once any secondary has
    /// emitted.
    pub fn with_latest_from(&self, others: &[Source]) -> Source {
        self.with_latest_from_with(others, |values| Value::List(values.to_vec()))
    }

    /// Secondaries update latest slots without triggering emission; each
    /// primary item emits `combine(x, latest…)` once at least one slot is
    /// populated (unpopulated slots pass `Undef`). The downstream
    /// inherits the primary's completion.
    pub fn with_latest_from_with<F>(&self, others: &[Source], combine: F) -> Source
    where
        F: Fn(&[Value]) -> Value + 'static,
    {
        let down = self.chained("with_latest_from");
        let slots: Rc<RefCell<Vec<Option<Value>>>> =
            Rc::new(RefCell::new(vec![None; others.len()]));

        for (index, secondary) in others.iter().enumerate() {
            let slots = slots.clone();
            secondary.each_while_source(
                move |v| {
                    slots.borrow_mut()[index] = Some(v.clone());
                    Ok(())
                },
                &down,
            );
        }

        let sink = down.clone();
        self.each_while_source(
            move |v| {
                let combined: Option<Vec<Value>> = {
                    let slots = slots.borrow();
                    if slots.iter().any(Option::is_some) {
                        let mut values = Vec::with_capacity(1 + slots.len());
                        values.push(v.clone());
                        values.extend(slots.iter().map(|s| s.clone().unwrap_or(Value::Undef)));
                        Some(values)
                    } else {
                        None
                    }
                };
                match combined {
                    Some(values) => sink.emit(combine(&values)),
                    None => Ok(()),
                }
            },
            &down,
        );
        self.forward_completion(&down);
        down
    }

    /// Pass items through while calling each factory once with this
    /// source; the downstream completes when every source the factories
    /// returned is done. Upstream failure or cancellation is inherited.
    pub fn apply(&self, factories: Vec<Box<dyn Fn(&Source) -> Source>>) -> Source {
        let down = self.chained("apply");
        let sink = down.clone();
        self.each_while_source(move |v| sink.emit(v.clone()), &down);

        let handles: Vec<Handle> = factories
            .iter()
            .map(|factory| factory(self).completed())
            .collect();
        let target = down.clone();
        needs_all(&handles).on_ready(move |h| target.adopt_from(h));

        let target = down.clone();
        self.completed().on_ready(move |h| {
            if !h.is_done() {
                target.adopt_from(h);
            }
        });
        down
    }

    /// Pass items through while calling each factory with every item,
    /// tracking the returned sources; once the upstream is done the
    /// downstream finishes after every tracked source has.
    pub fn each_as_source(&self, factories: Vec<Box<dyn Fn(&Value) -> Source>>) -> Source {
        let down = self.chained("each_as_source");
        let tracked = Tracked::new();

        let sink = down.clone();
        let state = tracked.clone();
        self.each_while_source(
            move |v| {
                for factory in &factories {
                    let sub = factory(v);
                    state.pending.set(state.pending.get() + 1);
                    let state = state.clone();
                    let target = sink.clone();
                    sub.completed().on_ready(move |h| {
                        if let Some(failure) = h.failure() {
                            state.pending.set(state.pending.get() - 1);
                            fail_with(&target, failure);
                        } else {
                            state.settle_one(&target);
                        }
                    });
                    sub.prime();
                }
                sink.emit(v.clone())
            },
            &down,
        );

        let target = down.clone();
        self.completed().on_ready(move |h| {
            if h.is_done() {
                tracked.upstream_done.set(true);
                tracked.maybe_finish(&target);
            } else {
                target.adopt_from(h);
            }
        });
        down
    }

    /// For each item, evaluate `f(x)`: a `List` flattens into the
    /// downstream, a `Source` is subscribed and its items spliced in,
    /// anything else passes through. The downstream completes once the
    /// upstream and every subscribed sub-source have completed; a failed
    /// sub-source fails the downstream.
    pub fn flat_map<F>(&self, mut f: F) -> Source
    where
        F: FnMut(&Value) -> Value + 'static,
    {
        let down = self.chained("flat_map");
        let tracked = Tracked::new();

        let sink = down.clone();
        let state = tracked.clone();
        self.each_while_source(
            move |v| match f(v) {
                Value::List(items) => {
                    for item in items {
                        sink.emit(item)?;
                    }
                    Ok(())
                }
                Value::Source(sub) => {
                    state.pending.set(state.pending.get() + 1);
                    let splice = sink.clone();
                    sub.each_while_source(move |x| splice.emit(x.clone()), &sink);
                    let state = state.clone();
                    let target = sink.clone();
                    sub.completed().on_ready(move |h| {
                        if let Some(failure) = h.failure() {
                            state.pending.set(state.pending.get() - 1);
                            fail_with(&target, failure);
                        } else {
                            state.settle_one(&target);
                        }
                    });
                    sub.prime();
                    Ok(())
                }
                other => sink.emit(other),
            },
            &down,
        );

        let target = down.clone();
        self.completed().on_ready(move |h| {
            if h.is_done() {
                tracked.upstream_done.set(true);
                tracked.maybe_finish(&target);
            } else {
                target.adopt_from(h);
            }
        });
        down
    }

    /// Route each item through the first case whose key equals the
    /// condition's text. A pending `Value::Handle` condition defers the
    /// dispatch to its resolution.
    pub fn switch_str<C>(&self, mut cond: C, cases: SwitchCases) -> Source
    where
        C: FnMut(&Value) -> Value + 'static,
    {
        let down = self.chained("switch_str");
        let cases = Rc::new(cases);
        let sink = down.clone();
        self.each_while_source(
            move |v| match cond(v) {
                Value::Handle(pending) => {
                    let item = v.clone();
                    let cases = cases.clone();
                    let target = sink.clone();
                    pending.on_ready(move |h| {
                        if let Some(key) = h.value() {
                            let _ = cases.dispatch(&key, &item, &target);
                        }
                    });
                    Ok(())
                }
                key => cases.dispatch(&key, v, &sink),
            },
            &down,
        );
        self.forward_completion(&down);
        down
    }

    /// The upstream emits completion handles; their done values are
    /// emitted in completion order. Any failed handle fails the
    /// downstream; it finishes once the upstream is done and every
    /// handle has resolved.
    pub fn ordered_futures(&self) -> Source {
        let down = self.chained("ordered_futures");
        let tracked = Tracked::new();

        let sink = down.clone();
        let state = tracked.clone();
        self.each_while_source(
            move |v| {
                let handle = match v {
                    Value::Handle(h) => h.clone(),
                    other => {
                        return Err(Error::invalid_argument(format!(
                            "ordered_futures expects completion handles, got {}",
                            other.type_name()
                        )))
                    }
                };
                state.pending.set(state.pending.get() + 1);
                let state = state.clone();
                let target = sink.clone();
                handle.on_ready(move |h| {
                    if let Some(failure) = h.failure() {
                        state.pending.set(state.pending.get() - 1);
                        fail_with(&target, failure);
                        return;
                    }
                    if let Some(value) = h.value() {
                        if target.emit(value).is_err() {
                            return;
                        }
                    }
                    state.settle_one(&target);
                });
                Ok(())
            },
            &down,
        );

        let target = down.clone();
        self.completed().on_ready(move |h| {
            if h.is_done() {
                tracked.upstream_done.set(true);
                tracked.maybe_finish(&target);
            } else {
                target.adopt_from(h);
            }
        });
        down
    }

    /// Pass items through; on upstream failure consult `handler`. A
    /// returned source has its emissions spliced into the downstream,
    /// whose completion it then drives; `None` propagates the failure.
    pub fn catch<F>(&self, mut handler: F) -> Source
    where
        F: FnMut(&Failure) -> Option<Source> + 'static,
    {
        self.stage_with_completion(
            "catch",
            |v, d| d.emit(v.clone()),
            move |h, d| match h.failure() {
                Some(failure) => match handler(&failure) {
                    Some(replacement) => {
                        let sink = d.clone();
                        replacement.each_while_source(move |v| sink.emit(v.clone()), d);
                        let target = d.clone();
                        replacement
                            .completed()
                            .on_ready(move |rh| target.adopt_from(rh));
                        replacement.prime();
                    }
                    None => fail_with(d, failure),
                },
                None => d.adopt_from(h),
            },
        )
    }
}
