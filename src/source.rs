//! Source nodes, the chain graph, and the emission protocol.
//!
//! A [`Source`] is a push endpoint: it holds an ordered list of item
//! callbacks, a lazily-created completion handle, a weak link to its
//! parent and strong links to its children. Operators derive a child via
//! [`Source::chained`] and wire exactly one item callback on the parent
//! with [`Source::each_while_source`]; the callback is extracted by
//! identity when the child's completion settles.
//!
//! Parents own children, children observe parents. A chain's lifetime is
//! anchored at the root until every child completes or is dropped; a
//! parent that loses its last child before settling is cancelled.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::error::{Error, Result};
use crate::handle::{Failure, Handle};
use crate::util::next_callback_id;
use crate::value::Value;

type ItemFn = Box<dyn FnMut(&Value) -> Result<()>>;

/// The replaceable builder for completion handles.
pub type HandleFactory = Rc<dyn Fn(&Source, &str) -> Handle>;

thread_local! {
    static HANDLE_FACTORY: RefCell<HandleFactory> =
        RefCell::new(Rc::new(|_source, label| Handle::new(label)));
}

/// Replace the process-wide completion-handle factory.
///
/// Sources capture the factory at construction and children inherit it
/// from their parent, so installation must happen before any source of
/// the affected chain is constructed.
pub fn set_handle_factory<F>(factory: F)
where
    F: Fn(&Source, &str) -> Handle + 'static,
{
    HANDLE_FACTORY.with(|f| *f.borrow_mut() = Rc::new(factory));
}

struct SourceInner {
    label: String,
    parent: Option<Weak<RefCell<SourceInner>>>,
    children: Vec<Source>,
    on_item: Vec<(u64, Rc<RefCell<ItemFn>>)>,
    completed: Option<Handle>,
    paused: bool,
    on_get: Option<Box<dyn FnOnce(&Source)>>,
    factory: HandleFactory,
}

/// A push endpoint emitting an ordered sequence of items and terminating
/// once. Cloning is shallow; clones share the same node.
#[derive(Clone)]
pub struct Source {
    inner: Rc<RefCell<SourceInner>>,
}

/// A non-owning reference to a [`Source`] node.
pub struct WeakSource(Weak<RefCell<SourceInner>>);

impl WeakSource {
    /// Recover the source if the node is still alive.
    pub fn upgrade(&self) -> Option<Source> {
        self.0.upgrade().map(|inner| Source { inner })
    }
}

impl Source {
    /// Create a root source.
    pub fn new<S: Into<String>>(label: S) -> Source {
        let factory = HANDLE_FACTORY.with(|f| f.borrow().clone());
        Source {
            inner: Rc::new(RefCell::new(SourceInner {
                label: label.into(),
                parent: None,
                children: Vec::new(),
                on_item: Vec::new(),
                completed: None,
                paused: false,
                on_get: None,
                factory,
            })),
        }
    }

    /// The source's label.
    pub fn label(&self) -> String {
        self.inner.borrow().label.clone()
    }

    /// The parent source, if this is a derived stage and the parent is
    /// still alive.
    pub fn parent(&self) -> Option<Source> {
        let weak = self.inner.borrow().parent.clone()?;
        weak.upgrade().map(|inner| Source { inner })
    }

    /// A non-owning reference to this node.
    pub fn downgrade(&self) -> WeakSource {
        WeakSource(Rc::downgrade(&self.inner))
    }

    /// Whether two `Source` values share the same underlying node.
    pub fn same_node(&self, other: &Source) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Construct a child source with this node as its (weakly linked)
    /// parent, inheriting the completion-handle factory.
    pub fn chained<S: Into<String>>(&self, label: S) -> Source {
        let factory = self.inner.borrow().factory.clone();
        let child = Source {
            inner: Rc::new(RefCell::new(SourceInner {
                label: label.into(),
                parent: Some(Rc::downgrade(&self.inner)),
                children: Vec::new(),
                on_item: Vec::new(),
                completed: None,
                paused: false,
                on_get: None,
                factory,
            })),
        };
        self.inner.borrow_mut().children.push(child.clone());
        child
    }

    /// The completion handle, created on first observation.
    ///
    /// Settling the handle clears the source's item callbacks, drops any
    /// deferred `on_get` action, and notifies the parent; a parent left
    /// with no children before its own completion is cancelled.
    pub fn completed(&self) -> Handle {
        if let Some(h) = self.inner.borrow().completed.clone() {
            return h;
        }
        let factory = self.inner.borrow().factory.clone();
        let label = self.label();
        let handle = factory(self, &label);
        self.inner.borrow_mut().completed = Some(handle.clone());

        let weak = self.downgrade();
        handle.on_ready(move |_| {
            if let Some(source) = weak.upgrade() {
                source.clear_for_completion();
                if let Some(parent) = source.parent() {
                    parent.child_completed(&source);
                }
            }
        });
        handle
    }

    /// Whether the completion has settled into any terminal state.
    pub fn is_ready(&self) -> bool {
        self.inner
            .borrow()
            .completed
            .as_ref()
            .map_or(false, |h| h.is_ready())
    }

    /// Whether the completion settled done.
    pub fn is_done(&self) -> bool {
        self.inner
            .borrow()
            .completed
            .as_ref()
            .map_or(false, |h| h.is_done())
    }

    /// Whether the completion settled failed.
    pub fn is_failed(&self) -> bool {
        self.inner
            .borrow()
            .completed
            .as_ref()
            .map_or(false, |h| h.is_failed())
    }

    /// Whether the completion settled cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.inner
            .borrow()
            .completed
            .as_ref()
            .map_or(false, |h| h.is_cancelled())
    }

    /// The failure payload, if the completion settled failed.
    pub fn failure(&self) -> Option<Failure> {
        self.inner
            .borrow()
            .completed
            .as_ref()
            .and_then(|h| h.failure())
    }

    /// The completion state as text; `pending` when the handle has not
    /// been created yet.
    pub fn state_name(&self) -> &'static str {
        self.inner
            .borrow()
            .completed
            .as_ref()
            .map_or("pending", |h| h.state_name())
    }

    /// Emit one item through the current callbacks.
    pub fn emit<V: Into<Value>>(&self, item: V) -> Result<()> {
        self.deliver(&item.into())
    }

    /// Emit a sequence of items in order. The callback snapshot is taken
    /// per item, so a callback removed while item *k* is delivered no
    /// longer sees item *k+1*.
    pub fn emit_many(&self, items: Vec<Value>) -> Result<()> {
        for item in items {
            self.deliver(&item)?;
        }
        Ok(())
    }

    fn deliver(&self, item: &Value) -> Result<()> {
        if self.is_ready() {
            return Err(Error::AlreadyCompleted {
                label: self.label(),
            });
        }
        let snapshot: Vec<(u64, Rc<RefCell<ItemFn>>)> = self.inner.borrow().on_item.clone();
        for (id, cb) in snapshot {
            let outcome = {
                let mut f = cb.borrow_mut();
                (*f)(item)
            };
            if let Err(err) = outcome {
                tracing::warn!(
                    label = %self.label(),
                    callback = id,
                    error = %err,
                    "item callback failed"
                );
                let _ = self.completed().fail_tagged(
                    err.clone(),
                    vec!["exception in on_item callback".to_string()],
                );
                return Err(err);
            }
        }
        Ok(())
    }

    /// Append a terminal sink callback; returns the source for chaining.
    pub fn each<F>(&self, cb: F) -> Source
    where
        F: FnMut(&Value) -> Result<()> + 'static,
    {
        self.add_callback(cb);
        self.clone()
    }

    /// Wire an operator's per-item callback: append `cb` here and remove
    /// it (by identity) when `downstream`'s completion settles.
    pub fn each_while_source<F>(&self, cb: F, downstream: &Source) -> Source
    where
        F: FnMut(&Value) -> Result<()> + 'static,
    {
        let id = self.add_callback(cb);
        let upstream = self.downgrade();
        downstream.completed().on_ready(move |_| {
            if let Some(u) = upstream.upgrade() {
                u.remove_callback(id);
            }
        });
        self.clone()
    }

    pub(crate) fn add_callback<F>(&self, cb: F) -> u64
    where
        F: FnMut(&Value) -> Result<()> + 'static,
    {
        let id = next_callback_id();
        let boxed: ItemFn = Box::new(cb);
        self.inner
            .borrow_mut()
            .on_item
            .push((id, Rc::new(RefCell::new(boxed))));
        id
    }

    pub(crate) fn remove_callback(&self, id: u64) {
        self.inner.borrow_mut().on_item.retain(|(cid, _)| *cid != id);
    }

    /// Number of item callbacks currently registered. Diagnostics only.
    pub fn callback_count(&self) -> usize {
        self.inner.borrow().on_item.len()
    }

    /// Number of live child stages. Diagnostics only.
    pub fn child_count(&self) -> usize {
        self.inner.borrow().children.len()
    }

    /// Transition the completion to done.
    pub fn finish(&self) -> Result<()> {
        self.completed().done()
    }

    /// Transition the completion to failed.
    pub fn fail(&self, error: Error) -> Result<()> {
        self.completed().fail(error)
    }

    /// Transition the completion to cancelled.
    pub fn cancel(&self) -> Result<()> {
        self.completed().cancel()
    }

    /// The label chain from the root down to this stage, suffixed with
    /// the completion state: `label0=>label1=>label2(state)`.
    pub fn describe(&self) -> String {
        format!("{}({})", self.label_path(), self.state_name())
    }

    fn label_path(&self) -> String {
        match self.parent() {
            Some(p) => format!("{}=>{}", p.label_path(), self.label()),
            None => self.label(),
        }
    }

    /// The root of this chain (the source itself when it has no parent).
    pub fn root(&self) -> Source {
        let mut current = self.clone();
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    /// Block until the completion settles, driving the root's deferred
    /// emission first. Done yields the carried value, cancellation yields
    /// `Undef`, failure re-raises.
    pub fn wait(&self) -> Result<Value> {
        self.prime();
        self.completed().wait()
    }

    /// Drive the chain to completion and collect the items observed at
    /// this stage. Failure re-raises; cancellation returns the items
    /// collected before the cut.
    pub fn get(&self) -> Result<Vec<Value>> {
        let collected = Rc::new(RefCell::new(Vec::new()));
        let sink = collected.clone();
        self.each(move |v| {
            sink.borrow_mut().push(v.clone());
            Ok(())
        });
        self.prime();
        match self.completed().wait() {
            Ok(_) => {
                let items = collected.borrow().clone();
                Ok(items)
            }
            Err(e) => Err(e),
        }
    }

    /// Run the chain root's deferred emission, if it has not run yet.
    pub(crate) fn prime(&self) {
        self.root().run_on_get();
    }

    pub(crate) fn set_on_get<F>(&self, thunk: F)
    where
        F: FnOnce(&Source) + 'static,
    {
        self.inner.borrow_mut().on_get = Some(Box::new(thunk));
    }

    fn run_on_get(&self) {
        let thunk = self.inner.borrow_mut().on_get.take();
        if let Some(thunk) = thunk {
            thunk(self);
        }
    }

    /// Register an observer on the completion handle; returns the source.
    pub fn on_ready<F>(&self, cb: F) -> Source
    where
        F: FnOnce(&Handle) + 'static,
    {
        self.completed().on_ready(cb);
        self.clone()
    }

    /// Invoke `cb` with the done value when the completion settles done.
    pub fn then<F>(&self, cb: F) -> Source
    where
        F: FnOnce(&Value) + 'static,
    {
        self.completed().on_ready(move |h| {
            if let Some(v) = h.value() {
                cb(&v);
            }
        });
        self.clone()
    }

    /// Invoke `cb` with the failure when the completion settles failed.
    pub fn on_fail<F>(&self, cb: F) -> Source
    where
        F: FnOnce(&Failure) + 'static,
    {
        self.completed().on_ready(move |h| {
            if let Some(failure) = h.failure() {
                cb(&failure);
            }
        });
        self.clone()
    }

    /// A handle mapping this source's done value through `f`.
    pub fn transform<F>(&self, f: F) -> Handle
    where
        F: FnOnce(Value) -> Value + 'static,
    {
        self.completed().transform(f)
    }

    /// Print each item to stdout without a trailing newline.
    pub fn print(&self) -> Source {
        self.each(|v| {
            print!("{}", v);
            Ok(())
        })
    }

    /// Print each item to stdout with a trailing newline.
    pub fn say(&self) -> Source {
        self.each(|v| {
            println!("{}", v);
            Ok(())
        })
    }

    /// Set the advisory paused flag. Emission is unaffected.
    pub fn pause(&self) -> Source {
        self.inner.borrow_mut().paused = true;
        self.clone()
    }

    /// Clear the advisory paused flag.
    pub fn resume(&self) -> Source {
        self.inner.borrow_mut().paused = false;
        self.clone()
    }

    /// The advisory paused flag.
    pub fn is_paused(&self) -> bool {
        self.inner.borrow().paused
    }

    /// Timer-driven coalescing lives in a timing-capable extension.
    pub fn debounce(&self, _window_ms: u64) -> Result<Source> {
        Err(Error::unimplemented("debounce"))
    }

    fn clear_for_completion(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.on_item.clear();
        inner.on_get = None;
    }

    fn child_completed(&self, child: &Source) {
        let now_childless = {
            let mut inner = self.inner.borrow_mut();
            inner
                .children
                .retain(|c| !Rc::ptr_eq(&c.inner, &child.inner));
            inner.children.is_empty()
        };
        if now_childless && !self.is_ready() {
            let _ = self.cancel();
        }
    }

    /// Copy an upstream terminal state onto this source's completion,
    /// unless it has already settled.
    pub(crate) fn adopt_from(&self, upstream: &Handle) {
        self.completed().adopt(upstream);
    }

    /// Wire a derived stage: child source, per-item callback removed on
    /// the child's completion, upstream terminal forwarded to the child.
    pub(crate) fn stage<F>(&self, label: &str, mut per_item: F) -> Source
    where
        F: FnMut(&Value, &Source) -> Result<()> + 'static,
    {
        let down = self.chained(label);
        let sink = down.clone();
        self.each_while_source(move |v| per_item(v, &sink), &down);
        self.forward_completion(&down);
        down
    }

    /// Like [`Source::stage`] but with custom handling of the upstream
    /// terminal state.
    pub(crate) fn stage_with_completion<F, C>(
        &self,
        label: &str,
        mut per_item: F,
        on_complete: C,
    ) -> Source
    where
        F: FnMut(&Value, &Source) -> Result<()> + 'static,
        C: FnOnce(&Handle, &Source) + 'static,
    {
        let down = self.chained(label);
        let sink = down.clone();
        self.each_while_source(move |v| per_item(v, &sink), &down);
        let target = down.clone();
        self.completed().on_ready(move |h| on_complete(h, &target));
        down
    }

    pub(crate) fn forward_completion(&self, down: &Source) {
        let target = down.clone();
        self.completed().on_ready(move |h| target.adopt_from(h));
    }
}

impl Default for Source {
    fn default() -> Self {
        Source::new("unknown")
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("label", &self.inner.borrow().label)
            .field("state", &self.state_name())
            .field("children", &self.child_count())
            .finish()
    }
}
