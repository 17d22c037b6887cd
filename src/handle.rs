//! Single-assignment completion handles.
//!
//! Every source owns at most one completion handle: the rendezvous point
//! for "end of stream" semantics. A handle starts pending and settles
//! exactly once into done, failed, or cancelled. Observers registered
//! before the transition fire in registration order; observers registered
//! after it fire immediately on the registering thread.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::value::Value;

/// The failure payload of a failed completion.
#[derive(Debug, Clone)]
pub struct Failure {
    /// The raised error
    pub error: Error,
    /// Metadata tags identifying the failure site
    pub tags: Vec<String>,
}

#[derive(Debug, Clone)]
enum State {
    Pending,
    Done(Value),
    Failed(Failure),
    Cancelled,
}

type ReadyFn = Box<dyn FnOnce(&Handle)>;

struct HandleInner {
    label: String,
    state: State,
    observers: Vec<ReadyFn>,
}

/// An observable, single-assignment terminal state.
#[derive(Clone)]
pub struct Handle {
    inner: Rc<RefCell<HandleInner>>,
}

impl Handle {
    /// Create a fresh pending handle.
    pub fn new<S: Into<String>>(label: S) -> Self {
        Handle {
            inner: Rc::new(RefCell::new(HandleInner {
                label: label.into(),
                state: State::Pending,
                observers: Vec::new(),
            })),
        }
    }

    /// The label attached at construction.
    pub fn label(&self) -> String {
        self.inner.borrow().label.clone()
    }

    /// The terminal state as text: `pending`, `done`, `failed` or
    /// `cancelled`.
    pub fn state_name(&self) -> &'static str {
        match self.inner.borrow().state {
            State::Pending => "pending",
            State::Done(_) => "done",
            State::Failed(_) => "failed",
            State::Cancelled => "cancelled",
        }
    }

    /// Whether the handle has settled into any terminal state.
    pub fn is_ready(&self) -> bool {
        !matches!(self.inner.borrow().state, State::Pending)
    }

    /// Whether the handle settled done.
    pub fn is_done(&self) -> bool {
        matches!(self.inner.borrow().state, State::Done(_))
    }

    /// Whether the handle settled failed.
    pub fn is_failed(&self) -> bool {
        matches!(self.inner.borrow().state, State::Failed(_))
    }

    /// Whether the handle settled cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.inner.borrow().state, State::Cancelled)
    }

    /// The done value, if the handle settled done.
    pub fn value(&self) -> Option<Value> {
        match &self.inner.borrow().state {
            State::Done(v) => Some(v.clone()),
            _ => None,
        }
    }

    /// The failure payload, if the handle settled failed.
    pub fn failure(&self) -> Option<Failure> {
        match &self.inner.borrow().state {
            State::Failed(f) => Some(f.clone()),
            _ => None,
        }
    }

    /// Transition pending → done with no value.
    pub fn done(&self) -> Result<()> {
        self.done_with(Value::Undef)
    }

    /// Transition pending → done carrying `value`.
    pub fn done_with<V: Into<Value>>(&self, value: V) -> Result<()> {
        self.settle(State::Done(value.into()))
    }

    /// Transition pending → failed.
    pub fn fail(&self, error: Error) -> Result<()> {
        self.fail_tagged(error, Vec::new())
    }

    /// Transition pending → failed with metadata tags.
    pub fn fail_tagged(&self, error: Error, tags: Vec<String>) -> Result<()> {
        self.settle(State::Failed(Failure { error, tags }))
    }

    /// Transition pending → cancelled.
    pub fn cancel(&self) -> Result<()> {
        self.settle(State::Cancelled)
    }

    /// Register an observer fired exactly once when the handle settles.
    /// On an already-settled handle the observer fires immediately.
    pub fn on_ready<F>(&self, cb: F)
    where
        F: FnOnce(&Handle) + 'static,
    {
        if self.is_ready() {
            cb(self);
        } else {
            self.inner.borrow_mut().observers.push(Box::new(cb));
        }
    }

    /// Copy another handle's terminal state onto this one, unless this
    /// handle has already settled. A pending `other` is a no-op.
    pub fn adopt(&self, other: &Handle) {
        if self.is_ready() {
            return;
        }
        let state = other.inner.borrow().state.clone();
        if !matches!(state, State::Pending) {
            let _ = self.settle(state);
        }
    }

    /// Return a new handle that settles done with `f(v)` when this one
    /// settles done with `v`; failed and cancelled propagate unchanged.
    pub fn transform<F>(&self, f: F) -> Handle
    where
        F: FnOnce(Value) -> Value + 'static,
    {
        let out = Handle::new(self.label());
        let target = out.clone();
        self.on_ready(move |h| {
            let state = h.inner.borrow().state.clone();
            match state {
                State::Done(v) => {
                    let _ = target.settle(State::Done(f(v)));
                }
                other => {
                    let _ = target.settle(other);
                }
            }
        });
        out
    }

    /// Block the caller until the handle is ready.
    ///
    /// The engine is single-threaded: a handle still pending here can
    /// never settle, so instead of spinning this reports `Stalled`.
    /// Done yields the carried value, cancellation yields `Undef`
    /// silently, failure re-raises the stored error.
    pub fn wait(&self) -> Result<Value> {
        let state = self.inner.borrow().state.clone();
        match state {
            State::Done(v) => Ok(v),
            State::Cancelled => Ok(Value::Undef),
            State::Failed(failure) => Err(failure.error),
            State::Pending => Err(Error::Stalled {
                label: self.label(),
            }),
        }
    }

    /// Whether two `Handle` values share the same underlying cell.
    pub fn same_handle(&self, other: &Handle) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn settle(&self, state: State) -> Result<()> {
        let observers = {
            let mut inner = self.inner.borrow_mut();
            if !matches!(inner.state, State::Pending) {
                return Err(Error::AlreadyReady {
                    label: inner.label.clone(),
                });
            }
            inner.state = state;
            std::mem::take(&mut inner.observers)
        };
        tracing::debug!(label = %self.label(), state = self.state_name(), "completion settled");
        for cb in observers {
            cb(self);
        }
        Ok(())
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("label", &self.inner.borrow().label)
            .field("state", &self.state_name())
            .finish()
    }
}
