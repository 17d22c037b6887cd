//! Root-source entry points.
//!
//! Factories build root sources whose emission is deferred behind the
//! source's `on_get` action: nothing is pushed until the chain is driven
//! by [`Source::get`] or [`Source::wait`], so downstream stages wired
//! after construction still observe every item.

use std::io::Read;

use crate::error::Error;
use crate::handle::Handle;
use crate::source::Source;
use crate::value::Value;

/// Bytes per read from a reader-backed root source.
const READ_CHUNK: usize = 4096;

/// The accepted input shapes for [`Source::from`].
pub enum FromInput {
    /// An in-memory ordered sequence, emitted element by element.
    Items(Vec<Value>),
    /// A byte reader, emitted in fixed-size chunks until end-of-stream.
    Reader(Box<dyn Read>),
    /// An existing completion handle, bridged into a source.
    Handle(Handle),
}

impl FromInput {
    /// Wrap a byte reader.
    pub fn reader<R: Read + 'static>(reader: R) -> FromInput {
        FromInput::Reader(Box::new(reader))
    }
}

impl<T: Into<Value>> From<Vec<T>> for FromInput {
    fn from(items: Vec<T>) -> Self {
        FromInput::Items(items.into_iter().map(Into::into).collect())
    }
}

impl From<Handle> for FromInput {
    fn from(handle: Handle) -> Self {
        FromInput::Handle(handle)
    }
}

impl Source {
    /// Create a root source from a sequence, a byte reader, or an
    /// existing completion handle.
    pub fn from<I: Into<FromInput>>(input: I) -> Source {
        let source = Source::new("from");
        match input.into() {
            FromInput::Items(items) => {
                source.set_on_get(move |s| {
                    for item in items {
                        if s.emit(item).is_err() {
                            return;
                        }
                    }
                    let _ = s.finish();
                });
            }
            FromInput::Reader(mut reader) => {
                source.set_on_get(move |s| {
                    let mut buf = [0u8; READ_CHUNK];
                    loop {
                        match reader.read(&mut buf) {
                            Ok(0) => {
                                let _ = s.finish();
                                return;
                            }
                            Ok(n) => {
                                if s.emit(buf[..n].to_vec()).is_err() {
                                    return;
                                }
                            }
                            Err(e) => {
                                let _ = s.fail(e.into());
                                return;
                            }
                        }
                    }
                });
            }
            FromInput::Handle(handle) => {
                source.set_on_get(move |s| {
                    let target = s.clone();
                    handle.on_ready(move |h| {
                        if let Some(failure) = h.failure() {
                            let _ = target.completed().fail_tagged(failure.error, failure.tags);
                        } else if let Some(value) = h.value() {
                            if value.is_undef() {
                                let _ = target.finish();
                            } else if target.emit(value).is_ok() {
                                let _ = target.finish();
                            }
                        } else {
                            let _ = target.finish();
                        }
                    });
                });
            }
        }
        source
    }

    /// A root source emitting every integer of `range`, then finishing.
    pub fn range(range: std::ops::Range<i64>) -> Source {
        let source = Source::new("range");
        source.set_on_get(move |s| {
            for i in range {
                if s.emit(i).is_err() {
                    return;
                }
            }
            let _ = s.finish();
        });
        source
    }

    /// A root source emitting `value` `times` times, then finishing.
    pub fn repeat<V: Into<Value>>(value: V, times: usize) -> Source {
        let value = value.into();
        let source = Source::new("repeat");
        source.set_on_get(move |s| {
            for _ in 0..times {
                if s.emit(value.clone()).is_err() {
                    return;
                }
            }
            let _ = s.finish();
        });
        source
    }

    /// A root source that is already done and emits nothing.
    pub fn empty() -> Source {
        let source = Source::new("empty");
        let _ = source.finish();
        source
    }

    /// A root source that never completes.
    pub fn never() -> Source {
        Source::new("never")
    }

    /// A root source that is already failed with `error`.
    pub fn throw(error: Error) -> Source {
        let source = Source::new("throw");
        let _ = source.fail(error);
        source
    }
}
