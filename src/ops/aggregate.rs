//! Aggregation and terminal operators.
//!
//! Aggregators buffer or fold upstream items and emit only when the
//! upstream settles done; a failed or cancelled upstream is inherited
//! without emitting. `some` and `every` may decide early and finish
//! their downstream before the upstream is over.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::Result;
use crate::handle::Handle;
use crate::source::Source;
use crate::value::Value;

/// Running numeric fold shared by `sum`, `mean` and `statistics`.
#[derive(Default)]
struct NumFold {
    count: usize,
    total: f64,
    all_int: bool,
    min: Option<(f64, Value)>,
    max: Option<(f64, Value)>,
}

impl NumFold {
    fn new() -> Self {
        NumFold {
            all_int: true,
            ..Default::default()
        }
    }

    fn add(&mut self, v: &Value) {
        let n = v.as_f64();
        self.count += 1;
        self.total += n;
        if !matches!(v, Value::Int(_)) {
            self.all_int = false;
        }
        if self.min.as_ref().map_or(true, |(best, _)| n < *best) {
            self.min = Some((n, v.clone()));
        }
        if self.max.as_ref().map_or(true, |(best, _)| n > *best) {
            self.max = Some((n, v.clone()));
        }
    }

    fn sum_value(&self) -> Value {
        if self.all_int {
            Value::Int(self.total as i64)
        } else {
            Value::Float(self.total)
        }
    }

    fn mean_value(&self) -> Value {
        Value::Float(self.total / self.count.max(1) as f64)
    }

    fn min_value(&self) -> Value {
        self.min
            .as_ref()
            .map_or(Value::Undef, |(_, v)| v.clone())
    }

    fn max_value(&self) -> Value {
        self.max
            .as_ref()
            .map_or(Value::Undef, |(_, v)| v.clone())
    }
}

impl Source {
    /// Fold upstream items into `state`; on upstream done, `complete`
    /// emits the result(s) into the downstream, which then finishes.
    fn fold_stage<T, F, C>(&self, label: &str, state: T, mut per_item: F, complete: C) -> Source
    where
        T: 'static,
        F: FnMut(&mut T, &Value) -> Result<()> + 'static,
        C: FnOnce(T, &Source) + 'static,
    {
        let cell = Rc::new(RefCell::new(Some(state)));
        let folding = cell.clone();
        self.stage_with_completion(
            label,
            move |v, _d| match folding.borrow_mut().as_mut() {
                Some(state) => per_item(state, v),
                None => Ok(()),
            },
            move |h, d| {
                if h.is_done() {
                    if let Some(state) = cell.borrow_mut().take() {
                        complete(state, d);
                    }
                    let _ = d.finish();
                } else {
                    d.adopt_from(h);
                }
            },
        )
    }

    /// Emit the number of upstream items on upstream done.
    pub fn count(&self) -> Source {
        self.fold_stage(
            "count",
            0usize,
            |n, _| {
                *n += 1;
                Ok(())
            },
            |n, d| {
                let _ = d.emit(n as i64);
            },
        )
    }

    /// Emit the numeric sum of upstream items on upstream done.
    pub fn sum(&self) -> Source {
        self.fold_stage(
            "sum",
            NumFold::new(),
            |acc, v| {
                acc.add(v);
                Ok(())
            },
            |acc, d| {
                let _ = d.emit(acc.sum_value());
            },
        )
    }

    /// Emit the numeric mean on upstream done; an empty stream divides
    /// by one and yields zero.
    pub fn mean(&self) -> Source {
        self.fold_stage(
            "mean",
            NumFold::new(),
            |acc, v| {
                acc.add(v);
                Ok(())
            },
            |acc, d| {
                let _ = d.emit(acc.mean_value());
            },
        )
    }

    /// Emit the numerically smallest item on upstream done, or `Undef`
    /// for an empty stream.
    pub fn min(&self) -> Source {
        self.fold_stage(
            "min",
            NumFold::new(),
            |acc, v| {
                acc.add(v);
                Ok(())
            },
            |acc, d| {
                let _ = d.emit(acc.min_value());
            },
        )
    }

    /// Emit the numerically largest item on upstream done, or `Undef`
    /// for an empty stream.
    pub fn max(&self) -> Source {
        self.fold_stage(
            "max",
            NumFold::new(),
            |acc, v| {
                acc.add(v);
                Ok(())
            },
            |acc, d| {
                let _ = d.emit(acc.max_value());
            },
        )
    }

    /// Emit a `{count, sum, min, max, mean}` map on upstream done.
    pub fn statistics(&self) -> Source {
        self.fold_stage(
            "statistics",
            NumFold::new(),
            |acc, v| {
                acc.add(v);
                Ok(())
            },
            |acc, d| {
                let stats = [
                    ("count", Value::Int(acc.count as i64)),
                    ("sum", acc.sum_value()),
                    ("min", acc.min_value()),
                    ("max", acc.max_value()),
                    ("mean", acc.mean_value()),
                ]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect();
                let _ = d.emit(Value::Map(stats));
            },
        )
    }

    /// Emit `1` and finish on the first item satisfying `pred`; emit
    /// `0` when the upstream finishes without a match.
    pub fn some<F>(&self, mut pred: F) -> Source
    where
        F: FnMut(&Value) -> bool + 'static,
    {
        self.stage_with_completion(
            "some",
            move |v, d| {
                if d.is_ready() {
                    return Ok(());
                }
                if pred(v) {
                    d.emit(1)?;
                    let _ = d.finish();
                }
                Ok(())
            },
            |h, d| {
                if d.is_ready() {
                    return;
                }
                if h.is_done() {
                    let _ = d.emit(0);
                    let _ = d.finish();
                } else {
                    d.adopt_from(h);
                }
            },
        )
    }

    /// Emit `0` and finish on the first item violating `pred`; emit `1`
    /// when the upstream finishes with every item satisfying it.
    pub fn every<F>(&self, mut pred: F) -> Source
    where
        F: FnMut(&Value) -> bool + 'static,
    {
        self.stage_with_completion(
            "every",
            move |v, d| {
                if d.is_ready() {
                    return Ok(());
                }
                if !pred(v) {
                    d.emit(0)?;
                    let _ = d.finish();
                }
                Ok(())
            },
            |h, d| {
                if d.is_ready() {
                    return;
                }
                if h.is_done() {
                    let _ = d.emit(1);
                    let _ = d.finish();
                } else {
                    d.adopt_from(h);
                }
            },
        )
    }

    fn sort_stage<K>(&self, label: &str, numeric: bool, reverse: bool, mut key: K) -> Source
    where
        K: FnMut(&Value) -> Value + 'static,
    {
        self.fold_stage(
            label,
            Vec::<(Value, Value)>::new(),
            move |buf, v| {
                buf.push((key(v), v.clone()));
                Ok(())
            },
            move |buf, d| {
                let sorted: Vec<Value> = if numeric {
                    let mut keyed: Vec<(f64, Value)> = buf
                        .into_iter()
                        .map(|(k, v)| (k.as_f64(), v))
                        .collect();
                    keyed.sort_by(|a, b| {
                        if reverse {
                            b.0.total_cmp(&a.0)
                        } else {
                            a.0.total_cmp(&b.0)
                        }
                    });
                    keyed.into_iter().map(|(_, v)| v).collect()
                } else {
                    let mut keyed: Vec<(String, Value)> = buf
                        .into_iter()
                        .map(|(k, v)| (k.to_text(), v))
                        .collect();
                    keyed.sort_by(|a, b| {
                        if reverse {
                            b.0.cmp(&a.0)
                        } else {
                            a.0.cmp(&b.0)
                        }
                    });
                    keyed.into_iter().map(|(_, v)| v).collect()
                };
                for v in sorted {
                    if d.emit(v).is_err() {
                        break;
                    }
                }
            },
        )
    }

    /// Buffer all items and emit them on upstream done, stably sorted by
    /// the textual key.
    pub fn sort_by<K>(&self, key: K) -> Source
    where
        K: FnMut(&Value) -> Value + 'static,
    {
        self.sort_stage("sort_by", false, false, key)
    }

    /// Like [`Source::sort_by`] with numeric key comparison.
    pub fn nsort_by<K>(&self, key: K) -> Source
    where
        K: FnMut(&Value) -> Value + 'static,
    {
        self.sort_stage("nsort_by", true, false, key)
    }

    /// Like [`Source::sort_by`] in descending key order.
    pub fn rev_sort_by<K>(&self, key: K) -> Source
    where
        K: FnMut(&Value) -> Value + 'static,
    {
        self.sort_stage("rev_sort_by", false, true, key)
    }

    /// Like [`Source::nsort_by`] in descending key order.
    pub fn rev_nsort_by<K>(&self, key: K) -> Source
    where
        K: FnMut(&Value) -> Value + 'static,
    {
        self.sort_stage("rev_nsort_by", true, true, key)
    }

    /// A handle carrying the accumulated items as a `List` once this
    /// source settles done.
    pub fn as_list(&self) -> Handle {
        let items = Rc::new(RefCell::new(Vec::new()));
        let sink = items.clone();
        self.each(move |v| {
            sink.borrow_mut().push(v.clone());
            Ok(())
        });
        self.completed()
            .transform(move |_| Value::List(items.borrow_mut().drain(..).collect()))
    }

    /// Alias of [`Source::as_list`].
    pub fn as_arrayref(&self) -> Handle {
        self.as_list()
    }

    /// A handle carrying the concatenated text of all items once this
    /// source settles done.
    pub fn as_string(&self) -> Handle {
        let text = Rc::new(RefCell::new(String::new()));
        let sink = text.clone();
        self.each(move |v| {
            sink.borrow_mut().push_str(&v.to_text());
            Ok(())
        });
        self.completed()
            .transform(move |_| Value::Str(std::mem::take(&mut *text.borrow_mut())))
    }
}
