//! Per-item transformation and filtering operators.

use std::collections::{BTreeMap, HashSet, VecDeque};

use regex::Regex;

use crate::codec;
use crate::error::{Error, Result};
use crate::source::Source;
use crate::value::Value;

/// The accepted shapes of a [`Source::filter`] condition.
pub enum FilterSpec {
    /// Keep items satisfying the predicate
    Pred(Box<dyn FnMut(&Value) -> bool>),
    /// Keep items whose text matches the pattern
    Regex(Regex),
    /// Keep items string-equal to the value (`Undef` matches `Undef`)
    Eq(Value),
    /// Keep `Map` items where every named field matches
    Fields(BTreeMap<String, FieldMatcher>),
}

/// A per-field condition for [`FilterSpec::Fields`]. A missing field
/// never matches.
pub enum FieldMatcher {
    /// String equality on the field
    Eq(Value),
    /// Pattern match on the field's text
    Regex(Regex),
    /// Arbitrary predicate on the field
    Pred(Box<dyn Fn(&Value) -> bool>),
}

impl FilterSpec {
    /// A predicate condition.
    pub fn pred<F>(f: F) -> FilterSpec
    where
        F: FnMut(&Value) -> bool + 'static,
    {
        FilterSpec::Pred(Box::new(f))
    }

    /// A structural condition over named fields of `Map` items.
    pub fn fields(matchers: BTreeMap<String, FieldMatcher>) -> FilterSpec {
        FilterSpec::Fields(matchers)
    }

    fn matches(&mut self, item: &Value) -> bool {
        match self {
            FilterSpec::Pred(f) => f(item),
            FilterSpec::Regex(re) => re.is_match(&item.to_text()),
            FilterSpec::Eq(expected) => expected.key() == item.key(),
            FilterSpec::Fields(matchers) => {
                let entries = match item {
                    Value::Map(entries) => entries,
                    _ => return false,
                };
                matchers.iter().all(|(field, matcher)| {
                    let value = match entries.get(field) {
                        Some(v) => v,
                        None => return false,
                    };
                    match matcher {
                        FieldMatcher::Eq(expected) => expected.key() == value.key(),
                        FieldMatcher::Regex(re) => re.is_match(&value.to_text()),
                        FieldMatcher::Pred(f) => f(value),
                    }
                })
            }
        }
    }
}

impl From<Regex> for FilterSpec {
    fn from(re: Regex) -> Self {
        FilterSpec::Regex(re)
    }
}

impl From<Value> for FilterSpec {
    fn from(v: Value) -> Self {
        FilterSpec::Eq(v)
    }
}

impl From<&str> for FilterSpec {
    fn from(v: &str) -> Self {
        FilterSpec::Eq(v.into())
    }
}

impl From<i64> for FilterSpec {
    fn from(v: i64) -> Self {
        FilterSpec::Eq(v.into())
    }
}

fn platform_newline() -> &'static str {
    if cfg!(windows) {
        "\r\n"
    } else {
        "\n"
    }
}

impl Source {
    /// Emit `f(x)` for each upstream `x`.
    pub fn map<F>(&self, mut f: F) -> Source
    where
        F: FnMut(&Value) -> Value + 'static,
    {
        self.stage("map", move |v, d| d.emit(f(v)))
    }

    /// Emit each upstream item matching the condition.
    pub fn filter<S: Into<FilterSpec>>(&self, spec: S) -> Source {
        let mut spec = spec.into();
        self.stage("filter", move |v, d| {
            if spec.matches(v) {
                d.emit(v.clone())
            } else {
                Ok(())
            }
        })
    }

    /// Encode each item with the registered `kind` encoder.
    pub fn encode(&self, kind: &str, opts: &[Value]) -> Result<Source> {
        let mut codec = codec::encoder(kind, opts)?;
        Ok(self.stage(&format!("encode:{}", kind), move |v, d| {
            match codec(v)? {
                Some(out) => d.emit(out),
                None => Ok(()),
            }
        }))
    }

    /// Decode each item with the registered `kind` decoder. Stateful
    /// decoders may hold residue across items.
    pub fn decode(&self, kind: &str, opts: &[Value]) -> Result<Source> {
        let mut codec = codec::decoder(kind, opts)?;
        Ok(self.stage(&format!("decode:{}", kind), move |v, d| {
            match codec(v)? {
                Some(out) => d.emit(out),
                None => Ok(()),
            }
        }))
    }

    /// Emit `text ∘ x` for each upstream `x`.
    pub fn prefix<S: Into<String>>(&self, text: S) -> Source {
        let text = text.into();
        self.stage("prefix", move |v, d| d.emit(format!("{}{}", text, v)))
    }

    /// Emit `x ∘ text` for each upstream `x`.
    pub fn suffix<S: Into<String>>(&self, text: S) -> Source {
        let text = text.into();
        self.stage("suffix", move |v, d| d.emit(format!("{}{}", v, text)))
    }

    /// Strip one trailing delimiter from each item. The platform line
    /// ending is captured at operator creation when none is given.
    pub fn chomp(&self, delim: Option<&str>) -> Source {
        let delim = match delim {
            Some(d) => d.to_string(),
            None => platform_newline().to_string(),
        };
        self.stage("chomp", move |v, d| {
            let text = v.to_text();
            let stripped = match text.strip_suffix(&delim) {
                Some(rest) => rest.to_string(),
                None => text,
            };
            d.emit(stripped)
        })
    }

    /// Emit each fragment of the item split on `delim`; with no (or an
    /// empty) delimiter, split between every character.
    pub fn split(&self, delim: Option<&str>) -> Source {
        let delim = delim.map(str::to_string);
        self.stage("split", move |v, d| {
            let text = v.to_text();
            match &delim {
                Some(sep) if !sep.is_empty() => {
                    for part in text.split(sep.as_str()) {
                        d.emit(part)?;
                    }
                }
                _ => {
                    for ch in text.chars() {
                        d.emit(ch.to_string())?;
                    }
                }
            }
            Ok(())
        })
    }

    /// Reassemble the stream into delimiter-terminated lines, emitted
    /// without the delimiter. The unterminated residue is discarded when
    /// the stream completes.
    pub fn by_line(&self, delim: Option<&str>) -> Source {
        let delim = delim.unwrap_or("\n").to_string();
        let mut residue = String::new();
        self.stage("by_line", move |v, d| {
            residue.push_str(&v.to_text());
            while let Some(pos) = residue.find(&delim) {
                let line: String = residue[..pos].to_string();
                residue.drain(..pos + delim.len());
                d.emit(line)?;
            }
            Ok(())
        })
    }

    /// Reassemble the byte stream into chunks of exactly `size` bytes.
    /// The short tail is discarded when the stream completes.
    pub fn chunksize(&self, size: usize) -> Result<Source> {
        if size == 0 {
            return Err(Error::invalid_argument("chunksize requires a positive size"));
        }
        let mut buffer: Vec<u8> = Vec::new();
        Ok(self.stage("chunksize", move |v, d| {
            buffer.extend_from_slice(&v.to_bytes());
            while buffer.len() >= size {
                let chunk: Vec<u8> = buffer.drain(..size).collect();
                d.emit(chunk)?;
            }
            Ok(())
        }))
    }

    /// Emit a map of named capture groups for every match of `pattern`
    /// in the item's text.
    pub fn extract_all(&self, pattern: &str) -> Result<Source> {
        let pattern = Regex::new(pattern)
            .map_err(|e| Error::invalid_argument(format!("bad pattern: {}", e)))?;
        Ok(self.stage("extract_all", move |v, d| {
            let text = v.to_text();
            for caps in pattern.captures_iter(&text) {
                let mut groups = BTreeMap::new();
                for name in pattern.capture_names().flatten() {
                    if let Some(m) = caps.name(name) {
                        groups.insert(name.to_string(), Value::from(m.as_str()));
                    }
                }
                d.emit(Value::Map(groups))?;
            }
            Ok(())
        }))
    }

    /// Emit `[x, i]` with `i` counting items from zero.
    pub fn with_index(&self) -> Source {
        let mut index: i64 = 0;
        self.stage("with_index", move |v, d| {
            let out = Value::List(vec![v.clone(), Value::Int(index)]);
            index += 1;
            d.emit(out)
        })
    }

    /// Emit each value at most once, by string equality. `Undef` is
    /// tracked by its own one-shot latch.
    pub fn distinct(&self) -> Source {
        let mut seen: HashSet<String> = HashSet::new();
        let mut seen_undef = false;
        self.stage("distinct", move |v, d| match v.key() {
            None => {
                if seen_undef {
                    Ok(())
                } else {
                    seen_undef = true;
                    d.emit(Value::Undef)
                }
            }
            Some(key) => {
                if seen.insert(key) {
                    d.emit(v.clone())
                } else {
                    Ok(())
                }
            }
        })
    }

    /// Emit the item when it is the first, or differs from its
    /// predecessor by string equality (`Undef` differs from every text).
    pub fn distinct_until_changed(&self) -> Source {
        let mut previous: Option<Option<String>> = None;
        self.stage("distinct_until_changed", move |v, d| {
            let key = v.key();
            if previous.as_ref() == Some(&key) {
                return Ok(());
            }
            previous = Some(key);
            d.emit(v.clone())
        })
    }

    /// Drop the first `count` items.
    pub fn skip(&self, count: usize) -> Source {
        let mut remaining = count;
        self.stage("skip", move |v, d| {
            if remaining > 0 {
                remaining -= 1;
                Ok(())
            } else {
                d.emit(v.clone())
            }
        })
    }

    /// Drop the last `count` items: each item is delayed behind a
    /// sliding buffer whose residue is discarded on completion.
    pub fn skip_last(&self, count: usize) -> Source {
        let mut buffer: VecDeque<Value> = VecDeque::with_capacity(count + 1);
        self.stage("skip_last", move |v, d| {
            buffer.push_back(v.clone());
            if buffer.len() > count {
                match buffer.pop_front() {
                    Some(front) => d.emit(front),
                    None => Ok(()),
                }
            } else {
                Ok(())
            }
        })
    }

    /// Emit the first `count` items, then finish. `take(0)` is an
    /// immediately-finished source emitting nothing.
    pub fn take(&self, count: usize) -> Source {
        if count == 0 {
            let down = self.chained("take");
            let _ = down.finish();
            return down;
        }
        let mut remaining = count;
        self.stage("take", move |v, d| {
            if remaining == 0 {
                return Ok(());
            }
            d.emit(v.clone())?;
            remaining -= 1;
            if remaining == 0 {
                let _ = d.finish();
            }
            Ok(())
        })
    }
}
