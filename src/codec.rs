//! Encode/decode codec registries.
//!
//! Two process-wide mappings (one per direction) from a codec kind to a
//! factory producing a codec function. Codecs may be stateful: the
//! streaming `utf8` decoder keeps a residue buffer until a character
//! boundary arrives. Custom kinds are installed with
//! [`register_encoder`] / [`register_decoder`] before any source that
//! uses them is constructed.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::error::{Error, Result};
use crate::value::Value;

/// A codec function. `None` means the input was consumed into internal
/// state and there is nothing to emit yet.
pub type Codec = Box<dyn FnMut(&Value) -> Result<Option<Value>>>;

/// A factory building a codec from operator options.
pub type CodecFactory = Rc<dyn Fn(&[Value]) -> Result<Codec>>;

thread_local! {
    static ENCODERS: RefCell<HashMap<String, CodecFactory>> = RefCell::new(HashMap::new());
    static DECODERS: RefCell<HashMap<String, CodecFactory>> = RefCell::new(HashMap::new());
    static BUILTINS_INSTALLED: Cell<bool> = const { Cell::new(false) };
}

fn normalize(kind: &str) -> String {
    kind.to_ascii_lowercase().replace('-', "")
}

/// Register an encoder factory under `kind`.
pub fn register_encoder<F>(kind: &str, factory: F)
where
    F: Fn(&[Value]) -> Result<Codec> + 'static,
{
    ensure_builtins();
    ENCODERS.with(|m| m.borrow_mut().insert(normalize(kind), Rc::new(factory)));
}

/// Register a decoder factory under `kind`.
pub fn register_decoder<F>(kind: &str, factory: F)
where
    F: Fn(&[Value]) -> Result<Codec> + 'static,
{
    ensure_builtins();
    DECODERS.with(|m| m.borrow_mut().insert(normalize(kind), Rc::new(factory)));
}

/// Build an encoder for `kind`, or report it unsupported.
pub fn encoder(kind: &str, opts: &[Value]) -> Result<Codec> {
    ensure_builtins();
    let factory = ENCODERS
        .with(|m| m.borrow().get(&normalize(kind)).cloned())
        .ok_or_else(|| Error::unsupported_codec(kind))?;
    factory(opts)
}

/// Build a decoder for `kind`, or report it unsupported.
pub fn decoder(kind: &str, opts: &[Value]) -> Result<Codec> {
    ensure_builtins();
    let factory = DECODERS
        .with(|m| m.borrow().get(&normalize(kind)).cloned())
        .ok_or_else(|| Error::unsupported_codec(kind))?;
    factory(opts)
}

fn ensure_builtins() {
    let fresh = BUILTINS_INSTALLED.with(|done| {
        let fresh = !done.get();
        done.set(true);
        fresh
    });
    if !fresh {
        return;
    }

    ENCODERS.with(|m| {
        let mut m = m.borrow_mut();
        m.insert(
            "utf8".to_string(),
            Rc::new(|_opts| Ok(Box::new(encode_utf8) as Codec)),
        );
        m.insert(
            "json".to_string(),
            Rc::new(|_opts| Ok(Box::new(encode_json) as Codec)),
        );
        m.insert(
            "base64".to_string(),
            Rc::new(|_opts| Ok(Box::new(encode_base64) as Codec)),
        );
    });
    DECODERS.with(|m| {
        let mut m = m.borrow_mut();
        m.insert(
            "utf8".to_string(),
            Rc::new(|_opts| {
                let mut residue: Vec<u8> = Vec::new();
                Ok(Box::new(move |v: &Value| decode_utf8(&mut residue, v)) as Codec)
            }),
        );
        m.insert(
            "json".to_string(),
            Rc::new(|_opts| Ok(Box::new(decode_json) as Codec)),
        );
        m.insert(
            "base64".to_string(),
            Rc::new(|_opts| Ok(Box::new(decode_base64) as Codec)),
        );
    });
}

fn encode_utf8(v: &Value) -> Result<Option<Value>> {
    Ok(Some(Value::Bytes(v.to_bytes())))
}

/// Streaming byte→text decode. Incomplete trailing characters stay in
/// `residue`; an invalid sequence raises.
fn decode_utf8(residue: &mut Vec<u8>, v: &Value) -> Result<Option<Value>> {
    residue.extend_from_slice(&v.to_bytes());
    match std::str::from_utf8(residue) {
        Ok(s) => {
            let out = s.to_string();
            residue.clear();
            if out.is_empty() {
                Ok(None)
            } else {
                Ok(Some(Value::Str(out)))
            }
        }
        Err(e) => {
            if e.error_len().is_some() {
                return Err(Error::codec("utf8", "invalid UTF-8 sequence"));
            }
            let valid = e.valid_up_to();
            if valid == 0 {
                return Ok(None);
            }
            let out = String::from_utf8_lossy(&residue[..valid]).into_owned();
            residue.drain(..valid);
            Ok(Some(Value::Str(out)))
        }
    }
}

fn encode_json(v: &Value) -> Result<Option<Value>> {
    let json = value_to_json(v)?;
    let text = serde_json::to_string(&json).map_err(|e| Error::codec("json", e.to_string()))?;
    Ok(Some(Value::Str(text)))
}

fn decode_json(v: &Value) -> Result<Option<Value>> {
    let parsed: serde_json::Value = serde_json::from_str(&v.to_text())
        .map_err(|e| Error::codec("json", e.to_string()))?;
    Ok(Some(json_to_value(parsed)))
}

fn encode_base64(v: &Value) -> Result<Option<Value>> {
    Ok(Some(Value::Str(BASE64.encode(v.to_bytes()))))
}

fn decode_base64(v: &Value) -> Result<Option<Value>> {
    let bytes = BASE64
        .decode(v.to_text().trim())
        .map_err(|e| Error::codec("base64", e.to_string()))?;
    Ok(Some(Value::Bytes(bytes)))
}

fn value_to_json(v: &Value) -> Result<serde_json::Value> {
    Ok(match v {
        Value::Undef => serde_json::Value::Null,
        Value::Int(i) => (*i).into(),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Str(s) => s.clone().into(),
        Value::Bytes(b) => String::from_utf8_lossy(b).into_owned().into(),
        Value::List(items) => serde_json::Value::Array(
            items
                .iter()
                .map(value_to_json)
                .collect::<Result<Vec<_>>>()?,
        ),
        Value::Map(entries) => serde_json::Value::Object(
            entries
                .iter()
                .map(|(k, v)| Ok((k.clone(), value_to_json(v)?)))
                .collect::<Result<serde_json::Map<_, _>>>()?,
        ),
        Value::Source(_) | Value::Handle(_) => {
            return Err(Error::codec("json", "cannot encode a source or handle"))
        }
    })
}

fn json_to_value(j: serde_json::Value) -> Value {
    match j {
        serde_json::Value::Null => Value::Undef,
        serde_json::Value::Bool(b) => Value::Int(b as i64),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(0.0)),
        },
        serde_json::Value::String(s) => Value::Str(s),
        serde_json::Value::Array(items) => {
            Value::List(items.into_iter().map(json_to_value).collect())
        }
        serde_json::Value::Object(entries) => Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k, json_to_value(v)))
                .collect::<BTreeMap<_, _>>(),
        ),
    }
}
