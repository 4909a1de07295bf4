//! Dotted-path access into JSON documents.
//!
//! JGET/JSET/JDEL address values inside an object's JSON form with paths
//! like `properties.speed` or `coordinates.0`. Numeric segments index
//! arrays; setting past the end of an array pads with nulls.

use serde_json::Value;

use crate::error::{Error, Result};

fn segments(path: &str) -> Vec<&str> {
    path.split('.').filter(|s| !s.is_empty()).collect()
}

pub fn get<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = doc;
    for seg in segments(path) {
        current = match current {
            Value::Object(map) => map.get(seg)?,
            Value::Array(items) => items.get(seg.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Set `path` to `value`, creating intermediate objects as needed.
pub fn set(doc: &mut Value, path: &str, value: Value) -> Result<()> {
    let segs = segments(path);
    if segs.is_empty() {
        *doc = value;
        return Ok(());
    }
    let mut current = doc;
    for (i, seg) in segs.iter().enumerate() {
        let last = i == segs.len() - 1;
        match seg.parse::<usize>() {
            Ok(idx) => {
                if !current.is_array() {
                    *current = Value::Array(Vec::new());
                }
                let items = current.as_array_mut().unwrap();
                if items.len() <= idx {
                    items.resize(idx + 1, Value::Null);
                }
                if last {
                    items[idx] = value;
                    return Ok(());
                }
                current = &mut items[idx];
            }
            Err(_) => {
                if !current.is_object() {
                    *current = Value::Object(serde_json::Map::new());
                }
                let map = current.as_object_mut().unwrap();
                if last {
                    map.insert(seg.to_string(), value);
                    return Ok(());
                }
                current = map.entry(seg.to_string()).or_insert(Value::Null);
            }
        }
    }
    Ok(())
}

/// Remove the value at `path`. Errors when the path does not resolve.
pub fn del(doc: &mut Value, path: &str) -> Result<()> {
    let segs = segments(path);
    if segs.is_empty() {
        return Err(Error::PathNotFound);
    }
    let mut current = doc;
    for seg in &segs[..segs.len() - 1] {
        current = match current {
            Value::Object(map) => map.get_mut(*seg).ok_or(Error::PathNotFound)?,
            Value::Array(items) => {
                let idx: usize = seg.parse().map_err(|_| Error::PathNotFound)?;
                items.get_mut(idx).ok_or(Error::PathNotFound)?
            }
            _ => return Err(Error::PathNotFound),
        };
    }
    let last = segs[segs.len() - 1];
    match current {
        Value::Object(map) => {
            map.remove(last).ok_or(Error::PathNotFound)?;
        }
        Value::Array(items) => {
            let idx: usize = last.parse().map_err(|_| Error::PathNotFound)?;
            if idx >= items.len() {
                return Err(Error::PathNotFound);
            }
            items.remove(idx);
        }
        _ => return Err(Error::PathNotFound),
    }
    Ok(())
}

/// JSET value coercion: bare numbers, booleans and null are written as
/// their JSON forms; everything else becomes a string unless `raw`.
pub fn coerce(token: &str, raw: bool) -> Result<Value> {
    if raw {
        return serde_json::from_str(token).map_err(|_| Error::InvalidArgument(token.to_string()));
    }
    match token {
        "true" => return Ok(Value::Bool(true)),
        "false" => return Ok(Value::Bool(false)),
        "null" => return Ok(Value::Null),
        _ => {}
    }
    if let Ok(n) = token.parse::<f64>()
        && let Some(num) = serde_json::Number::from_f64(n)
    {
        return Ok(Value::Number(num));
    }
    Ok(Value::String(token.to_string()))
}
