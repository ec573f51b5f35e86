//! `Var` ↔ JSON conversion
//!
//! Arrays map to lists. JSON objects have no runtime-independent `Var` counterpart, so they
//! decode into a `JsonObject` host object whose properties are the object's members; scripts
//! read them as plain fields and list them with `keys()`.

use std::collections::BTreeMap;

use serde_json::{Map, Number, Value};

use crate::core::error::{BridgeError, BridgeResult};
use crate::dispatch::Callback;
use crate::object::PixelObject;

use super::Var;

/// Type name of host objects produced from JSON objects.
pub const JSON_OBJECT_TYPE: &str = "JsonObject";

pub fn to_json(var: &Var) -> BridgeResult<Value> {
    Ok(match var {
        Var::Null => Value::Null,
        Var::Bool(b) => Value::Bool(*b),
        Var::Int64(i) => Value::Number(Number::from(*i)),
        Var::UInt64(u) => Value::Number(Number::from(*u)),
        Var::Float64(f) => Number::from_f64(*f)
            .map(Value::Number)
            .ok_or_else(|| BridgeError::Conversion(format!("{f} has no JSON representation")))?,
        Var::String(s) => Value::String(s.clone()),
        Var::List(list) => Value::Array(list.iter().map(to_json).collect::<BridgeResult<_>>()?),
        Var::HostObject(object) if object.type_name() == JSON_OBJECT_TYPE => {
            let members: BTreeMap<String, Var> = object.properties().into_iter().collect();
            let mut map = Map::new();
            for (key, value) in &members {
                map.insert(key.clone(), to_json(value)?);
            }
            Value::Object(map)
        }
        other => {
            return Err(BridgeError::Conversion(format!(
                "{} cannot be encoded as JSON",
                other.describe()
            )))
        }
    })
}

pub fn to_json_string(var: &Var) -> BridgeResult<String> {
    serde_json::to_string(&to_json(var)?).map_err(|e| BridgeError::Conversion(e.to_string()))
}

pub fn from_json(value: &Value) -> Var {
    match value {
        Value::Null => Var::Null,
        Value::Bool(b) => Var::Bool(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Var::Int64(i)
            } else if let Some(u) = n.as_u64() {
                Var::UInt64(u)
            } else {
                Var::Float64(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(s) => Var::String(s.clone()),
        Value::Array(items) => Var::List(items.iter().map(from_json).collect()),
        Value::Object(map) => {
            let mut object = PixelObject::new((), JSON_OBJECT_TYPE);
            object.add_callback(Callback::new("keys", |args, _| {
                let Some(this) = args.as_list().and_then(|l| l.get(1)).and_then(Var::as_host_object)
                else {
                    return Var::Null;
                };
                let mut keys: Vec<String> =
                    this.properties().into_iter().map(|(key, _)| key).collect();
                keys.sort();
                Var::List(keys.into_iter().map(Var::String).collect())
            }));
            for (key, member) in map {
                object.set_property(key, from_json(member));
            }
            Var::new_host_object(object)
        }
    }
}

pub fn from_json_str(text: &str) -> BridgeResult<Var> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| BridgeError::Conversion(e.to_string()))?;
    Ok(from_json(&value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_objects_decode_to_host_objects() {
        let var = from_json_str(r#"{"name": "Jordan", "age": 23, "tags": [true, null]}"#).unwrap();
        let object = var.as_host_object().unwrap();
        assert_eq!(object.type_name(), JSON_OBJECT_TYPE);
        assert_eq!(object.get_property("name").as_str(), "Jordan");
        assert_eq!(object.get_property("age").as_i64(), 23);

        let encoded = to_json_string(&var).unwrap();
        assert_eq!(encoded, r#"{"age":23,"name":"Jordan","tags":[true,null]}"#);
    }

    #[test]
    fn test_large_unsigned_stays_unsigned() {
        let var = from_json_str("18446744073709551615").unwrap();
        assert_eq!(var, Var::UInt64(u64::MAX));
    }

    #[test]
    fn test_non_finite_floats_fail() {
        assert!(to_json(&Var::new_f64(f64::NAN)).is_err());
    }
}
