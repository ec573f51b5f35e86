//! Cross-runtime value model
//!
//! [`Var`] is the one value type exchanged between host code and every embedded runtime.
//! Data variants (`Int64`, `UInt64`, `String`, `Bool`, `Float64`, `Null`, `List`) are owned
//! outright. `Object` and `Function` hold a [`ScriptRef`] into the runtime that produced them,
//! and `HostObject` holds a shared [`PixelObject`].

mod handle;
mod json;
mod list;
pub(crate) mod numeric;

pub use handle::{Destructor, HostHandle, ReleaseGuard, ScriptRef};
pub use json::{from_json, from_json_str, to_json, to_json_string, JSON_OBJECT_TYPE};
pub use list::VarList;
pub use numeric::{f64_to_i64, i64_to_u64, u64_to_i64};

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::error::{BridgeError, BridgeResult};
use crate::object::PixelObject;

/// Tag of a [`Var`]. Discriminants are stable across the C boundary.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VarType {
    Int64 = 0,
    UInt64 = 1,
    String = 2,
    Bool = 3,
    Float64 = 4,
    Null = 5,
    Object = 6,
    HostObject = 7,
    List = 8,
    Function = 9,
}

/// Universal tagged value
#[derive(Clone, Default)]
pub enum Var {
    Int64(i64),
    UInt64(u64),
    String(String),
    Bool(bool),
    Float64(f64),
    #[default]
    Null,
    /// A table/object owned by a runtime
    Object(ScriptRef),
    /// A host-defined pseudo-object
    HostObject(Arc<PixelObject>),
    List(VarList),
    /// A callable owned by a runtime
    Function(ScriptRef),
}

macro_rules! sentinel_accessor {
    ($(#[$meta:meta])* $name:ident, $variant:ident, $ty:ty, $sentinel:expr) => {
        $(#[$meta])*
        pub fn $name(&self) -> $ty {
            match self {
                Var::$variant(value) => value.clone(),
                _ => $sentinel,
            }
        }
    };
}

macro_rules! try_accessor {
    ($name:ident, $variant:ident, $ty:ty) => {
        pub fn $name(&self) -> BridgeResult<$ty> {
            match self {
                Var::$variant(value) => Ok(value.clone()),
                other => Err(BridgeError::TypeMismatch {
                    expected: VarType::$variant,
                    found: other.tag(),
                }),
            }
        }
    };
}

impl Var {
    pub fn new_i64(value: i64) -> Self {
        Var::Int64(value)
    }

    pub fn new_u64(value: u64) -> Self {
        Var::UInt64(value)
    }

    pub fn new_f64(value: f64) -> Self {
        Var::Float64(value)
    }

    pub fn new_bool(value: bool) -> Self {
        Var::Bool(value)
    }

    pub fn new_string(value: impl Into<String>) -> Self {
        Var::String(value.into())
    }

    pub fn new_null() -> Self {
        Var::Null
    }

    pub fn new_list() -> Self {
        Var::List(VarList::new())
    }

    /// Wrap a freshly built object. The object can no longer gain methods afterwards.
    pub fn new_host_object(object: PixelObject) -> Self {
        Var::HostObject(Arc::new(object))
    }

    pub fn tag(&self) -> VarType {
        match self {
            Var::Int64(_) => VarType::Int64,
            Var::UInt64(_) => VarType::UInt64,
            Var::String(_) => VarType::String,
            Var::Bool(_) => VarType::Bool,
            Var::Float64(_) => VarType::Float64,
            Var::Null => VarType::Null,
            Var::Object(_) => VarType::Object,
            Var::HostObject(_) => VarType::HostObject,
            Var::List(_) => VarType::List,
            Var::Function(_) => VarType::Function,
        }
    }

    pub fn is(&self, tag: VarType) -> bool {
        self.tag() == tag
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Var::Null)
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Var::Int64(_) | Var::UInt64(_) | Var::Float64(_))
    }

    sentinel_accessor!(
        /// The `Int64` payload, or `0` on any other tag.
        as_i64, Int64, i64, 0
    );
    sentinel_accessor!(as_u64, UInt64, u64, 0);
    sentinel_accessor!(as_f64, Float64, f64, 0.0);
    sentinel_accessor!(as_bool, Bool, bool, false);

    /// The `String` payload, or `""` on any other tag.
    pub fn as_str(&self) -> &str {
        match self {
            Var::String(value) => value,
            _ => "",
        }
    }

    pub fn as_list(&self) -> Option<&VarList> {
        match self {
            Var::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut VarList> {
        match self {
            Var::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_host_object(&self) -> Option<&Arc<PixelObject>> {
        match self {
            Var::HostObject(object) => Some(object),
            _ => None,
        }
    }

    /// The script reference behind an `Object` or `Function`.
    pub fn as_script_ref(&self) -> Option<&ScriptRef> {
        match self {
            Var::Object(script_ref) | Var::Function(script_ref) => Some(script_ref),
            _ => None,
        }
    }

    try_accessor!(try_i64, Int64, i64);
    try_accessor!(try_u64, UInt64, u64);
    try_accessor!(try_f64, Float64, f64);
    try_accessor!(try_bool, Bool, bool);
    try_accessor!(try_string, String, String);
    try_accessor!(try_host_object, HostObject, Arc<PixelObject>);

    pub fn try_str(&self) -> BridgeResult<&str> {
        match self {
            Var::String(value) => Ok(value),
            other => Err(BridgeError::TypeMismatch {
                expected: VarType::String,
                found: other.tag(),
            }),
        }
    }

    pub fn try_list(&self) -> BridgeResult<&VarList> {
        match self {
            Var::List(list) => Ok(list),
            other => Err(BridgeError::TypeMismatch {
                expected: VarType::List,
                found: other.tag(),
            }),
        }
    }

    /// Equality that compares numbers by value across tags.
    ///
    /// Runtimes without an unsigned type hand `UInt64` back as `Int64`, and integral floats may
    /// come back as integers, so round-trips compare with this instead of `==`.
    pub fn equivalent(&self, other: &Var) -> bool {
        match (self, other) {
            (Var::List(a), Var::List(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.equivalent(y))
            }
            (a, b) if a.is_number() && b.is_number() => numeric::numbers_equal(a, b),
            (a, b) => a == b,
        }
    }

    /// Short description used in error messages.
    pub fn describe(&self) -> String {
        match self {
            Var::HostObject(object) => format!("{} object", object.type_name()),
            Var::Object(script_ref) => format!("a {} object", script_ref.runtime()),
            Var::Function(script_ref) => format!("a {} function", script_ref.runtime()),
            other => format!("{:?}", other.tag()),
        }
    }
}

impl PartialEq for Var {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Var::Int64(a), Var::Int64(b)) => a == b,
            (Var::UInt64(a), Var::UInt64(b)) => a == b,
            (Var::String(a), Var::String(b)) => a == b,
            (Var::Bool(a), Var::Bool(b)) => a == b,
            (Var::Float64(a), Var::Float64(b)) => a == b,
            (Var::Null, Var::Null) => true,
            (Var::Object(a), Var::Object(b)) => a == b,
            (Var::Function(a), Var::Function(b)) => a == b,
            (Var::HostObject(a), Var::HostObject(b)) => Arc::ptr_eq(a, b),
            (Var::List(a), Var::List(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Var::Int64(v) => write!(f, "Int64({v})"),
            Var::UInt64(v) => write!(f, "UInt64({v})"),
            Var::String(v) => write!(f, "String({v:?})"),
            Var::Bool(v) => write!(f, "Bool({v})"),
            Var::Float64(v) => write!(f, "Float64({v})"),
            Var::Null => f.write_str("Null"),
            Var::Object(r) => write!(f, "Object({r:?})"),
            Var::HostObject(o) => write!(f, "HostObject({}#{})", o.type_name(), o.id()),
            Var::List(l) => f.debug_tuple("List").field(l).finish(),
            Var::Function(r) => write!(f, "Function({r:?})"),
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident as $target:ty),* $(,)?) => {
        $(
            impl From<$ty> for Var {
                fn from(value: $ty) -> Self {
                    Var::$variant(<$target>::from(value))
                }
            }
        )*
    };
}

impl_from! {
    i64 => Int64 as i64,
    i32 => Int64 as i64,
    u64 => UInt64 as u64,
    u32 => UInt64 as u64,
    f64 => Float64 as f64,
    f32 => Float64 as f64,
    bool => Bool as bool,
    String => String as String,
    &str => String as String,
    VarList => List as VarList,
}

impl From<Vec<Var>> for Var {
    fn from(values: Vec<Var>) -> Self {
        Var::List(values.into_iter().collect())
    }
}

impl From<PixelObject> for Var {
    fn from(object: PixelObject) -> Self {
        Var::new_host_object(object)
    }
}

impl From<Arc<PixelObject>> for Var {
    fn from(object: Arc<PixelObject>) -> Self {
        Var::HostObject(object)
    }
}

impl<T: Into<Var>> From<Option<T>> for Var {
    fn from(value: Option<T>) -> Self {
        value.map_or(Var::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels_on_wrong_tag() {
        let var = Var::new_string("hello");
        assert_eq!(var.as_i64(), 0);
        assert_eq!(var.as_u64(), 0);
        assert_eq!(var.as_f64(), 0.0);
        assert!(!var.as_bool());
        assert_eq!(var.as_str(), "hello");
        assert_eq!(Var::new_i64(3).as_str(), "");
    }

    #[test]
    fn test_try_accessors_report_tags() {
        let var = Var::new_bool(true);
        assert_eq!(var.try_bool(), Ok(true));
        assert_eq!(
            var.try_i64(),
            Err(BridgeError::TypeMismatch {
                expected: VarType::Int64,
                found: VarType::Bool,
            })
        );
    }

    #[test]
    fn test_is_matches_tag() {
        assert!(Var::default().is(VarType::Null));
        assert!(Var::from(2.5_f32).is(VarType::Float64));
        assert!(Var::from(vec![Var::from(1)]).is(VarType::List));
        assert!(Var::from(None::<i64>).is_null());
    }

    #[test]
    fn test_equivalent_compares_numbers_by_value() {
        assert!(Var::new_u64(7).equivalent(&Var::new_i64(7)));
        assert!(Var::new_f64(3.0).equivalent(&Var::new_i64(3)));
        assert!(!Var::new_f64(3.5).equivalent(&Var::new_i64(3)));
        assert!(!Var::new_u64(u64::MAX).equivalent(&Var::new_i64(-1)));
        assert_ne!(Var::new_u64(7), Var::new_i64(7));
    }

    #[test]
    fn test_host_object_equality_is_identity() {
        let a = Var::new_host_object(PixelObject::new((), "Thing"));
        let b = a.clone();
        let c = Var::new_host_object(PixelObject::new((), "Thing"));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
