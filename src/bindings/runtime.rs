use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::Var;

/// Every runtime known to the bridge. Discriminants are stable across the C boundary.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Runtime {
    Lua = 0,
    Python = 1,
    JavaScript = 2,
    Php = 3,
}

impl Runtime {
    pub const ALL: [Runtime; 4] = [
        Runtime::Lua,
        Runtime::Python,
        Runtime::JavaScript,
        Runtime::Php,
    ];

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(Runtime::Lua),
            1 => Some(Runtime::Python),
            2 => Some(Runtime::JavaScript),
            3 => Some(Runtime::Php),
            _ => None,
        }
    }

    /// The runtime as it appears at index 0 of a callback's arguments.
    pub fn as_var(self) -> Var {
        Var::Int64(self as i64)
    }

    pub fn from_var(var: &Var) -> Option<Self> {
        match var {
            Var::Int64(value) => Self::from_i64(*value),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Runtime::Lua => "Lua",
            Runtime::Python => "Python",
            Runtime::JavaScript => "JavaScript",
            Runtime::Php => "PHP",
        }
    }

    pub fn file_extension(self) -> &'static str {
        match self {
            Runtime::Lua => "lua",
            Runtime::Python => "py",
            Runtime::JavaScript => "js",
            Runtime::Php => "php",
        }
    }

    /// Whether an engine for this runtime is compiled into this build.
    pub fn is_available(self) -> bool {
        match self {
            Runtime::Lua => cfg!(feature = "lua"),
            Runtime::JavaScript => cfg!(feature = "javascript"),
            Runtime::Python => cfg!(feature = "python"),
            Runtime::Php => false,
        }
    }
}

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_ids_round_trip() {
        for runtime in Runtime::ALL {
            assert_eq!(Runtime::from_var(&runtime.as_var()), Some(runtime));
        }
        assert_eq!(Runtime::from_i64(4), None);
        assert!(!Runtime::Php.is_available());
    }
}
