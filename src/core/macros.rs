//! Core macros
//!
//! Small helpers shared by the configuration and bridge types.

/// Implement `Default` for a struct from a list of field initializers.
///
/// ```ignore
/// struct LuaConfig {
///     memory_limit: Option<usize>,
///     module_extension: String,
/// }
///
/// impl_default!(LuaConfig {
///     memory_limit: None,
///     module_extension: ".lua".to_string(),
/// });
/// ```
#[macro_export]
macro_rules! impl_default {
    ($struct_name:ident {
        $($field:ident: $value:expr),* $(,)?
    }) => {
        impl Default for $struct_name {
            fn default() -> Self {
                Self {
                    $($field: $value),*
                }
            }
        }
    };
}

/// Evaluate `$logic` when a cargo feature is compiled in, `$fallback` otherwise.
///
/// ```ignore
/// with_feature!("lua", { start_lua() }, { Err(BridgeError::RuntimeUnavailable(Runtime::Lua)) })
/// ```
#[macro_export]
macro_rules! with_feature {
    ($feature:literal, $logic:block, $fallback:block) => {{
        #[cfg(feature = $feature)]
        let result = $logic;
        #[cfg(not(feature = $feature))]
        let result = $fallback;
        result
    }};
}
