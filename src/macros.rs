// Shared helper macros. Must be declared before any module that uses them
// (see the `#[macro_use]` note in lib.rs).

/// Defines an enum that can be converted to/from an integer type, keeping
/// unrecognized values around instead of failing to parse.
macro_rules! enum_with_unknown {
    (
        $( #[$enum_attr:meta] )*
        pub enum $name:ident($ty:ty) {
            $( $( #[$variant_attr:meta] )* $variant:ident = $value:literal ),+ $(,)?
        }
    ) => {
        $( #[$enum_attr] )*
        #[derive(Debug, PartialEq, Eq, Clone, Copy)]
        pub enum $name {
            $( $( #[$variant_attr] )* $variant ),+,
            Unknown($ty),
        }

        impl ::core::convert::From<$ty> for $name {
            fn from(value: $ty) -> Self {
                match value {
                    $( $value => $name::$variant ),+,
                    other => $name::Unknown(other),
                }
            }
        }

        impl ::core::convert::From<$name> for $ty {
            fn from(value: $name) -> Self {
                match value {
                    $( $name::$variant => $value ),+,
                    $name::Unknown(other) => other,
                }
            }
        }
    }
}

/// Fine-grained packet tracing, compiled out in release builds the same way
/// the original's `TRACE`-gated dumps were: cheap to leave in call sites,
/// free when nobody turns logging up this high.
macro_rules! net_trace {
    ($($arg:expr),*) => { log::trace!($($arg),*) }
}

/// Per-packet diagnostics: malformed input, dropped frames, neighbor
/// discovery failures. Always compiled in; gated at runtime by the `log`
/// level the application configures.
macro_rules! net_debug {
    ($($arg:expr),*) => { log::debug!($($arg),*) }
}
