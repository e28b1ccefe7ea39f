/// Creates a [`Failure`](crate::Failure) of the given kind with a formatted
/// message.
///
/// The first argument is anything convertible into a [`Kind`](crate::Kind);
/// the rest is interpreted like the arguments of [`format!()`]. The record is
/// built by the global factory, so the call site of the macro invocation
/// becomes its location.
///
/// An optional `; key => value, ...` tail adds context entries. It follows
/// the last format argument directly, without a trailing comma.
///
/// [`format!()`]: std::format
///
/// # Examples
///
/// ```
/// use recoil::{Kind, fail};
///
/// let failure = fail!(Kind::NOT_FOUND, "no user {}", 42);
/// assert_eq!(failure.kind(), &Kind::NOT_FOUND);
/// assert_eq!(failure.message(), "no user 42");
///
/// let failure = fail!("QuotaError", "quota exceeded"; "limit" => 100, "used" => 130);
/// assert_eq!(failure.kind(), "QuotaError");
/// assert_eq!(failure.context()["used"], 130);
/// ```
#[macro_export]
macro_rules! fail {
    ($kind:expr, $fmt:literal $(, $arg:expr)* ; $($key:expr => $value:expr),+ $(,)?) => {{
        let mut context = $crate::Context::new();
        $(
            context.insert(
                ::core::convert::Into::<::std::string::String>::into($key),
                ::core::convert::Into::<$crate::__private::Value>::into($value),
            );
        )+
        $crate::create_error($kind, ::std::format!($fmt $(, $arg)*), ::core::option::Option::Some(context), ::core::option::Option::None)
    }};
    ($kind:expr, $fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::create_error($kind, ::std::format!($fmt $(, $arg)*), ::core::option::Option::None, ::core::option::Option::None)
    };
}

/// Returns early with an error built by [`fail!`].
///
/// Equivalent to `return Err(fail!(...).into())`.
///
/// # Examples
///
/// ```
/// use recoil::{Failure, Kind, bail};
///
/// fn check_port(port: u32) -> Result<u16, Failure> {
///     if port > u16::MAX as u32 {
///         bail!(Kind::RANGE, "port {port} out of range"; "port" => port);
///     }
///     Ok(port as u16)
/// }
///
/// let failure = check_port(70000).unwrap_err();
/// assert_eq!(failure.message(), "port 70000 out of range");
/// assert_eq!(failure.context()["port"], 70000);
/// ```
#[macro_export]
macro_rules! bail {
    ($($args:tt)*) => {
        return ::core::result::Result::Err(::core::convert::Into::into($crate::fail!($($args)*)))
    };
}
