use core::{any::Any, error::Error, fmt};
use std::sync::Arc;

use super::Failure;

/// The underlying reason a [`Failure`] was produced.
#[derive(Clone)]
pub enum Cause {
    /// Another failure record.
    Failure(Failure),
    /// A foreign error value, kept as-is.
    Error(Arc<dyn Error + Send + Sync + 'static>),
    /// A plain text reason.
    Message(String),
    /// A caught value that is neither an error nor text.
    Opaque(Opaque),
}

impl Cause {
    /// Wraps an error value as a cause.
    ///
    /// A [`Failure`] is stored as [`Cause::Failure`] rather than as a foreign
    /// error.
    pub fn error<E>(error: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self::from_boxed(Box::new(error))
    }

    pub(crate) fn from_boxed(error: Box<dyn Error + Send + Sync + 'static>) -> Self {
        match error.downcast::<Failure>() {
            Ok(failure) => Self::Failure(*failure),
            Err(error) => Self::Error(Arc::from(error)),
        }
    }

    /// Returns the cause as a failure record, if it is one.
    pub fn as_failure(&self) -> Option<&Failure> {
        match self {
            Self::Failure(failure) => Some(failure),
            _ => None,
        }
    }

    /// Returns the cause as an error value, if it is one.
    pub fn as_error(&self) -> Option<&(dyn Error + Send + Sync + 'static)> {
        match self {
            Self::Failure(failure) => Some(failure),
            Self::Error(error) => Some(&**error),
            Self::Message(_) | Self::Opaque(_) => None,
        }
    }

    /// Attempts to downcast a foreign error cause to a concrete type.
    pub fn downcast_ref<E: Error + 'static>(&self) -> Option<&E> {
        match self {
            Self::Error(error) => error.downcast_ref(),
            _ => None,
        }
    }
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failure(failure) => fmt::Display::fmt(failure, f),
            Self::Error(error) => fmt::Display::fmt(error, f),
            Self::Message(message) => f.write_str(message),
            Self::Opaque(opaque) => fmt::Display::fmt(opaque, f),
        }
    }
}

impl fmt::Debug for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failure(failure) => f.debug_tuple("Failure").field(failure).finish(),
            Self::Error(error) => f.debug_tuple("Error").field(error).finish(),
            Self::Message(message) => f.debug_tuple("Message").field(message).finish(),
            Self::Opaque(opaque) => f.debug_tuple("Opaque").field(opaque).finish(),
        }
    }
}

impl From<Failure> for Cause {
    fn from(failure: Failure) -> Self {
        Self::Failure(failure)
    }
}

impl From<String> for Cause {
    fn from(message: String) -> Self {
        Self::Message(message)
    }
}

impl From<&str> for Cause {
    fn from(message: &str) -> Self {
        Self::Message(message.to_owned())
    }
}

impl From<Opaque> for Cause {
    fn from(opaque: Opaque) -> Self {
        Self::Opaque(opaque)
    }
}

/// A caught value of unknown type, kept unmodified.
///
/// Panic payloads that are neither text nor an error end up here. The value
/// can be inspected with [`Opaque::with`] or taken back with
/// [`Opaque::take`].
#[derive(Clone)]
pub struct Opaque {
    payload: Arc<spin::Mutex<Option<Box<dyn Any + Send>>>>,
    type_hint: &'static str,
}

impl Opaque {
    /// Wraps an arbitrary value.
    pub fn new<T: Any + Send>(value: T) -> Self {
        Self {
            payload: Arc::new(spin::Mutex::new(Some(Box::new(value)))),
            type_hint: core::any::type_name::<T>(),
        }
    }

    pub(crate) fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        Self {
            payload: Arc::new(spin::Mutex::new(Some(payload))),
            type_hint: "panic payload",
        }
    }

    /// Runs `f` with a reference to the payload if it is still present and
    /// has type `T`.
    pub fn with<T: Any, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let payload = self.payload.lock();
        payload.as_ref()?.downcast_ref::<T>().map(f)
    }

    /// Takes the payload out, leaving this value (and every clone of it)
    /// empty.
    pub fn take(&self) -> Option<Box<dyn Any + Send>> {
        self.payload.lock().take()
    }

    /// A short description of the payload type.
    pub fn type_hint(&self) -> &'static str {
        self.type_hint
    }
}

impl fmt::Display for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.type_hint)
    }
}

impl fmt::Debug for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Opaque")
            .field("type_hint", &self.type_hint)
            .finish_non_exhaustive()
    }
}

/// A value caught from a failing operation, before classification.
///
/// Any error type converts into [`Thrown`] with `?` or `.into()`, and panics
/// caught by the wrap primitives are turned into one with
/// [`Thrown::from_panic`].
///
/// ```
/// use recoil::Thrown;
///
/// let thrown: Thrown = "12a".parse::<u8>().unwrap_err().into();
/// assert!(matches!(thrown, Thrown::Error(_)));
///
/// let thrown = Thrown::message("disk on fire");
/// assert!(matches!(thrown, Thrown::Message(_)));
/// ```
pub enum Thrown {
    /// An error value.
    Error(Box<dyn Error + Send + Sync + 'static>),
    /// A text message.
    Message(String),
    /// Anything else.
    Opaque(Opaque),
}

impl Thrown {
    /// Creates a thrown text message.
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    /// Creates a thrown value of arbitrary type.
    pub fn opaque<T: Any + Send>(value: T) -> Self {
        Self::Opaque(Opaque::new(value))
    }

    /// Converts a panic payload, as returned by
    /// [`std::panic::catch_unwind`].
    ///
    /// Text payloads (the common `panic!("...")` case) become
    /// [`Thrown::Message`]. A [`Failure`] or a [`std::io::Error`] passed to
    /// [`std::panic::panic_any`] becomes [`Thrown::Error`]. Everything else is
    /// kept as [`Thrown::Opaque`].
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let payload = match payload.downcast::<&'static str>() {
            Ok(message) => return Self::Message((*message).to_owned()),
            Err(payload) => payload,
        };
        let payload = match payload.downcast::<String>() {
            Ok(message) => return Self::Message(*message),
            Err(payload) => payload,
        };
        let payload = match payload.downcast::<Failure>() {
            Ok(failure) => return Self::Error(failure),
            Err(payload) => payload,
        };
        match payload.downcast::<std::io::Error>() {
            Ok(error) => Self::Error(error),
            Err(payload) => Self::Opaque(Opaque::from_payload(payload)),
        }
    }

    /// Returns the thrown value as a failure record, if it already is one.
    pub fn as_failure(&self) -> Option<&Failure> {
        match self {
            Self::Error(error) => error.downcast_ref::<Failure>(),
            _ => None,
        }
    }
}

impl<E> From<E> for Thrown
where
    E: Error + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        Self::Error(Box::new(error))
    }
}

impl fmt::Debug for Thrown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(error) => f.debug_tuple("Error").field(error).finish(),
            Self::Message(message) => f.debug_tuple("Message").field(message).finish(),
            Self::Opaque(opaque) => f.debug_tuple("Opaque").field(opaque).finish(),
        }
    }
}

impl fmt::Display for Thrown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(error) => fmt::Display::fmt(error, f),
            Self::Message(message) => f.write_str(message),
            Self::Opaque(opaque) => fmt::Display::fmt(opaque, f),
        }
    }
}
