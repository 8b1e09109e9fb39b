//! Method-backed request handlers.

use core::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use tannoy_core::{Handler, Request, RequestError};

/// An error a method raises that the remote caller must see.
///
/// The description becomes the wire error description; details, when
/// given, are shipped verbatim as JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcError {
    pub description: String,
    pub details: Option<Value>,
}

impl RpcError {
    pub fn new(description: impl Into<String>, details: Option<Value>) -> Self {
        Self {
            description: description.into(),
            details,
        }
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description)
    }
}

impl std::error::Error for RpcError {}

/// Argument-tuple conversion failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgsError;

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "arguments do not match the method signature")
    }
}

impl std::error::Error for ArgsError {}

/// Converts a request argument slice into a typed parameter tuple.
///
/// Implemented for tuples of up to six `serde`-deserializable elements;
/// the unit tuple binds zero-argument methods.
pub trait FromArgs: Sized {
    const ARITY: usize;

    /// Converts `args` elementwise. The caller has already checked the
    /// length against [`ARITY`](FromArgs::ARITY).
    fn from_args(args: &[Value]) -> Result<Self, ArgsError>;
}

macro_rules! impl_from_args {
    ($count:literal $(, $ty:ident : $idx:tt)*) => {
        impl<$($ty: DeserializeOwned),*> FromArgs for ($($ty,)*) {
            const ARITY: usize = $count;

            #[allow(unused_variables)]
            fn from_args(args: &[Value]) -> Result<Self, ArgsError> {
                Ok((
                    $(serde_json::from_value::<$ty>(args[$idx].clone())
                        .map_err(|_| ArgsError)?,)*
                ))
            }
        }
    };
}

impl_from_args!(0);
impl_from_args!(1, A: 0);
impl_from_args!(2, A: 0, B: 1);
impl_from_args!(3, A: 0, B: 1, C: 2);
impl_from_args!(4, A: 0, B: 1, C: 2, D: 3);
impl_from_args!(5, A: 0, B: 1, C: 2, D: 3, E: 4);
impl_from_args!(6, A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);

type MethodFn = dyn Fn(&[Value]) -> Result<Option<Value>, RpcError> + Send + Sync;

/// Binds a native function to a directory node.
///
/// On dispatch the request's argument sequence is coerced to the
/// function's parameters; the return value, if any, is appended to the
/// request result. Failures are recorded on the result rather than
/// propagated, so a broken call surfaces as an RPC logic error at the
/// protocol layer:
///
/// - wrong argument count → `"invalid number of method arguments"`;
/// - argument coercion failure →
///   `"cannot call method with specified arguments"`;
/// - an [`RpcError`] raised by the method → its description and details.
///
/// The same handler serves RPC methods (return values flow back to the
/// caller) and event methods (a single event payload argument, return
/// value unused).
pub struct MethodHandler {
    name: String,
    catch_all: bool,
    arity: usize,
    method: Box<MethodFn>,
}

impl MethodHandler {
    /// Wraps an untyped method taking `arity` JSON arguments.
    pub fn new<F>(name: impl Into<String>, catch_all: bool, arity: usize, method: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Option<Value>, RpcError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            catch_all,
            arity,
            method: Box::new(method),
        }
    }

    /// Wraps a typed method. Arguments are coerced to `Args` through
    /// serde; the result is serialized back to JSON. A `null` result is
    /// treated as "no value", so methods returning `()` contribute
    /// nothing to the request result.
    pub fn typed<Args, R, F>(name: impl Into<String>, catch_all: bool, method: F) -> Self
    where
        Args: FromArgs,
        R: Serialize,
        F: Fn(Args) -> Result<R, RpcError> + Send + Sync + 'static,
    {
        Self::new(name, catch_all, Args::ARITY, move |args| {
            let parsed = Args::from_args(args)
                .map_err(|_| RpcError::new("cannot call method with specified arguments", None))?;
            let result = method(parsed)?;
            let value = serde_json::to_value(result)
                .map_err(|_| RpcError::new("cannot serialize method result", None))?;
            Ok(if value.is_null() { None } else { Some(value) })
        })
    }
}

impl Handler for MethodHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_catch_all(&self) -> bool {
        self.catch_all
    }

    fn handle(&self, request: &mut Request) {
        let arguments = request.arguments().to_vec();
        if arguments.len() != self.arity {
            request.result_mut().add_error(RequestError::new(
                "invalid number of method arguments",
                Some(Value::String(format!(
                    "got {} arguments for method with {} arguments",
                    arguments.len(),
                    self.arity
                ))),
            ));
            tracing::trace!(handler = %self.name, "invalid number of arguments");
            return;
        }
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            (self.method)(&arguments)
        }));
        match outcome {
            Ok(Ok(Some(value))) => request.result_mut().add_value(value),
            Ok(Ok(None)) => {}
            Ok(Err(error)) => {
                tracing::trace!(handler = %self.name, %error, "method returned error");
                request
                    .result_mut()
                    .add_error(RequestError::new(error.description, error.details));
            }
            Err(panic) => {
                // A panicking method must still answer its caller; the
                // payload becomes the error details.
                let message = panic_message(panic.as_ref());
                tracing::trace!(handler = %self.name, message, "method panicked");
                request.result_mut().add_error(RequestError::new(
                    "method panicked",
                    message.map(|text| Value::String(text.to_owned())),
                ));
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> Option<&str> {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
}
