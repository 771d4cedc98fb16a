// Command handlers and their call shapes
//
// A handler declares how it wants to be called by picking one of four shapes.
// The dispatcher binds the inbound arguments according to that shape.

use crate::errors::RegistrationError;
use crate::models::MessageChannel;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

pub type HandlerFuture = BoxFuture<'static, anyhow::Result<()>>;

type ZeroArgFn = dyn Fn() -> HandlerFuture + Send + Sync;
type TripleFn =
    dyn Fn(Option<MessageChannel>, Option<String>, Option<String>) -> HandlerFuture + Send + Sync;
type FullFn = dyn Fn(String, Option<MessageChannel>, Option<String>, Option<String>) -> HandlerFuture
    + Send
    + Sync;
type BoundDataFn = dyn Fn(Value) -> HandlerFuture + Send + Sync;

/// How a handler's arguments are bound at dispatch time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallShape {
    /// No inputs at all
    ZeroArg,
    /// `(channel, userid, source)`; the argument string is discarded
    Triple,
    /// `(arg_str, channel, userid, source)`
    Full,
    /// The command's static data, with the call context merged into its `data` object
    BoundData,
}

impl CallShape {
    /// Classify a handler by its number of inputs and whether static data is bound.
    ///
    /// One or two plain inputs match no shape and are rejected.
    pub fn classify(arity: usize, has_static_data: bool) -> Result<Self, RegistrationError> {
        match arity {
            0 => Ok(CallShape::ZeroArg),
            _ if has_static_data => Ok(CallShape::BoundData),
            3 => Ok(CallShape::Triple),
            n if n > 3 => Ok(CallShape::Full),
            n => Err(RegistrationError::UnsupportedArity { arity: n }),
        }
    }
}

impl fmt::Display for CallShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallShape::ZeroArg => "zero-arg",
            CallShape::Triple => "triple",
            CallShape::Full => "full",
            CallShape::BoundData => "bound-data",
        };
        f.write_str(name)
    }
}

#[derive(Clone)]
pub enum CommandHandler {
    ZeroArg(Arc<ZeroArgFn>),
    Triple(Arc<TripleFn>),
    Full(Arc<FullFn>),
    BoundData(Arc<BoundDataFn>),
}

impl CommandHandler {
    pub fn zero_arg<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        CommandHandler::ZeroArg(Arc::new(move || f().boxed()))
    }

    /// Handler receiving `(channel, userid, source)`
    pub fn triple<F, Fut>(f: F) -> Self
    where
        F: Fn(Option<MessageChannel>, Option<String>, Option<String>) -> Fut
            + Send
            + Sync
            + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        CommandHandler::Triple(Arc::new(move |channel, userid, source| {
            f(channel, userid, source).boxed()
        }))
    }

    /// Handler receiving `(arg_str, channel, userid, source)`
    pub fn full<F, Fut>(f: F) -> Self
    where
        F: Fn(String, Option<MessageChannel>, Option<String>, Option<String>) -> Fut
            + Send
            + Sync
            + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        CommandHandler::Full(Arc::new(move |arg_str, channel, userid, source| {
            f(arg_str, channel, userid, source).boxed()
        }))
    }

    pub fn bound_data<F, Fut>(f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        CommandHandler::BoundData(Arc::new(move |data| f(data).boxed()))
    }

    /// Number of inputs the handler takes
    pub fn arity(&self) -> usize {
        match self {
            CommandHandler::ZeroArg(_) => 0,
            CommandHandler::BoundData(_) => 1,
            CommandHandler::Triple(_) => 3,
            CommandHandler::Full(_) => 4,
        }
    }

    pub fn shape(&self) -> CallShape {
        match self {
            CommandHandler::ZeroArg(_) => CallShape::ZeroArg,
            CommandHandler::Triple(_) => CallShape::Triple,
            CommandHandler::Full(_) => CallShape::Full,
            CommandHandler::BoundData(_) => CallShape::BoundData,
        }
    }
}

impl fmt::Debug for CommandHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CommandHandler").field(&self.shape()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_shapes() {
        assert_eq!(CallShape::classify(0, false).unwrap(), CallShape::ZeroArg);
        assert_eq!(CallShape::classify(0, true).unwrap(), CallShape::ZeroArg);
        assert_eq!(CallShape::classify(3, false).unwrap(), CallShape::Triple);
        assert_eq!(CallShape::classify(4, false).unwrap(), CallShape::Full);
        assert_eq!(CallShape::classify(7, false).unwrap(), CallShape::Full);
        assert_eq!(CallShape::classify(1, true).unwrap(), CallShape::BoundData);
        assert_eq!(CallShape::classify(3, true).unwrap(), CallShape::BoundData);
    }

    #[test]
    fn test_classify_rejects_one_or_two_plain_inputs() {
        assert!(matches!(
            CallShape::classify(1, false),
            Err(RegistrationError::UnsupportedArity { arity: 1 })
        ));
        assert!(matches!(
            CallShape::classify(2, false),
            Err(RegistrationError::UnsupportedArity { arity: 2 })
        ));
    }

    #[test]
    fn test_handler_shape_matches_arity() {
        let handlers = [
            CommandHandler::zero_arg(|| async { Ok(()) }),
            CommandHandler::triple(|_, _, _| async { Ok(()) }),
            CommandHandler::full(|_, _, _, _| async { Ok(()) }),
        ];
        for handler in handlers {
            assert_eq!(
                CallShape::classify(handler.arity(), false).unwrap(),
                handler.shape()
            );
        }
        let bound = CommandHandler::bound_data(|_| async { Ok(()) });
        assert_eq!(
            CallShape::classify(bound.arity(), true).unwrap(),
            bound.shape()
        );
    }
}
