//! Request dispatch: path walk, security checks, action invocation.

mod binder;
mod context;
mod response;
mod router;

pub use binder::{ActionBinder, ActionResult};
pub use context::{
    CallerContext, DispatchContext, Frame, FrameScope, Invocation, Request, ResponseWriter,
};
pub use response::{Outcome, Response};
pub use router::Dispatcher;
