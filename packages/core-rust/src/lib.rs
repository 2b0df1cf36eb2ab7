//! flowgate core: exchange model, interceptor flow engine, structural
//! constructs, expression languages, and problem-detail responses.

pub mod client;
pub mod constructs;
pub mod error;
pub mod exchange;
pub mod flow_controller;
pub mod interceptor;
pub mod lang;
pub mod message;
pub mod outcome;
pub mod problem;
pub mod value;

#[cfg(test)]
mod testing;

pub use client::{ClientError, HttpClient};
pub use error::InterceptorError;
pub use exchange::{Exchange, ExchangeState};
pub use flow_controller::FlowController;
pub use interceptor::{describe_tree, Interceptor};
pub use lang::{
    Condition, CompiledExpression, ExpectedType, Expression, ExpressionCompiler, ExpressionError,
    Language, ScriptConfig, Template,
};
pub use message::{HttpMessage, Request, Response};
pub use outcome::{Flow, Flows, Outcome};
pub use problem::{ProblemDetails, ProblemKind};
pub use value::Value;

