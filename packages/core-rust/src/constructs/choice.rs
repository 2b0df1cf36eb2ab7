use std::sync::Arc;

use async_trait::async_trait;

use super::{expression_failed, next_scope, run_branch};
use crate::error::InterceptorError;
use crate::exchange::Exchange;
use crate::flow_controller::FlowController;
use crate::interceptor::Interceptor;
use crate::lang::Condition;
use crate::outcome::{Flow, Flows, Outcome};

/// One `when` branch of a [`Choice`].
pub struct Case {
    condition: Condition,
    children: Vec<Arc<dyn Interceptor>>,
}

impl Case {
    #[must_use]
    pub fn new(condition: Condition, children: Vec<Arc<dyn Interceptor>>) -> Self {
        Self { condition, children }
    }
}

/// Runs the first case whose condition holds, else the `otherwise` branch.
///
/// Conditions are tested in order and later ones are not evaluated once a
/// case matches. At most one branch runs per pass. A branch taken in the
/// request pass registers its children like an [`If`](super::If) does.
pub struct Choice {
    scope: u64,
    cases: Vec<Case>,
    otherwise: Option<Vec<Arc<dyn Interceptor>>>,
    controller: FlowController,
}

impl Choice {
    #[must_use]
    pub fn new(cases: Vec<Case>, otherwise: Option<Vec<Arc<dyn Interceptor>>>) -> Self {
        Self {
            scope: next_scope(),
            cases,
            otherwise,
            controller: FlowController::default(),
        }
    }

    #[must_use]
    pub fn with_controller(mut self, controller: FlowController) -> Self {
        self.controller = controller;
        self
    }

    async fn run(&self, exchange: &mut Exchange, flow: Flow) -> Outcome {
        if flow != Flow::Request && exchange.branch_taken(self.scope) {
            return Outcome::Continue;
        }
        let mut branch = None;
        for (idx, case) in self.cases.iter().enumerate() {
            match case.condition.test(exchange, flow) {
                Ok(true) => {
                    tracing::debug!(exchange = exchange.id(), case = idx, %flow, "choose: case matched");
                    branch = Some(case.children.as_slice());
                    break;
                }
                Ok(false) => {}
                Err(error) => {
                    return expression_failed(
                        &self.controller,
                        exchange,
                        "choose",
                        case.condition.source(),
                        flow,
                        &error,
                    );
                }
            }
        }

        let Some(children) = branch.or(self.otherwise.as_deref()) else {
            return Outcome::Continue;
        };
        run_branch(&self.controller, exchange, self.scope, children, flow).await
    }
}

#[async_trait]
impl Interceptor for Choice {
    fn name(&self) -> &str {
        "choose"
    }

    fn flows(&self) -> Flows {
        Flows::REQUEST_RESPONSE_ABORT
    }

    fn short_description(&self) -> String {
        let cases = self
            .cases
            .iter()
            .map(|c| c.condition.source())
            .collect::<Vec<_>>()
            .join(" | ");
        if self.otherwise.is_some() {
            format!("choose ({cases} | otherwise)")
        } else {
            format!("choose ({cases})")
        }
    }

    async fn handle_request(&self, exchange: &mut Exchange) -> Result<Outcome, InterceptorError> {
        Ok(self.run(exchange, Flow::Request).await)
    }

    async fn handle_response(&self, exchange: &mut Exchange) -> Result<Outcome, InterceptorError> {
        let flow = exchange.flow();
        Ok(self.run(exchange, flow).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::{ExpressionCompiler, Language};
    use crate::message::Request;
    use crate::testing::{Log, Probe};

    fn condition(source: &str) -> Condition {
        Condition::new(
            ExpressionCompiler::default()
                .compile(Language::Attribute, source)
                .expect("compiles"),
        )
    }

    fn choice(log: &Log, with_otherwise: bool) -> Choice {
        Choice::new(
            vec![
                Case::new(condition("path == '/a'"), vec![Probe::new("first", log).arc()]),
                Case::new(condition("path matches '^/a'"), vec![Probe::new("second", log).arc()]),
            ],
            with_otherwise.then(|| vec![Probe::new("otherwise", log).arc()]),
        )
    }

    #[tokio::test]
    async fn first_matching_case_wins() {
        let log = Log::default();
        let mut exc = Exchange::new(Request::get("/a"));
        choice(&log, true).handle_request(&mut exc).await.ok();
        assert_eq!(log.entries(), vec!["first:request"]);
    }

    #[tokio::test]
    async fn later_conditions_are_not_evaluated() {
        let log = Log::default();
        let construct = Choice::new(
            vec![
                Case::new(condition("true"), vec![Probe::new("taken", &log).arc()]),
                // would fail with a type mismatch if evaluated
                Case::new(condition("method && true"), vec![]),
            ],
            None,
        );
        let mut exc = Exchange::new(Request::get("/"));
        assert_eq!(construct.handle_request(&mut exc).await.ok(), Some(Outcome::Continue));
        assert_eq!(log.entries(), vec!["taken:request"]);
    }

    #[tokio::test]
    async fn otherwise_runs_when_nothing_matches() {
        let log = Log::default();
        let mut exc = Exchange::new(Request::get("/z"));
        choice(&log, true).handle_request(&mut exc).await.ok();
        assert_eq!(log.entries(), vec!["otherwise:request"]);
    }

    #[tokio::test]
    async fn no_match_without_otherwise_is_noop() {
        let log = Log::default();
        let mut exc = Exchange::new(Request::get("/z"));
        assert_eq!(
            choice(&log, false).handle_request(&mut exc).await.ok(),
            Some(Outcome::Continue)
        );
        assert!(log.entries().is_empty());
    }

    #[tokio::test]
    async fn failing_condition_aborts() {
        let log = Log::default();
        let construct = Choice::new(
            vec![Case::new(condition("method && true"), vec![Probe::new("x", &log).arc()])],
            Some(vec![Probe::new("otherwise", &log).arc()]),
        );
        let mut exc = Exchange::new(Request::get("/"));
        assert_eq!(construct.handle_request(&mut exc).await.ok(), Some(Outcome::Abort));
        assert!(log.entries().is_empty());
        assert!(exc.response().is_some());
    }
}
