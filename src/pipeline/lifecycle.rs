//! Request lifecycle state machine.
//!
//! Every request walks the same fixed stage sequence; stages cannot be
//! skipped, repeated, or revisited. The orchestrator advances the machine
//! explicitly so that an ordering mistake surfaces as a hard error instead
//! of silently emitting headers in the wrong phase.

use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Lifecycle stages, in the only order they may occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Process-wide initialization (host identity), idempotent across requests.
    Start,
    /// Lower-level response caches are bypassed for this request.
    BeginRequest,
    /// Route resolution (redirect or rewrite) and compression negotiation.
    ResolveRoutes,
    /// Redirect short-circuit and per-request filter installation.
    BeforeHandler,
    /// Fixed-order header finalization, ending with compression emission.
    FinalizeHeaders,
    End,
}

impl Stage {
    fn successor(self) -> Option<Stage> {
        match self {
            Stage::Start => Some(Stage::BeginRequest),
            Stage::BeginRequest => Some(Stage::ResolveRoutes),
            Stage::ResolveRoutes => Some(Stage::BeforeHandler),
            Stage::BeforeHandler => Some(Stage::FinalizeHeaders),
            Stage::FinalizeHeaders => Some(Stage::End),
            Stage::End => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Start => "start",
            Stage::BeginRequest => "begin_request",
            Stage::ResolveRoutes => "resolve_routes",
            Stage::BeforeHandler => "before_handler",
            Stage::FinalizeHeaders => "finalize_headers",
            Stage::End => "end",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline failures. Both variants are programming errors, not recoverable
/// request conditions; they surface as 500 and are never retried in-request.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("request context is unavailable outside an active request")]
    ContextUnavailable,
    #[error("lifecycle stage `{to}` cannot follow `{from}`")]
    StageOrder { from: Stage, to: Stage },
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, "Request pipeline failure").into_response()
    }
}

/// Tracks the current stage of one request.
#[derive(Debug)]
pub struct Lifecycle {
    current: Stage,
}

impl Lifecycle {
    /// A fresh lifecycle, positioned at [`Stage::Start`].
    pub fn begin() -> Self {
        Self {
            current: Stage::Start,
        }
    }

    pub fn current(&self) -> Stage {
        self.current
    }

    /// Move to `to`, which must be the immediate successor of the current
    /// stage.
    pub fn advance(&mut self, to: Stage) -> Result<(), PipelineError> {
        match self.current.successor() {
            Some(next) if next == to => {
                self.current = to;
                Ok(())
            }
            _ => Err(PipelineError::StageOrder {
                from: self.current,
                to,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_advance_in_declared_order() {
        let mut lifecycle = Lifecycle::begin();
        assert_eq!(lifecycle.current(), Stage::Start);

        for stage in [
            Stage::BeginRequest,
            Stage::ResolveRoutes,
            Stage::BeforeHandler,
            Stage::FinalizeHeaders,
            Stage::End,
        ] {
            lifecycle.advance(stage).expect("in-order advance");
            assert_eq!(lifecycle.current(), stage);
        }
    }

    #[test]
    fn skipping_a_stage_is_rejected() {
        let mut lifecycle = Lifecycle::begin();
        let err = lifecycle.advance(Stage::FinalizeHeaders).unwrap_err();
        assert_eq!(
            err,
            PipelineError::StageOrder {
                from: Stage::Start,
                to: Stage::FinalizeHeaders,
            }
        );
    }

    #[test]
    fn stages_are_not_reentrant() {
        let mut lifecycle = Lifecycle::begin();
        lifecycle.advance(Stage::BeginRequest).expect("first advance");
        let err = lifecycle.advance(Stage::BeginRequest).unwrap_err();
        assert!(matches!(err, PipelineError::StageOrder { .. }));
    }

    #[test]
    fn going_backwards_is_rejected() {
        let mut lifecycle = Lifecycle::begin();
        lifecycle.advance(Stage::BeginRequest).expect("advance");
        lifecycle.advance(Stage::ResolveRoutes).expect("advance");
        let err = lifecycle.advance(Stage::BeginRequest).unwrap_err();
        assert!(matches!(err, PipelineError::StageOrder { .. }));
    }

    #[test]
    fn end_is_terminal() {
        let mut lifecycle = Lifecycle::begin();
        for stage in [
            Stage::BeginRequest,
            Stage::ResolveRoutes,
            Stage::BeforeHandler,
            Stage::FinalizeHeaders,
            Stage::End,
        ] {
            lifecycle.advance(stage).expect("in-order advance");
        }
        assert!(lifecycle.advance(Stage::End).is_err());
    }
}
