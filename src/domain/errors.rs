//! Error kinds propagated across the broker boundary and the engine's
//! control surface.

use crate::domain::types::OrderId;
use thiserror::Error;

/// Errors a `Broker` implementation may return. Transient failures are
/// expected to be retried internally (bounded attempts, rate-limit sleep) by
/// the broker itself — only `Permanent` and `MissingOrder` should normally
/// reach the engine, but the engine's match arms cover all three defensively.
#[derive(Debug, Error, Clone)]
pub enum BrokerError {
    #[error("transient broker failure: {0}")]
    Transient(String),

    #[error("permanent broker failure: {0}")]
    Permanent(String),

    #[error("exchange did not return order {0}")]
    MissingOrder(OrderId),
}

/// Failure outcomes of `TradingEngine::initialize`.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("broker rejected initialization: {0}")]
    Broker(#[from] BrokerError),

    #[error("stop() observed while waiting on the calibration order")]
    Cancelled,

    #[error("local invariant violated: {0}")]
    InvariantViolated(String),
}

/// Failure outcomes of `TradingEngine::start`.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("start() called before a successful initialize()")]
    NotInitialized,

    /// A local invariant (negative balance, NaN/invalid price) was violated
    /// mid-loop. The engine has already transitioned to `Terminated` and
    /// cancelled its orders by the time this is returned.
    #[error("local invariant violated: {0}")]
    InvariantViolated(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_error_messages_are_descriptive() {
        let err = BrokerError::MissingOrder(OrderId::from("abc-123"));
        assert!(err.to_string().contains("abc-123"));
    }

    #[test]
    fn init_error_wraps_broker_error() {
        let broker_err = BrokerError::Permanent("insufficient funds".into());
        let init_err: InitError = broker_err.into();
        assert!(matches!(init_err, InitError::Broker(_)));
    }
}
