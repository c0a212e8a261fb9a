//! Crate error type.
//!
//! Recoverable failures (bad input, solver trouble, unknown ids) are returned as
//! [`DispatchError`]. Broken invariants are not errors: they panic, because a run
//! that continued past them would produce meaningless statistics.

use thiserror::Error;

use crate::request::{RequestId, RequestStatus};
use crate::vehicle::VehicleId;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("vehicle {0} not found")]
    UnknownVehicle(VehicleId),

    #[error("request {0} not found")]
    UnknownRequest(RequestId),

    #[error("request {request}: cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        request: RequestId,
        from: RequestStatus,
        to: RequestStatus,
    },

    #[error("vehicle {0} is not available for this directive")]
    VehicleBusy(VehicleId),

    #[error("vehicle {vehicle} is not at the location required for request {request}")]
    NotAtLocation {
        vehicle: VehicleId,
        request: RequestId,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("no dispatch policy registered under '{0}'")]
    UnknownPolicy(String),

    #[error("rebalancing solver failed: {0}")]
    Solver(String),

    #[error("demand forecast error: {0}")]
    Forecast(String),

    #[error("grid table error: {0}")]
    Tables(String),

    #[error("fatal: {0}")]
    Fatal(String),
}

/// Shorthand result type for the dispatch core.
pub type DispatchResult<T> = Result<T, DispatchError>;
