//! RPC error codes.
//!
//! The numeric assignment follows the reference client so existing tooling
//! can match on codes:
//!
//! | code   | meaning                                  |
//! | ------ | ---------------------------------------- |
//! | -1     | MISC_ERROR                               |
//! | -3     | TYPE_ERROR                               |
//! | -5     | INVALID_ADDRESS_OR_KEY                   |
//! | -8     | INVALID_PARAMETER                        |
//! | -20    | DATABASE_ERROR                           |
//! | -22    | DESERIALIZATION_ERROR                    |
//! | -25    | VERIFY_ERROR                             |
//! | -26    | VERIFY_REJECTED                          |
//! | -27    | VERIFY_ALREADY_IN_CHAIN                  |
//! | -9     | CLIENT_NOT_CONNECTED                     |
//! | -10    | CLIENT_IN_INITIAL_DOWNLOAD               |
//! | -23    | CLIENT_NODE_ALREADY_ADDED                |
//! | -24    | CLIENT_NODE_NOT_ADDED                    |
//! | -30    | CLIENT_INVALID_IP_OR_SUBNET              |
//!
//! JSON-RPC protocol errors (-32600..-32700) are produced by the
//! dispatcher itself. Internal errors never leak details to clients.

use ember_pool::{RejectCategory, VerifyError};
use jsonrpc_core::{Error, ErrorCode};
use std::fmt::Display;

#[derive(Debug, PartialEq, Clone, Copy, Eq)]
pub enum RPCError {
    MiscError = -1,
    TypeError = -3,
    InvalidAddressOrKey = -5,
    InvalidParameter = -8,
    ClientNotConnected = -9,
    ClientInInitialDownload = -10,
    DatabaseError = -20,
    DeserializationError = -22,
    ClientNodeAlreadyAdded = -23,
    ClientNodeNotAdded = -24,
    VerifyError = -25,
    VerifyRejected = -26,
    VerifyAlreadyInChain = -27,
    ClientInvalidIpOrSubnet = -30,
}

impl RPCError {
    /// An error with this code and a one-line message.
    pub fn custom<T: Display>(code: RPCError, message: T) -> Error {
        Error {
            code: ErrorCode::ServerError(code as i64),
            message: message.to_string(),
            data: None,
        }
    }

    pub fn invalid_parameter<T: Display>(message: T) -> Error {
        Self::custom(RPCError::InvalidParameter, message)
    }

    pub fn deserialization<T: Display>(message: T) -> Error {
        Self::custom(RPCError::DeserializationError, message)
    }

    /// Internal failures surface as MISC_ERROR with a generic message.
    pub fn internal() -> Error {
        Self::custom(RPCError::MiscError, "Internal error")
    }

    /// Map a pool rejection onto the reference client's verify codes.
    pub fn from_verify_error(err: &VerifyError) -> Error {
        let code = match err.category {
            RejectCategory::AlreadyKnown => RPCError::VerifyAlreadyInChain,
            RejectCategory::Invalid => RPCError::VerifyError,
            _ => RPCError::VerifyRejected,
        };
        Self::custom(code, format!("{}: {}", err.category, err.reason))
    }
}
