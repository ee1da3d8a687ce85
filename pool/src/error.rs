//! The admission error type.
//!
//! Every admission failure carries a category, a short reason string, and a
//! ban score for the submitting peer. `malleated` marks failures caused by
//! witness data a third party could have altered; those must never enter
//! the rejects filter.

use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectCategory {
    Invalid,
    Nonstandard,
    AlreadyKnown,
    Duplicate,
    InsufficientFee,
    HighFee,
}

impl fmt::Display for RejectCategory {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            RejectCategory::Invalid => "invalid",
            RejectCategory::Nonstandard => "nonstandard",
            RejectCategory::AlreadyKnown => "alreadyknown",
            RejectCategory::Duplicate => "duplicate",
            RejectCategory::InsufficientFee => "insufficientfee",
            RejectCategory::HighFee => "highfee",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{category}: {reason}")]
pub struct VerifyError {
    pub category: RejectCategory,
    pub reason: String,
    /// Ban weight for the submitting peer: 0, 10 or 100.
    pub score: u8,
    pub malleated: bool,
}

impl VerifyError {
    pub fn new(category: RejectCategory, reason: impl Into<String>, score: u8) -> Self {
        VerifyError {
            category,
            reason: reason.into(),
            score,
            malleated: false,
        }
    }

    pub fn malleated(category: RejectCategory, reason: impl Into<String>, score: u8) -> Self {
        VerifyError {
            category,
            reason: reason.into(),
            score,
            malleated: true,
        }
    }

    pub fn invalid(reason: impl Into<String>, score: u8) -> Self {
        Self::new(RejectCategory::Invalid, reason, score)
    }

    pub fn nonstandard(reason: impl Into<String>, score: u8) -> Self {
        Self::new(RejectCategory::Nonstandard, reason, score)
    }
}
