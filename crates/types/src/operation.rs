//! Top-level SCEP `operation` query-parameter values.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    GetCACert,
    GetCACaps,
    PKIOperation,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown SCEP operation: {0}")]
pub struct UnknownOperation(pub String);

impl FromStr for Operation {
    type Err = UnknownOperation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GetCACert" => Ok(Operation::GetCACert),
            "GetCACaps" => Ok(Operation::GetCACaps),
            "PKIOperation" => Ok(Operation::PKIOperation),
            other => Err(UnknownOperation(other.to_string())),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::GetCACert => "GetCACert",
            Operation::GetCACaps => "GetCACaps",
            Operation::PKIOperation => "PKIOperation",
        };
        write!(f, "{s}")
    }
}
