//! Shared wire-level types for the scepd workspace.
//!
//! These are the enums every layer (core and service) needs to agree on the spelling of:
//! the SCEP `messageType`/`pkiStatus`/`failInfo` codes and the top-level `operation` selector.
//! Nothing here touches ASN.1 encoding or HTTP — that belongs to `scepd-core` and
//! `scepd-service` respectively.

pub mod error;
pub mod message_type;
pub mod operation;
pub mod status;

pub mod prelude {
    pub use crate::error::ErrorBody;
    pub use crate::message_type::MessageType;
    pub use crate::operation::{Operation, UnknownOperation};
    pub use crate::status::{FailInfo, PkiStatus};
}
