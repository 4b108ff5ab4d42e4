//! `scepd-core`: the SCEP cryptographic message-processing pipeline.
//!
//! No HTTP, no CLI, no environment variables — a [`keystore::CaHandle`] and a byte buffer go in,
//! a [`dispatcher::DispatchResponse`] comes out. Transport shims (`scepd-service`) and offline
//! tooling (`scepd-cli`) both sit on top of this crate.

pub mod csr;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod keystore;
pub mod message;
pub mod signer;

pub mod prelude {
    pub use crate::csr::Csr;
    pub use crate::dispatcher::{
        dispatch_no_body, dispatch_pki_operation, DispatchResponse, DispatcherConfig,
        ResponseContentType,
    };
    pub use crate::envelope::{self, ContentEncryptionAlgorithm, OpenedEnvelope};
    pub use crate::error::{CoreError, ErrorKind};
    pub use crate::keystore::{BootstrapPolicy, CaHandle, CaStore, FileCaStore};
    pub use crate::message::{self, Message, MessageBuilder};
    pub use crate::signer::{self, IssuancePolicy};
}
