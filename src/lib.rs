//! End-to-end encryption engine for asynchronous 1:1 messaging.
//!
//! This crate implements operations conforming to the following
//! specifications:
//! - the **[X3DH]** key agreement protocol,
//! - the **[Double Ratchet]** messaging protocol,
//!
//! wired together behind an [`engine::EncryptionEngine`] that owns handshake
//! bootstrap, per-message key derivation, out-of-order delivery and session
//! persistence. The engine's external collaborators — the key-bundle
//! directory, the session store and the platform secret store — are narrow
//! traits injected at construction.
//!
//! [X3DH]: https://signal.org/docs/specifications/x3dh/
//! [Double Ratchet]: https://signal.org/docs/specifications/doubleratchet/

#![warn(clippy::unwrap_used)]
#![deny(unsafe_code)]

pub mod bundle;
pub mod config;
pub mod core;
pub mod crypto;
pub mod directory;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod fingerprint;
pub mod handshake;
pub mod identity;
pub mod prekeys;
pub mod ratchet;
pub mod store;

pub use bundle::{OneTimePreKeyPublic, PreKeyBundle, PreKeyPublication, SignedPreKeyPublic};
pub use config::{AeadBackend, EngineConfig};
pub use crate::core::{DeviceId, PeerAddress};
pub use directory::{InMemoryDirectory, KeyBundleDirectory};
pub use engine::EncryptionEngine;
pub use envelope::{EncryptedEnvelope, HandshakeHello, MessageHeader};
pub use error::{ProtocolError, Result};
pub use fingerprint::{SafetyNumber, safety_number};
pub use identity::{IdentityKey, IdentityKeyPair};
pub use prekeys::PreKeyManager;
pub use ratchet::{RatchetState, SessionRecord};
pub use store::{
    FileSessionStore, MemorySecretStore, MemorySessionStore, SecretStore, SessionStore,
};
