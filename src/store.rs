mod file;
mod memory;

pub use file::FileSessionStore;
pub use memory::{MemorySecretStore, MemorySessionStore};

use async_trait::async_trait;

use crate::core::PeerAddress;
use crate::error::Result;

/// Durable persistence for serialized session records, one per peer device.
///
/// Implementations store opaque bytes; the engine owns serialization and
/// versioning. Every operation is a read-modify-write from the engine's point
/// of view, and the engine serializes them per peer.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load_session(&self, peer: &PeerAddress) -> Result<Option<Vec<u8>>>;
    async fn store_session(&self, peer: &PeerAddress, record: &[u8]) -> Result<()>;
    async fn delete_session(&self, peer: &PeerAddress) -> Result<()>;
    async fn has_session(&self, peer: &PeerAddress) -> Result<bool>;
}

/// Narrow interface over the platform secret store (e.g. a hardware-backed
/// keystore). The prekey manager is its only client for private key bytes;
/// nothing above it ever holds a second durable copy.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn store(&self, tag: &str, bytes: &[u8]) -> Result<()>;
    async fn load(&self, tag: &str) -> Result<Option<Vec<u8>>>;
    async fn delete(&self, tag: &str) -> Result<()>;
}
