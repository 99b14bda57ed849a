// Integration tests for key lifecycle: signed prekey rotation with its grace
// window, one-time prekey replenishment, and sessions persisted through the
// encrypted file store across an engine restart.

use std::sync::Arc;

use caracal_protocol::{
    EncryptionEngine, EngineConfig, FileSessionStore, InMemoryDirectory, KeyBundleDirectory,
    MemorySecretStore, MemorySessionStore, PeerAddress, PreKeyManager, ProtocolError,
    crypto::aead::Aes256GcmCipher, handshake, identity::IdentityKeyPair, ratchet,
};
use chrono::Duration;

async fn prekey_manager() -> (Arc<PreKeyManager>, Arc<MemorySecretStore>) {
    let secrets = Arc::new(MemorySecretStore::new());
    let prekeys = Arc::new(
        PreKeyManager::initialize(secrets.clone())
            .await
            .expect("prekey manager"),
    );
    (prekeys, secrets)
}

async fn engine_with_config(
    name: &str,
    directory: Arc<InMemoryDirectory>,
    config: EngineConfig,
) -> (EncryptionEngine, Arc<PreKeyManager>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let (prekeys, _) = prekey_manager().await;
    prekeys
        .generate_one_time_prekeys(4)
        .await
        .expect("one-time prekeys");
    let engine = EncryptionEngine::new(
        PeerAddress::new(name, 1),
        prekeys.clone(),
        Arc::new(MemorySessionStore::new()),
        directory,
        config,
    );
    engine.publish_keys().await.expect("publish");
    (engine, prekeys)
}

#[tokio::test]
async fn maintenance_replenishes_one_time_prekeys_below_the_floor() {
    let directory = Arc::new(InMemoryDirectory::new());
    let (bob, _) = engine_with_config("bob", directory.clone(), EngineConfig::default()).await;
    let bob_address = PeerAddress::new("bob", 1);

    // Published with 4 keys, below the default floor of 10.
    assert_eq!(
        directory
            .one_time_key_count(&bob_address)
            .await
            .expect("count"),
        4
    );

    bob.maintain_keys().await.expect("maintain");
    assert_eq!(
        directory
            .one_time_key_count(&bob_address)
            .await
            .expect("count"),
        104
    );

    // Above the floor nothing changes.
    directory.fetch_bundle(&bob_address).await.expect("fetch");
    bob.maintain_keys().await.expect("maintain");
    assert_eq!(
        directory
            .one_time_key_count(&bob_address)
            .await
            .expect("count"),
        103
    );
}

#[tokio::test]
async fn rotation_keeps_in_flight_handshakes_alive_through_the_grace_window() {
    let directory = Arc::new(InMemoryDirectory::new());
    let rotating = EngineConfig {
        signed_prekey_rotation: Duration::zero(),
        signed_prekey_grace: Duration::days(2),
        ..EngineConfig::default()
    };
    let (bob, bob_prekeys) = engine_with_config("bob", directory.clone(), rotating).await;
    let (alice, _) = engine_with_config("alice", directory.clone(), EngineConfig::default()).await;
    let bob_address = PeerAddress::new("bob", 1);
    let alice_address = PeerAddress::new("alice", 1);

    // Alice handshakes against the current signed prekey...
    let envelope = alice
        .encrypt(&bob_address, b"in flight")
        .await
        .expect("encrypt");
    let used_signed_prekey_id = envelope
        .handshake
        .as_ref()
        .expect("hello")
        .signed_prekey_id;
    let stale_bundle = directory.fetch_bundle(&bob_address).await.expect("fetch");

    // ...and Bob rotates before the message arrives. The retired key stays
    // usable through the grace window.
    bob.maintain_keys().await.expect("maintain");
    let current = bob_prekeys
        .current_signed_prekey()
        .await
        .expect("signed prekey");
    assert_ne!(current.id, used_signed_prekey_id);

    assert_eq!(
        bob.decrypt(&alice_address, &envelope).await.expect("decrypt"),
        b"in flight"
    );

    // Once the grace window closes the retired private key is destroyed;
    // a handshake pinned to it fails instead of degrading.
    bob_prekeys
        .rotate_signed_prekey_if_due(Duration::days(30), Duration::zero())
        .await
        .expect("purge");

    let carol_identity = IdentityKeyPair::generate(&mut rand::rng());
    let (mut carol_state, _) =
        handshake::initiate_handshake(&carol_identity, &stale_bundle, &mut rand::rng(), false)
            .expect("initiate");
    let carol_envelope =
        ratchet::ratchet_encrypt(&mut carol_state, b"too late", &Aes256GcmCipher, &mut rand::rng())
            .expect("encrypt");
    assert!(matches!(
        bob.decrypt(&PeerAddress::new("carol", 1), &carol_envelope)
            .await,
        Err(ProtocolError::InvalidSignedPreKeyId(_))
    ));
}

#[tokio::test]
async fn sessions_survive_an_engine_restart_via_the_file_store() {
    let directory = Arc::new(InMemoryDirectory::new());
    let alice_dir = tempfile::tempdir().expect("tempdir");
    let bob_dir = tempfile::tempdir().expect("tempdir");

    let (alice_prekeys, alice_secrets) = prekey_manager().await;
    let (bob_prekeys, bob_secrets) = prekey_manager().await;
    bob_prekeys
        .generate_one_time_prekeys(2)
        .await
        .expect("one-time prekeys");

    let alice_address = PeerAddress::new("alice", 1);
    let bob_address = PeerAddress::new("bob", 1);

    let open_engine = |address: PeerAddress,
                       prekeys: Arc<PreKeyManager>,
                       dir: std::path::PathBuf,
                       secrets: Arc<MemorySecretStore>,
                       directory: Arc<InMemoryDirectory>| async move {
        let sessions = FileSessionStore::open(dir, Arc::new(Aes256GcmCipher), secrets.as_ref())
            .await
            .expect("file store");
        EncryptionEngine::new(
            address,
            prekeys,
            Arc::new(sessions),
            directory,
            EngineConfig::default(),
        )
    };

    {
        let alice = open_engine(
            alice_address.clone(),
            alice_prekeys.clone(),
            alice_dir.path().to_path_buf(),
            alice_secrets.clone(),
            directory.clone(),
        )
        .await;
        let bob = open_engine(
            bob_address.clone(),
            bob_prekeys.clone(),
            bob_dir.path().to_path_buf(),
            bob_secrets.clone(),
            directory.clone(),
        )
        .await;
        alice.publish_keys().await.expect("publish");
        bob.publish_keys().await.expect("publish");

        let envelope = alice
            .encrypt(&bob_address, b"before restart")
            .await
            .expect("encrypt");
        assert_eq!(
            bob.decrypt(&alice_address, &envelope).await.expect("decrypt"),
            b"before restart"
        );
        let reply = bob.encrypt(&alice_address, b"ack").await.expect("encrypt");
        assert_eq!(
            alice.decrypt(&bob_address, &reply).await.expect("decrypt"),
            b"ack"
        );
    }

    // Fresh engines over the same stores pick the conversation back up.
    let alice = open_engine(
        alice_address.clone(),
        alice_prekeys,
        alice_dir.path().to_path_buf(),
        alice_secrets,
        directory.clone(),
    )
    .await;
    let bob = open_engine(
        bob_address.clone(),
        bob_prekeys,
        bob_dir.path().to_path_buf(),
        bob_secrets,
        directory,
    )
    .await;

    let envelope = alice
        .encrypt(&bob_address, b"after restart")
        .await
        .expect("encrypt");
    assert!(envelope.handshake.is_none(), "no re-handshake needed");
    assert_eq!(
        bob.decrypt(&alice_address, &envelope).await.expect("decrypt"),
        b"after restart"
    );
    let reply = bob
        .encrypt(&alice_address, b"still here")
        .await
        .expect("encrypt");
    assert_eq!(
        alice.decrypt(&bob_address, &reply).await.expect("decrypt"),
        b"still here"
    );
}
