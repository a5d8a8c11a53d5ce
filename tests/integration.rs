#[cfg(test)]
mod integration_tests {
    use paladin::kdf::{HashAlgorithm, hkdf};
    use paladin::{
        EncryptedMessage, Error, GroupConfig, MlsGroupState, RatchetConfig, RatchetSession,
        SessionPhase, UpdatePath, X25519PublicKey, X25519Secret,
    };

    fn shared_secret() -> [u8; 32] {
        let okm = hkdf(
            Some(b"integration-salt".as_slice()),
            b"out-of-band key agreement output",
            b"shared secret",
            32,
            HashAlgorithm::Sha256,
        )
        .unwrap();
        okm.try_into().unwrap()
    }

    fn sessions() -> (RatchetSession, RatchetSession) {
        let bob_secret = X25519Secret::generate().unwrap();
        let alice =
            RatchetSession::init_alice(&bob_secret.public_key(), shared_secret(), RatchetConfig::default())
                .unwrap();
        let bob = RatchetSession::init_bob(bob_secret, shared_secret(), RatchetConfig::default()).unwrap();
        (alice, bob)
    }

    /// Sends a message through its JSON wire form.
    fn transmit(message: &EncryptedMessage) -> EncryptedMessage {
        EncryptedMessage::from_json(&message.to_json().unwrap()).unwrap()
    }

    #[test]
    fn test_full_protocol_flow() {
        println!("Step 1: Alice and Bob share a secret and Bob publishes his ratchet key...");
        let bob_secret = X25519Secret::generate().unwrap();
        let bob_jwk = bob_secret.public_key().to_jwk(Some("bob".to_string())).to_json().unwrap();
        let bob_key = X25519PublicKey::from_jwk(&paladin::PublicKeyJwk::from_json(&bob_jwk).unwrap()).unwrap();

        let mut alice =
            RatchetSession::init_alice(&bob_key, shared_secret(), RatchetConfig::default()).unwrap();
        let mut bob = RatchetSession::init_bob(bob_secret, shared_secret(), RatchetConfig::default()).unwrap();

        println!("Step 2: Alice sends the first message...");
        let hello = "Hello Bob, this is Alice!";
        let encrypted = alice.encrypt(hello.as_bytes()).unwrap();
        assert_eq!(encrypted.sequence, 0);

        println!("Step 3: Bob decrypts it...");
        let decrypted = bob.decrypt(&transmit(&encrypted)).unwrap();
        assert_eq!(String::from_utf8(decrypted).unwrap(), hello);
        assert_eq!(bob.phase(), SessionPhase::Active);

        println!("Step 4: Alice keeps sending on her chain...");
        alice.encrypt(b"second").unwrap();
        assert_eq!(alice.sending_index(), 2);

        println!("Step 5: Bob replies under his new ratchet key...");
        let reply = bob.encrypt(b"Hi Alice!").unwrap();
        assert_eq!(
            reply.header.ratchet_key,
            X25519PublicKey::from_jwk(&bob.export_public_key()).unwrap()
        );
        assert_ne!(reply.header.ratchet_key, bob_key);

        println!("Step 6: Alice decrypts and her sending chain restarts...");
        assert_eq!(alice.decrypt(&transmit(&reply)).unwrap(), b"Hi Alice!");
        let next = alice.encrypt(b"after ratchet").unwrap();
        assert_eq!(next.sequence, 0);
        assert_eq!(next.header.previous_chain_length, 2);

        println!("Step 7: Bob receives it, skipping the lost second message...");
        assert_eq!(bob.decrypt(&transmit(&next)).unwrap(), b"after ratchet");
        assert_eq!(bob.skipped_key_count(), 1);

        println!("Step 8: Associated data binds the message to its context...");
        let bound = alice.encrypt_with_ad(b"bound", b"Alice->Bob:9").unwrap();
        assert_eq!(
            bob.decrypt_with_ad(&bound, b"Alice->Bob:10"),
            Err(Error::DecryptionFailed)
        );
        assert_eq!(bob.decrypt_with_ad(&bound, b"Alice->Bob:9").unwrap(), b"bound");

        println!("All integration tests passed successfully!");
    }

    #[test]
    fn test_long_conversation_with_reordering() {
        let (mut alice, mut bob) = sessions();

        for round in 0..20 {
            let burst: Vec<_> = (0..5)
                .map(|i| alice.encrypt(format!("a{round}.{i}").as_bytes()).unwrap())
                .collect();
            for i in [4, 0, 3, 1, 2] {
                assert_eq!(
                    bob.decrypt(&burst[i]).unwrap(),
                    format!("a{round}.{i}").as_bytes()
                );
            }

            let reply = bob.encrypt(format!("b{round}").as_bytes()).unwrap();
            assert_eq!(alice.decrypt(&reply).unwrap(), format!("b{round}").as_bytes());
        }

        assert_eq!(alice.skipped_key_count(), 0);
        assert_eq!(bob.skipped_key_count(), 0);
    }

    #[test]
    fn test_independent_sessions() {
        let (mut alice_bob, mut bob) = sessions();
        let (mut alice_carol, mut carol) = sessions();

        let to_bob = alice_bob.encrypt(b"for bob").unwrap();
        let to_carol = alice_carol.encrypt(b"for carol").unwrap();

        assert_ne!(alice_bob.session_id(), alice_carol.session_id());
        assert!(carol.decrypt(&to_bob).is_err());
        assert_eq!(carol.phase(), SessionPhase::AwaitingFirstSend);

        assert_eq!(bob.decrypt(&to_bob).unwrap(), b"for bob");
        assert_eq!(carol.decrypt(&to_carol).unwrap(), b"for carol");
    }

    #[test]
    fn test_group_lifecycle() {
        let config = GroupConfig::default();

        println!("Step 1: Alice founds the group...");
        let mut alice = MlsGroupState::init_group("project-x", "alice", config.clone()).unwrap();

        println!("Step 2: Alice adds Bob and welcomes him...");
        let bob_secret = X25519Secret::generate().unwrap();
        alice.add_member("bob", &bob_secret.public_key()).unwrap();
        let welcome = alice.create_welcome(1).unwrap().to_json().unwrap();
        let mut bob = MlsGroupState::join(
            &paladin::Welcome::from_json(&welcome).unwrap(),
            "bob",
            bob_secret,
            config.clone(),
        )
        .unwrap();
        assert_eq!(alice.epoch_secret(), bob.epoch_secret());

        println!("Step 3: Alice adds Carol; Bob follows the commit...");
        let carol_secret = X25519Secret::generate().unwrap();
        let add_carol = alice.add_member("carol", &carol_secret.public_key()).unwrap();
        let add_carol = UpdatePath::from_json(&add_carol.to_json().unwrap()).unwrap();
        bob.process_update_path(&add_carol).unwrap();
        let mut carol =
            MlsGroupState::join(&alice.create_welcome(2).unwrap(), "carol", carol_secret, config.clone())
                .unwrap();
        assert_eq!(alice.epoch_secret(), bob.epoch_secret());
        assert_eq!(alice.epoch_secret(), carol.epoch_secret());

        println!("Step 4: Carol rotates her keys...");
        let update = carol.update_keys().unwrap();
        alice.process_update_path(&update).unwrap();
        bob.process_update_path(&update).unwrap();
        assert_eq!(alice.epoch(), 3);
        assert_eq!(carol.epoch_secret(), bob.epoch_secret());

        println!("Step 5: Bob removes Alice...");
        let previous = *alice.epoch_secret();
        let remove_alice = bob.remove_member(0).unwrap();
        carol.process_update_path(&remove_alice).unwrap();
        assert_eq!(carol.epoch_secret(), bob.epoch_secret());
        assert_ne!(carol.epoch_secret(), &previous);

        println!("Step 6: Alice can no longer follow...");
        assert_eq!(
            alice.process_update_path(&remove_alice),
            Err(Error::GroupPathUnreachable)
        );
        assert_eq!(alice.epoch_secret(), &previous);

        println!("Step 7: Members derive the same application keys...");
        assert_eq!(
            bob.export_secret("messages", 32).unwrap(),
            carol.export_secret("messages", 32).unwrap()
        );

        let state = carol.export_group_state().unwrap();
        assert!(state.contains("\"epoch\": 4"));
        assert!(state.contains("\"members\""));

        println!("Group lifecycle test passed successfully!");
    }
}
