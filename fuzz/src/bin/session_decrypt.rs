#[macro_use]
extern crate afl;
use paladin::{EncryptedMessage, RatchetConfig, RatchetSession, X25519Secret};

fn get_session() -> RatchetSession {
    // The Victim
    let bob = X25519Secret::generate().expect("Setup failed");

    RatchetSession::init_bob(bob, [7u8; 32], RatchetConfig::default()).expect("Setup failed")
}

fn main() {
    let mut session = get_session();
    let associated_data = b"fuzz-context";

    fuzz!(|data: &[u8]| {
        if let Ok(Ok(msg)) = std::str::from_utf8(data).map(EncryptedMessage::from_json) {
            let _ = session.decrypt_with_ad(&msg, associated_data);
        }
    });
}
