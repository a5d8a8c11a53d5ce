#[macro_use]
extern crate afl;
use paladin::EncryptedMessage;

fn main() {
    fuzz!(|data: &[u8]| {
        if let Ok(json) = std::str::from_utf8(data) {
            let _ = EncryptedMessage::from_json(json);
        }
    });
}
