//! Property tests for the entry and signaling ciphers

use pairchat_core::{CryptoService, EntryCrypto, ShareSecret, SignalingKey};
use proptest::prelude::*;

proptest! {
    #[test]
    fn prop_entry_roundtrip(
        secret in prop::collection::vec(any::<u8>(), 1..64),
        plaintext in prop::collection::vec(any::<u8>(), 0..2048),
    ) {
        let crypto = EntryCrypto::derive(&ShareSecret::new(secret));
        let sealed = crypto.encrypt(&plaintext).unwrap();
        prop_assert_eq!(crypto.decrypt(&sealed).unwrap(), plaintext);
    }

    #[test]
    fn prop_signal_roundtrip(
        secret in prop::collection::vec(any::<u8>(), 1..64),
        sdp in "\\PC{0,512}",
    ) {
        let key = SignalingKey::derive(&ShareSecret::new(secret), "SDP");
        let sealed = key.seal(&sdp).unwrap();
        prop_assert_eq!(key.open(&sealed).unwrap(), sdp);
    }

    #[test]
    fn prop_other_secret_cannot_read(
        plaintext in prop::collection::vec(any::<u8>(), 1..256),
    ) {
        let ours = EntryCrypto::derive(&ShareSecret::new(b"ours".to_vec()));
        let theirs = EntryCrypto::derive(&ShareSecret::new(b"theirs".to_vec()));
        let sealed = ours.encrypt(&plaintext).unwrap();
        prop_assert!(theirs.decrypt(&sealed).is_err());
    }
}
