use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use sha2::Digest;
use sha2::Sha256;

/// RFC 7636 verifier/challenge pair, S256 method.
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

/// 64 random bytes encode to an 86-character verifier, inside the 43..=128
/// range RFC 7636 requires.
pub fn generate_pkce() -> PkcePair {
    let bytes: [u8; 64] = rand::rng().random();
    let verifier = URL_SAFE_NO_PAD.encode(bytes);
    let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
    PkcePair {
        verifier,
        challenge,
    }
}

pub fn random_state() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use sha2::Digest;
    use sha2::Sha256;

    use super::generate_pkce;
    use super::random_state;

    #[test]
    fn verifier_length_is_in_range() {
        let pair = generate_pkce();
        assert!((43..=128).contains(&pair.verifier.len()));
    }

    #[test]
    fn challenge_is_s256_of_verifier() {
        let pair = generate_pkce();
        let expected = URL_SAFE_NO_PAD.encode(Sha256::digest(pair.verifier.as_bytes()));
        assert_eq!(pair.challenge, expected);
    }

    #[test]
    fn states_are_unique() {
        assert_ne!(random_state(), random_state());
    }
}
