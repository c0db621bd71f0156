//! SRP-6a for HomeKit Pair-Setup.
//!
//! Uses 3072-bit prime (RFC 5054), generator g=5, SHA-512.
//!
//! The accessory side is exposed as stateless primitives over fixed-size
//! byte arrays so callers can keep (and wipe) the intermediate values in
//! their own scratch state. [`SrpClient`] implements the controller side.

use hap_core::error::CryptoError;
use num_bigint::{BigUint, RandBigInt};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha512};
use std::sync::OnceLock;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// N size in bytes (3072 bits = 384 bytes).
pub const N_BYTES: usize = 384;

/// Size of the random private exponent b.
pub const PRIVATE_KEY_BYTES: usize = 32;

/// Size of the salt used for the verifier.
pub const SALT_BYTES: usize = 16;

/// Size of proofs, session keys and the scrambling parameter.
pub const HASH_BYTES: usize = 64;

/// Username used by HomeKit Pair-Setup.
pub const PAIR_SETUP_USERNAME: &[u8] = b"Pair-Setup";

/// RFC 5054 3072-bit prime N as hex string.
const RFC5054_N_3072: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E08",
    "8A67CC74020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B",
    "302B0A6DF25F14374FE1356D6D51C245E485B576625E7EC6F44C42E9",
    "A637ED6B0BFF5CB6F406B7EDEE386BFB5A899FA5AE9F24117C4B1FE6",
    "49286651ECE45B3DC2007CB8A163BF0598DA48361C55D39A69163FA8",
    "FD24CF5F83655D23DCA3AD961C62F356208552BB9ED529077096966D",
    "670C354E4ABC9804F1746C08CA18217C32905E462E36CE3BE39E772C",
    "180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF695581718",
    "3995497CEA956AE515D2261898FA051015728E5A8AAAC42DAD33170D",
    "04507A33A85521ABDF1CBA64ECFB850458DBEF0A8AEA71575D060C7D",
    "B3970F85A6E1E4C7ABF5AE8CDB0933D71E8C94E04A25619DCEE3D226",
    "1AD2EE6BF12FFA06D98A0864D87602733EC86A64521F2B18177B200C",
    "BBE117577A615D6C770988C0BAD946E208E24FA074E5AB3143DB5BFC",
    "E0FD108E4B82D120A93AD2CAFFFFFFFFFFFFFFFF"
);

/// SRP-6a parameters (3072-bit, RFC 5054).
pub struct SrpParams {
    /// Prime modulus N.
    pub n: BigUint,
    /// Generator g (always 5).
    pub g: BigUint,
}

impl Default for SrpParams {
    fn default() -> Self {
        let n = BigUint::parse_bytes(RFC5054_N_3072.as_bytes(), 16)
            .expect("Invalid RFC 5054 prime constant");
        let g = BigUint::from(5u32);
        Self { n, g }
    }
}

/// Shared parameter set.
pub fn params() -> &'static SrpParams {
    static PARAMS: OnceLock<SrpParams> = OnceLock::new();
    PARAMS.get_or_init(SrpParams::default)
}

/// Generate a random salt.
pub fn generate_salt() -> [u8; SALT_BYTES] {
    let mut salt = [0u8; SALT_BYTES];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Generate a random private exponent b.
pub fn generate_private_key() -> [u8; PRIVATE_KEY_BYTES] {
    let mut b = [0u8; PRIVATE_KEY_BYTES];
    OsRng.fill_bytes(&mut b);
    b
}

/// Compute the verifier v = g^x with x = H(salt || H(username || ":" || password)).
pub fn verifier(salt: &[u8], username: &[u8], password: &[u8]) -> [u8; N_BYTES] {
    let p = params();
    let x = compute_x(salt, username, password);
    pad_to_n(&p.g.modpow(&x, &p.n))
}

/// Compute the accessory public key B = (k*v + g^b) mod N.
pub fn public_key(b: &[u8], verifier: &[u8]) -> [u8; N_BYTES] {
    let p = params();
    let b = BigUint::from_bytes_be(b);
    let v = BigUint::from_bytes_be(verifier);
    let k = compute_k(p);
    let g_b = p.g.modpow(&b, &p.n);
    pad_to_n(&((k * v + g_b) % &p.n))
}

/// Compute the scrambling parameter u = H(PAD(A) || PAD(B)).
pub fn scrambling_parameter(a: &[u8], b: &[u8]) -> [u8; HASH_BYTES] {
    let mut hasher = Sha512::new();
    hasher.update(pad_bytes(a));
    hasher.update(pad_bytes(b));
    hasher.finalize().into()
}

/// Compute the premaster secret S = (A * v^u)^b mod N.
///
/// Fails with [`CryptoError::IllegalPublicKey`] when A mod N is zero.
pub fn premaster_secret(
    a: &[u8],
    b: &[u8],
    u: &[u8],
    verifier: &[u8],
) -> Result<[u8; N_BYTES], CryptoError> {
    let p = params();
    let a = BigUint::from_bytes_be(a);
    if &a % &p.n == BigUint::ZERO {
        return Err(CryptoError::IllegalPublicKey);
    }
    let b = BigUint::from_bytes_be(b);
    let u = BigUint::from_bytes_be(u);
    let v = BigUint::from_bytes_be(verifier);

    let v_u = v.modpow(&u, &p.n);
    let base = (a * v_u) % &p.n;
    Ok(pad_to_n(&base.modpow(&b, &p.n)))
}

/// Compute the session key K = H(PAD(S)).
pub fn session_key(s: &[u8]) -> [u8; HASH_BYTES] {
    let mut hasher = Sha512::new();
    hasher.update(pad_bytes(s));
    hasher.finalize().into()
}

/// Compute the client proof M1 = H(H(N) XOR H(g) || H(I) || salt || PAD(A) || PAD(B) || K).
pub fn proof_m1(
    username: &[u8],
    salt: &[u8],
    a: &[u8],
    b: &[u8],
    k: &[u8],
) -> [u8; HASH_BYTES] {
    let p = params();
    let a = BigUint::from_bytes_be(a);
    let b = BigUint::from_bytes_be(b);
    let mut m1 = [0u8; HASH_BYTES];
    m1.copy_from_slice(&compute_m1(p, username, salt, &a, &b, k));
    m1
}

/// Compute the accessory proof M2 = H(PAD(A) || M1 || K).
pub fn proof_m2(a: &[u8], m1: &[u8], k: &[u8]) -> [u8; HASH_BYTES] {
    let mut hasher = Sha512::new();
    hasher.update(pad_bytes(a));
    hasher.update(m1);
    hasher.update(k);
    hasher.finalize().into()
}

/// Constant-time proof comparison.
pub fn proofs_match(expected: &[u8], actual: &[u8]) -> bool {
    expected.ct_eq(actual).into()
}

/// Client-side SRP state machine.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SrpClient {
    identity: Vec<u8>,
    password: Vec<u8>,
    private_key: Vec<u8>,
    #[zeroize(skip)]
    public_key: BigUint,
}

/// Server challenge containing salt and public key.
pub struct SrpChallenge {
    pub salt: [u8; 16],
    pub server_public_key: Vec<u8>,
}

/// Result of processing a challenge.
pub struct SrpProof {
    pub client_proof: Vec<u8>,
    pub shared_secret: Vec<u8>,
    pub expected_server_proof: Vec<u8>,
}

impl SrpClient {
    /// Create new SRP client with identity and password.
    ///
    /// For Pair-Setup, identity is "Pair-Setup" and password is the setup code.
    pub fn new(identity: &[u8], password: &[u8]) -> Self {
        let a = OsRng.gen_biguint(256);
        Self::from_biguint(identity, password, a)
    }

    /// Create SRP client with a specific private key.
    pub fn with_private_key(identity: &[u8], password: &[u8], private_key: &[u8]) -> Self {
        Self::from_biguint(identity, password, BigUint::from_bytes_be(private_key))
    }

    fn from_biguint(identity: &[u8], password: &[u8], a: BigUint) -> Self {
        let p = params();
        let public_key = p.g.modpow(&a, &p.n);
        Self {
            identity: identity.to_vec(),
            password: password.to_vec(),
            private_key: a.to_bytes_be(),
            public_key,
        }
    }

    /// Get client public key A (384 bytes for 3072-bit).
    pub fn public_key(&self) -> Vec<u8> {
        pad_to_n(&self.public_key).to_vec()
    }

    /// Process server's challenge and generate proof.
    pub fn process_challenge(&self, challenge: &SrpChallenge) -> Result<SrpProof, CryptoError> {
        let p = params();
        let b = BigUint::from_bytes_be(&challenge.server_public_key);

        if &b % &p.n == BigUint::ZERO {
            return Err(CryptoError::IllegalPublicKey);
        }

        let a = BigUint::from_bytes_be(&self.private_key);

        let u = compute_u(&self.public_key, &b);
        if u == BigUint::ZERO {
            return Err(CryptoError::KeyDerivation("u = 0".to_string()));
        }

        let x = compute_x(&challenge.salt, &self.identity, &self.password);
        let k = compute_k(p);

        // S = (B - k * g^x)^(a + u*x) mod N
        let g_x = p.g.modpow(&x, &p.n);
        let k_gx = (&k * &g_x) % &p.n;
        let base = if b >= k_gx {
            (&b - &k_gx) % &p.n
        } else {
            (&b + &p.n - &k_gx) % &p.n
        };

        let exponent = &a + &u * &x;
        let s = base.modpow(&exponent, &p.n);
        let shared_secret = session_key(&pad_to_n(&s)).to_vec();

        let client_proof = compute_m1(
            p,
            &self.identity,
            &challenge.salt,
            &self.public_key,
            &b,
            &shared_secret,
        );
        let expected_server_proof =
            proof_m2(&pad_to_n(&self.public_key), &client_proof, &shared_secret).to_vec();

        Ok(SrpProof {
            client_proof,
            shared_secret,
            expected_server_proof,
        })
    }

    /// Verify server's proof M2.
    pub fn verify_server_proof(&self, proof: &[u8], expected: &[u8]) -> bool {
        proofs_match(expected, proof)
    }
}

fn compute_m1(
    params: &SrpParams,
    identity: &[u8],
    salt: &[u8],
    a: &BigUint,
    b: &BigUint,
    k: &[u8],
) -> Vec<u8> {
    let h_n = Sha512::digest(pad_to_n(&params.n));

    // H(g) is taken over the raw generator bytes, unlike k which pads g.
    let h_g = Sha512::digest(params.g.to_bytes_be());

    let mut xor_result = [0u8; HASH_BYTES];
    for (out, (n, g)) in xor_result.iter_mut().zip(h_n.iter().zip(h_g.iter())) {
        *out = n ^ g;
    }

    let h_i = Sha512::digest(identity);

    let mut hasher = Sha512::new();
    hasher.update(xor_result);
    hasher.update(h_i);
    hasher.update(salt);
    hasher.update(pad_to_n(a));
    hasher.update(pad_to_n(b));
    hasher.update(k);
    hasher.finalize().to_vec()
}

/// Pad BigUint to N_BYTES with leading zeros.
fn pad_to_n(value: &BigUint) -> [u8; N_BYTES] {
    pad_bytes(&value.to_bytes_be())
}

/// Left-pad (or truncate from the left) a big-endian number to N_BYTES.
fn pad_bytes(bytes: &[u8]) -> [u8; N_BYTES] {
    let mut padded = [0u8; N_BYTES];
    if bytes.len() >= N_BYTES {
        padded.copy_from_slice(&bytes[bytes.len() - N_BYTES..]);
    } else {
        padded[N_BYTES - bytes.len()..].copy_from_slice(bytes);
    }
    padded
}

/// Compute k = SHA512(N || PAD(g)).
fn compute_k(params: &SrpParams) -> BigUint {
    let mut hasher = Sha512::new();
    hasher.update(pad_to_n(&params.n));
    hasher.update(pad_to_n(&params.g));
    BigUint::from_bytes_be(&hasher.finalize())
}

/// Compute u = SHA512(PAD(A) || PAD(B)).
fn compute_u(a: &BigUint, b: &BigUint) -> BigUint {
    BigUint::from_bytes_be(&scrambling_parameter(&a.to_bytes_be(), &b.to_bytes_be()))
}

/// Compute x = SHA512(salt || SHA512(identity || ":" || password)).
fn compute_x(salt: &[u8], identity: &[u8], password: &[u8]) -> BigUint {
    let mut hasher = Sha512::new();
    hasher.update(identity);
    hasher.update(b":");
    hasher.update(password);
    let inner_hash = hasher.finalize();

    let mut hasher = Sha512::new();
    hasher.update(salt);
    hasher.update(inner_hash);
    BigUint::from_bytes_be(&hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    mod srp_params {
        use super::*;

        #[test]
        fn default_uses_3072_bit_prime() {
            assert_eq!(params().n.to_bytes_be().len(), N_BYTES);
        }

        #[test]
        fn generator_is_5() {
            assert_eq!(params().g, BigUint::from(5u32));
        }

        #[test]
        fn prime_matches_rfc5054() {
            let n_hex = hex::encode(params().n.to_bytes_be()).to_uppercase();
            assert_eq!(n_hex, RFC5054_N_3072.to_uppercase());
        }
    }

    mod accessory_primitives {
        use super::*;

        #[test]
        fn verifier_matches_direct_computation() {
            let salt = [0x11u8; 16];
            let v = verifier(&salt, PAIR_SETUP_USERNAME, b"111-22-333");
            let x = compute_x(&salt, PAIR_SETUP_USERNAME, b"111-22-333");
            let expected = pad_to_n(&params().g.modpow(&x, &params().n));
            assert_eq!(v, expected);
        }

        #[test]
        fn premaster_rejects_zero_and_multiples_of_n() {
            let v = verifier(&[1u8; 16], PAIR_SETUP_USERNAME, b"111-22-333");
            let b = [7u8; 32];
            let u = [1u8; 64];
            let zero = [0u8; N_BYTES];
            assert!(matches!(
                premaster_secret(&zero, &b, &u, &v),
                Err(CryptoError::IllegalPublicKey)
            ));
            let n = pad_to_n(&params().n);
            assert!(matches!(
                premaster_secret(&n, &b, &u, &v),
                Err(CryptoError::IllegalPublicKey)
            ));
        }

        #[test]
        fn scrambling_parameter_pads_inputs() {
            let a_short = [0x01u8, 0x02];
            let mut a_long = [0u8; N_BYTES];
            a_long[N_BYTES - 2..].copy_from_slice(&a_short);
            let b = [0x33u8; N_BYTES];
            assert_eq!(scrambling_parameter(&a_short, &b), scrambling_parameter(&a_long, &b));
        }

        #[test]
        fn proof_comparison() {
            assert!(proofs_match(&[0x42u8; 64], &[0x42u8; 64]));
            let mut wrong = [0x42u8; 64];
            wrong[63] = 0;
            assert!(!proofs_match(&[0x42u8; 64], &wrong));
            assert!(!proofs_match(&[0x42u8; 64], &[0x42u8; 63]));
        }
    }

    mod srp_client {
        use super::*;

        #[test]
        fn new_generates_random_private_key() {
            let client1 = SrpClient::new(PAIR_SETUP_USERNAME, b"1234");
            let client2 = SrpClient::new(PAIR_SETUP_USERNAME, b"1234");
            assert_ne!(client1.private_key, client2.private_key);
            assert_ne!(client1.public_key(), client2.public_key());
        }

        #[test]
        fn public_key_is_384_bytes() {
            let client = SrpClient::new(PAIR_SETUP_USERNAME, b"1234");
            assert_eq!(client.public_key().len(), N_BYTES);
        }

        #[test]
        fn rejects_server_key_multiple_of_n() {
            let client = SrpClient::new(PAIR_SETUP_USERNAME, b"1234");
            let challenge = SrpChallenge {
                salt: [0u8; 16],
                server_public_key: pad_to_n(&params().n).to_vec(),
            };
            assert!(client.process_challenge(&challenge).is_err());

            let challenge = SrpChallenge {
                salt: [0u8; 16],
                server_public_key: vec![0u8; N_BYTES],
            };
            assert!(client.process_challenge(&challenge).is_err());
        }
    }

    mod handshake {
        use super::*;

        struct Accessory {
            salt: [u8; 16],
            verifier: [u8; N_BYTES],
            b: [u8; 32],
            public_key: [u8; N_BYTES],
        }

        impl Accessory {
            fn new(password: &[u8]) -> Self {
                let salt = generate_salt();
                let verifier = verifier(&salt, PAIR_SETUP_USERNAME, password);
                let b = generate_private_key();
                let public_key = public_key(&b, &verifier);
                Self {
                    salt,
                    verifier,
                    b,
                    public_key,
                }
            }

            fn challenge(&self) -> SrpChallenge {
                let first = self.public_key.iter().position(|&x| x != 0).unwrap_or(N_BYTES);
                SrpChallenge {
                    salt: self.salt,
                    server_public_key: self.public_key[first..].to_vec(),
                }
            }

            fn session_key(&self, a: &[u8]) -> [u8; 64] {
                let u = scrambling_parameter(a, &self.public_key);
                let s = premaster_secret(a, &self.b, &u, &self.verifier).unwrap();
                session_key(&s)
            }
        }

        #[test]
        fn client_and_accessory_agree() {
            let accessory = Accessory::new(b"111-22-333");
            let client = SrpClient::new(PAIR_SETUP_USERNAME, b"111-22-333");
            let proof = client.process_challenge(&accessory.challenge()).unwrap();

            let a = client.public_key();
            let k = accessory.session_key(&a);
            assert_eq!(proof.shared_secret, k.to_vec());

            let m1 = proof_m1(PAIR_SETUP_USERNAME, &accessory.salt, &a, &accessory.public_key, &k);
            assert!(proofs_match(&m1, &proof.client_proof));

            let m2 = proof_m2(&a, &m1, &k);
            assert!(client.verify_server_proof(&m2, &proof.expected_server_proof));
        }

        #[test]
        fn wrong_password_fails_proof() {
            let accessory = Accessory::new(b"111-22-333");
            let client = SrpClient::new(PAIR_SETUP_USERNAME, b"111-22-334");
            let proof = client.process_challenge(&accessory.challenge()).unwrap();

            let a = client.public_key();
            let k = accessory.session_key(&a);
            assert_ne!(proof.shared_secret, k.to_vec());

            let m1 = proof_m1(PAIR_SETUP_USERNAME, &accessory.salt, &a, &accessory.public_key, &k);
            assert!(!proofs_match(&m1, &proof.client_proof));
        }
    }

    mod known_vectors {
        use super::*;

        #[test]
        fn prime_sanity() {
            let p = params();
            assert!(&p.n % BigUint::from(2u32) != BigUint::ZERO);
            assert!(p.n > p.g);
            let g_squared = p.g.modpow(&BigUint::from(2u32), &p.n);
            assert_ne!(g_squared, BigUint::from(1u32));
        }

        #[test]
        fn compute_x_is_double_hash() {
            let salt = [0x01u8; 16];
            let inner = Sha512::digest(b"alice:password123");
            let mut outer = Sha512::new();
            outer.update(salt);
            outer.update(inner);
            let expected = BigUint::from_bytes_be(&outer.finalize());
            assert_eq!(compute_x(&salt, b"alice", b"password123"), expected);
        }

        #[test]
        fn pad_bytes_left_pads() {
            let padded = pad_bytes(&[0xFF]);
            assert!(padded[..N_BYTES - 1].iter().all(|&b| b == 0));
            assert_eq!(padded[N_BYTES - 1], 0xFF);
        }
    }
}
