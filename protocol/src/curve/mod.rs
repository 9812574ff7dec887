//! # Named Curves
//!
//! The pseudonymisation domains advertise their curve by name (`crv`). This
//! module maps those names onto the NIST prime curves supported by the crate
//! and exposes the handful of operations the protocol needs:
//!
//! - scalar multiplication of an affine point (delegated to the audited
//!   RustCrypto implementations, see [`arithmetic`]);
//! - on-curve validation and SEC1 point encoding and decoding;
//! - random blinding scalars and their inverses modulo the group order.
//!
//! Coordinates and scalars travel as [`BigUint`] because the wire formats
//! (Base64 of big-endian integers, Java-style signed byte arrays) are defined
//! in terms of plain integers rather than field elements.

pub mod arithmetic;
pub mod field;

use std::fmt;
use std::sync::OnceLock;

use num_bigint::{BigUint, RandBigInt};
use num_traits::Zero;
use rand::{CryptoRng, RngCore};

use crate::error::{PseudoError, Result};

/// An affine point given by its coordinates. The point at infinity is never
/// represented: every operation producing it fails instead.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Coordinates {
    pub x: BigUint,
    pub y: BigUint,
}

impl fmt::Debug for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Short Weierstrass parameters `y² = x³ + a·x + b (mod p)` and group order `n`.
#[derive(Debug)]
pub struct CurveParams {
    pub p: BigUint,
    pub a: BigUint,
    pub b: BigUint,
    pub n: BigUint,
    /// Bit length of `p`.
    pub field_bits: usize,
}

/// The curves a domain may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamedCurve {
    P256,
    P384,
    P521,
}

// Parameters as printed by `openssl ecparam -param_enc explicit`.
const P256_P: &str = "ffffffff00000001000000000000000000000000ffffffffffffffffffffffff";
const P256_A: &str = "ffffffff00000001000000000000000000000000fffffffffffffffffffffffc";
const P256_B: &str = "5ac635d8aa3a93e7b3ebbd55769886bc651d06b0cc53b0f63bce3c3e27d2604b";
const P256_N: &str = "ffffffff00000000ffffffffffffffffbce6faada7179e84f3b9cac2fc632551";

const P384_P: &str = "fffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffeffffffff0000000000000000ffffffff";
const P384_A: &str = "fffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffeffffffff0000000000000000fffffffc";
const P384_B: &str = "b3312fa7e23ee7e4988e056be3f82d19181d9c6efe8141120314088f5013875ac656398d8a2ed19d2a85c8edd3ec2aef";
const P384_N: &str = "ffffffffffffffffffffffffffffffffffffffffffffffffc7634d81f4372ddf581a0db248b0a77aecec196accc52973";

const P521_P: &str = "01ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff";
const P521_A: &str = "01fffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffc";
const P521_B: &str = "0051953eb9618e1c9a1f929a21a0b68540eea2da725b99b315f3b8b489918ef109e156193951ec7e937b1652c0bd3bb1bf073573df883d2c34f1ef451fd46b503f00";
const P521_N: &str = "01fffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffa51868783bf2f966b7fcc0148f709a5d03bb5c9b8899c47aebb6fb71e91386409";

fn hex_constant(hex: &str) -> BigUint {
    BigUint::parse_bytes(hex.as_bytes(), 16).expect("static curve constant is valid hex")
}

fn build_params(p: &str, a: &str, b: &str, n: &str) -> CurveParams {
    let p = hex_constant(p);
    let field_bits = p.bits() as usize;
    CurveParams {
        p,
        a: hex_constant(a),
        b: hex_constant(b),
        n: hex_constant(n),
        field_bits,
    }
}

impl NamedCurve {
    /// Resolve a curve from the name used in domain documents. JOSE names
    /// (`P-521`) and SEC names (`secp521r1`) are both accepted.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "P-256" | "secp256r1" | "prime256v1" => Some(NamedCurve::P256),
            "P-384" | "secp384r1" => Some(NamedCurve::P384),
            "P-521" | "secp521r1" => Some(NamedCurve::P521),
            _ => None,
        }
    }

    /// The JOSE name of the curve, as sent in the `crv` field of payloads.
    pub fn name(self) -> &'static str {
        match self {
            NamedCurve::P256 => "P-256",
            NamedCurve::P384 => "P-384",
            NamedCurve::P521 => "P-521",
        }
    }

    pub fn params(self) -> &'static CurveParams {
        static P256: OnceLock<CurveParams> = OnceLock::new();
        static P384: OnceLock<CurveParams> = OnceLock::new();
        static P521: OnceLock<CurveParams> = OnceLock::new();
        match self {
            NamedCurve::P256 => P256.get_or_init(|| build_params(P256_P, P256_A, P256_B, P256_N)),
            NamedCurve::P384 => P384.get_or_init(|| build_params(P384_P, P384_A, P384_B, P384_N)),
            NamedCurve::P521 => P521.get_or_init(|| build_params(P521_P, P521_A, P521_B, P521_N)),
        }
    }

    /// Group order `n`.
    pub fn order(self) -> &'static BigUint {
        &self.params().n
    }

    /// Length in bytes of an encoded coordinate (66 for P-521).
    pub fn coordinate_len(self) -> usize {
        self.params().field_bits.div_ceil(8)
    }

    /// Check that `(x, y)` lies on the curve.
    pub fn validate(self, point: &Coordinates) -> Result<()> {
        let (x, y) = self.encode_coordinates(point)?;
        match self {
            NamedCurve::P256 => arithmetic::validate::<p256::NistP256>(&x, &y),
            NamedCurve::P384 => arithmetic::validate::<p384::NistP384>(&x, &y),
            NamedCurve::P521 => arithmetic::validate::<p521::NistP521>(&x, &y),
        }
    }

    /// Multiply a point by a scalar in `[1, n)`. The result is affine, i.e.
    /// normalized.
    pub fn multiply(self, point: &Coordinates, scalar: &BigUint) -> Result<Coordinates> {
        if scalar.is_zero() || scalar >= self.order() {
            return Err(PseudoError::Crypto(
                "scalar must be in the range [1, n)".to_string(),
            ));
        }
        let (x, y) = self.encode_coordinates(point)?;
        let k = left_pad(&scalar.to_bytes_be(), self.coordinate_len());
        let (x, y) = match self {
            NamedCurve::P256 => arithmetic::multiply::<p256::NistP256>(&x, &y, &k),
            NamedCurve::P384 => arithmetic::multiply::<p384::NistP384>(&x, &y, &k),
            NamedCurve::P521 => arithmetic::multiply::<p521::NistP521>(&x, &y, &k),
        }?;
        Ok(Coordinates {
            x: BigUint::from_bytes_be(&x),
            y: BigUint::from_bytes_be(&y),
        })
    }

    /// Decode a SEC1 point, compressed or uncompressed, and check that it
    /// lies on the curve.
    pub fn decode_sec1(self, bytes: &[u8]) -> Result<Coordinates> {
        let (x, y) = match self {
            NamedCurve::P256 => arithmetic::decode_sec1::<p256::NistP256>(bytes),
            NamedCurve::P384 => arithmetic::decode_sec1::<p384::NistP384>(bytes),
            NamedCurve::P521 => arithmetic::decode_sec1::<p521::NistP521>(bytes),
        }?;
        Ok(Coordinates {
            x: BigUint::from_bytes_be(&x),
            y: BigUint::from_bytes_be(&y),
        })
    }

    /// SEC1 encoding of a point of this curve.
    pub fn encode_sec1(self, point: &Coordinates, compress: bool) -> Vec<u8> {
        let x = point.x.to_bytes_be();
        let y = point.y.to_bytes_be();
        match self {
            NamedCurve::P256 => arithmetic::encode_sec1::<p256::NistP256>(&x, &y, compress),
            NamedCurve::P384 => arithmetic::encode_sec1::<p384::NistP384>(&x, &y, compress),
            NamedCurve::P521 => arithmetic::encode_sec1::<p521::NistP521>(&x, &y, compress),
        }
    }

    /// Draw a blinding scalar uniformly in `[1, n)`.
    pub fn random_scalar<R: RngCore + CryptoRng>(self, rng: &mut R) -> BigUint {
        let n = self.order();
        loop {
            let candidate = rng.gen_biguint_below(n);
            if !candidate.is_zero() && &candidate != n {
                return candidate;
            }
        }
    }

    /// `k⁻¹ mod n`.
    pub fn invert_scalar(self, k: &BigUint) -> Result<BigUint> {
        field::mod_inverse(k, self.order())
            .ok_or_else(|| PseudoError::Crypto("scalar is not invertible modulo the group order".into()))
    }

    /// Fixed-width big-endian encoding of a field element (coordinate).
    pub fn encode_field_element(self, value: &BigUint) -> Result<Vec<u8>> {
        if value >= &self.params().p {
            return Err(PseudoError::InvalidPseudonym(
                "coordinate is not a field element".to_string(),
            ));
        }
        Ok(left_pad(&value.to_bytes_be(), self.coordinate_len()))
    }

    fn encode_coordinates(self, point: &Coordinates) -> Result<(Vec<u8>, Vec<u8>)> {
        Ok((
            self.encode_field_element(&point.x)?,
            self.encode_field_element(&point.y)?,
        ))
    }
}

impl fmt::Display for NamedCurve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Left-pad `bytes` with zeros up to `len`. Longer inputs are returned as-is.
pub(crate) fn left_pad(bytes: &[u8], len: usize) -> Vec<u8> {
    if bytes.len() >= len {
        return bytes.to_vec();
    }
    let mut out = vec![0u8; len - bytes.len()];
    out.extend_from_slice(bytes);
    out
}
