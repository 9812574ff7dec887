//! # Value Codec
//!
//! Embeds a short byte string into the `x` coordinate of a curve point so it
//! can be blinded and sent to the authority.
//!
//! ```text
//! x = 00 || value || len(value) || 00 * buffer_size   (big-endian integer)
//! ```
//!
//! `x` is incremented until `x³ + a·x + b` has a square root. The trailing
//! buffer absorbs the increments, so decoding only needs the length byte
//! found at `coordinate_len - buffer_size - 1`.

use std::fmt;
use std::sync::Arc;

use num_bigint::BigUint;

use crate::curve::{field, Coordinates};
use crate::domain::Domain;
use crate::error::{PseudoError, Result};
use crate::point::CurvePoint;

/// A plaintext identifier encoded as a point of its domain's curve.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Value(CurvePoint);

impl Value {
    /// Encode `bytes` in `domain`. Fails when `bytes` is longer than
    /// [`Domain::max_value_size`], or when no point exists below `p` for it.
    pub fn from_bytes(domain: &Arc<Domain>, bytes: &[u8]) -> Result<Value> {
        let max = domain.max_value_size();
        if bytes.len() > max {
            return Err(PseudoError::InvalidValue(format!(
                "the value is too long: should be max {max} bytes"
            )));
        }

        let mut x_bytes = Vec::with_capacity(bytes.len() + 2 + domain.buffer_size());
        x_bytes.push(0);
        x_bytes.extend_from_slice(bytes);
        // max <= 65 so the length always fits in a byte.
        x_bytes.push(bytes.len() as u8);
        x_bytes.resize(x_bytes.len() + domain.buffer_size(), 0);

        let params = domain.curve().params();
        let mut x = BigUint::from_bytes_be(&x_bytes);
        let y = loop {
            if x >= params.p {
                return Err(PseudoError::InvalidValue(
                    "no curve point found for the value".to_string(),
                ));
            }
            if let Some(y) = field::sqrt(&field::curve_rhs(params, &x), &params.p) {
                break y;
            }
            x += 1u32;
        };

        Ok(Value(CurvePoint::from_validated(
            domain.clone(),
            Coordinates { x, y },
        )))
    }

    /// Encode the UTF-8 bytes of `text`.
    pub fn from_text(domain: &Arc<Domain>, text: &str) -> Result<Value> {
        Self::from_bytes(domain, text.as_bytes())
    }

    /// Interpret a point returned by the authority as a value.
    pub(crate) fn from_point(point: CurvePoint) -> Value {
        Value(point)
    }

    /// Decode the embedded bytes. Fails for points that were not produced by
    /// the value codec with this domain's buffer size.
    pub fn as_bytes(&self) -> Result<Vec<u8>> {
        let x = self.0.x_bytes();
        let buffer = self.0.domain().buffer_size();
        let length_pos = x
            .len()
            .checked_sub(buffer + 1)
            .ok_or_else(|| PseudoError::InvalidValue("buffer larger than the coordinate".into()))?;
        let length = x[length_pos] as usize;
        let start = length_pos.checked_sub(length).ok_or_else(|| {
            PseudoError::InvalidValue(format!("embedded length {length} exceeds the coordinate"))
        })?;
        Ok(x[start..length_pos].to_vec())
    }

    /// Decode the embedded bytes as UTF-8 text.
    pub fn as_string(&self) -> Result<String> {
        String::from_utf8(self.as_bytes()?)
            .map_err(|e| PseudoError::InvalidValue(format!("value is not valid UTF-8: {e}")))
    }

    pub fn point(&self) -> &CurvePoint {
        &self.0
    }

    pub fn into_point(self) -> CurvePoint {
        self.0
    }

    pub fn domain(&self) -> &Arc<Domain> {
        self.0.domain()
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_bytes() {
            Ok(bytes) => {
                let joined: Vec<String> = bytes.iter().map(u8::to_string).collect();
                write!(f, "Value[{}]", joined.join(","))
            }
            Err(_) => write!(f, "Value{:?}", self.0),
        }
    }
}
