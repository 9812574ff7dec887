// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Pseudo Protocol — Blind Pseudonymisation Client
//!
//! Turns sensitive identifiers (national numbers and the like) into
//! pseudonyms with the help of a remote pseudonymisation authority that
//! never sees the identifier, and never hands out its per-domain secret.
//!
//! Values are encoded as points of a NIST curve. Every point sent to the
//! authority is first multiplied by a fresh random scalar, and every point
//! received is multiplied back by its inverse. Pseudonyms travel between
//! parties randomized, with the unblinding scalar sealed in a JWE only the
//! members of the domain can open.
//!
//! ## Architecture
//!
//! - **curve**: P-256 / P-384 / P-521 arithmetic, random and inverse scalars.
//! - **point**: curve points, values, pseudonyms at rest and in transit, and
//!   every external representation of them.
//! - **transit**: the `transitInfo` envelope (compact JWE, `dir` + AES-GCM).
//! - **domain**: domains, their documents and wrapped keys, and the registry
//!   that keeps them fresh.
//! - **engine**: the pseudonymize / identify / convert round trips.
//! - **client**: traits for the authority, the JWKS and the private keys,
//!   plus the client-credentials flow and a PEM key supplier.
//! - **config**: protocol constants and tunables.
//!
//! ## Example
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use pseudo_protocol::{BlindingEngine, DomainRegistry, PseudonymisationClient, Value};
//! # fn demo(authority: Arc<dyn PseudonymisationClient>) -> pseudo_protocol::Result<()> {
//! let registry = DomainRegistry::builder("uhmep_v1", authority).build();
//! let engine = BlindingEngine::new(registry.clone());
//!
//! let value = Value::from_text(&registry.domain()?, "84072536717")?;
//! let in_transit = engine.pseudonymize(&value)?;
//! let at_rest = engine.decrypt(&in_transit)?;
//! # let _ = at_rest;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod curve;
pub mod domain;
pub mod encoding;
pub mod engine;
pub mod error;
pub mod point;
pub mod transit;

pub use client::{JwksClient, PrivateKeySupplier, PseudonymisationClient};
pub use curve::NamedCurve;
pub use domain::{Domain, DomainRegistry};
pub use encoding::Base64Flavor;
pub use engine::BlindingEngine;
pub use error::{PseudoError, Result};
pub use point::pseudonym::{Pseudonym, PseudonymAtRest, PseudonymInTransit};
pub use point::value::Value;
pub use point::CurvePoint;
pub use transit::TransitInfo;
