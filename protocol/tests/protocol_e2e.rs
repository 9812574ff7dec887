//! End-to-end tests of the blind pseudonymisation protocol.
//!
//! A mock authority plays the remote side: it serves domain documents whose
//! secret keys are wrapped for the test client, keeps one secret scalar per
//! domain, and answers pseudonymize / identify / convert requests the way the
//! real service does. Every test builds its own authority and registries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;

use num_bigint::BigUint;
use parking_lot::RwLock;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use sha2::Sha256;

use pseudo_protocol::config::RegistryConfig;
use pseudo_protocol::domain::key_unwrap::certificate_thumbprint;
use pseudo_protocol::transit::jwe::{aes_gcm_seal, EncryptionMethod, SecretKey};
use pseudo_protocol::{
    Base64Flavor, BlindingEngine, CurvePoint, Domain, DomainRegistry, JwksClient, NamedCurve,
    PrivateKeySupplier, PseudoError, PseudonymAtRest, PseudonymInTransit,
    PseudonymisationClient, Result, TransitInfo, Value,
};

const HOME: &str = "uhmep_v1";
const OTHER: &str = "ehealth_v1";
const SSIN: &str = "84072536717";
const JWKS_URL: &str = "https://client.example/.well-known/jwks.json";
const CLIENT_CERT: &[u8] = b"client encryption certificate";

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn client_rsa_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| RsaPrivateKey::new(&mut rand::rngs::OsRng, 1024).unwrap())
}

fn b64url(bytes: impl AsRef<[u8]>) -> String {
    Base64Flavor::UrlSafeNoPad.encode(bytes)
}

struct ClientJwks;

impl JwksClient for ClientJwks {
    fn get_jwks(&self, jwks_url: &str) -> Result<String> {
        assert_eq!(jwks_url, JWKS_URL);
        Ok(serde_json::json!({
            "keys": [{
                "kty": "RSA",
                "kid": "client-enc",
                "use": "enc",
                "x5c": [Base64Flavor::Standard.encode(CLIENT_CERT)]
            }]
        })
        .to_string())
    }
}

struct ClientKeys;

impl PrivateKeySupplier for ClientKeys {
    fn get_by_hash(&self, hash: &str) -> Option<RsaPrivateKey> {
        (hash == certificate_thumbprint(CLIENT_CERT)).then(|| client_rsa_key().clone())
    }

    fn get_by_alias(&self, _alias: &str) -> Option<RsaPrivateKey> {
        None
    }
}

/// Wrap a domain key for the test client as a general-JSON JWE.
fn wrap_for_client(key: &SecretKey) -> serde_json::Value {
    let jwk = serde_json::json!({ "kty": "oct", "k": b64url(key.as_bytes()), "alg": key.method().name() });
    let protected = b64url(br#"{"enc":"A256GCM"}"#);
    let cek = SecretKey::generate(EncryptionMethod::A256Gcm);
    let (iv, ciphertext, tag) =
        aes_gcm_seal(cek.as_bytes(), jwk.to_string().as_bytes(), protected.as_bytes()).unwrap();
    let encrypted_key = RsaPublicKey::from(client_rsa_key())
        .encrypt(
            &mut rand::rngs::OsRng,
            Oaep::new_with_mgf_hash::<Sha256, Sha1>(),
            cek.as_bytes(),
        )
        .unwrap();
    serde_json::json!({
        "protected": protected,
        "iv": b64url(iv),
        "ciphertext": b64url(ciphertext),
        "tag": b64url(tag),
        "recipients": [{
            "header": { "alg": "RSA-OAEP-256", "kid": "client-enc", "jku": JWKS_URL },
            "encrypted_key": b64url(encrypted_key)
        }]
    })
}

/// One domain as the authority sees it.
struct AuthorityDomain {
    secret: BigUint,
    keys: Vec<(String, SecretKey)>,
    active: String,
    domain: Arc<Domain>,
}

impl AuthorityDomain {
    fn new(key: &str) -> Self {
        let keys = vec![("k1".to_string(), SecretKey::generate(EncryptionMethod::A256Gcm))];
        let domain = Self::build(key, &keys, "k1");
        Self {
            secret: domain.random_scalar(),
            keys,
            active: "k1".to_string(),
            domain,
        }
    }

    fn build(key: &str, keys: &[(String, SecretKey)], active: &str) -> Arc<Domain> {
        let mut builder = Domain::builder(key, NamedCurve::P521)
            .audience(audience(key))
            .buffer_size(4)
            .in_transit_ttl(Duration::from_secs(600))
            .active_kid(active);
        for (kid, secret_key) in keys {
            builder = builder.secret_key(kid, secret_key.clone());
        }
        builder.build().unwrap()
    }

    fn rotate(&mut self, kid: &str) {
        self.keys.push((kid.to_string(), SecretKey::generate(EncryptionMethod::A128Gcm)));
        self.active = kid.to_string();
        self.domain = Self::build(self.domain.key(), &self.keys, &self.active);
    }

    fn document(&self) -> String {
        let secret_keys: Vec<_> = self
            .keys
            .iter()
            .map(|(kid, key)| {
                serde_json::json!({ "kid": kid, "active": *kid == self.active, "encoded": wrap_for_client(key) })
            })
            .collect();
        serde_json::json!({
            "domain": self.domain.key(),
            "crv": "P-521",
            "audience": audience(self.domain.key()),
            "bufferSize": 4,
            "timeToLiveInTransit": "PT10M",
            "secretKeys": secret_keys
        })
        .to_string()
    }
}

fn audience(key: &str) -> String {
    format!("https://authority.example/pseudo/v1/domains/{key}")
}

/// The pseudonymisation authority.
struct MockAuthority {
    domains: RwLock<HashMap<String, AuthorityDomain>>,
    seal_responses: AtomicBool,
    domain_calls: AtomicUsize,
}

impl MockAuthority {
    fn new(keys: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            domains: RwLock::new(keys.iter().map(|k| (k.to_string(), AuthorityDomain::new(k))).collect()),
            seal_responses: AtomicBool::new(false),
            domain_calls: AtomicUsize::new(0),
        })
    }

    fn secret(&self, key: &str) -> BigUint {
        self.domains.read()[key].secret.clone()
    }

    fn domain(&self, key: &str) -> Arc<Domain> {
        self.domains.read()[key].domain.clone()
    }

    fn rotate(&self, key: &str, kid: &str) {
        self.domains.write().get_mut(key).unwrap().rotate(kid);
    }

    /// The point of `payload` in `domain`, with the transit info removed.
    fn open_payload(domain: &Arc<Domain>, payload: &str) -> CurvePoint {
        let json: serde_json::Value = serde_json::from_str(payload).unwrap();
        assert_eq!(json["crv"], "P-521");
        assert!(json["id"].is_string());
        let point = CurvePoint::from_xy_base64(
            domain,
            json["x"].as_str().unwrap(),
            json["y"].as_str().unwrap(),
            Base64Flavor::Standard,
        )
        .unwrap();
        match json["transitInfo"].as_str() {
            Some(transit_info) => PseudonymInTransit::new(point, TransitInfo::new(transit_info))
                .decrypt_with_validation(false)
                .unwrap()
                .into_point(),
            None => point,
        }
    }

    fn respond(&self, point: CurvePoint, may_seal: bool) -> Result<String> {
        let domain = point.domain().key().to_string();
        if may_seal && self.seal_responses.load(Ordering::SeqCst) {
            let sealed = PseudonymAtRest::from_point(point).create_pseudonym_in_transit()?;
            return Ok(serde_json::json!({
                "domain": domain,
                "crv": "P-521",
                "x": sealed.point().x_base64(Base64Flavor::Standard),
                "y": sealed.point().y_base64(Base64Flavor::Standard),
                "transitInfo": sealed.transit_info().as_str(),
                "iat": sealed.iat(),
                "exp": sealed.exp(),
            })
            .to_string());
        }
        Ok(serde_json::json!({
            "domain": domain,
            "crv": "P-521",
            "x": point.x_base64(Base64Flavor::Standard),
            "y": point.y_base64(Base64Flavor::Standard),
        })
        .to_string())
    }
}

impl PseudonymisationClient for MockAuthority {
    fn get_domain(&self, domain_key: &str) -> Result<String> {
        self.domain_calls.fetch_add(1, Ordering::SeqCst);
        self.domains
            .read()
            .get(domain_key)
            .map(AuthorityDomain::document)
            .ok_or_else(|| PseudoError::Transport(format!("GET {domain_key} returned code 404")))
    }

    fn pseudonymize(&self, domain_key: &str, payload: &str) -> Result<String> {
        let domain = self.domain(domain_key);
        let point = Self::open_payload(&domain, payload);
        self.respond(point.multiply(&self.secret(domain_key))?, true)
    }

    fn identify(&self, domain_key: &str, payload: &str) -> Result<String> {
        let domain = self.domain(domain_key);
        let point = Self::open_payload(&domain, payload);
        self.respond(point.multiply_by_mod_inverse(&self.secret(domain_key))?, false)
    }

    fn convert_to(&self, from_domain: &str, to_domain: &str, payload: &str) -> Result<String> {
        let source = self.domain(from_domain);
        let target = self.domain(to_domain);
        let blinded_value = Self::open_payload(&source, payload)
            .multiply_by_mod_inverse(&self.secret(from_domain))?;
        let in_target = CurvePoint::from_xy(&target, blinded_value.x().clone(), blinded_value.y().clone())?;
        self.respond(in_target.multiply(&self.secret(to_domain))?, true)
    }
}

fn registry(authority: &Arc<MockAuthority>, config: RegistryConfig) -> DomainRegistry {
    DomainRegistry::builder(HOME, authority.clone())
        .additional_domains([OTHER])
        .jwks(JWKS_URL, Arc::new(ClientJwks), Arc::new(ClientKeys))
        .config(config)
        .build()
}

fn setup() -> (Arc<MockAuthority>, BlindingEngine) {
    init_tracing();
    let authority = MockAuthority::new(&[HOME, OTHER]);
    let engine = BlindingEngine::new(registry(&authority, RegistryConfig::default()));
    (authority, engine)
}

fn ssin(engine: &BlindingEngine) -> Value {
    Value::from_text(&engine.registry().domain().unwrap(), SSIN).unwrap()
}

/// `Value · s`, the pseudonym at rest every party must agree on.
fn expected_at_rest(value: &Value, secret: &BigUint) -> CurvePoint {
    value.point().multiply(secret).unwrap()
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..300 {
        if condition() {
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
    panic!("condition not reached in time");
}

// ---------------------------------------------------------------------------
// Pseudonymize / decrypt
// ---------------------------------------------------------------------------

#[test]
fn test_p521_ssin_decrypts_to_value_times_domain_secret() {
    let (authority, engine) = setup();
    let value = ssin(&engine);
    let domain = engine.registry().domain().unwrap();
    assert_eq!(domain.max_value_size(), 65 - 4 - 1);
    assert_eq!(value.as_string().unwrap(), SSIN);

    let in_transit = engine.pseudonymize(&value).unwrap();
    assert!(in_transit.iat().is_some() && in_transit.exp().is_some());
    assert_eq!(in_transit.transit_info().kid().unwrap(), Some("k1"));

    let at_rest = engine.decrypt(&in_transit).unwrap();
    assert_eq!(at_rest.point(), &expected_at_rest(&value, &authority.secret(HOME)));
}

#[test]
fn test_pseudonym_at_rest_is_stable_across_calls() {
    let (_, engine) = setup();
    let value = ssin(&engine);
    let first = engine.pseudonymize(&value).unwrap();
    let second = engine.pseudonymize(&value).unwrap();

    assert_ne!(first.as_string(), second.as_string());
    assert_eq!(engine.decrypt(&first).unwrap(), engine.decrypt(&second).unwrap());
}

#[test]
fn test_authority_sealed_transit_info_is_kept() {
    let (authority, engine) = setup();
    authority.seal_responses.store(true, Ordering::SeqCst);
    let value = ssin(&engine);

    let in_transit = engine.pseudonymize(&value).unwrap();
    assert!(in_transit.exp().unwrap() > in_transit.iat().unwrap());
    let at_rest = engine.decrypt(&in_transit).unwrap();
    assert_eq!(at_rest.point(), &expected_at_rest(&value, &authority.secret(HOME)));
}

#[test]
fn test_another_party_decrypts_the_text_form() {
    let (authority, engine) = setup();
    let value = ssin(&engine);
    let text = engine.pseudonymize(&value).unwrap().as_string();

    // A second member of the domain with its own registry.
    let receiver = BlindingEngine::new(registry(&authority, RegistryConfig::default()));
    let domain = receiver.registry().domain().unwrap();
    let parsed = PseudonymInTransit::parse(&domain, &text).unwrap();
    assert_eq!(
        receiver.decrypt(&parsed).unwrap().point(),
        &expected_at_rest(&value, &authority.secret(HOME))
    );
}

#[test]
fn test_transit_info_of_another_domain_is_rejected() {
    let (_, engine) = setup();
    let text = engine.pseudonymize(&ssin(&engine)).unwrap().as_string();

    let other = engine.registry().domain_by_key(OTHER).unwrap();
    let parsed = PseudonymInTransit::parse(&other, &text).unwrap();
    let err = engine.decrypt(&parsed).unwrap_err();
    assert!(err.is_invalid_transit_info(), "{err}");
}

#[test]
fn test_value_too_long_is_rejected() {
    let (_, engine) = setup();
    let domain = engine.registry().domain().unwrap();
    let longest = "9".repeat(domain.max_value_size());
    assert!(Value::from_text(&domain, &longest).is_ok());
    assert!(matches!(
        Value::from_text(&domain, &format!("{longest}9")),
        Err(PseudoError::InvalidValue(_))
    ));
}

// ---------------------------------------------------------------------------
// Identify / convert
// ---------------------------------------------------------------------------

#[test]
fn test_identify_recovers_the_value() {
    let (authority, engine) = setup();
    let value = ssin(&engine);

    for sealed in [false, true] {
        authority.seal_responses.store(sealed, Ordering::SeqCst);
        let in_transit = engine.pseudonymize(&value).unwrap();
        let identified = engine.identify(&in_transit).unwrap();
        assert_eq!(identified.as_string().unwrap(), SSIN);
        assert_eq!(identified, value);
    }
}

#[test]
fn test_convert_to_lands_on_the_target_pseudonym() {
    let (authority, engine) = setup();
    let value = ssin(&engine);
    let other = engine.registry().domain_by_key(OTHER).unwrap();
    let value_in_other = Value::from_text(&other, SSIN).unwrap();
    let expected = expected_at_rest(&value_in_other, &authority.secret(OTHER));

    for sealed in [false, true] {
        authority.seal_responses.store(sealed, Ordering::SeqCst);
        let in_transit = engine.pseudonymize(&value).unwrap();
        let at_rest = engine.decrypt(&in_transit).unwrap();

        let from_transit = engine.convert_to(&in_transit.into(), OTHER).unwrap();
        assert_eq!(from_transit.domain().key(), OTHER);
        assert_eq!(engine.decrypt(&from_transit).unwrap().point(), &expected);

        let from_rest = engine.convert_to(&at_rest.into(), OTHER).unwrap();
        assert_eq!(engine.decrypt(&from_rest).unwrap().point(), &expected);
    }
}

#[test]
fn test_convert_to_undeclared_domain_is_unknown() {
    let (_, engine) = setup();
    let in_transit = engine.pseudonymize(&ssin(&engine)).unwrap();
    assert!(matches!(
        engine.convert_to(&in_transit.into(), "undeclared_v1"),
        Err(PseudoError::UnknownDomain(_))
    ));
}

// ---------------------------------------------------------------------------
// Key rotation & registry
// ---------------------------------------------------------------------------

#[test]
fn test_unknown_kid_triggers_refresh_and_then_decrypts() {
    init_tracing();
    let authority = MockAuthority::new(&[HOME, OTHER]);
    let config = RegistryConfig {
        refresh_cooldown: Duration::ZERO,
        initial_retry_cooldown: Duration::ZERO,
        refresh_on_build: true,
    };
    let engine = BlindingEngine::new(registry(&authority, config));
    let before = authority.domain_calls.load(Ordering::SeqCst);

    // The authority rotates and another party seals with the new key.
    authority.rotate(HOME, "k2");
    let value = Value::from_text(&authority.domain(HOME), SSIN).unwrap();
    let at_rest = PseudonymAtRest::from_point(expected_at_rest(&value, &authority.secret(HOME)));
    let text = at_rest.create_pseudonym_in_transit().unwrap().as_string();

    let stale = engine.registry().domain().unwrap();
    let parsed = PseudonymInTransit::parse(&stale, &text).unwrap();
    assert!(matches!(
        engine.decrypt(&parsed),
        Err(PseudoError::UnknownKid { ref kid }) if kid == "k2"
    ));

    wait_until(|| engine.registry().domain().unwrap().secret_key("k2").is_some());
    assert!(authority.domain_calls.load(Ordering::SeqCst) > before);

    let fresh = engine.registry().domain().unwrap();
    assert_eq!(fresh.active_kid(), Some("k2"));
    let parsed = PseudonymInTransit::parse(&fresh, &text).unwrap();
    assert_eq!(engine.decrypt(&parsed).unwrap().point(), at_rest.point());
}

#[test]
fn test_registry_without_key_material_cannot_seal() {
    init_tracing();
    let authority = MockAuthority::new(&[HOME]);
    let registry = DomainRegistry::builder(HOME, authority.clone()).build();
    let engine = BlindingEngine::new(registry);

    let domain = engine.registry().domain().unwrap();
    assert!(domain.active_kid().is_none());
    let err = engine.pseudonymize(&ssin(&engine)).unwrap_err();
    assert!(err.is_invalid_transit_info(), "{err}");
}
