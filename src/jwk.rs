//! JSON Web Key records and immutable key-set snapshots.

// crates.io
use base64::prelude::*;
use jsonwebtoken::DecodingKey;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
// self
use crate::_prelude::*;

/// `kty` value for RSA keys.
pub const KEY_TYPE_RSA: &str = "RSA";
/// `kty` value for elliptic-curve keys.
pub const KEY_TYPE_EC: &str = "EC";
/// `kty` value for octet key pairs (EdDSA).
pub const KEY_TYPE_OKP: &str = "OKP";

/// Named elliptic curves accepted for `EC` keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EllipticCurve {
	/// NIST P-256 (`secp256r1`).
	P256,
	/// NIST P-384 (`secp384r1`).
	P384,
	/// NIST P-521 (`secp521r1`).
	P521,
}
impl EllipticCurve {
	/// Look up a curve by its JWK `crv` name.
	pub fn from_name(name: &str) -> Option<Self> {
		match name {
			"P-256" => Some(Self::P256),
			"P-384" => Some(Self::P384),
			"P-521" => Some(Self::P521),
			_ => None,
		}
	}

	/// JWK `crv` name.
	pub fn name(self) -> &'static str {
		match self {
			Self::P256 => "P-256",
			Self::P384 => "P-384",
			Self::P521 => "P-521",
		}
	}

	/// Byte length of one affine coordinate.
	pub fn coordinate_len(self) -> usize {
		match self {
			Self::P256 => 32,
			Self::P384 => 48,
			Self::P521 => 66,
		}
	}
}

/// A single JSON Web Key as published by the key endpoint.
///
/// Standard members are exposed through accessors; every other member is kept verbatim in
/// [`Jwk::attributes`] for public-key reconstruction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Jwk {
	#[serde(rename = "kid", default, skip_serializing_if = "Option::is_none")]
	id: Option<String>,
	#[serde(rename = "kty")]
	key_type: String,
	#[serde(rename = "alg", default, skip_serializing_if = "Option::is_none")]
	algorithm: Option<String>,
	#[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
	usage: Option<String>,
	#[serde(
		rename = "key_ops",
		default,
		deserialize_with = "deserialize_operations",
		skip_serializing_if = "Option::is_none"
	)]
	operations: Option<Vec<String>>,
	#[serde(rename = "x5u", default, skip_serializing_if = "Option::is_none")]
	certificate_url: Option<String>,
	#[serde(rename = "x5c", default, skip_serializing_if = "Option::is_none")]
	certificate_chain: Option<Vec<String>>,
	#[serde(rename = "x5t", default, skip_serializing_if = "Option::is_none")]
	certificate_thumbprint: Option<String>,
	#[serde(flatten)]
	attributes: Map<String, Value>,
}
impl Jwk {
	/// Decode a key from its JSON object representation.
	pub fn from_value(value: Value) -> Result<Self> {
		Ok(serde_json::from_value(value)?)
	}

	/// Key id (`kid`).
	pub fn id(&self) -> Option<&str> {
		self.id.as_deref()
	}

	/// Key type (`kty`).
	pub fn key_type(&self) -> &str {
		&self.key_type
	}

	/// Intended algorithm (`alg`).
	pub fn algorithm(&self) -> Option<&str> {
		self.algorithm.as_deref()
	}

	/// Public key use (`use`).
	pub fn usage(&self) -> Option<&str> {
		self.usage.as_deref()
	}

	/// Permitted operations (`key_ops`), normalized to a list.
	pub fn operations(&self) -> Option<&[String]> {
		self.operations.as_deref()
	}

	/// Comma-joined `key_ops`, or `None` when the list is absent or empty.
	pub fn operations_joined(&self) -> Option<String> {
		self.operations.as_ref().filter(|ops| !ops.is_empty()).map(|ops| ops.join(","))
	}

	/// X.509 certificate URL (`x5u`).
	pub fn certificate_url(&self) -> Option<&str> {
		self.certificate_url.as_deref()
	}

	/// X.509 certificate chain (`x5c`).
	pub fn certificate_chain(&self) -> Option<&[String]> {
		self.certificate_chain.as_deref()
	}

	/// X.509 certificate SHA-1 thumbprint (`x5t`).
	pub fn certificate_thumbprint(&self) -> Option<&str> {
		self.certificate_thumbprint.as_deref()
	}

	/// Type-specific members that are not part of the common JWK header.
	pub fn attributes(&self) -> &Map<String, Value> {
		&self.attributes
	}

	/// String-valued type-specific member.
	pub fn attribute_str(&self, name: &str) -> Option<&str> {
		self.attributes.get(name).and_then(Value::as_str)
	}

	/// Named curve for `EC` keys.
	pub fn curve(&self) -> Option<EllipticCurve> {
		self.attribute_str("crv").and_then(EllipticCurve::from_name)
	}

	/// Rebuild the verification key described by this entry.
	pub fn decoding_key(&self) -> Result<DecodingKey> {
		match self.key_type.as_str() {
			KEY_TYPE_RSA => {
				let modulus = self.component("n")?;
				let exponent = self.component("e")?;

				DecodingKey::from_rsa_components(modulus, exponent).map_err(|err| {
					Error::InvalidKeyMaterial(format!("Invalid RSA components: {err}."))
				})
			},
			KEY_TYPE_EC => {
				let curve = self.curve().ok_or_else(|| {
					Error::InvalidKeyMaterial(format!(
						"Unsupported or missing curve {:?} for EC key.",
						self.attribute_str("crv")
					))
				})?;
				let x = self.component("x")?;
				let y = self.component("y")?;

				for (name, value) in [("x", x), ("y", y)] {
					let decoded = BASE64_URL_SAFE_NO_PAD.decode(value).map_err(|err| {
						Error::InvalidKeyMaterial(format!("Coordinate {name} is not base64url: {err}."))
					})?;

					if decoded.len() != curve.coordinate_len() {
						return Err(Error::InvalidKeyMaterial(format!(
							"Coordinate {name} has {} bytes; {} requires {}.",
							decoded.len(),
							curve.name(),
							curve.coordinate_len()
						)));
					}
				}

				DecodingKey::from_ec_components(x, y).map_err(|err| {
					Error::InvalidKeyMaterial(format!("Invalid EC components: {err}."))
				})
			},
			KEY_TYPE_OKP => {
				if self.attribute_str("crv") != Some("Ed25519") {
					return Err(Error::InvalidKeyMaterial(
						"Only Ed25519 is supported for OKP keys.".into(),
					));
				}

				DecodingKey::from_ed_components(self.component("x")?).map_err(|err| {
					Error::InvalidKeyMaterial(format!("Invalid Ed25519 component: {err}."))
				})
			},
			other => Err(Error::InvalidKeyMaterial(format!("Unsupported key type '{other}'."))),
		}
	}

	fn component(&self, name: &str) -> Result<&str> {
		self.attribute_str(name).ok_or_else(|| {
			Error::InvalidKeyMaterial(format!(
				"Key {:?} of type {} is missing member '{name}'.",
				self.id, self.key_type
			))
		})
	}
}

/// Immutable, ordered set of keys produced by one successful fetch.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct KeySet {
	#[serde(default)]
	keys: Vec<Jwk>,
}
impl KeySet {
	/// Wrap an ordered list of keys.
	pub fn new(keys: Vec<Jwk>) -> Self {
		Self { keys }
	}

	/// Keys in publication order.
	pub fn keys(&self) -> &[Jwk] {
		&self.keys
	}

	/// Number of keys in the set.
	pub fn len(&self) -> usize {
		self.keys.len()
	}

	/// Whether the set carries no keys.
	pub fn is_empty(&self) -> bool {
		self.keys.is_empty()
	}

	/// Find a key by id.
	///
	/// A `None` id only matches when the set holds exactly one key.
	pub fn find(&self, kid: Option<&str>) -> Option<&Jwk> {
		match kid {
			None if self.keys.len() == 1 => self.keys.first(),
			None => None,
			Some(kid) => self.keys.iter().find(|key| key.id() == Some(kid)),
		}
	}
}

fn deserialize_operations<'de, D>(
	deserializer: D,
) -> std::result::Result<Option<Vec<String>>, D::Error>
where
	D: Deserializer<'de>,
{
	#[derive(Deserialize)]
	#[serde(untagged)]
	enum OneOrMany {
		One(String),
		Many(Vec<String>),
	}

	Ok(Option::<OneOrMany>::deserialize(deserializer)?.map(|ops| match ops {
		OneOrMany::One(op) => vec![op],
		OneOrMany::Many(ops) => ops,
	}))
}
