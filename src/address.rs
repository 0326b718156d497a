//! Native chain addresses and their EVM counterparts
//!
//! A native address is tagged with a protocol:
//! - `ID` (f0): compact actor id, LEB128 encoded
//! - `SECP256K1` (f1): blake2b-160 of an uncompressed public key
//! - `Actor` (f2): robust address of an actor such as a multisig
//! - `BLS` (f3): BLS public key
//! - `Delegated` (f4): namespace + sub-address; namespace 10 embeds an EVM address
//!
//! Delegated and ID addresses translate to EVM addresses locally. Every other
//! protocol needs the chain to assign an ID first.

use crate::chain::ChainClient;
use crate::{Error, Result};
use alloy::primitives::Address;
use blake2::digest::consts::{U20, U4};
use blake2::{Blake2b, Digest};
use data_encoding::BASE32_NOPAD;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Namespace of the Ethereum Address Manager actor
pub const EAM_NAMESPACE: u64 = 10;

const CHECKSUM_LEN: usize = 4;
const PAYLOAD_HASH_LEN: usize = 20;
const BLS_PUBLIC_KEY_LEN: usize = 48;
const MAX_SUBADDRESS_LEN: usize = 54;
const UNCOMPRESSED_PUBKEY_LEN: usize = 65;
const MASKED_ID_PREFIX: u8 = 0xff;

/// Network prefix used when rendering addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Mainnet,
    Testnet,
}

impl Network {
    pub fn prefix(&self) -> char {
        match self {
            Network::Mainnet => 'f',
            Network::Testnet => 't',
        }
    }

    fn from_prefix(c: char) -> Option<Self> {
        match c {
            'f' => Some(Network::Mainnet),
            't' => Some(Network::Testnet),
            _ => None,
        }
    }
}

/// Address protocol discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Id,
    Secp256k1,
    Actor,
    Bls,
    Delegated,
}

impl Protocol {
    pub fn code(&self) -> u8 {
        match self {
            Protocol::Id => 0,
            Protocol::Secp256k1 => 1,
            Protocol::Actor => 2,
            Protocol::Bls => 3,
            Protocol::Delegated => 4,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Protocol::Id),
            1 => Some(Protocol::Secp256k1),
            2 => Some(Protocol::Actor),
            3 => Some(Protocol::Bls),
            4 => Some(Protocol::Delegated),
            _ => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Protocol::Id => "ID",
            Protocol::Secp256k1 => "SECP256K1",
            Protocol::Actor => "Actor",
            Protocol::Bls => "BLS",
            Protocol::Delegated => "Delegated",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Payload {
    Id(u64),
    Secp256k1([u8; PAYLOAD_HASH_LEN]),
    Actor([u8; PAYLOAD_HASH_LEN]),
    Bls(Vec<u8>),
    Delegated { namespace: u64, subaddress: Vec<u8> },
}

/// A native chain address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NativeAddress {
    network: Network,
    payload: Payload,
}

impl NativeAddress {
    pub fn new_id(id: u64) -> Self {
        Self {
            network: Network::default(),
            payload: Payload::Id(id),
        }
    }

    /// SECP256K1 address from a 65-byte uncompressed public key
    pub fn new_secp256k1(public_key: &[u8]) -> Result<Self> {
        if public_key.len() != UNCOMPRESSED_PUBKEY_LEN {
            return Err(Error::InvalidAddress(format!(
                "secp256k1 public key must be {} bytes, got {}",
                UNCOMPRESSED_PUBKEY_LEN,
                public_key.len()
            )));
        }
        Ok(Self {
            network: Network::default(),
            payload: Payload::Secp256k1(blake2b_160(public_key)),
        })
    }

    pub fn new_actor(hash: [u8; PAYLOAD_HASH_LEN]) -> Self {
        Self {
            network: Network::default(),
            payload: Payload::Actor(hash),
        }
    }

    pub fn new_delegated(namespace: u64, subaddress: &[u8]) -> Result<Self> {
        if subaddress.len() > MAX_SUBADDRESS_LEN {
            return Err(Error::InvalidAddress(format!(
                "delegated sub-address too long: {} bytes",
                subaddress.len()
            )));
        }
        Ok(Self {
            network: Network::default(),
            payload: Payload::Delegated {
                namespace,
                subaddress: subaddress.to_vec(),
            },
        })
    }

    /// Native form of an EVM address
    ///
    /// Masked ID addresses (`0xff` followed by zeros and a big-endian id) map
    /// back to their ID address; every other EVM address becomes a delegated
    /// address in the EAM namespace. Never needs the chain.
    pub fn from_evm(evm: &Address) -> Self {
        let bytes = evm.as_slice();
        if bytes[0] == MASKED_ID_PREFIX && bytes[1..12].iter().all(|b| *b == 0) {
            let mut id = [0u8; 8];
            id.copy_from_slice(&bytes[12..]);
            return Self::new_id(u64::from_be_bytes(id));
        }
        Self {
            network: Network::default(),
            payload: Payload::Delegated {
                namespace: EAM_NAMESPACE,
                subaddress: bytes.to_vec(),
            },
        }
    }

    pub fn with_network(mut self, network: Network) -> Self {
        self.network = network;
        self
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn protocol(&self) -> Protocol {
        match self.payload {
            Payload::Id(_) => Protocol::Id,
            Payload::Secp256k1(_) => Protocol::Secp256k1,
            Payload::Actor(_) => Protocol::Actor,
            Payload::Bls(_) => Protocol::Bls,
            Payload::Delegated { .. } => Protocol::Delegated,
        }
    }

    pub fn id(&self) -> Option<u64> {
        match self.payload {
            Payload::Id(id) => Some(id),
            _ => None,
        }
    }

    /// EVM address obtainable without a chain round trip
    ///
    /// `Some` for ID addresses (masked form) and EAM delegated addresses.
    pub fn evm_address(&self) -> Option<Address> {
        match &self.payload {
            Payload::Id(id) => {
                let mut bytes = [0u8; 20];
                bytes[0] = MASKED_ID_PREFIX;
                bytes[12..].copy_from_slice(&id.to_be_bytes());
                Some(Address::from(bytes))
            }
            Payload::Delegated {
                namespace,
                subaddress,
            } if *namespace == EAM_NAMESPACE && subaddress.len() == 20 => {
                Some(Address::from_slice(subaddress))
            }
            _ => None,
        }
    }

    fn payload_bytes(&self) -> Vec<u8> {
        match &self.payload {
            Payload::Id(id) => encode_uvarint(*id),
            Payload::Secp256k1(hash) | Payload::Actor(hash) => hash.to_vec(),
            Payload::Bls(key) => key.clone(),
            Payload::Delegated {
                namespace,
                subaddress,
            } => {
                let mut bytes = encode_uvarint(*namespace);
                bytes.extend_from_slice(subaddress);
                bytes
            }
        }
    }

    /// Binary form: protocol byte followed by the payload
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![self.protocol().code()];
        bytes.extend(self.payload_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8], network: Network) -> Result<Self> {
        let (code, rest) = bytes
            .split_first()
            .ok_or_else(|| Error::InvalidAddress("empty address bytes".to_string()))?;
        let protocol = Protocol::from_code(*code)
            .ok_or_else(|| Error::InvalidAddress(format!("unknown protocol {}", code)))?;

        let payload = match protocol {
            Protocol::Id => {
                let (id, used) = decode_uvarint(rest)
                    .ok_or_else(|| Error::InvalidAddress("invalid ID payload".to_string()))?;
                if used != rest.len() {
                    return Err(Error::InvalidAddress(
                        "trailing bytes after ID payload".to_string(),
                    ));
                }
                Payload::Id(id)
            }
            Protocol::Secp256k1 => Payload::Secp256k1(hash_payload(rest)?),
            Protocol::Actor => Payload::Actor(hash_payload(rest)?),
            Protocol::Bls => {
                if rest.len() != BLS_PUBLIC_KEY_LEN {
                    return Err(Error::InvalidAddress(format!(
                        "BLS payload must be {} bytes, got {}",
                        BLS_PUBLIC_KEY_LEN,
                        rest.len()
                    )));
                }
                Payload::Bls(rest.to_vec())
            }
            Protocol::Delegated => {
                let (namespace, used) = decode_uvarint(rest).ok_or_else(|| {
                    Error::InvalidAddress("invalid delegated namespace".to_string())
                })?;
                let subaddress = &rest[used..];
                if subaddress.len() > MAX_SUBADDRESS_LEN {
                    return Err(Error::InvalidAddress(
                        "delegated sub-address too long".to_string(),
                    ));
                }
                Payload::Delegated {
                    namespace,
                    subaddress: subaddress.to_vec(),
                }
            }
        };

        Ok(Self { network, payload })
    }
}

impl fmt::Display for NativeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = self.network.prefix();
        let code = self.protocol().code();
        match &self.payload {
            Payload::Id(id) => write!(f, "{}{}{}", prefix, code, id),
            Payload::Delegated {
                namespace,
                subaddress,
            } => {
                let checksum = checksum(&self.to_bytes());
                let mut raw = subaddress.clone();
                raw.extend_from_slice(&checksum);
                write!(f, "{}{}{}f{}", prefix, code, namespace, encode_base32(&raw))
            }
            _ => {
                let mut raw = self.payload_bytes();
                raw.extend_from_slice(&checksum(&self.to_bytes()));
                write!(f, "{}{}{}", prefix, code, encode_base32(&raw))
            }
        }
    }
}

impl FromStr for NativeAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidAddress(format!("{}: {}", s, reason));

        let mut chars = s.chars();
        let network = chars
            .next()
            .and_then(Network::from_prefix)
            .ok_or_else(|| invalid("unknown network prefix"))?;
        let protocol = chars
            .next()
            .and_then(|c| c.to_digit(10))
            .and_then(|d| Protocol::from_code(d as u8))
            .ok_or_else(|| invalid("unknown protocol"))?;
        let rest = chars.as_str();
        if rest.is_empty() {
            return Err(invalid("missing payload"));
        }

        match protocol {
            Protocol::Id => {
                if rest.len() > 20 || !rest.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(invalid("invalid actor id"));
                }
                let id = rest.parse::<u64>().map_err(|_| invalid("actor id overflow"))?;
                Ok(Self::new_id(id).with_network(network))
            }
            Protocol::Delegated => {
                let (namespace, encoded) =
                    rest.split_once('f').ok_or_else(|| invalid("missing namespace"))?;
                if namespace.is_empty() || !namespace.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(invalid("invalid namespace"));
                }
                let namespace = namespace
                    .parse::<u64>()
                    .map_err(|_| invalid("namespace overflow"))?;
                let raw = decode_base32(encoded).ok_or_else(|| invalid("invalid base32"))?;
                if raw.len() < CHECKSUM_LEN {
                    return Err(invalid("payload too short"));
                }
                let (subaddress, sum) = raw.split_at(raw.len() - CHECKSUM_LEN);
                let address = Self::new_delegated(namespace, subaddress)?.with_network(network);
                if checksum(&address.to_bytes()) != sum {
                    return Err(invalid("checksum mismatch"));
                }
                Ok(address)
            }
            _ => {
                let raw = decode_base32(rest).ok_or_else(|| invalid("invalid base32"))?;
                if raw.len() < CHECKSUM_LEN {
                    return Err(invalid("payload too short"));
                }
                let (payload, sum) = raw.split_at(raw.len() - CHECKSUM_LEN);
                let mut bytes = vec![protocol.code()];
                bytes.extend_from_slice(payload);
                if checksum(&bytes) != sum {
                    return Err(invalid("checksum mismatch"));
                }
                Self::from_bytes(&bytes, network)
            }
        }
    }
}

impl Serialize for NativeAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for NativeAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Outcome of translating a native address to its EVM form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvmResolution {
    Resolved(Address),
    /// The account has no ID yet: nothing has ever been sent to it
    NotYetInstantiated,
}

impl EvmResolution {
    pub fn address(&self) -> Option<Address> {
        match self {
            EvmResolution::Resolved(addr) => Some(*addr),
            EvmResolution::NotYetInstantiated => None,
        }
    }

    pub fn is_instantiated(&self) -> bool {
        matches!(self, EvmResolution::Resolved(_))
    }
}

impl fmt::Display for EvmResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvmResolution::Resolved(addr) => write!(f, "{}", addr),
            EvmResolution::NotYetInstantiated => f.write_str("[ Funds needed! ]"),
        }
    }
}

/// Translates between native and EVM address spaces
///
/// Without a chain client only the local transforms are available and
/// addresses that need an ID come back as [`EvmResolution::NotYetInstantiated`].
pub struct AddressTranslator<'a> {
    chain: Option<&'a dyn ChainClient>,
    network: Network,
}

impl<'a> AddressTranslator<'a> {
    pub fn offline(network: Network) -> Self {
        Self {
            chain: None,
            network,
        }
    }

    pub fn with_chain(chain: &'a dyn ChainClient, network: Network) -> Self {
        Self {
            chain: Some(chain),
            network,
        }
    }

    pub async fn to_evm(&self, addr: &NativeAddress) -> Result<EvmResolution> {
        match addr.protocol() {
            Protocol::Delegated => addr.evm_address().map(EvmResolution::Resolved).ok_or_else(|| {
                Error::InvalidAddress(format!("{} does not embed an EVM address", addr))
            }),
            Protocol::Id => {
                if let Some(chain) = self.chain {
                    // an actor created through the EAM must keep its 0x identity
                    if let Some(robust) = chain.state_lookup_robust_address(addr).await? {
                        if robust.protocol() == Protocol::Delegated {
                            if let Some(evm) = robust.evm_address() {
                                return Ok(EvmResolution::Resolved(evm));
                            }
                        }
                    }
                }
                addr.evm_address()
                    .map(EvmResolution::Resolved)
                    .ok_or_else(|| Error::InvalidAddress(addr.to_string()))
            }
            Protocol::Secp256k1 | Protocol::Actor | Protocol::Bls => {
                let Some(chain) = self.chain else {
                    return Ok(EvmResolution::NotYetInstantiated);
                };
                match chain.state_lookup_id(addr).await? {
                    Some(id) => {
                        tracing::debug!(address = %addr, id = %id, "Resolved actor id");
                        id.evm_address()
                            .map(EvmResolution::Resolved)
                            .ok_or_else(|| Error::InvalidAddress(id.to_string()))
                    }
                    None => Ok(EvmResolution::NotYetInstantiated),
                }
            }
        }
    }

    pub fn to_native(&self, evm: &Address) -> NativeAddress {
        NativeAddress::from_evm(evm).with_network(self.network)
    }
}

fn checksum(data: &[u8]) -> [u8; CHECKSUM_LEN] {
    let digest = Blake2b::<U4>::digest(data);
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&digest);
    out
}

fn blake2b_160(data: &[u8]) -> [u8; PAYLOAD_HASH_LEN] {
    let digest = Blake2b::<U20>::digest(data);
    let mut out = [0u8; PAYLOAD_HASH_LEN];
    out.copy_from_slice(&digest);
    out
}

fn hash_payload(bytes: &[u8]) -> Result<[u8; PAYLOAD_HASH_LEN]> {
    bytes.try_into().map_err(|_| {
        Error::InvalidAddress(format!(
            "payload must be {} bytes, got {}",
            PAYLOAD_HASH_LEN,
            bytes.len()
        ))
    })
}

fn encode_base32(bytes: &[u8]) -> String {
    BASE32_NOPAD.encode(bytes).to_ascii_lowercase()
}

fn decode_base32(s: &str) -> Option<Vec<u8>> {
    // addresses are lowercase only
    if !s.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit()) {
        return None;
    }
    BASE32_NOPAD.decode(s.to_ascii_uppercase().as_bytes()).ok()
}

fn encode_uvarint(mut value: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(10);
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return out;
        }
        out.push(byte | 0x80);
    }
}

fn decode_uvarint(bytes: &[u8]) -> Option<(u64, usize)> {
    let mut value: u64 = 0;
    for (i, byte) in bytes.iter().enumerate().take(10) {
        let low = u64::from(byte & 0x7f);
        if i == 9 && low > 1 {
            return None;
        }
        value |= low << (7 * i);
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}
