//! Domain models for chain-facing data.
//!
//! These models are transport-agnostic and represent the canonical form
//! of decoded chain data within the domain layer: the pallet table built
//! from runtime metadata, the runtime info captured at connect time, and
//! the open-shaped JSON the node returns for heads and blocks, re-cast as
//! explicit record types.

use serde::{Deserialize, Serialize};

use crate::error::{ChainError, ChainResult};

/// Sentinel pallet index recorded when a single pallet record could not
/// be parsed out of the metadata.
pub const PALLET_INDEX_UNPARSED: u8 = 255;

/// Fallback label for an unresolvable pallet, call or event index.
pub fn unknown_label(index: u8) -> String {
    format!("unknown({index})")
}

// =============================================================================
// Pallet table
// =============================================================================

/// One pallet as seen by the extrinsic identifier.
///
/// `calls`/`events` being `None` is distinct from being empty: `None`
/// means the pallet declared no such enum in metadata, while an empty
/// vec means the enum exists with zero variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PalletEntry {
    /// Pallet name; `pallet_<ordinal>` when recovered from a parse failure.
    pub name: String,
    /// On-wire pallet index (arbitrary u8, not necessarily contiguous).
    pub index: u8,
    /// Call names, dense by call index.
    pub calls: Option<Vec<String>>,
    /// Event names, dense by event index.
    pub events: Option<Vec<String>>,
}

/// The pallet table extracted from one runtime's metadata.
///
/// Immutable once built; shared behind `Arc` by the facade cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PalletTable {
    /// Metadata version the table was decoded from (14, 15 or 16).
    pub version: u8,
    /// Pallets in metadata order.
    pub pallets: Vec<PalletEntry>,
}

impl PalletTable {
    /// Find a pallet by its on-wire index.
    ///
    /// Real chains assign arbitrary u8 indices, with no uniqueness or
    /// contiguity guarantee, so lookup is a scan and the first match wins.
    pub fn pallet_by_index(&self, index: u8) -> Option<&PalletEntry> {
        self.pallets.iter().find(|p| p.index == index)
    }

    /// Resolve a `(pallet index, call index)` pair to a call name.
    pub fn call_name(&self, pallet: u8, call: u8) -> Option<&str> {
        self.pallet_by_index(pallet)?
            .calls
            .as_ref()?
            .get(call as usize)
            .map(String::as_str)
    }

    /// Resolve a `(pallet index, event index)` pair to an event name.
    pub fn event_name(&self, pallet: u8, event: u8) -> Option<&str> {
        self.pallet_by_index(pallet)?
            .events
            .as_ref()?
            .get(event as usize)
            .map(String::as_str)
    }
}

// =============================================================================
// Override tables
// =============================================================================

/// A named variant at an explicit index, as supplied by override tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedIndex {
    pub name: String,
    pub index: u8,
}

/// Caller-supplied replacement for one pallet's metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PalletOverride {
    pub name: String,
    pub index: u8,
    #[serde(default)]
    pub calls: Option<Vec<NamedIndex>>,
    #[serde(default)]
    pub events: Option<Vec<NamedIndex>>,
}

/// Caller-supplied pallet table, bypassing metadata decoding entirely.
///
/// Uses a richer shape than [`PalletTable`] - variants carry their
/// declared index - and is converted by sparse projection at each
/// declared index, exactly how the metadata decoder lays out names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PalletTableOverride {
    pub version: u8,
    pub pallets: Vec<PalletOverride>,
}

/// Project `[{name, index}]` into a dense name list: each name lands at
/// its declared index, unoccupied positions are padded with the unknown
/// marker.
fn project_dense(entries: &[NamedIndex]) -> Vec<String> {
    let len = entries
        .iter()
        .map(|e| usize::from(e.index) + 1)
        .max()
        .unwrap_or(0);
    let mut out: Vec<String> = (0..len).map(|i| unknown_label(i as u8)).collect();
    for entry in entries {
        out[usize::from(entry.index)] = entry.name.clone();
    }
    out
}

impl From<&PalletTableOverride> for PalletTable {
    fn from(overrides: &PalletTableOverride) -> Self {
        PalletTable {
            version: overrides.version,
            pallets: overrides
                .pallets
                .iter()
                .map(|p| PalletEntry {
                    name: p.name.clone(),
                    index: p.index,
                    calls: p.calls.as_deref().map(project_dense),
                    events: p.events.as_deref().map(project_dense),
                })
                .collect(),
        }
    }
}

// =============================================================================
// Runtime info
// =============================================================================

/// What the runtime probe captures at connect time.
#[derive(Debug, Clone)]
pub struct RuntimeInfo {
    /// Runtime spec name (e.g. "polkadot").
    pub spec_name: String,
    /// Runtime spec version; the pallet-table cache key.
    pub spec_version: u32,
    /// Chain-reported SS58 address prefix, when `system_properties`
    /// answered.
    pub ss58_prefix: Option<u32>,
    /// Raw metadata bytes (hex-decoded), fed to the decoder.
    pub metadata: Vec<u8>,
}

// =============================================================================
// Heads and blocks (node JSON, re-cast)
// =============================================================================

/// A followed chain head, with the hash resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainHead {
    pub number: u64,
    pub hash: String,
}

/// The raw header JSON of a `chain_subscribeNewHeads` notification.
///
/// Only the fields the facade needs; nodes attach plenty more.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawHead {
    /// Hex-encoded block number.
    pub number: String,
    /// Some nodes inline the hash into the notification; most do not.
    #[serde(default)]
    pub hash: Option<String>,
}

impl RawHead {
    /// Parse the hex-encoded header number.
    pub fn parsed_number(&self) -> ChainResult<u64> {
        let digits = self.number.strip_prefix("0x").unwrap_or(&self.number);
        u64::from_str_radix(digits, 16)
            .map_err(|_| ChainError::InvalidHex(self.number.clone()))
    }
}

/// A fetched block body: hex-encoded extrinsics plus the raw header.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BlockBody {
    #[serde(default)]
    pub extrinsics: Vec<String>,
    #[serde(default)]
    pub header: Option<serde_json::Value>,
}

/// Normalize a `chain_getBlock` response into a block body.
///
/// Nodes disagree on the shape: some wrap the body in a `block` member,
/// some return it flat, and some briefly return null while the block is
/// still importing. The `block` key decides which variant this is; a
/// null under it (or a null response) means "not available yet".
pub fn normalize_block(value: serde_json::Value) -> Option<BlockBody> {
    if !value.is_object() {
        return None;
    }
    match value.get("block").cloned() {
        Some(block) if block.is_null() => None,
        Some(block) => serde_json::from_value(block).ok(),
        None => serde_json::from_value(value).ok(),
    }
}

// =============================================================================
// Hex convention
// =============================================================================

/// Decode a `0x`-prefixed lowercase hex string; even length only.
pub fn decode_hex(s: &str) -> ChainResult<Vec<u8>> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(digits).map_err(|_| ChainError::InvalidHex(s.to_string()))
}

/// Encode bytes as `0x`-prefixed lowercase hex.
pub fn encode_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

// =============================================================================
// Tests
// =============================================================================
