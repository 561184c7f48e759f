//! Runtime metadata decoding.
//!
//! The chain hands back its metadata as an opaque binary blob: a SCALE
//! portable type registry followed by pallet records, in one of three
//! versioned layouts (14, 15, 16), optionally wrapped as a
//! length-prefixed `Vec<u8>` and optionally prefixed with the four-byte
//! ASCII magic `"meta"`. This module normalizes the wrappers, walks the
//! registry and the pallet records, and produces the
//! [`PalletTable`](crate::models::PalletTable) the extrinsic identifier
//! works from.
//!
//! The decoder is tolerant at three granularities: per-type (placeholder
//! plus a bounded resync scan), per-pallet (a `pallet_<i>` placeholder
//! entry), and per-normalization-candidate (try the next wrapper shape).
//! Only when every candidate fails does it give up, with
//! [`MetadataError::Unparseable`]. Tolerated failures are reported as
//! [`DecodeWarning`]s alongside the table and logged at `debug` level -
//! set the `QAPI_DEBUG` environment variable (the follower binary wires
//! it into the log filter) to see them.

mod pallets;
mod registry;
#[cfg(test)]
pub(crate) mod testenc;

pub use registry::{TypeDef, TypeRegistry, VariantDef};

use tracing::debug;

use crate::error::{MetadataError, MetadataResult};
use crate::models::PalletTable;
use crate::reader::ByteReader;

/// The ASCII bytes `"meta"` some payloads are prefixed with.
const META_MAGIC: [u8; 4] = [0x6d, 0x65, 0x74, 0x61];

/// Metadata versions this decoder understands.
const SUPPORTED_VERSIONS: [u8; 3] = [14, 15, 16];

/// How many leading bytes the unparseable-preview keeps.
const PREVIEW_LEN: usize = 16;

/// One tolerated failure recorded while decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeWarning {
    /// Where in the structure the failure happened (e.g. "pallet #3 storage").
    pub context: String,
    /// Byte offset in the normalized payload.
    pub offset: usize,
    /// The underlying error, rendered.
    pub message: String,
}

/// A best-effort decode: the table plus every tolerated failure.
#[derive(Debug)]
pub struct DecodedMetadata {
    pub table: PalletTable,
    pub warnings: Vec<DecodeWarning>,
}

/// Decode raw metadata bytes into a pallet table.
///
/// Wrapper candidates are tried in order: the bare payload (magic
/// stripped if present), then the payload unwrapped from an exact
/// length-prefixed `Vec<u8>` (again magic-stripped). The first candidate
/// whose version byte is supported and whose registry parses wins.
pub fn decode_pallet_table(raw: &[u8]) -> MetadataResult<DecodedMetadata> {
    let mut last_reject = None;
    for (ordinal, candidate) in candidates(raw).into_iter().flatten().enumerate() {
        match try_candidate(candidate) {
            Ok(decoded) => {
                debug!(
                    candidate = ordinal,
                    version = decoded.table.version,
                    pallets = decoded.table.pallets.len(),
                    warnings = decoded.warnings.len(),
                    "metadata decoded"
                );
                return Ok(decoded);
            }
            Err(err) => {
                debug!(candidate = ordinal, error = %err, "metadata candidate rejected");
                last_reject = Some(err);
            }
        }
    }
    debug!(?last_reject, "all metadata candidates exhausted");
    Err(MetadataError::Unparseable {
        preview: format!("0x{}", hex::encode(&raw[..raw.len().min(PREVIEW_LEN)])),
    })
}

/// The normalization candidates, in the order they must be tried.
fn candidates(raw: &[u8]) -> [Option<&[u8]>; 2] {
    [Some(strip_magic(raw)), compact_unwrap(raw).map(strip_magic)]
}

/// Drop a leading `"meta"` magic if present.
fn strip_magic(data: &[u8]) -> &[u8] {
    match data.strip_prefix(&META_MAGIC) {
        Some(rest) => rest,
        None => data,
    }
}

/// Unwrap a SCALE `Vec<u8>` wrapper, but only when the declared length
/// covers the input exactly - anything else is not a wrapper.
fn compact_unwrap(data: &[u8]) -> Option<&[u8]> {
    let mut r = ByteReader::new(data);
    let len = r.compact_len().ok()? as usize;
    let start = r.pos();
    (start + len == data.len()).then(|| &data[start..])
}

/// Attempt one normalized candidate: version gate, registry, pallets.
fn try_candidate(data: &[u8]) -> MetadataResult<DecodedMetadata> {
    let mut r = ByteReader::new(data);
    let version = r.u8()?;
    if !SUPPORTED_VERSIONS.contains(&version) {
        return Err(MetadataError::UnsupportedVersion(version));
    }

    let mut warnings = Vec::new();
    let type_registry = registry::decode_registry(&mut r, &mut warnings)?;
    debug!(version, types = type_registry.len(), "registry pass done");

    let pallets = pallets::decode_pallets(&mut r, &type_registry, &mut warnings);
    // Trailing bytes (extrinsic metadata, runtime type, custom sections)
    // are tolerated silently; the table only needs a prefix of the blob.
    Ok(DecodedMetadata {
        table: PalletTable { version, pallets },
        warnings,
    })
}
