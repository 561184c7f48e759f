//! Extrinsic identification.
//!
//! An extrinsic arrives as SCALE bytes: a compact length, then a version
//! byte whose top bit says signed or unsigned, then - for unsigned
//! extrinsics - the pallet index and call index the dispatcher routes
//! on. Signed extrinsics put address, signature and extras between the
//! version byte and the call, which this layer deliberately does not
//! parse: it reads the two index bytes where they sit for the unsigned
//! layout and flags the result as `SignedNotParsed`.
//!
//! Identification never fails. Whatever is missing - the table, the
//! pallet, the call, even the bytes themselves - degrades to an
//! `unknown(<index>)` label plus a reason tag.

use serde::Serialize;

use crate::error::ReaderResult;
use crate::models::{PalletTable, unknown_label};
use crate::reader::ByteReader;

/// Version byte mask separating the format version from the signed bit.
const VERSION_MASK: u8 = 0b0111_1111;

/// Signed flag, the top bit of the version byte.
const SIGNED_BIT: u8 = 0b1000_0000;

/// Index reported when the byte holding it does not exist.
const MISSING_INDEX: u8 = 0xFF;

// =============================================================================
// Prefix
// =============================================================================

/// The decoded leading bytes of an extrinsic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtrinsicPrefix {
    /// Length declared by the leading compact; used for bounds checks
    /// only.
    pub declared_len: u32,
    /// The raw version byte.
    pub version: u8,
    /// Top bit of the version byte.
    pub signed: bool,
    /// Offset of the first byte after the version byte - the pallet
    /// index, in the unsigned layout.
    pub body_offset: usize,
}

impl ExtrinsicPrefix {
    /// Extrinsic format version, the low 7 bits (commonly 4). Read but
    /// not branched on.
    pub fn format_version(&self) -> u8 {
        self.version & VERSION_MASK
    }
}

/// Read the compact length and version byte off the front of an
/// extrinsic.
pub fn read_prefix(bytes: &[u8]) -> ReaderResult<ExtrinsicPrefix> {
    let mut r = ByteReader::new(bytes);
    let declared_len = r.compact_u32()?;
    let version = r.u8()?;
    Ok(ExtrinsicPrefix {
        declared_len,
        version,
        signed: version & SIGNED_BIT != 0,
        body_offset: r.pos(),
    })
}

// =============================================================================
// Identity
// =============================================================================

/// Why an identification fell short of a definitive name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdentityReason {
    /// No pallet table was available at all.
    NoMetadata,
    /// The extrinsic is signed; the signature region was skipped, not
    /// parsed, so the index bytes were read at the unsigned layout's
    /// position.
    SignedNotParsed,
    /// No pallet in the table carries this index.
    PalletIndexNotFound,
    /// The pallet exists but has no call at this index.
    CallIndexOutOfRange,
}

impl IdentityReason {
    /// The kebab-case wire label, as printed by the follower.
    pub fn label(&self) -> &'static str {
        match self {
            IdentityReason::NoMetadata => "no-metadata",
            IdentityReason::SignedNotParsed => "signed-not-parsed",
            IdentityReason::PalletIndexNotFound => "pallet-index-not-found",
            IdentityReason::CallIndexOutOfRange => "call-index-out-of-range",
        }
    }
}

/// The identity of one extrinsic. `pallet` and `method` are always
/// non-empty, falling back to `unknown(<index>)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtrinsicIdentity {
    pub pallet: String,
    pub method: String,
    pub signed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<IdentityReason>,
}

impl std::fmt::Display for ExtrinsicIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.signed { "signed" } else { "unsigned" };
        write!(f, "{kind} {}.{}", self.pallet, self.method)?;
        if let Some(reason) = self.reason {
            write!(f, " ({})", reason.label())?;
        }
        Ok(())
    }
}

/// The identity of one event, resolved by `(pallet index, event index)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventIdentity {
    pub pallet: String,
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<IdentityReason>,
}

/// Identify an extrinsic from its raw bytes and an optional pallet
/// table.
pub fn identify_extrinsic(bytes: &[u8], table: Option<&PalletTable>) -> ExtrinsicIdentity {
    let (signed, pallet_idx, call_idx) = match read_prefix(bytes) {
        Ok(prefix) => {
            let pallet_idx = bytes.get(prefix.body_offset).copied().unwrap_or(MISSING_INDEX);
            let call_idx = bytes
                .get(prefix.body_offset + 1)
                .copied()
                .unwrap_or(MISSING_INDEX);
            (prefix.signed, pallet_idx, call_idx)
        }
        // Too short even for a prefix; treat both indices as absent.
        Err(_) => (false, MISSING_INDEX, MISSING_INDEX),
    };

    let Some(table) = table else {
        return ExtrinsicIdentity {
            pallet: unknown_label(pallet_idx),
            method: unknown_label(call_idx),
            signed,
            reason: Some(IdentityReason::NoMetadata),
        };
    };

    let pallet = table.pallet_by_index(pallet_idx);
    let method = pallet.and_then(|p| p.calls.as_ref()?.get(call_idx as usize).cloned());

    let pallet_name = pallet
        .map(|p| p.name.clone())
        .unwrap_or_else(|| unknown_label(pallet_idx));

    if signed {
        // Names may well resolve, but the signature region between the
        // version byte and the call was bypassed, never validated.
        return ExtrinsicIdentity {
            pallet: pallet_name,
            method: method.unwrap_or_else(|| unknown_label(call_idx)),
            signed: true,
            reason: Some(IdentityReason::SignedNotParsed),
        };
    }

    match method {
        Some(method) => ExtrinsicIdentity {
            pallet: pallet_name,
            method,
            signed: false,
            reason: None,
        },
        None => ExtrinsicIdentity {
            pallet: pallet_name,
            method: unknown_label(call_idx),
            signed: false,
            reason: Some(if pallet.is_none() {
                IdentityReason::PalletIndexNotFound
            } else {
                IdentityReason::CallIndexOutOfRange
            }),
        },
    }
}

/// Identify an event by its `(pallet index, event index)` pair.
pub fn identify_event(
    pallet_idx: u8,
    event_idx: u8,
    table: Option<&PalletTable>,
) -> EventIdentity {
    let Some(table) = table else {
        return EventIdentity {
            pallet: unknown_label(pallet_idx),
            event: unknown_label(event_idx),
            reason: Some(IdentityReason::NoMetadata),
        };
    };

    let pallet = table.pallet_by_index(pallet_idx);
    let event = pallet.and_then(|p| p.events.as_ref()?.get(event_idx as usize).cloned());

    let pallet_name = pallet
        .map(|p| p.name.clone())
        .unwrap_or_else(|| unknown_label(pallet_idx));

    match event {
        Some(event) => EventIdentity {
            pallet: pallet_name,
            event,
            reason: None,
        },
        None => EventIdentity {
            pallet: pallet_name,
            event: unknown_label(event_idx),
            reason: Some(if pallet.is_none() {
                IdentityReason::PalletIndexNotFound
            } else {
                IdentityReason::CallIndexOutOfRange
            }),
        },
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PalletEntry;

    fn table() -> PalletTable {
        PalletTable {
            version: 14,
            pallets: vec![
                PalletEntry {
                    name: "System".into(),
                    index: 0,
                    calls: Some(vec!["remark".into(), "set_heap_pages".into()]),
                    events: Some(vec!["ExtrinsicSuccess".into(), "ExtrinsicFailed".into()]),
                },
                PalletEntry {
                    name: "Balances".into(),
                    index: 2,
                    calls: Some(vec![
                        "transfer_allow_death".into(),
                        "unknown(1)".into(),
                        "force_transfer".into(),
                        "transfer_keep_alive".into(),
                    ]),
                    events: None,
                },
            ],
        }
    }

    #[test]
    fn prefix_reads_length_version_and_signed_bit() {
        // compact(4) = 0x10, version 0x04 unsigned, pallet 0, call 0
        let prefix = read_prefix(&[0x10, 0x04, 0x00, 0x00]).unwrap();
        assert_eq!(prefix.declared_len, 4);
        assert_eq!(prefix.version, 0x04);
        assert!(!prefix.signed);
        assert_eq!(prefix.format_version(), 4);
        assert_eq!(prefix.body_offset, 2);

        let signed = read_prefix(&[0x10, 0x84, 0x02, 0x03]).unwrap();
        assert!(signed.signed);
        assert_eq!(signed.format_version(), 4);
    }

    #[test]
    fn unsigned_system_remark_resolves_clean() {
        let identity = identify_extrinsic(&[0x10, 0x04, 0x00, 0x00], Some(&table()));
        assert_eq!(identity.pallet, "System");
        assert_eq!(identity.method, "remark");
        assert!(!identity.signed);
        assert_eq!(identity.reason, None);
    }

    #[test]
    fn signed_resolution_keeps_the_bypass_reason() {
        // Signed extrinsic: for this identifier the two bytes after the
        // version byte are read as the indices.
        let identity = identify_extrinsic(&[0x10, 0x84, 0x02, 0x03], Some(&table()));
        assert_eq!(identity.pallet, "Balances");
        assert_eq!(identity.method, "transfer_keep_alive");
        assert!(identity.signed);
        assert_eq!(identity.reason, Some(IdentityReason::SignedNotParsed));
    }

    #[test]
    fn no_table_degrades_to_unknown_labels() {
        let identity = identify_extrinsic(&[0x10, 0x04, 0x07, 0x01], None);
        assert_eq!(identity.pallet, "unknown(7)");
        assert_eq!(identity.method, "unknown(1)");
        assert!(!identity.signed);
        assert_eq!(identity.reason, Some(IdentityReason::NoMetadata));

        // the signed bit is still read without a table
        let signed = identify_extrinsic(&[0x10, 0x84, 0x07, 0x01], None);
        assert!(signed.signed);
    }

    #[test]
    fn unknown_pallet_index() {
        let identity = identify_extrinsic(&[0x10, 0x04, 0x09, 0x00], Some(&table()));
        assert_eq!(identity.pallet, "unknown(9)");
        assert_eq!(identity.method, "unknown(0)");
        assert_eq!(identity.reason, Some(IdentityReason::PalletIndexNotFound));
    }

    #[test]
    fn call_index_out_of_range() {
        let identity = identify_extrinsic(&[0x10, 0x04, 0x00, 0x09], Some(&table()));
        assert_eq!(identity.pallet, "System");
        assert_eq!(identity.method, "unknown(9)");
        assert_eq!(identity.reason, Some(IdentityReason::CallIndexOutOfRange));
    }

    #[test]
    fn truncated_bytes_never_panic() {
        for bytes in [&[][..], &[0x10][..], &[0x10, 0x04][..]] {
            let identity = identify_extrinsic(bytes, Some(&table()));
            assert!(!identity.pallet.is_empty());
            assert!(!identity.method.is_empty());
        }
        // prefix readable, indices missing
        let identity = identify_extrinsic(&[0x10, 0x04], Some(&table()));
        assert_eq!(identity.pallet, "unknown(255)");
        assert_eq!(identity.reason, Some(IdentityReason::PalletIndexNotFound));
    }

    #[test]
    fn event_identity_is_symmetric() {
        let t = table();
        let ok = identify_event(0, 1, Some(&t));
        assert_eq!(ok.pallet, "System");
        assert_eq!(ok.event, "ExtrinsicFailed");
        assert_eq!(ok.reason, None);

        let no_events = identify_event(2, 0, Some(&t));
        assert_eq!(no_events.reason, Some(IdentityReason::CallIndexOutOfRange));

        let no_table = identify_event(0, 0, None);
        assert_eq!(no_table.reason, Some(IdentityReason::NoMetadata));
    }

    #[test]
    fn display_matches_follower_format() {
        let identity = identify_extrinsic(&[0x10, 0x84, 0x02, 0x03], Some(&table()));
        assert_eq!(
            identity.to_string(),
            "signed Balances.transfer_keep_alive (signed-not-parsed)"
        );

        let clean = identify_extrinsic(&[0x10, 0x04, 0x00, 0x00], Some(&table()));
        assert_eq!(clean.to_string(), "unsigned System.remark");
    }
}
