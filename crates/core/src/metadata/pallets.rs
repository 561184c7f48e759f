//! Pallet record pass.
//!
//! After the portable registry, metadata carries one record per pallet.
//! Only four things in it matter here - name, index, and the type ids of
//! the call and event enums - but the record has to be walked in full to
//! reach them, across layouts that drifted slightly between versions 14,
//! 15 and 16.
//!
//! Every step is locally tolerant: a failed optional read restores the
//! pre-step offset and moves on, a record that cannot produce its name
//! and index becomes a `pallet_<ordinal>` placeholder, and the table is
//! never abandoned wholesale.

use tracing::debug;

use crate::error::{MetadataResult, ReaderError, ReaderResult};
use crate::models::{PALLET_INDEX_UNPARSED, PalletEntry};
use crate::reader::ByteReader;

use super::DecodeWarning;
use super::registry::TypeRegistry;

/// Plausibility bound on a trailing pallet-docs line count. Anything
/// larger is the next record's bytes, not docs.
const PLAUSIBLE_DOCS_MAX: u32 = 64;

/// Decode the pallet vec into table entries.
pub(crate) fn decode_pallets(
    r: &mut ByteReader<'_>,
    registry: &TypeRegistry,
    warnings: &mut Vec<DecodeWarning>,
) -> Vec<PalletEntry> {
    let count = match r.compact_len() {
        Ok(count) => count,
        Err(err) => {
            warnings.push(DecodeWarning {
                context: "pallet vec".into(),
                offset: r.pos(),
                message: err.to_string(),
            });
            return Vec::new();
        }
    };

    let mut pallets = Vec::with_capacity(count.min(256) as usize);
    for ordinal in 0..count {
        if r.is_empty() {
            warnings.push(DecodeWarning {
                context: format!("pallet #{ordinal}"),
                offset: r.pos(),
                message: format!("input exhausted, {} records missing", count - ordinal),
            });
            for rest in ordinal..count {
                pallets.push(placeholder(rest));
            }
            break;
        }
        match decode_pallet(r, registry, warnings, ordinal) {
            Ok(entry) => pallets.push(entry),
            Err(err) => {
                debug!(ordinal, error = %err, "pallet record unparseable, placeholder emitted");
                warnings.push(DecodeWarning {
                    context: format!("pallet #{ordinal}"),
                    offset: r.pos(),
                    message: err.to_string(),
                });
                pallets.push(placeholder(ordinal));
            }
        }
    }
    pallets
}

fn placeholder(ordinal: u32) -> PalletEntry {
    PalletEntry {
        name: format!("pallet_{ordinal}"),
        index: PALLET_INDEX_UNPARSED,
        calls: None,
        events: None,
    }
}

/// Decode one pallet record.
///
/// `name` and `index` are the essential fields and fail the record; the
/// steps between them restore their pre-step offset on failure so the
/// walk can limp on.
fn decode_pallet(
    r: &mut ByteReader<'_>,
    registry: &TypeRegistry,
    warnings: &mut Vec<DecodeWarning>,
    ordinal: u32,
) -> MetadataResult<PalletEntry> {
    let name = r.text()?;

    soft_step(r, warnings, ordinal, "storage", read_storage);
    let calls_ty =
        soft_step(r, warnings, ordinal, "calls", |r| r.option(|r| r.compact_len())).flatten();
    let events_ty =
        soft_step(r, warnings, ordinal, "events", |r| r.option(|r| r.compact_len())).flatten();
    soft_step(r, warnings, ordinal, "constants", |r| {
        r.vec(read_constant).map(drop)
    });
    soft_step(r, warnings, ordinal, "errors", read_errors);

    let index = r.u8()?;
    try_trailing_docs(r);

    Ok(PalletEntry {
        name,
        index,
        calls: calls_ty.and_then(|id| registry.dense_variant_names(id)),
        events: events_ty.and_then(|id| registry.dense_variant_names(id)),
    })
}

/// Run one tolerant step: on failure, restore the pre-step offset,
/// record a warning and yield `None`.
fn soft_step<T>(
    r: &mut ByteReader<'_>,
    warnings: &mut Vec<DecodeWarning>,
    ordinal: u32,
    what: &'static str,
    f: impl FnOnce(&mut ByteReader<'_>) -> ReaderResult<T>,
) -> Option<T> {
    let snap = r.pos();
    match f(r) {
        Ok(value) => Some(value),
        Err(err) => {
            r.seek(snap);
            warnings.push(DecodeWarning {
                context: format!("pallet #{ordinal} {what}"),
                offset: snap,
                message: err.to_string(),
            });
            None
        }
    }
}

/// Walk over `storage: option<StorageMetadata>`.
///
/// The block ends after the entries vec - there is no trailing flag byte
/// in the on-wire layout for versions 14 through 16.
fn read_storage(r: &mut ByteReader<'_>) -> ReaderResult<()> {
    r.option(|r| {
        r.text()?; // prefix
        r.vec(read_storage_entry).map(drop)
    })
    .map(drop)
}

fn read_storage_entry(r: &mut ByteReader<'_>) -> ReaderResult<()> {
    r.text()?; // name
    r.u8()?; // modifier
    let kind_offset = r.pos();
    let kind = r.u8()?;
    match kind {
        0 => {
            // Plain: one type id
            r.compact_len()?;
        }
        1 | 2 => {
            // Map / NMap: hashers, key, value
            r.vec(|r| r.u8())?;
            r.compact_len()?;
            r.compact_len()?;
        }
        tag => {
            return Err(ReaderError::InvalidEnumTag {
                what: "storage kind",
                tag,
                offset: kind_offset,
            });
        }
    }
    r.skip_bytes()?; // fallback
    r.skip_texts()?; // docs
    Ok(())
}

fn read_constant(r: &mut ByteReader<'_>) -> ReaderResult<()> {
    r.text()?; // name
    r.compact_len()?; // type
    r.skip_bytes()?; // value
    r.skip_texts()?; // docs
    Ok(())
}

/// Walk over the version-sensitive `errors` field.
///
/// Modern layouts carry `option<compact>`; older ones inline a
/// `vec<{name, docs}>`. The leading byte disambiguates: 0 and 1 can only
/// be option tags, anything else is a vec length.
fn read_errors(r: &mut ByteReader<'_>) -> ReaderResult<()> {
    match r.peek()? {
        0 => r.u8().map(drop),
        1 => {
            r.u8()?;
            r.compact_len().map(drop)
        }
        _ => r
            .vec(|r| {
                r.text()?; // name
                r.skip_texts() // docs
            })
            .map(drop),
    }
}

/// Try the optional trailing `docs: vec<text>` some deployments emit
/// after the pallet index. A failed or implausible read restores the
/// offset, leaving the bytes for the next record.
fn try_trailing_docs(r: &mut ByteReader<'_>) {
    let snap = r.pos();
    let consumed = (|| {
        let count = r.compact_len().ok()?;
        if count >= PLAUSIBLE_DOCS_MAX {
            return None;
        }
        for _ in 0..count {
            r.skip_bytes().ok()?;
        }
        Some(())
    })();
    if consumed.is_none() {
        r.seek(snap);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::testenc::*;
    use crate::metadata::registry::decode_registry;

    /// Registry with a call enum at id 0 and an event enum at id 1.
    fn test_registry() -> TypeRegistry {
        let mut blob = compact(3);
        blob.extend(variant_type(0, &[("remark", 0), ("set_code", 1)]));
        blob.extend(variant_type(1, &[("ExtrinsicSuccess", 0)]));
        blob.extend(primitive_type(2));
        let mut warnings = Vec::new();
        decode_registry(&mut ByteReader::new(&blob), &mut warnings).unwrap()
    }

    #[test]
    fn full_record_round() {
        let registry = test_registry();
        let blob = pallet_vec(&[
            PalletRecord::new("System", 0).calls(0).events(1).storage(),
            PalletRecord::new("Aura", 23),
        ]);

        let mut warnings = Vec::new();
        let pallets = decode_pallets(&mut ByteReader::new(&blob), &registry, &mut warnings);

        assert!(warnings.is_empty(), "{warnings:?}");
        assert_eq!(pallets.len(), 2);
        assert_eq!(pallets[0].name, "System");
        assert_eq!(pallets[0].index, 0);
        assert_eq!(
            pallets[0].calls.as_deref(),
            Some(&["remark".to_string(), "set_code".to_string()][..])
        );
        assert_eq!(
            pallets[0].events.as_deref(),
            Some(&["ExtrinsicSuccess".to_string()][..])
        );
        assert_eq!(pallets[1].name, "Aura");
        assert_eq!(pallets[1].index, 23);
        assert_eq!(pallets[1].calls, None);
        assert_eq!(pallets[1].events, None);
    }

    #[test]
    fn calls_referencing_missing_or_non_variant_types_resolve_to_none() {
        let registry = test_registry();
        let blob = pallet_vec(&[
            PalletRecord::new("Ghost", 1).calls(42), // id not in registry
            PalletRecord::new("Odd", 2).calls(2),    // primitive, not a variant
        ]);

        let mut warnings = Vec::new();
        let pallets = decode_pallets(&mut ByteReader::new(&blob), &registry, &mut warnings);

        assert_eq!(pallets[0].calls, None);
        assert_eq!(pallets[1].calls, None);
    }

    #[test]
    fn trailing_docs_variants_coexist() {
        let registry = test_registry();
        // first record carries v15-style trailing docs, second does not
        let blob = pallet_vec(&[
            PalletRecord::new("System", 0).calls(0).docs(),
            PalletRecord::new("Balances", 5),
        ]);

        let mut warnings = Vec::new();
        let pallets = decode_pallets(&mut ByteReader::new(&blob), &registry, &mut warnings);

        assert!(warnings.is_empty(), "{warnings:?}");
        assert_eq!(pallets[1].name, "Balances");
        assert_eq!(pallets[1].index, 5);
    }

    #[test]
    fn legacy_inline_error_vec_is_walked() {
        let registry = test_registry();
        // hand-build a record with the legacy vec<{name, docs}> errors field
        let mut record = text("Old");
        record.extend(none()); // storage
        record.extend(none()); // calls
        record.extend(none()); // events
        record.extend(compact(0)); // constants
        record.extend(compact(2)); // errors: two inline entries
        record.extend(text("Overflow"));
        record.extend(no_texts());
        record.extend(text("Underflow"));
        record.extend(no_texts());
        record.push(9); // index

        let mut blob = compact(1);
        blob.extend(record);

        let mut warnings = Vec::new();
        let pallets = decode_pallets(&mut ByteReader::new(&blob), &registry, &mut warnings);

        assert!(warnings.is_empty(), "{warnings:?}");
        assert_eq!(pallets[0].name, "Old");
        assert_eq!(pallets[0].index, 9);
    }

    #[test]
    fn truncated_record_becomes_placeholder() {
        let registry = test_registry();
        let mut blob = compact(2);
        blob.extend(PalletRecord::new("System", 0).encode());
        // second record: name length promises more bytes than exist
        blob.extend(compact(200));
        blob.extend_from_slice(b"short");

        let mut warnings = Vec::new();
        let pallets = decode_pallets(&mut ByteReader::new(&blob), &registry, &mut warnings);

        assert_eq!(pallets.len(), 2);
        assert_eq!(pallets[0].name, "System");
        assert_eq!(pallets[1].name, "pallet_1");
        assert_eq!(pallets[1].index, PALLET_INDEX_UNPARSED);
        assert!(!warnings.is_empty());
    }

    #[test]
    fn exhausted_input_fills_placeholders() {
        let registry = test_registry();
        let mut blob = compact(3);
        blob.extend(PalletRecord::new("System", 0).encode());
        // declared 3, provided 1

        let mut warnings = Vec::new();
        let pallets = decode_pallets(&mut ByteReader::new(&blob), &registry, &mut warnings);

        assert_eq!(pallets.len(), 3);
        assert_eq!(pallets[1].index, PALLET_INDEX_UNPARSED);
        assert_eq!(pallets[2].index, PALLET_INDEX_UNPARSED);
        assert!(!warnings.is_empty());
    }

    #[test]
    fn empty_pallet_vec() {
        let registry = test_registry();
        let blob = compact(0);
        let mut warnings = Vec::new();
        let pallets = decode_pallets(&mut ByteReader::new(&blob), &registry, &mut warnings);
        assert!(pallets.is_empty());
        assert!(warnings.is_empty());
    }
}
