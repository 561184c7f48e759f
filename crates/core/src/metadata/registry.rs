//! Portable type registry pass.
//!
//! Runtime metadata opens with a self-describing catalogue of types, the
//! portable registry. The extrinsic identifier only ever needs one shape
//! out of it - variant enums, whose variant names become call and event
//! names - so everything else is walked for its byte length and retained
//! as an opaque [`TypeDef::Other`].
//!
//! The registry is intrinsically cyclic (types refer to each other by
//! id), but stored flat as `id -> TypeDef` it is acyclic: the `Variant`
//! case holds its variants inline and nothing else is followed.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{MetadataError, MetadataResult, ReaderResult};
use crate::models::unknown_label;
use crate::reader::ByteReader;

use super::DecodeWarning;

/// How far past a broken type definition the resync scanner probes.
const RESYNC_WINDOW: usize = 1024;

/// Consecutive type failures after which the registry pass gives up.
const MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// Plausibility bound for a resync probe's type id.
const PLAUSIBLE_ID_MAX: u32 = 65_536;

/// Plausibility bound for a resync probe's path segment count.
const PLAUSIBLE_PATH_MAX: u32 = 32;

/// One variant of a variant-enum type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantDef {
    pub name: String,
    pub index: u8,
}

/// A type definition, reduced to what the identifier needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeDef {
    /// A variant enum; the only structurally retained case.
    Variant(Vec<VariantDef>),
    /// Anything else - walked over, kept only so lookups can tell
    /// "present but uninteresting" from "missing".
    Other,
}

/// Flat `type id -> TypeDef` mapping for a single metadata decode.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: HashMap<u32, TypeDef>,
}

impl TypeRegistry {
    /// Look up a type by id. Missing ids (dropped by recovery or simply
    /// absent) return `None`.
    pub fn get(&self, id: u32) -> Option<&TypeDef> {
        self.types.get(&id)
    }

    /// Number of catalogued types, placeholders included.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// True when the registry holds no types at all.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Project a variant type's names into a dense list: each variant
    /// lands at its declared index, unoccupied positions get the unknown
    /// marker. Non-variant and missing ids yield `None`.
    pub fn dense_variant_names(&self, id: u32) -> Option<Vec<String>> {
        let TypeDef::Variant(variants) = self.get(id)? else {
            return None;
        };
        let mut sorted: Vec<&VariantDef> = variants.iter().collect();
        sorted.sort_by_key(|v| v.index);
        let len = sorted.last().map(|v| usize::from(v.index) + 1).unwrap_or(0);
        let mut names: Vec<String> = (0..len).map(|i| unknown_label(i as u8)).collect();
        for variant in sorted {
            names[usize::from(variant.index)] = variant.name.clone();
        }
        Some(names)
    }
}

/// Decode the portable registry, tolerating broken individual types.
///
/// A type that fails to parse is recorded as a placeholder keyed by its
/// ordinal, and the scanner probes forward for the next plausible type
/// header. Five consecutive failures (or an exhausted probe window) stop
/// the pass; whatever was catalogued so far stays usable.
pub(crate) fn decode_registry(
    r: &mut ByteReader<'_>,
    warnings: &mut Vec<DecodeWarning>,
) -> MetadataResult<TypeRegistry> {
    let count = r.compact_len()?;
    let mut registry = TypeRegistry::default();
    let mut consecutive_failures = 0u32;
    let mut intact = 0u32;

    for ordinal in 0..count {
        match decode_portable_type(r, ordinal) {
            Ok((id, def)) => {
                registry.types.entry(id).or_insert(def);
                consecutive_failures = 0;
                intact += 1;
            }
            Err(err) => {
                warnings.push(DecodeWarning {
                    context: format!("type #{ordinal}"),
                    offset: r.pos(),
                    message: err.to_string(),
                });
                registry.types.entry(ordinal).or_insert(TypeDef::Other);
                consecutive_failures += 1;
                if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                    debug!(
                        ordinal,
                        "registry pass stopped after {MAX_CONSECUTIVE_FAILURES} consecutive failures"
                    );
                    break;
                }
                if !resync(r) {
                    debug!(ordinal, "registry resync exhausted its probe window");
                    break;
                }
            }
        }
    }

    // A declared-but-entirely-broken registry means these bytes were
    // never a registry; reject so the next wrapper candidate gets tried.
    if count > 0 && intact == 0 {
        return Err(MetadataError::RegistryUnusable { declared: count });
    }
    Ok(registry)
}

/// Decode one `PortableType` record.
fn decode_portable_type(r: &mut ByteReader<'_>, ordinal: u32) -> MetadataResult<(u32, TypeDef)> {
    let id = r.compact_len()?;
    r.skip_texts()?; // path

    // Type parameters: {name, type}, with a tolerated optional typeName
    // some chains emit. An option tag can only be 0 or 1; any other byte
    // belongs to the next field.
    let n_params = r.compact_len()?;
    for _ in 0..n_params {
        r.skip_bytes()?; // name
        r.option(|r| r.compact_len())?;
        if matches!(r.peek(), Ok(0) | Ok(1)) {
            r.option(|r| r.text())?;
        }
    }

    let tag = r.u8()?;
    let def = match tag {
        0 => {
            // Composite
            r.vec(skip_field)?;
            TypeDef::Other
        }
        1 => TypeDef::Variant(r.vec(decode_variant)?),
        2 => {
            // Sequence
            r.compact_len()?;
            TypeDef::Other
        }
        3 => {
            // Array { len: u32-LE, type }
            r.u32_le()?;
            r.compact_len()?;
            TypeDef::Other
        }
        4 => {
            // Tuple
            r.vec(|r| r.compact_len())?;
            TypeDef::Other
        }
        5 => {
            // Primitive { kind }
            r.u8()?;
            TypeDef::Other
        }
        6 => {
            // Compact { type }
            r.compact_len()?;
            TypeDef::Other
        }
        7 => {
            // BitSequence { store, order }
            r.compact_len()?;
            r.compact_len()?;
            TypeDef::Other
        }
        8 => TypeDef::Other, // HistoricMetaCompat
        tag => return Err(MetadataError::UnknownTypeDef { ordinal, tag }),
    };

    r.skip_texts()?; // docs
    Ok((id, def))
}

/// Walk over one `Field` without retaining it.
fn skip_field(r: &mut ByteReader<'_>) -> ReaderResult<()> {
    r.option(|r| r.text())?; // name
    r.compact_len()?; // type
    r.option(|r| r.text())?; // typeName
    r.skip_texts()?; // docs
    Ok(())
}

/// Decode one enum variant: `{name, fields, index, docs}`.
fn decode_variant(r: &mut ByteReader<'_>) -> ReaderResult<VariantDef> {
    let name = r.text()?;
    r.vec(skip_field)?;
    let index = r.u8()?;
    r.skip_texts()?;
    Ok(VariantDef { name, index })
}

/// Probe forward for the next plausible type header: a small compact id
/// followed by a small compact path length. Returns true and repositions
/// the reader on success.
fn resync(r: &mut ByteReader<'_>) -> bool {
    let from = r.pos();
    let end = (from + RESYNC_WINDOW).min(r.len());
    for offset in from..end {
        let mut probe = r.clone();
        probe.seek(offset);
        let Ok(id) = probe.compact_len() else { continue };
        if id >= PLAUSIBLE_ID_MAX {
            continue;
        }
        let Ok(path_len) = probe.compact_len() else { continue };
        if path_len >= PLAUSIBLE_PATH_MAX {
            continue;
        }
        r.seek(offset);
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::testenc::*;

    #[test]
    fn variant_type_is_retained() {
        let mut blob = Vec::new();
        blob.extend(compact(1)); // one type
        blob.extend(variant_type(7, &[("remark", 0), ("set_code", 1)]));

        let mut warnings = Vec::new();
        let registry = decode_registry(&mut ByteReader::new(&blob), &mut warnings).unwrap();

        assert!(warnings.is_empty());
        assert_eq!(
            registry.get(7),
            Some(&TypeDef::Variant(vec![
                VariantDef { name: "remark".into(), index: 0 },
                VariantDef { name: "set_code".into(), index: 1 },
            ]))
        );
    }

    #[test]
    fn non_variant_types_become_other() {
        let mut blob = Vec::new();
        blob.extend(compact(2));
        blob.extend(primitive_type(0));
        blob.extend(sequence_type(1, 0));

        let mut warnings = Vec::new();
        let registry = decode_registry(&mut ByteReader::new(&blob), &mut warnings).unwrap();

        assert_eq!(registry.get(0), Some(&TypeDef::Other));
        assert_eq!(registry.get(1), Some(&TypeDef::Other));
        assert!(registry.dense_variant_names(0).is_none());
    }

    #[test]
    fn dense_names_project_by_declared_index() {
        let mut blob = Vec::new();
        blob.extend(compact(1));
        // indices declared out of order, with a gap at 1
        blob.extend(variant_type(0, &[("late", 2), ("first", 0)]));

        let mut warnings = Vec::new();
        let registry = decode_registry(&mut ByteReader::new(&blob), &mut warnings).unwrap();

        assert_eq!(
            registry.dense_variant_names(0).unwrap(),
            vec!["first".to_string(), "unknown(1)".to_string(), "late".to_string()]
        );
    }

    #[test]
    fn zero_variant_enum_projects_empty() {
        let mut blob = Vec::new();
        blob.extend(compact(1));
        blob.extend(variant_type(3, &[]));

        let mut warnings = Vec::new();
        let registry = decode_registry(&mut ByteReader::new(&blob), &mut warnings).unwrap();

        assert_eq!(registry.dense_variant_names(3), Some(vec![]));
    }

    #[test]
    fn unknown_typedef_yields_placeholder_and_resync() {
        let mut blob = Vec::new();
        blob.extend(compact(3));
        blob.extend(variant_type(0, &[("ok", 0)]));
        // broken type: id 1, empty path, no params, bogus tag 99
        blob.extend(compact(1));
        blob.extend(compact(0));
        blob.extend(compact(0));
        blob.push(99);
        blob.extend(variant_type(2, &[("recovered", 0)]));

        let mut warnings = Vec::new();
        let registry = decode_registry(&mut ByteReader::new(&blob), &mut warnings).unwrap();

        // the broken ordinal is a placeholder, the scanner found type 2
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("unknown type definition tag 99"));
        assert_eq!(registry.get(1), Some(&TypeDef::Other));
        assert_eq!(
            registry.dense_variant_names(2),
            Some(vec!["recovered".to_string()])
        );
    }

    #[test]
    fn fully_broken_registry_is_rejected() {
        // three types declared, nothing but garbage bytes behind them
        let mut blob = compact(3);
        blob.extend_from_slice(&[0xff; 8]);

        let mut warnings = Vec::new();
        let err = decode_registry(&mut ByteReader::new(&blob), &mut warnings).unwrap_err();
        assert!(matches!(err, MetadataError::RegistryUnusable { declared: 3 }));
    }

    #[test]
    fn registry_survives_truncated_tail() {
        let mut blob = Vec::new();
        blob.extend(compact(2));
        blob.extend(variant_type(0, &[("ok", 0)]));
        blob.extend(compact(1)); // second type starts, then input ends

        let mut warnings = Vec::new();
        let registry = decode_registry(&mut ByteReader::new(&blob), &mut warnings).unwrap();

        assert_eq!(registry.dense_variant_names(0), Some(vec!["ok".to_string()]));
        assert_eq!(warnings.len(), 1);
    }
}
