//! SCALE fixture builders shared by the metadata decoder tests.
//!
//! Hand-built encodings of the handful of records the decoder walks, so
//! tests can assemble realistic blobs byte by byte.

/// Encode a compact u32.
pub(crate) fn compact(n: u32) -> Vec<u8> {
    if n < 64 {
        vec![(n as u8) << 2]
    } else if n < 16384 {
        let v = (n << 2) | 0b01;
        vec![v as u8, (v >> 8) as u8]
    } else if n < 1 << 30 {
        let v = (n << 2) | 0b10;
        v.to_le_bytes().to_vec()
    } else {
        let mut out = vec![0b11];
        out.extend_from_slice(&n.to_le_bytes());
        out
    }
}

/// Encode a compact-length-prefixed string.
pub(crate) fn text(s: &str) -> Vec<u8> {
    let mut out = compact(s.len() as u32);
    out.extend_from_slice(s.as_bytes());
    out
}

/// Encode an empty `Vec<text>` (paths, docs).
pub(crate) fn no_texts() -> Vec<u8> {
    compact(0)
}

/// Encode `Option::None`.
pub(crate) fn none() -> Vec<u8> {
    vec![0]
}

/// Encode `Option::Some(payload)`.
pub(crate) fn some(payload: Vec<u8>) -> Vec<u8> {
    let mut out = vec![1];
    out.extend(payload);
    out
}

/// Encode a compact-length-prefixed byte blob.
pub(crate) fn byte_blob(bytes: &[u8]) -> Vec<u8> {
    let mut out = compact(bytes.len() as u32);
    out.extend_from_slice(bytes);
    out
}

/// Encode a full `PortableType` record holding a variant enum.
pub(crate) fn variant_type(id: u32, variants: &[(&str, u8)]) -> Vec<u8> {
    let mut out = compact(id);
    out.extend(no_texts()); // path
    out.extend(compact(0)); // type params
    out.push(1); // TypeDef::Variant
    out.extend(compact(variants.len() as u32));
    for (name, index) in variants {
        out.extend(text(name));
        out.extend(compact(0)); // fields
        out.push(*index);
        out.extend(no_texts()); // variant docs
    }
    out.extend(no_texts()); // type docs
    out
}

/// Encode a `PortableType` record holding a primitive.
pub(crate) fn primitive_type(id: u32) -> Vec<u8> {
    let mut out = compact(id);
    out.extend(no_texts());
    out.extend(compact(0));
    out.push(5); // TypeDef::Primitive
    out.push(0); // kind: bool
    out.extend(no_texts());
    out
}

/// Encode a `PortableType` record holding a sequence of `elem`.
pub(crate) fn sequence_type(id: u32, elem: u32) -> Vec<u8> {
    let mut out = compact(id);
    out.extend(no_texts());
    out.extend(compact(0));
    out.push(2); // TypeDef::Sequence
    out.extend(compact(elem));
    out.extend(no_texts());
    out
}

/// Builder for one pallet record in the metadata pallet vec.
pub(crate) struct PalletRecord {
    pub name: &'static str,
    pub index: u8,
    pub calls_ty: Option<u32>,
    pub events_ty: Option<u32>,
    pub with_storage: bool,
    pub trailing_docs: bool,
}

impl PalletRecord {
    pub(crate) fn new(name: &'static str, index: u8) -> Self {
        Self {
            name,
            index,
            calls_ty: None,
            events_ty: None,
            with_storage: false,
            trailing_docs: false,
        }
    }

    pub(crate) fn calls(mut self, ty: u32) -> Self {
        self.calls_ty = Some(ty);
        self
    }

    pub(crate) fn events(mut self, ty: u32) -> Self {
        self.events_ty = Some(ty);
        self
    }

    pub(crate) fn storage(mut self) -> Self {
        self.with_storage = true;
        self
    }

    pub(crate) fn docs(mut self) -> Self {
        self.trailing_docs = true;
        self
    }

    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut out = text(self.name);
        if self.with_storage {
            // Some(prefix, one plain entry + one map entry)
            let mut storage = text(self.name); // prefix
            storage.extend(compact(2));
            // plain entry
            storage.extend(text("Number"));
            storage.push(1); // modifier: default
            storage.push(0); // kind: plain
            storage.extend(compact(4)); // type id
            storage.extend(byte_blob(&[0, 0, 0, 0])); // fallback
            storage.extend(no_texts());
            // map entry
            storage.extend(text("Account"));
            storage.push(1);
            storage.push(1); // kind: map
            storage.extend(byte_blob(&[2])); // hashers
            storage.extend(compact(5)); // key
            storage.extend(compact(6)); // value
            storage.extend(byte_blob(&[])); // fallback
            storage.extend(no_texts());
            out.extend(some(storage));
        } else {
            out.extend(none());
        }
        match self.calls_ty {
            Some(ty) => out.extend(some(compact(ty))),
            None => out.extend(none()),
        }
        match self.events_ty {
            Some(ty) => out.extend(some(compact(ty))),
            None => out.extend(none()),
        }
        // one constant
        out.extend(compact(1));
        out.extend(text("Version"));
        out.extend(compact(4));
        out.extend(byte_blob(&[1]));
        out.extend(no_texts());
        // errors: Some(type id), modern layout
        out.extend(some(compact(9)));
        out.push(self.index);
        if self.trailing_docs {
            out.extend(compact(1));
            out.extend(text("pallet docs"));
        }
        out
    }
}

/// Encode a pallet vec from records.
pub(crate) fn pallet_vec(records: &[PalletRecord]) -> Vec<u8> {
    let mut out = compact(records.len() as u32);
    for record in records {
        out.extend(record.encode());
    }
    out
}
