//! The `Qapi` facade - composes transport, probe and decoder.
//!
//! # Design
//!
//! The facade owns its transport instance and its caches; there is no
//! process-wide registry. Pallet tables are immutable once built and
//! shared behind `Arc`, keyed by runtime spec version, with a
//! distinguished "latest" slot filled at connect time.
//!
//! # Flow
//!
//! 1. `connect` probes the runtime and establishes the pallet table
//! 2. `subscribe_heads` follows `chain_subscribeNewHeads`
//! 3. For each head, `get_block` fetches the block (racing the import)
//! 4. Each extrinsic goes through `decode_extrinsic_name`

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Value, json};
use tokio::sync::RwLock;
use tokio::time::Duration;
use tracing::{debug, info, instrument, trace, warn};

use crate::error::{ChainError, ChainResult, MetadataResult};
use crate::identity::{EventIdentity, ExtrinsicIdentity, identify_event, identify_extrinsic};
use crate::metadata::decode_pallet_table;
use crate::metrics::{
    DecodeTimer, record_block_fetch_retry, record_decode_warnings, record_extrinsic_identified,
    record_head_received, record_metadata_decode,
};
use crate::models::{
    BlockBody, ChainHead, PalletTable, PalletTableOverride, RawHead, RuntimeInfo, decode_hex,
    normalize_block,
};
use crate::ports::{RpcSubscription, RpcTransport};

use super::probe::fetch_runtime_info;

/// Additional `chain_getBlock` attempts while a block is importing.
const BLOCK_RETRY_ATTEMPTS: u32 = 4;

/// Pause between block fetch attempts.
const BLOCK_RETRY_DELAY: Duration = Duration::from_millis(150);

// =============================================================================
// Configuration
// =============================================================================

/// Advertised signature scheme, consumed by layers above the core.
#[derive(Debug, Clone)]
pub struct SignatureOverride {
    pub scheme: String,
    pub variant: String,
}

/// A caller-supplied replacement for the default metadata decoder.
pub type MetadataParser = Arc<dyn Fn(&[u8]) -> MetadataResult<PalletTable> + Send + Sync>;

/// Metadata-related overrides.
#[derive(Clone, Default)]
pub struct MetadataOverrides {
    /// Replaces the default decoder.
    pub custom_parser: Option<MetadataParser>,
    /// Provides a pallet table directly, bypassing decoding (and the
    /// metadata download) entirely.
    pub tables: Option<PalletTableOverride>,
    /// Suppresses diagnostic noise on decode failure.
    pub ignore_parse_errors: bool,
}

/// Caller overrides accepted by [`Qapi::connect`].
#[derive(Clone, Default)]
pub struct Overrides {
    /// Advertised signature scheme; carried, not interpreted, by the core.
    pub signature: Option<SignatureOverride>,
    /// Overrides the chain-reported SS58 address prefix.
    pub ss58_prefix: Option<u32>,
    pub metadata: MetadataOverrides,
}

/// Configuration for [`Qapi::connect`].
#[derive(Clone)]
pub struct QapiConfig {
    /// A transport bound to a specific endpoint.
    pub provider: Arc<dyn RpcTransport>,
    pub overrides: Overrides,
}

impl QapiConfig {
    /// Config with no overrides.
    pub fn new(provider: Arc<dyn RpcTransport>) -> Self {
        Self {
            provider,
            overrides: Overrides::default(),
        }
    }
}

/// A block designator: by number or by hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockRef {
    Number(u64),
    Hash(String),
}

impl From<u64> for BlockRef {
    fn from(number: u64) -> Self {
        BlockRef::Number(number)
    }
}

impl From<&str> for BlockRef {
    fn from(hash: &str) -> Self {
        BlockRef::Hash(hash.to_string())
    }
}

impl From<String> for BlockRef {
    fn from(hash: String) -> Self {
        BlockRef::Hash(hash)
    }
}

// =============================================================================
// Qapi
// =============================================================================

/// Connected client facade.
pub struct Qapi {
    transport: Arc<dyn RpcTransport>,
    runtime: RuntimeInfo,
    overrides: Overrides,
    latest: RwLock<Option<Arc<PalletTable>>>,
    tables: RwLock<HashMap<u32, Arc<PalletTable>>>,
}

impl Qapi {
    /// Connect: probe the runtime, then establish the pallet table.
    ///
    /// Table establishment never fails the connect. When override tables
    /// are supplied they are adopted verbatim (and the metadata download
    /// is skipped); otherwise the probed metadata goes through the
    /// decoder (or the caller's custom parser). A decode failure leaves
    /// the facade usable - identification degrades to the no-metadata
    /// reason - and is logged unless `ignore_parse_errors` is set.
    #[instrument(skip_all)]
    pub async fn connect(config: QapiConfig) -> ChainResult<Qapi> {
        let transport = config.provider;
        let overrides = config.overrides;

        let fetch_metadata = overrides.metadata.tables.is_none();
        let mut runtime = fetch_runtime_info(transport.as_ref(), fetch_metadata).await?;
        if let Some(prefix) = overrides.ss58_prefix {
            runtime.ss58_prefix = Some(prefix);
        }
        info!(
            spec = %runtime.spec_name,
            version = runtime.spec_version,
            ss58 = ?runtime.ss58_prefix,
            "runtime probed"
        );

        let qapi = Qapi {
            transport,
            runtime,
            overrides,
            latest: RwLock::new(None),
            tables: RwLock::new(HashMap::new()),
        };

        if let Some(override_tables) = &qapi.overrides.metadata.tables {
            let table = Arc::new(PalletTable::from(override_tables));
            debug!(pallets = table.pallets.len(), "pallet table adopted from overrides");
            qapi.install_table(qapi.runtime.spec_version, table).await;
        } else {
            match qapi.parse_metadata(&qapi.runtime.metadata) {
                Ok(table) => {
                    debug!(
                        version = table.version,
                        pallets = table.pallets.len(),
                        "pallet table decoded"
                    );
                    qapi.install_table(qapi.runtime.spec_version, Arc::new(table))
                        .await;
                }
                Err(err) if qapi.overrides.metadata.ignore_parse_errors => {
                    debug!(%err, "metadata decode failed (suppressed)");
                }
                Err(err) => {
                    warn!(%err, "metadata decode failed; extrinsic identification degrades");
                }
            }
        }

        Ok(qapi)
    }

    /// Runtime info captured at connect.
    pub fn runtime(&self) -> &RuntimeInfo {
        &self.runtime
    }

    /// The advertised signature override, for layers above the core.
    pub fn signature_override(&self) -> Option<&SignatureOverride> {
        self.overrides.signature.as_ref()
    }

    /// The pallet table decoded at connect, if any.
    pub async fn latest_table(&self) -> Option<Arc<PalletTable>> {
        self.latest.read().await.clone()
    }

    async fn install_table(&self, spec_version: u32, table: Arc<PalletTable>) {
        *self.latest.write().await = Some(table.clone());
        self.tables.write().await.insert(spec_version, table);
    }

    /// Run metadata bytes through the configured parser.
    fn parse_metadata(&self, bytes: &[u8]) -> MetadataResult<PalletTable> {
        let _timer = DecodeTimer::new();
        if let Some(parser) = &self.overrides.metadata.custom_parser {
            return parser(bytes);
        }
        match decode_pallet_table(bytes) {
            Ok(decoded) => {
                record_metadata_decode("ok");
                record_decode_warnings(decoded.warnings.len() as u64);
                for warning in &decoded.warnings {
                    debug!(
                        context = %warning.context,
                        offset = warning.offset,
                        "tolerated metadata failure: {}",
                        warning.message
                    );
                }
                Ok(decoded.table)
            }
            Err(err) => {
                record_metadata_decode("unparseable");
                Err(err)
            }
        }
    }

    /// Resolve the pallet table for a block.
    ///
    /// With no hash, the latest table. With a hash, the table of that
    /// block's runtime: spec version looked up best-effort, cache
    /// consulted, metadata refetched at that hash on a miss. Every
    /// failure on that path degrades to the latest table.
    pub async fn tables_for_block(&self, at: Option<&str>) -> Option<Arc<PalletTable>> {
        let Some(hash) = at else {
            return self.latest_table().await;
        };

        let spec_version = match self
            .transport
            .request("state_getRuntimeVersion", vec![json!(hash)])
            .await
        {
            Ok(reply) => reply.get("specVersion").and_then(Value::as_u64).map(|v| v as u32),
            Err(err) => {
                debug!(%err, hash, "runtime version at hash unavailable");
                None
            }
        };
        let Some(spec_version) = spec_version else {
            return self.latest_table().await;
        };

        if let Some(table) = self.tables.read().await.get(&spec_version) {
            return Some(table.clone());
        }

        debug!(spec_version, hash, "unseen spec version, refetching metadata");
        let fetched = self
            .transport
            .request("state_getMetadata", vec![json!(hash)])
            .await;
        let table = match fetched {
            Ok(Value::String(hex)) => decode_hex(&hex)
                .ok()
                .and_then(|bytes| self.parse_metadata(&bytes).ok()),
            Ok(_) | Err(_) => None,
        };
        match table {
            Some(table) => {
                let table = Arc::new(table);
                self.tables
                    .write()
                    .await
                    .insert(spec_version, table.clone());
                Some(table)
            }
            None => {
                debug!(spec_version, "metadata at hash unusable, degrading to latest");
                self.latest_table().await
            }
        }
    }

    /// Subscribe to new chain heads.
    pub async fn subscribe_heads(&self) -> ChainResult<HeadSubscription> {
        let inner = self
            .transport
            .subscribe("chain_subscribeNewHeads", "chain_unsubscribeNewHeads", vec![])
            .await?;
        debug!(id = inner.id(), "head subscription established");
        Ok(HeadSubscription {
            inner,
            transport: self.transport.clone(),
        })
    }

    /// Fetch a block by number or hash.
    ///
    /// On fast chains the head notification races the block import, so
    /// `chain_getBlock` may briefly answer null: retried up to four
    /// extra times, 150 ms apart. When the body never materializes, the
    /// header alone is returned with no extrinsics; if even that fails,
    /// the block is [`ChainError::BlockUnavailable`].
    #[instrument(skip(self))]
    pub async fn get_block(&self, block: BlockRef) -> ChainResult<BlockBody> {
        let hash = match block {
            BlockRef::Hash(hash) => hash,
            BlockRef::Number(number) => {
                let reply = self
                    .transport
                    .request("chain_getBlockHash", vec![json!(number)])
                    .await?;
                reply
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| ChainError::BlockUnavailable(number.to_string()))?
            }
        };

        for attempt in 0..=BLOCK_RETRY_ATTEMPTS {
            if attempt > 0 {
                record_block_fetch_retry();
                tokio::time::sleep(BLOCK_RETRY_DELAY).await;
            }
            match self
                .transport
                .request("chain_getBlock", vec![json!(hash)])
                .await
            {
                Ok(reply) => match normalize_block(reply) {
                    Some(body) => return Ok(body),
                    None => trace!(attempt, "block still importing"),
                },
                Err(err) => debug!(%err, attempt, "chain_getBlock failed"),
            }
        }

        // Degraded result: the header alone, no extrinsics.
        match self
            .transport
            .request("chain_getHeader", vec![json!(hash)])
            .await
        {
            Ok(header) if !header.is_null() => {
                warn!(%hash, "block body unavailable, returning header only");
                Ok(BlockBody {
                    extrinsics: Vec::new(),
                    header: Some(header),
                })
            }
            _ => Err(ChainError::BlockUnavailable(hash)),
        }
    }

    /// Identify an extrinsic from its hex encoding.
    ///
    /// Never fails: undecodable hex behaves as an empty byte string, a
    /// missing table yields the no-metadata reason, and `pallet` /
    /// `method` always come back non-empty.
    pub async fn decode_extrinsic_name(&self, hex: &str, at: Option<&str>) -> ExtrinsicIdentity {
        let table = self.tables_for_block(at).await;
        let bytes = decode_hex(hex).unwrap_or_default();
        let identity = identify_extrinsic(&bytes, table.as_deref());
        record_extrinsic_identified(match &identity.reason {
            None => "resolved",
            Some(reason) => reason.label(),
        });
        identity
    }

    /// Identify an event by its `(pallet index, event index)` pair.
    pub async fn decode_event_name(
        &self,
        pallet_idx: u8,
        event_idx: u8,
        at: Option<&str>,
    ) -> EventIdentity {
        let table = self.tables_for_block(at).await;
        identify_event(pallet_idx, event_idx, table.as_deref())
    }

    /// Close the transport: pending requests fail, reconnection stops.
    pub async fn disconnect(&self) -> ChainResult<()> {
        self.transport.disconnect().await
    }
}

// =============================================================================
// Head subscription
// =============================================================================

/// An active `chain_subscribeNewHeads` subscription, with the hash
/// resolved per head.
pub struct HeadSubscription {
    inner: RpcSubscription,
    transport: Arc<dyn RpcTransport>,
}

impl HeadSubscription {
    /// The server-assigned subscription id.
    pub fn id(&self) -> &str {
        self.inner.id()
    }

    /// Next chain head. Heads whose JSON cannot be resolved are skipped.
    pub async fn next(&mut self) -> Option<ChainHead> {
        while let Some(raw) = self.inner.next().await {
            record_head_received();
            match resolve_head(self.transport.as_ref(), raw).await {
                Ok(head) => return Some(head),
                Err(err) => warn!(%err, "skipping unresolvable head notification"),
            }
        }
        None
    }

    /// Unsubscribe server-side; idempotent.
    pub async fn unsubscribe(&mut self) {
        self.inner.unsubscribe().await;
    }
}

/// Derive `{number, hash}` from a raw head notification: the number from
/// the hex header number, the hash from the head's own field when
/// present, otherwise via `chain_getBlockHash(number)`.
async fn resolve_head(transport: &dyn RpcTransport, raw: Value) -> ChainResult<ChainHead> {
    let head: RawHead = serde_json::from_value(raw)
        .map_err(|err| ChainError::Subscription(format!("malformed head: {err}")))?;
    let number = head.parsed_number()?;
    let hash = match head.hash {
        Some(hash) => hash,
        None => {
            let reply = transport
                .request("chain_getBlockHash", vec![json!(number)])
                .await?;
            reply
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| ChainError::Subscription(format!("no hash for head {number}")))?
        }
    };
    Ok(ChainHead { number, hash })
}

// =============================================================================
// Tests
// =============================================================================
