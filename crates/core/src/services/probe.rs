//! Runtime probe.
//!
//! One-shot capture of what the connected runtime is: spec name and
//! version, the chain-reported SS58 prefix, and the raw metadata blob.
//! Run at connect time and again (per block hash) when the facade sees
//! an unknown spec version.

use futures::join;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{ChainError, ChainResult};
use crate::models::{RuntimeInfo, decode_hex};
use crate::ports::RpcTransport;

/// The subset of `state_getRuntimeVersion` the facade consumes.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RuntimeVersionReply {
    spec_name: String,
    spec_version: u32,
}

/// Probe the connected runtime.
///
/// The three RPCs are issued concurrently. `system_properties` failing
/// is non-fatal - the prefix is simply left unset. `fetch_metadata`
/// exists for callers that supply their own pallet tables and have no
/// use for the (large) metadata download.
pub async fn fetch_runtime_info(
    transport: &dyn RpcTransport,
    fetch_metadata: bool,
) -> ChainResult<RuntimeInfo> {
    let version_fut = transport.request("state_getRuntimeVersion", vec![]);
    let metadata_fut = async {
        if fetch_metadata {
            Some(transport.request("state_getMetadata", vec![]).await)
        } else {
            None
        }
    };
    let properties_fut = transport.request("system_properties", vec![]);

    let (version, metadata, properties) = join!(version_fut, metadata_fut, properties_fut);

    let version: RuntimeVersionReply = serde_json::from_value(version?)
        .map_err(|err| ChainError::ConnectionFailed(format!("malformed runtime version: {err}")))?;

    let metadata = match metadata {
        None => Vec::new(),
        Some(Ok(Value::String(hex))) => decode_hex(&hex)?,
        Some(Ok(other)) => {
            return Err(ChainError::ConnectionFailed(format!(
                "state_getMetadata returned non-hex payload: {other}"
            )));
        }
        Some(Err(err)) => return Err(err),
    };

    let ss58_prefix = match properties {
        Ok(props) => props.get("ss58Format").and_then(Value::as_u64).map(|p| p as u32),
        Err(err) => {
            debug!(%err, "system_properties unavailable, ss58 prefix unset");
            None
        }
    };

    Ok(RuntimeInfo {
        spec_name: version.spec_name,
        spec_version: version.spec_version,
        ss58_prefix,
        metadata,
    })
}
