//! Request bodies of the Stratus control-plane protocol v1 and the asset
//! staging step shared by every [`Toolkit`](crate::Toolkit) implementation.
//!
//! Routes:
//! - `GET  /account`                : default account of the credentials
//! - `POST /bootstrap`              : [`BootstrapBody`]
//! - `GET  /stacks/<name>`          : stack state, 404 when absent
//! - `POST /stacks/<name>/deploy`   : [`DeployBody`]
//! - `POST /stacks/<name>/diff`     : [`DiffBody`]
//! - `POST /stacks/<name>/destroy`  : [`DestroyBody`]
//! - `PUT  /objects/<bucket>/<key>` : raw object bytes
//! - `PUT  /assets/<digest>`        : raw artifact bytes
//! - `POST /functions/code`         : [`UpdateCodeBody`]
//! - `GET  /health`
//!
//! Stack names, bucket names and each `/`-separated segment of an object key
//! are percent-encoded in the path.

use crate::{BootstrapParams, DestroyOptions, RemoteError};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use stratus_schema::{Assembly, CodeSource, DeploymentTarget, DesiredState, Resource};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployBody {
    pub template: DesiredState,
    #[serde(default)]
    pub role_arn: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffBody {
    pub template: DesiredState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestroyBody {
    pub options: DestroyOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateCodeBody {
    pub function: String,
    pub bucket: String,
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapBody {
    pub target: DeploymentTarget,
    pub params: BootstrapParams,
}

/// The templates of `stack_names`, in the order given.
pub fn select_stacks<'a>(
    assembly: &'a Assembly,
    stack_names: &[String],
) -> Result<Vec<&'a DesiredState>, RemoteError> {
    stack_names
        .iter()
        .map(|name| {
            assembly
                .stack(name)
                .ok_or_else(|| RemoteError::UnknownStack(name.clone()))
        })
        .collect()
}

/// Everything outside the RFC 3986 unreserved set.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// `value` escaped for use as one path segment.
pub fn encode_segment(value: &str) -> String {
    utf8_percent_encode(value, SEGMENT).to_string()
}

/// `key` escaped segment by segment, keeping its `/` separators.
pub fn encode_key(key: &str) -> String {
    key.split('/').map(encode_segment).collect::<Vec<_>>().join("/")
}

/// Reverse of [`encode_segment`]; `None` when the bytes are not UTF-8.
pub fn decode_segment(value: &str) -> Option<Cow<'_, str>> {
    percent_decode_str(value).decode_utf8().ok()
}

pub fn asset_digest(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// Read every local artifact referenced by `template`, hand it to `upload`
/// keyed by digest, and return a copy whose asset sources carry the digest
/// of the bytes actually uploaded.
pub fn stage_assets(
    template: &DesiredState,
    mut upload: impl FnMut(&str, &[u8]) -> Result<(), RemoteError>,
) -> Result<DesiredState, RemoteError> {
    let mut staged = template.clone();
    for (id, resource) in &mut staged.resources {
        let Resource::Function(unit) = resource else {
            continue;
        };
        let CodeSource::Asset { path, digest } = &mut unit.code else {
            continue;
        };
        let data = std::fs::read(&*path).map_err(|e| RemoteError::Asset {
            resource: id.to_string(),
            reason: format!("{path}: {e}"),
        })?;
        let computed = asset_digest(&data);
        tracing::debug!("staging asset {path} for {id} ({} bytes)", data.len());
        upload(&computed, &data)?;
        *digest = Some(computed);
    }
    Ok(staged)
}
