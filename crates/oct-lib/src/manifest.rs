//! Image manifests and the Docker-to-OCI translation the pipeline applies
//! before a manifest enters a layout.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{Error, Result},
    oci::Descriptor,
};

pub const MEDIA_TYPE_OCI_MANIFEST: &str =
    "application/vnd.oci.image.manifest.v1+json";
pub const MEDIA_TYPE_OCI_MANIFEST_LIST: &str =
    "application/vnd.oci.image.manifest.list.v1+json";
pub const MEDIA_TYPE_OCI_CONFIG: &str =
    "application/vnd.oci.image.config.v1+json";
pub const MEDIA_TYPE_OCI_LAYER: &str =
    "application/vnd.oci.image.layer.v1.tar";

pub const MEDIA_TYPE_DOCKER_V2S2: &str =
    "application/vnd.docker.distribution.manifest.v2+json";
pub const MEDIA_TYPE_DOCKER_V2S1: &str =
    "application/vnd.docker.distribution.manifest.v1+json";
pub const MEDIA_TYPE_DOCKER_V2S1_SIGNED: &str =
    "application/vnd.docker.distribution.manifest.v1+prettyjws";
pub const MEDIA_TYPE_DOCKER_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";

/// The subset of a manifest the pipeline works with. Unknown fields do not
/// survive a rewrite, matching the typed round-trip the original performs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    #[serde(rename = "mediaType", skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
}

impl Manifest {
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(buf)?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Best-effort media type of raw manifest bytes: the declared `mediaType`
/// when present, schema heuristics otherwise.
pub fn guess_media_type(buf: &[u8]) -> Result<String> {
    let value: Value = serde_json::from_slice(buf)?;

    if let Some(mt) = value.get("mediaType").and_then(Value::as_str) {
        return Ok(mt.to_owned());
    }

    match value.get("schemaVersion").and_then(Value::as_u64) {
        Some(1) => {
            if value.get("signatures").is_some() {
                Ok(MEDIA_TYPE_DOCKER_V2S1_SIGNED.to_owned())
            } else {
                Ok(MEDIA_TYPE_DOCKER_V2S1.to_owned())
            }
        }
        Some(2) => Ok(MEDIA_TYPE_DOCKER_V2S2.to_owned()),
        _ => Err(Error::UnsupportedManifest(
            "manifest declares no media type or schema version".to_owned(),
        )),
    }
}

/// Rewrite manifest bytes into OCI form, returning the bytes and their
/// media type. OCI manifests pass through untouched; Docker V2 schema 2 is
/// rewritten field by field; everything else is rejected.
///
/// The digest of the result must be recomputed from the returned bytes, it
/// is not inherited from the input.
pub fn to_oci_manifest(buf: &[u8]) -> Result<(Vec<u8>, String)> {
    let media_type = guess_media_type(buf)?;

    match media_type.as_str() {
        MEDIA_TYPE_OCI_MANIFEST => Ok((buf.to_vec(), media_type)),
        MEDIA_TYPE_DOCKER_V2S2 => {
            let mut manifest = Manifest::from_bytes(buf)?;
            manifest.media_type = Some(MEDIA_TYPE_OCI_MANIFEST.to_owned());
            manifest.config.media_type = MEDIA_TYPE_OCI_CONFIG.to_owned();
            for layer in &mut manifest.layers {
                layer.media_type = MEDIA_TYPE_OCI_LAYER.to_owned();
            }
            Ok((manifest.to_bytes()?, MEDIA_TYPE_OCI_MANIFEST.to_owned()))
        }
        MEDIA_TYPE_DOCKER_V2S1 | MEDIA_TYPE_DOCKER_V2S1_SIGNED => {
            Err(Error::UnsupportedManifest(
                "can't create an OCI manifest from a Docker V2 schema 1 \
                 manifest"
                    .to_owned(),
            ))
        }
        MEDIA_TYPE_DOCKER_LIST | MEDIA_TYPE_OCI_MANIFEST_LIST => {
            Err(Error::UnsupportedManifest(
                "manifest lists are not supported".to_owned(),
            ))
        }
        other => Err(Error::UnsupportedManifest(format!(
            "unrecognized manifest media type {other:?}"
        ))),
    }
}
