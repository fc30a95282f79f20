//! Uploads built pack versions to S3, optionally gzip-compressed.

use std::fs;
use std::io::Write;

use anyhow::{Context, Result};
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::info;

use crate::geo::sanitize_id;
use crate::ingest::DataLayout;
use crate::pack::PackType;

/// An object ready to put into a bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishObject {
    pub key: String,
    pub body: Bytes,
    pub gzip: bool,
}

/// `pack_type=<type>/centre_id=<centre>/<version>.json[.gz]`
pub fn object_key(pack_type: PackType, centre_id: &str, version: &str, gzip: bool) -> String {
    let mut key = format!(
        "pack_type={}/centre_id={}/{}.json",
        pack_type,
        sanitize_id(centre_id),
        sanitize_id(version)
    );
    if gzip {
        key.push_str(".gz");
    }
    key
}

pub fn gzip_bytes(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

/// Reads a stored version file and builds the object to upload for it.
pub fn prepare_version(
    layout: &DataLayout,
    pack_type: PackType,
    centre_id: &str,
    version: &str,
    gzip: bool,
) -> Result<PublishObject> {
    let path = layout.version_file(pack_type, centre_id, version);
    let contents =
        fs::read(&path).with_context(|| format!("reading version file {}", path.display()))?;
    let body = if gzip { gzip_bytes(&contents)? } else { contents };
    Ok(PublishObject {
        key: object_key(pack_type, centre_id, version, gzip),
        body: Bytes::from(body),
        gzip,
    })
}

#[tracing::instrument(skip(client, object), fields(key = %object.key, bytes = object.body.len()))]
pub async fn upload(client: &aws_sdk_s3::Client, bucket: &str, object: PublishObject) -> Result<()> {
    let mut request = client
        .put_object()
        .bucket(bucket)
        .key(&object.key)
        .content_type("application/json");
    if object.gzip {
        request = request.content_encoding("gzip");
    }
    request.body(ByteStream::from(object.body)).send().await?;

    info!(bucket, key = %object.key, "Pack uploaded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use tempfile::TempDir;

    #[test]
    fn test_object_key() {
        assert_eq!(
            object_key(PackType::Hazards, "Centre A", "hazards-17", false),
            "pack_type=hazards/centre_id=centre_a/hazards-17.json"
        );
        assert!(object_key(PackType::Routes, "c1", "routes-1", true).ends_with(".json.gz"));
    }

    #[test]
    fn test_prepare_version_gzip() {
        let dir = TempDir::new().unwrap();
        let layout = DataLayout::new(dir.path());
        let path = layout.version_file(PackType::Hazards, "c1", "hazards-1");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, r#"{"hazards":[]}"#).unwrap();

        let object = prepare_version(&layout, PackType::Hazards, "c1", "hazards-1", true).unwrap();
        assert_eq!(object.key, "pack_type=hazards/centre_id=c1/hazards-1.json.gz");

        let mut decoded = String::new();
        GzDecoder::new(object.body.as_ref())
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, r#"{"hazards":[]}"#);
    }

    #[test]
    fn test_prepare_missing_version_fails() {
        let dir = TempDir::new().unwrap();
        let layout = DataLayout::new(dir.path());
        assert!(prepare_version(&layout, PackType::Hazards, "c1", "hazards-9", false).is_err());
    }
}
