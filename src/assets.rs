use base64::Engine;
use sha2::{Digest, Sha256};

use crate::error::ClinicpadError;

// Signature-pad captures arrive as data URIs; uploaded logos arrive as raw
// buffers. Either way the decoder sees plain PNG bytes.
#[derive(Debug, Clone)]
pub enum ImageSource {
    Png(Vec<u8>),
    DataUri(String),
}

// Resolved PNG bytes plus the digest that attests exactly which image
// entered a generated document.
#[derive(Debug, Clone)]
pub struct ResolvedImage {
    pub bytes: Vec<u8>,
    pub sha256: String,
}

pub fn resolve(source: &ImageSource) -> Result<ResolvedImage, ClinicpadError> {
    let bytes = match source {
        ImageSource::Png(bytes) => bytes.clone(),
        ImageSource::DataUri(uri) => decode_data_uri(uri).ok_or(ClinicpadError::InvalidFormat)?,
    };
    let sha256 = sha256_hex(&bytes);
    Ok(ResolvedImage { bytes, sha256 })
}

// "data:image/png;base64,<payload>" with the standard alphabet. Any other
// media type is rejected before the payload is even decoded.
fn decode_data_uri(uri: &str) -> Option<Vec<u8>> {
    let rest = uri.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    let mime = header.split(';').next().unwrap_or("");
    if mime != "image/png" {
        return None;
    }
    if header.split(';').any(|part| part == "base64") {
        base64::engine::general_purpose::STANDARD.decode(payload).ok()
    } else {
        None
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_bytes_pass_through() {
        let resolved = resolve(&ImageSource::Png(vec![1, 2, 3])).expect("resolve");
        assert_eq!(resolved.bytes, vec![1, 2, 3]);
        assert_eq!(resolved.sha256.len(), 64);
    }

    #[test]
    fn data_uri_decodes_to_payload_bytes() {
        let payload = b"not-a-real-png-but-bytes";
        let uri = format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(payload)
        );
        let resolved = resolve(&ImageSource::DataUri(uri)).expect("resolve");
        assert_eq!(resolved.bytes, payload);
    }

    #[test]
    fn same_bytes_same_digest_across_sources() {
        let payload = b"signature stroke bytes";
        let uri = format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(payload)
        );
        let from_uri = resolve(&ImageSource::DataUri(uri)).expect("uri");
        let from_raw = resolve(&ImageSource::Png(payload.to_vec())).expect("raw");
        assert_eq!(from_uri.sha256, from_raw.sha256);
    }

    #[test]
    fn rejects_non_png_media_type() {
        let uri = "data:image/jpeg;base64,AAAA".to_string();
        assert!(matches!(
            resolve(&ImageSource::DataUri(uri)),
            Err(ClinicpadError::InvalidFormat)
        ));
    }

    #[test]
    fn rejects_malformed_uri() {
        for uri in ["image/png;base64,AAAA", "data:image/png;base64", "data:image/png,plain"] {
            assert!(
                matches!(
                    resolve(&ImageSource::DataUri(uri.to_string())),
                    Err(ClinicpadError::InvalidFormat)
                ),
                "should reject {:?}",
                uri
            );
        }
    }

    #[test]
    fn rejects_bad_base64_payload() {
        let uri = "data:image/png;base64,!!!not-base64!!!".to_string();
        assert!(matches!(
            resolve(&ImageSource::DataUri(uri)),
            Err(ClinicpadError::InvalidFormat)
        ));
    }

    #[test]
    fn digest_is_stable() {
        // SHA-256 of the empty input, a fixed reference value.
        let resolved = resolve(&ImageSource::Png(Vec::new())).expect("resolve");
        assert_eq!(
            resolved.sha256,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
