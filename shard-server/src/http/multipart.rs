//! Hand-rolled `multipart/form-data` framing for responses (axum only gives
//! us a decoder, [`axum::extract::Multipart`], for requests) plus the
//! request-side adapter used by the push endpoint.

use axum::extract::Multipart;
use shard_lib::error::ShardError;
use shard_lib::error::ShardResult;

/// One named part: its field name is the commit name (replica protocol) or
/// the file path (file-set GET).
pub struct Part {
    pub name: String,
    pub bytes: Vec<u8>,
}

pub fn new_boundary() -> String {
    format!("shard-{}", uuid::Uuid::new_v4())
}

/// Encodes `parts` as one `multipart/form-data` body using `boundary`.
pub fn encode(boundary: &str, parts: &[Part]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
                part.name
            )
            .as_bytes(),
        );
        body.extend_from_slice(&part.bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    body
}

/// Drains an incoming request's multipart body into `(field name, bytes)`
/// pairs, in the order the client sent them.
pub async fn decode(mut multipart: Multipart) -> ShardResult<Vec<Part>> {
    let mut parts = Vec::new();
    loop {
        let field = multipart.next_field().await.map_err(|e| ShardError::BadManifest {
            name: "<multipart body>".to_string(),
            reason: e.to_string(),
        })?;
        let Some(field) = field else {
            break;
        };
        let name = field.name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ShardError::BadManifest {
                name: name.clone(),
                reason: e.to_string(),
            })?
            .to_vec();
        parts.push(Part { name, bytes });
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_produces_one_section_per_part() {
        let boundary = "b1";
        let body = encode(
            boundary,
            &[
                Part {
                    name: "a.txt".to_string(),
                    bytes: b"hi".to_vec(),
                },
                Part {
                    name: "b.txt".to_string(),
                    bytes: b"bye".to_vec(),
                },
            ],
        );
        let text = String::from_utf8(body).unwrap();
        assert_eq!(text.matches("Content-Disposition").count(), 2);
        assert!(text.ends_with("--b1--\r\n"));
    }
}
