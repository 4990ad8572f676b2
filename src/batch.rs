//! Line-oriented records for pre-collected proposal batches.
//!
//! A batch is written as one `proposal:` line per vote followed by a
//! `digest:` trailer:
//!
//! ```text
//! proposal:1 1700000000000 "A"
//! proposal:2 1700000000005 "B"
//! digest:4f0c...
//! ```
//!
//! Each record carries the identifier, the timestamp and the payload encoded
//! as compact JSON.  The digest is a domain-separated BLAKE2b-256 over the
//! record count and every `(id, timestamp, canonical value)` triple, so a batch
//! that was reordered, truncated or edited no longer verifies.  Blank lines and
//! `#` comments are ignored when parsing.
//!
//! The canonical value is the payload decoded into a [`serde_json::Value`] and
//! re-encoded compactly: object keys sorted, numbers and escapes normalised.
//! Whitespace, key order or `1.0e0` versus `1.0` in a hand-written file do not
//! change the digest, and sealing a parsed batch writes the same digest that
//! parsing reported for it.

use crate::{io::write_lines, proposal::Proposal};
use blake2::digest::{consts::U32, Digest};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::{fs, path::Path};
use thiserror::Error;
use tracing::{debug, warn};

type Blake2b256 = blake2::Blake2b<U32>;

const BATCH_DOMAIN: &[u8] = b"QUORUM_TALLY_BATCH_V1";
const PROPOSAL_PREFIX: &str = "proposal:";
const DIGEST_PREFIX: &str = "digest:";

/// BLAKE2b-256 digest sealing a batch.
pub type BatchDigest = [u8; 32];

/// Errors raised while reading or writing batch records.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("io error: {0}")]
    /// Underlying filesystem or writer failure.
    Io(#[from] std::io::Error),
    #[error("line {line}: {reason}")]
    /// A line did not follow the record grammar.
    Malformed {
        /// 1-based line number.
        line: usize,
        /// What was wrong with it.
        reason: String,
    },
    #[error("line {line}: invalid value: {source}")]
    /// A payload could not be decoded.
    Value {
        /// 1-based line number.
        line: usize,
        /// Decoder error.
        source: serde_json::Error,
    },
    #[error("failed to encode value: {0}")]
    /// A payload could not be encoded.
    Encode(serde_json::Error),
    #[error("batch has no digest trailer")]
    /// The batch is unsealed and a digest was required.
    MissingDigest,
    #[error("digest mismatch (stored {stored}, computed {computed})")]
    /// The stored digest does not match the records.
    DigestMismatch {
        /// Hex digest found in the trailer.
        stored: String,
        /// Hex digest recomputed from the records.
        computed: String,
    },
}

/// Parsing options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    /// Reject batches that lack a `digest:` trailer.
    pub require_digest: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            require_digest: true,
        }
    }
}

/// Proposals recovered from a batch together with its digest.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedBatch<T> {
    /// Proposals in file order.
    pub proposals: Vec<Proposal<T>>,
    /// Digest recomputed from the records; equals [`batch_digest`] of `proposals`.
    pub digest: BatchDigest,
    /// Whether a trailer was present and verified.
    pub sealed: bool,
}

struct RawRecord<'a> {
    line: usize,
    id: u64,
    timestamp_ms: u64,
    value: &'a str,
}

struct Record {
    line: usize,
    id: u64,
    timestamp_ms: u64,
    value: Value,
    canonical: String,
}

impl Record {
    fn canonicalize(raw: RawRecord<'_>) -> Result<Self, BatchError> {
        let value: Value = serde_json::from_str(raw.value).map_err(|source| BatchError::Value {
            line: raw.line,
            source,
        })?;
        let canonical = serde_json::to_string(&value).map_err(BatchError::Encode)?;
        Ok(Self {
            line: raw.line,
            id: raw.id,
            timestamp_ms: raw.timestamp_ms,
            value,
            canonical,
        })
    }
}

fn digest_records<'a, I>(count: usize, records: I) -> BatchDigest
where
    I: IntoIterator<Item = (u64, u64, &'a str)>,
{
    let mut hasher = Blake2b256::new();
    hasher.update((BATCH_DOMAIN.len() as u64).to_be_bytes());
    hasher.update(BATCH_DOMAIN);
    hasher.update((count as u64).to_be_bytes());
    for (id, timestamp_ms, value) in records {
        hasher.update(id.to_be_bytes());
        hasher.update(timestamp_ms.to_be_bytes());
        hasher.update((value.len() as u64).to_be_bytes());
        hasher.update(value.as_bytes());
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

fn encode_values<T: Serialize>(proposals: &[Proposal<T>]) -> Result<Vec<String>, BatchError> {
    proposals
        .iter()
        .map(|p| {
            serde_json::to_value(&p.value)
                .and_then(|value| serde_json::to_string(&value))
                .map_err(BatchError::Encode)
        })
        .collect()
}

/// Hex form of a digest.
pub fn digest_to_hex(digest: &BatchDigest) -> String {
    hex::encode(digest)
}

/// Parses a 64-character hex digest.
pub fn digest_from_hex(value: &str) -> Result<BatchDigest, String> {
    let bytes = hex::decode(value.trim()).map_err(|err| format!("invalid digest hex: {err}"))?;
    bytes
        .try_into()
        .map_err(|bytes: Vec<u8>| format!("digest must be 32 bytes, got {}", bytes.len()))
}

/// Computes the digest a sealed batch of `proposals` would carry.
pub fn batch_digest<T: Serialize>(proposals: &[Proposal<T>]) -> Result<BatchDigest, BatchError> {
    let encoded = encode_values(proposals)?;
    Ok(digest_records(
        proposals.len(),
        proposals
            .iter()
            .zip(&encoded)
            .map(|(p, v)| (p.id, p.timestamp_ms, v.as_str())),
    ))
}

/// Writes a sealed batch using the provided line writer and returns its digest.
pub fn write_batch<W, T>(
    mut write_line: W,
    proposals: &[Proposal<T>],
) -> Result<BatchDigest, BatchError>
where
    W: FnMut(&str) -> std::io::Result<()>,
    T: Serialize,
{
    let encoded = encode_values(proposals)?;
    for (proposal, value) in proposals.iter().zip(&encoded) {
        write_line(&format!(
            "{PROPOSAL_PREFIX}{} {} {value}",
            proposal.id, proposal.timestamp_ms
        ))?;
    }
    let digest = digest_records(
        proposals.len(),
        proposals
            .iter()
            .zip(&encoded)
            .map(|(p, v)| (p.id, p.timestamp_ms, v.as_str())),
    );
    write_line(&format!("{DIGEST_PREFIX}{}", digest_to_hex(&digest)))?;
    Ok(digest)
}

fn parse_u64_field(field: Option<&str>, name: &str, line: usize) -> Result<u64, BatchError> {
    let token = field.ok_or_else(|| BatchError::Malformed {
        line,
        reason: format!("missing {name}"),
    })?;
    token.parse::<u64>().map_err(|_| BatchError::Malformed {
        line,
        reason: format!("invalid {name} {token:?}"),
    })
}

fn parse_record(body: &str, line: usize) -> Result<RawRecord<'_>, BatchError> {
    let body = body.trim_start();
    let (id, rest) = body
        .split_once(char::is_whitespace)
        .map_or((body, None), |(id, rest)| (id, Some(rest.trim_start())));
    let id = parse_u64_field(Some(id).filter(|s| !s.is_empty()), "identifier", line)?;
    let rest = rest.unwrap_or("");
    let (timestamp, value) = rest
        .split_once(char::is_whitespace)
        .map_or((rest, ""), |(ts, value)| (ts, value.trim()));
    let timestamp_ms =
        parse_u64_field(Some(timestamp).filter(|s| !s.is_empty()), "timestamp", line)?;
    if value.is_empty() {
        return Err(BatchError::Malformed {
            line,
            reason: "missing value".to_string(),
        });
    }
    Ok(RawRecord {
        line,
        id,
        timestamp_ms,
        value,
    })
}

/// Parses a batch, verifying its digest trailer.
pub fn parse_batch<'a, I, T>(lines: I, options: BatchOptions) -> Result<ParsedBatch<T>, BatchError>
where
    I: IntoIterator<Item = &'a str>,
    T: DeserializeOwned,
{
    let mut records = Vec::new();
    let mut stored: Option<(usize, BatchDigest)> = None;
    for (idx, raw) in lines.into_iter().enumerate() {
        let line = idx + 1;
        let text = raw.trim();
        if text.is_empty() || text.starts_with('#') {
            continue;
        }
        if let Some((digest_line, _)) = stored {
            return Err(BatchError::Malformed {
                line,
                reason: format!("record after digest trailer on line {digest_line}"),
            });
        }
        if let Some(body) = text.strip_prefix(PROPOSAL_PREFIX) {
            records.push(Record::canonicalize(parse_record(body, line)?)?);
        } else if let Some(body) = text.strip_prefix(DIGEST_PREFIX) {
            let digest =
                digest_from_hex(body).map_err(|reason| BatchError::Malformed { line, reason })?;
            stored = Some((line, digest));
        } else {
            return Err(BatchError::Malformed {
                line,
                reason: "unknown record".to_string(),
            });
        }
    }

    let digest = digest_records(
        records.len(),
        records
            .iter()
            .map(|r| (r.id, r.timestamp_ms, r.canonical.as_str())),
    );
    match stored {
        Some((_, expected)) if expected != digest => {
            let (stored, computed) = (digest_to_hex(&expected), digest_to_hex(&digest));
            warn!(%stored, %computed, "batch digest mismatch");
            return Err(BatchError::DigestMismatch { stored, computed });
        }
        None if options.require_digest => return Err(BatchError::MissingDigest),
        _ => {}
    }

    let proposals = records
        .into_iter()
        .map(|r| {
            serde_json::from_value(r.value)
                .map(|value| Proposal::new(r.id, value, r.timestamp_ms))
                .map_err(|source| BatchError::Value {
                    line: r.line,
                    source,
                })
        })
        .collect::<Result<Vec<_>, _>>()?;
    debug!(
        proposals = proposals.len(),
        sealed = stored.is_some(),
        "parsed batch"
    );
    Ok(ParsedBatch {
        proposals,
        digest,
        sealed: stored.is_some(),
    })
}

/// Reads and parses a batch file.
pub fn read_batch_file<T: DeserializeOwned>(
    path: &Path,
    options: BatchOptions,
) -> Result<ParsedBatch<T>, BatchError> {
    let contents = fs::read_to_string(path)?;
    parse_batch(contents.lines(), options)
}

/// Writes a sealed batch file and returns its digest.
pub fn write_batch_file<T: Serialize>(
    path: &Path,
    proposals: &[Proposal<T>],
) -> Result<BatchDigest, BatchError> {
    let mut lines = Vec::with_capacity(proposals.len() + 1);
    let digest = write_batch(
        |line| {
            lines.push(line.to_string());
            Ok(())
        },
        proposals,
    )?;
    write_lines(path, &lines)?;
    Ok(digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn sample() -> Vec<Proposal<String>> {
        vec![
            Proposal::new(1, "A".to_string(), 1_000),
            Proposal::new(2, "two words".to_string(), 1_005),
            Proposal::new(1, "A".to_string(), 1_009),
        ]
    }

    fn render(proposals: &[Proposal<String>]) -> Vec<String> {
        let mut lines = Vec::new();
        write_batch(
            |line| {
                lines.push(line.to_string());
                Ok(())
            },
            proposals,
        )
        .unwrap();
        lines
    }

    #[test]
    fn test_write_batch_format() {
        let lines = render(&sample());
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], r#"proposal:1 1000 "A""#);
        assert_eq!(lines[1], r#"proposal:2 1005 "two words""#);
        assert!(lines[3].starts_with("digest:"));
        assert_eq!(lines[3].len(), "digest:".len() + 64);
        assert_eq!(
            lines[3],
            format!("digest:{}", digest_to_hex(&batch_digest(&sample()).unwrap()))
        );
    }

    #[test]
    fn test_parse_sealed_batch() {
        let lines = render(&sample());
        let parsed: ParsedBatch<String> =
            parse_batch(lines.iter().map(|s| s.as_str()), BatchOptions::default()).unwrap();
        assert!(parsed.sealed);
        assert_eq!(parsed.proposals, sample());
        assert_eq!(parsed.digest, batch_digest(&sample()).unwrap());
    }

    #[test]
    fn test_parse_skips_comments_and_blanks() {
        let mut lines = render(&sample());
        lines.insert(0, "# collected by nightly job".to_string());
        lines.insert(2, "   ".to_string());
        let parsed: ParsedBatch<String> =
            parse_batch(lines.iter().map(|s| s.as_str()), BatchOptions::default()).unwrap();
        assert_eq!(parsed.proposals.len(), 3);
    }

    #[test]
    fn test_tampered_batch_is_rejected() {
        let mut lines = render(&sample());
        lines[1] = r#"proposal:1 1005 "two words""#.to_string();
        let err =
            parse_batch::<_, String>(lines.iter().map(|s| s.as_str()), BatchOptions::default())
                .unwrap_err();
        assert!(matches!(err, BatchError::DigestMismatch { .. }));
    }

    #[test]
    fn test_reordered_batch_is_rejected() {
        let mut lines = render(&sample());
        lines.swap(0, 1);
        let err =
            parse_batch::<_, String>(lines.iter().map(|s| s.as_str()), BatchOptions::default())
                .unwrap_err();
        assert!(matches!(err, BatchError::DigestMismatch { .. }));
    }

    #[test]
    fn test_missing_digest_depends_on_options() {
        let lines = vec![r#"proposal:4 0 {"k":[1,2]}"#];
        let err = parse_batch::<_, serde_json::Value>(lines.clone(), BatchOptions::default())
            .unwrap_err();
        assert!(matches!(err, BatchError::MissingDigest));

        let parsed: ParsedBatch<serde_json::Value> = parse_batch(
            lines,
            BatchOptions {
                require_digest: false,
            },
        )
        .unwrap();
        assert!(!parsed.sealed);
        assert_eq!(parsed.proposals[0].id, 4);
        assert_eq!(parsed.proposals[0].value["k"][1], 2);
    }

    #[test]
    fn test_malformed_lines_report_line_numbers() {
        let unsealed = BatchOptions {
            require_digest: false,
        };
        let cases = [
            (vec!["proposal:x 1 \"A\""], 1),
            (vec!["# c", "proposal:1"], 2),
            (vec!["proposal:1 2"], 1),
            (vec!["vote:1 2 \"A\""], 1),
            (vec!["digest:00", "proposal:1 2 \"A\""], 1),
        ];
        for (lines, expected) in cases {
            match parse_batch::<_, String>(lines, unsealed) {
                Err(BatchError::Malformed { line, .. }) => assert_eq!(line, expected),
                other => panic!("unexpected result: {other:?}"),
            }
        }
    }

    #[test]
    fn test_record_after_trailer_is_rejected() {
        let mut lines = render(&sample());
        lines.push(r#"proposal:9 0 "late""#.to_string());
        let err =
            parse_batch::<_, String>(lines.iter().map(|s| s.as_str()), BatchOptions::default())
                .unwrap_err();
        assert!(matches!(err, BatchError::Malformed { line: 5, .. }));
    }

    #[test]
    fn test_bad_value_is_reported() {
        let lines = vec!["proposal:1 0 not-json"];
        let err = parse_batch::<_, String>(
            lines,
            BatchOptions {
                require_digest: false,
            },
        )
        .unwrap_err();
        assert!(matches!(err, BatchError::Value { line: 1, .. }));
    }

    #[test]
    fn test_batch_file_roundtrip() {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("quorum_tally_batch_{}", unique));
        let path = dir.join("votes.batch");
        let digest = write_batch_file(&path, &sample()).unwrap();
        let parsed: ParsedBatch<String> =
            read_batch_file(&path, BatchOptions::default()).unwrap();
        assert_eq!(parsed.digest, digest);
        assert_eq!(parsed.proposals, sample());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_non_canonical_values_seal_to_parsed_digest() {
        let unsealed = BatchOptions {
            require_digest: false,
        };
        let lines = vec![
            r#"proposal:1 0 { "b" : 1, "a" : 2 }"#,
            "proposal:2 0 1.0e0",
            r#"proposal:1 5 "\u0041""#,
        ];
        let parsed: ParsedBatch<Value> = parse_batch(lines, unsealed).unwrap();
        assert_eq!(parsed.digest, batch_digest(&parsed.proposals).unwrap());

        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("quorum_tally_canonical_{}", unique));
        let path = dir.join("sealed.batch");
        let sealed_digest = write_batch_file(&path, &parsed.proposals).unwrap();
        assert_eq!(sealed_digest, parsed.digest);

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("proposal:1 0 {\"a\":2,\"b\":1}\n"));
        let resealed: ParsedBatch<Value> =
            read_batch_file(&path, BatchOptions::default()).unwrap();
        assert!(resealed.sealed);
        assert_eq!(resealed.digest, parsed.digest);
        assert_eq!(resealed.proposals, parsed.proposals);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_reformatted_sealed_value_still_verifies() {
        let proposals = vec![Proposal::new(3, serde_json::json!({"k": [1, 2]}), 9)];
        let mut lines = Vec::new();
        write_batch(
            |line| {
                lines.push(line.to_string());
                Ok(())
            },
            &proposals,
        )
        .unwrap();
        lines[0] = r#"proposal:3 9 {"k" : [ 1, 2 ]}"#.to_string();
        let parsed: ParsedBatch<Value> =
            parse_batch(lines.iter().map(|s| s.as_str()), BatchOptions::default()).unwrap();
        assert!(parsed.sealed);
        assert_eq!(parsed.proposals, proposals);
    }

    #[test]
    fn test_digest_hex_validation() {
        assert!(digest_from_hex("zz").is_err());
        assert!(digest_from_hex("00ff").is_err());
        let digest = batch_digest(&sample()).unwrap();
        assert_eq!(digest_from_hex(&digest_to_hex(&digest)).unwrap(), digest);
    }
}
