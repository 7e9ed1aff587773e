//! Append-only promotion decision log.
//!
//! One JSON line per decision, keys sorted. With the hash chain enabled each
//! line carries `hash_prev` (previous line's `hash_self`) and `hash_self`
//! (SHA-256 of the line's canonical JSON without `hash_self`).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use mpg_promotion::PromotionDecision;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Namespace for deterministic decision event ids.
const EVENT_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6d70_6700_0000_4000_8000_6465_6369_7369);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionEvent {
    pub event_id: Uuid,
    /// Position in the log, starting at 0.
    pub seq: u64,
    pub ts_utc: DateTime<Utc>,
    pub model_name: String,
    pub candidate_version: i64,
    pub decision: PromotionDecision,
    /// Version archived as a result of this decision, if any.
    pub archived_version: Option<i64>,
    pub hash_prev: Option<String>,
    pub hash_self: Option<String>,
}

/// Append-only decision log writer.
///
/// Several writers (processes) may share one file. Each append holds an
/// exclusive file lock and continues from the tail it finds on disk, so the
/// cached `seq` and `last_hash` are only a view of the last append.
pub struct DecisionLogWriter {
    path: PathBuf,
    hash_chain: bool,
    last_hash: Option<String>,
    seq: u64,
}

impl DecisionLogWriter {
    /// Creates the writer and ensures parent dirs exist. Nothing is read
    /// until the first append.
    pub fn new(path: impl AsRef<Path>, hash_chain: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create_dir_all {:?}", parent))?;
            }
        }

        Ok(Self {
            path,
            hash_chain,
            last_hash: None,
            seq: 0,
        })
    }

    /// Open an existing log and load its tail (seq + last hash).
    /// A missing file starts a fresh log.
    pub fn resume(path: impl AsRef<Path>, hash_chain: bool) -> Result<Self> {
        let mut w = Self::new(path, hash_chain)?;
        if !w.path.exists() {
            return Ok(w);
        }

        let content = fs::read_to_string(&w.path)
            .with_context(|| format!("read decision log {:?}", w.path))?;
        (w.seq, w.last_hash) = tail_of(&content)?;
        Ok(w)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn last_hash(&self) -> Option<&str> {
        self.last_hash.as_deref()
    }

    /// Next event's seq as of the last append (or `resume`).
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Append one decision under an exclusive lock on the log file.
    pub fn append(
        &mut self,
        model_name: &str,
        candidate_version: i64,
        decision: &PromotionDecision,
        archived_version: Option<i64>,
    ) -> Result<DecisionEvent> {
        let mut f = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open decision log {:?}", self.path))?;
        FileExt::lock_exclusive(&f)
            .with_context(|| format!("lock decision log {:?}", self.path))?;

        let written = self.append_locked(
            &mut f,
            model_name,
            candidate_version,
            decision,
            archived_version,
        );
        FileExt::unlock(&f).with_context(|| format!("unlock decision log {:?}", self.path))?;
        written
    }

    fn append_locked(
        &mut self,
        f: &mut File,
        model_name: &str,
        candidate_version: i64,
        decision: &PromotionDecision,
        archived_version: Option<i64>,
    ) -> Result<DecisionEvent> {
        let mut content = String::new();
        f.read_to_string(&mut content)
            .with_context(|| format!("read decision log {:?}", self.path))?;
        let (seq, last_hash) = tail_of(&content)?;

        let event_id = derive_event_id(
            last_hash.as_deref(),
            seq,
            model_name,
            candidate_version,
            decision,
        )?;

        let mut ev = DecisionEvent {
            event_id,
            seq,
            ts_utc: Utc::now(),
            model_name: model_name.to_string(),
            candidate_version,
            decision: decision.clone(),
            archived_version,
            hash_prev: None,
            hash_self: None,
        };

        if self.hash_chain {
            ev.hash_prev = last_hash;
            ev.hash_self = Some(compute_event_hash(&ev)?);
        }

        let mut line = canonical_json_line(&ev)?;
        line.push('\n');
        f.write_all(line.as_bytes())
            .context("write decision line failed")?;
        f.flush().context("flush decision log failed")?;

        self.seq = seq + 1;
        self.last_hash = ev.hash_self.clone();
        Ok(ev)
    }
}

/// (next seq, last `hash_self`) of a log's content.
fn tail_of(content: &str) -> Result<(u64, Option<String>)> {
    match content.lines().map(str::trim).filter(|l| !l.is_empty()).last() {
        Some(last) => {
            let ev: DecisionEvent =
                serde_json::from_str(last).context("parse last decision log line")?;
            Ok((ev.seq + 1, ev.hash_self))
        }
        None => Ok((0, None)),
    }
}

/// Event id = UUIDv5 over (previous hash, seq, decision content). No RNG, so
/// replaying the same decisions onto the same chain yields the same ids.
fn derive_event_id(
    prev_hash: Option<&str>,
    seq: u64,
    model_name: &str,
    candidate_version: i64,
    decision: &PromotionDecision,
) -> Result<Uuid> {
    let body = canonical_json_line(decision)?;
    let name = format!(
        "{}|{}|{}|{}|{}",
        prev_hash.unwrap_or("GENESIS"),
        seq,
        model_name,
        candidate_version,
        body
    );
    Ok(Uuid::new_v5(&EVENT_ID_NAMESPACE, name.as_bytes()))
}

/// Canonicalize by sorting keys recursively and emitting compact JSON.
fn canonical_json_line<T: Serialize>(v: &T) -> Result<String> {
    let raw = serde_json::to_value(v).context("serialize decision event failed")?;
    serde_json::to_string(&sort_keys(&raw)).context("json stringify failed")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

/// Hash of the canonical JSON of `ev` with `hash_self` cleared.
pub fn compute_event_hash(ev: &DecisionEvent) -> Result<String> {
    let mut clone = ev.clone();
    clone.hash_self = None;

    let canonical = canonical_json_line(&clone)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Verify the hash chain integrity of a decision log file.
pub fn verify_hash_chain(path: impl AsRef<Path>) -> Result<VerifyResult> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("read decision log {:?}", path.as_ref()))?;
    verify_hash_chain_str(&content)
}

/// Same as [`verify_hash_chain`] over in-memory JSONL content.
pub fn verify_hash_chain_str(content: &str) -> Result<VerifyResult> {
    let mut prev_hash: Option<String> = None;
    let mut expected_seq = 0u64;

    for (i, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let ev: DecisionEvent = serde_json::from_str(trimmed)
            .with_context(|| format!("parse decision event at line {}", i + 1))?;

        if ev.seq != expected_seq {
            return Ok(VerifyResult::Broken {
                line: i + 1,
                reason: format!("seq gap: expected {}, got {}", expected_seq, ev.seq),
            });
        }
        expected_seq += 1;

        if ev.hash_prev != prev_hash {
            return Ok(VerifyResult::Broken {
                line: i + 1,
                reason: format!(
                    "hash_prev mismatch: expected {:?}, got {:?}",
                    prev_hash, ev.hash_prev
                ),
            });
        }

        if let Some(ref claimed_hash) = ev.hash_self {
            let recomputed = compute_event_hash(&ev)?;
            if *claimed_hash != recomputed {
                return Ok(VerifyResult::Broken {
                    line: i + 1,
                    reason: format!(
                        "hash_self mismatch: claimed {}, recomputed {}",
                        claimed_hash, recomputed
                    ),
                });
            }
        }

        prev_hash = ev.hash_self.clone();
    }

    Ok(VerifyResult::Valid {
        lines: expected_seq as usize,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    Valid { lines: usize },
    Broken { line: usize, reason: String },
}
