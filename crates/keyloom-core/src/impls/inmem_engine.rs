//! InMemoryEngine - 開発用の暗号エンジン
//!
//! # 学習ポイント
//! - RwLock によるキーリングの共有（読み取り多め）
//! - base64 による armor 形式
//! - sha2 ダイジェストによる署名の模倣
//!
//! 暗号学的な意味はありません。タスク機構とコールバック連鎖を
//! 本物の gpg なしで動かすためのエンジンです。

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::domain::{
    Buffer, DecryptResult, EncryptResult, KeyId, SignResult, Signature, VerifyResult,
};
use crate::ports::engine::codes;
use crate::ports::{CryptoEngine, EngineOutput};

const BEGIN: &str = "-----BEGIN KEYLOOM MESSAGE-----";
const END: &str = "-----END KEYLOOM MESSAGE-----";
const LINE_WIDTH: usize = 64;

#[derive(Debug, Clone, Copy)]
struct KeyEntry {
    has_secret: bool,
}

/// InMemoryEngine は開発用のエンジン
///
/// # 使用例
/// ```ignore
/// let engine = InMemoryEngine::new();
/// engine.add_key("6A2764F8298DEB29", true);
/// let out = engine.encrypt(&["6A2764F8298DEB29".into()], &"Hello".into());
/// ```
#[derive(Debug, Default)]
pub struct InMemoryEngine {
    keyring: RwLock<BTreeMap<KeyId, KeyEntry>>,
}

impl InMemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Import a key. `has_secret` decides whether it can decrypt and sign.
    pub fn add_key(&self, id: impl Into<KeyId>, has_secret: bool) {
        let id = id.into();
        debug!(key = %id, has_secret, "key imported");
        self.keyring
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, KeyEntry { has_secret });
    }

    fn key(&self, id: &KeyId) -> Option<KeyEntry> {
        self.keyring
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .copied()
    }
}

impl CryptoEngine for InMemoryEngine {
    fn encrypt(&self, recipients: &[KeyId], plain: &Buffer) -> EngineOutput<EncryptResult> {
        let invalid_recipients: Vec<KeyId> = recipients
            .iter()
            .filter(|id| self.key(id).is_none())
            .cloned()
            .collect();
        if !invalid_recipients.is_empty() {
            return EngineOutput::new(
                codes::INV_VALUE,
                EncryptResult { invalid_recipients },
                Buffer::default(),
            );
        }

        let armored = Armor {
            recipients: recipients.to_vec(),
            signatures: Vec::new(),
            body: plain.as_bytes().to_vec(),
        }
        .encode();
        EngineOutput::new(codes::NO_ERROR, EncryptResult::default(), armored)
    }

    fn decrypt(&self, cipher: &Buffer) -> EngineOutput<DecryptResult> {
        let Some(armor) = Armor::decode(cipher) else {
            return EngineOutput::new(codes::NO_DATA, DecryptResult::default(), Buffer::default());
        };
        let result = DecryptResult {
            recipients: armor.recipients.clone(),
        };
        let unlocked = armor.recipients.is_empty()
            || armor
                .recipients
                .iter()
                .any(|id| self.key(id).is_some_and(|key| key.has_secret));
        if !unlocked {
            return EngineOutput::new(codes::NO_SECRET_KEY, result, Buffer::default());
        }
        EngineOutput::new(codes::NO_ERROR, result, Buffer::new(armor.body))
    }

    fn sign(&self, signers: &[KeyId], data: &Buffer) -> EngineOutput<SignResult> {
        if signers.is_empty() {
            return EngineOutput::new(codes::INV_VALUE, SignResult::default(), Buffer::default());
        }
        if let Some(missing) = signers
            .iter()
            .find(|id| !self.key(id).is_some_and(|key| key.has_secret))
        {
            debug!(key = %missing, "signer has no secret key");
            return EngineOutput::new(codes::NO_SECRET_KEY, SignResult::default(), Buffer::default());
        }

        let body = data.as_bytes().to_vec();
        let signatures = signers
            .iter()
            .map(|id| (id.clone(), digest(id, &body)))
            .collect();
        let armored = Armor {
            recipients: Vec::new(),
            signatures,
            body,
        }
        .encode();
        EngineOutput::new(
            codes::NO_ERROR,
            SignResult {
                signers: signers.to_vec(),
            },
            armored,
        )
    }

    fn verify(&self, signed: &Buffer) -> EngineOutput<VerifyResult> {
        let Some(armor) = Armor::decode(signed) else {
            return EngineOutput::new(codes::NO_DATA, VerifyResult::default(), Buffer::default());
        };
        if armor.signatures.is_empty() {
            return EngineOutput::new(codes::NO_DATA, VerifyResult::default(), Buffer::new(armor.body));
        }

        let signatures: Vec<Signature> = armor
            .signatures
            .iter()
            .map(|(key_id, sig)| Signature {
                key_id: key_id.clone(),
                valid: self.key(key_id).is_some() && *sig == digest(key_id, &armor.body),
            })
            .collect();
        let result = VerifyResult { signatures };
        let status = if result.all_valid() {
            codes::NO_ERROR
        } else {
            codes::BAD_SIGNATURE
        };
        EngineOutput::new(status, result, Buffer::new(armor.body))
    }
}

fn digest(key: &KeyId, body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_str().as_bytes());
    hasher.update(body);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Text form of a message: `Recipient:`/`Signature:` headers, a blank line,
/// then the base64 body.
#[derive(Debug, PartialEq, Eq)]
struct Armor {
    recipients: Vec<KeyId>,
    signatures: Vec<(KeyId, String)>,
    body: Vec<u8>,
}

impl Armor {
    fn encode(&self) -> Buffer {
        let mut text = String::from(BEGIN);
        text.push('\n');
        for id in &self.recipients {
            text.push_str(&format!("Recipient: {id}\n"));
        }
        for (id, sig) in &self.signatures {
            text.push_str(&format!("Signature: {id} {sig}\n"));
        }
        text.push('\n');
        let encoded = STANDARD.encode(&self.body);
        for line in encoded.as_bytes().chunks(LINE_WIDTH) {
            text.push_str(&String::from_utf8_lossy(line));
            text.push('\n');
        }
        text.push_str(END);
        Buffer::from(text)
    }

    fn decode(buffer: &Buffer) -> Option<Self> {
        let text = std::str::from_utf8(buffer.as_bytes()).ok()?;
        let mut lines = text.trim().lines().map(str::trim);
        if lines.next()? != BEGIN {
            return None;
        }

        let mut recipients = Vec::new();
        let mut signatures = Vec::new();
        for line in lines.by_ref() {
            if line.is_empty() {
                break;
            }
            if let Some(id) = line.strip_prefix("Recipient: ") {
                recipients.push(KeyId::new(id));
            } else if let Some(rest) = line.strip_prefix("Signature: ") {
                let (id, sig) = rest.split_once(' ')?;
                signatures.push((KeyId::new(id), sig.to_string()));
            } else {
                return None;
            }
        }

        let mut encoded = String::new();
        let mut closed = false;
        for line in lines {
            if line == END {
                closed = true;
                break;
            }
            encoded.push_str(line);
        }
        if !closed {
            return None;
        }
        let body = STANDARD.decode(encoded).ok()?;
        Some(Self {
            recipients,
            signatures,
            body,
        })
    }
}
