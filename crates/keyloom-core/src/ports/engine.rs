//! CryptoEngine port - 外部の OpenPGP エンジン
//!
//! エンジン本体（鍵の解析、信頼計算、暗号アルゴリズム）はこのクレートの外側です。
//! runnable はワーカー上でこの trait を呼び、結果を payload に詰めます。

use crate::domain::{
    Buffer, DecryptResult, EncryptResult, KeyId, SignResult, StatusCode, VerifyResult,
};

/// Engine status codes, numbered as gpg-error numbers them.
pub mod codes {
    use crate::domain::StatusCode;

    pub const NO_ERROR: StatusCode = StatusCode::SUCCESS;
    pub const BAD_SIGNATURE: StatusCode = StatusCode::new(8);
    pub const NO_SECRET_KEY: StatusCode = StatusCode::new(17);
    pub const INV_VALUE: StatusCode = StatusCode::new(55);
    pub const NO_DATA: StatusCode = StatusCode::new(58);

    /// Status names as gpg-error spells them, for reports and logs.
    pub fn describe(status: StatusCode) -> &'static str {
        match status {
            s if s == NO_ERROR => "Success",
            s if s == BAD_SIGNATURE => "Bad signature",
            s if s == NO_SECRET_KEY => "No secret key",
            s if s == INV_VALUE => "Invalid value",
            s if s == NO_DATA => "No data",
            s if s == StatusCode::FAULT => "Task fault",
            _ => "Unknown error",
        }
    }
}

/// Everything one engine call produced.
///
/// A failing call still returns its partial result; a message that cannot be
/// decrypted still lists the recipients it was encrypted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOutput<R> {
    pub status: StatusCode,
    pub result: R,
    pub output: Buffer,
}

impl<R> EngineOutput<R> {
    pub fn new(status: StatusCode, result: R, output: Buffer) -> Self {
        Self {
            status,
            result,
            output,
        }
    }
}

/// Blocking engine interface. Calls may block on subprocess I/O, keyring
/// access or key servers, which is why they only ever run inside a runnable.
pub trait CryptoEngine: Send + Sync {
    /// Encrypt to `recipients`; an empty list means symmetric encryption.
    fn encrypt(&self, recipients: &[KeyId], plain: &Buffer) -> EngineOutput<EncryptResult>;

    fn decrypt(&self, cipher: &Buffer) -> EngineOutput<DecryptResult>;

    fn sign(&self, signers: &[KeyId], data: &Buffer) -> EngineOutput<SignResult>;

    /// Verify a signed message; `output` carries the signed content.
    fn verify(&self, signed: &Buffer) -> EngineOutput<VerifyResult>;
}
