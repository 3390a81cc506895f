//! Operation - OpenPGP 操作をタスクとして投入する
//!
//! 各操作は runnable でエンジンを呼び、決まった形の payload を詰めます。
//!
//! | operation        | payload                                   |
//! |------------------|-------------------------------------------|
//! | encrypt          | (EncryptResult, Buffer)                   |
//! | decrypt          | (DecryptResult, Buffer)                   |
//! | sign             | (SignResult, Buffer)                      |
//! | verify           | (VerifyResult, Buffer)                    |
//! | encrypt_sign     | (EncryptResult, SignResult, Buffer)       |
//! | decrypt_verify   | (DecryptResult, VerifyResult, Buffer)     |
//!
//! callback は payload と status から `OperationReport` を作って表示に使います。

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::runner::TaskRunner;
use super::task::{Task, TaskHandle};
use crate::domain::{
    Buffer, DataObjectPtr, DecryptResult, EncryptResult, KeyId, PayloadError, SignResult,
    StatusCode, VerifyResult,
};
use crate::ports::CryptoEngine;
use crate::ports::engine::codes;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Encrypt,
    Decrypt,
    Sign,
    Verify,
    EncryptSign,
    DecryptVerify,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Encrypt => "encrypt",
            Operation::Decrypt => "decrypt",
            Operation::Sign => "sign",
            Operation::Verify => "verify",
            Operation::EncryptSign => "encrypt_sign",
            Operation::DecryptVerify => "decrypt_verify",
        }
    }

    fn task_name(self) -> String {
        format!("gpg_{}", self.as_str())
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Submits engine calls as tasks on one runner.
#[derive(Clone)]
pub struct OperationRunner {
    runner: TaskRunner,
    engine: Arc<dyn CryptoEngine>,
}

impl OperationRunner {
    pub fn new(runner: TaskRunner, engine: Arc<dyn CryptoEngine>) -> Self {
        Self { runner, engine }
    }

    pub fn runner(&self) -> &TaskRunner {
        &self.runner
    }

    fn submit<R, C>(&self, operation: Operation, runnable: R, callback: C) -> TaskHandle
    where
        R: FnOnce(&dyn CryptoEngine, &DataObjectPtr) -> StatusCode + Send + 'static,
        C: FnOnce(StatusCode, &DataObjectPtr) + Send + 'static,
    {
        let engine = Arc::clone(&self.engine);
        self.runner.spawn(
            Task::builder(operation.task_name())
                .runnable(move |data| runnable(engine.as_ref(), data))
                .callback(callback),
        )
    }

    /// Empty `recipients` encrypts symmetrically.
    pub fn encrypt<C>(&self, recipients: Vec<KeyId>, plain: Buffer, callback: C) -> TaskHandle
    where
        C: FnOnce(StatusCode, &DataObjectPtr) + Send + 'static,
    {
        self.submit(
            Operation::Encrypt,
            move |engine, data| {
                let out = engine.encrypt(&recipients, &plain);
                data.push(out.result);
                data.push(out.output);
                out.status
            },
            callback,
        )
    }

    pub fn decrypt<C>(&self, cipher: Buffer, callback: C) -> TaskHandle
    where
        C: FnOnce(StatusCode, &DataObjectPtr) + Send + 'static,
    {
        self.submit(
            Operation::Decrypt,
            move |engine, data| {
                let out = engine.decrypt(&cipher);
                data.push(out.result);
                data.push(out.output);
                out.status
            },
            callback,
        )
    }

    pub fn sign<C>(&self, signers: Vec<KeyId>, data_in: Buffer, callback: C) -> TaskHandle
    where
        C: FnOnce(StatusCode, &DataObjectPtr) + Send + 'static,
    {
        self.submit(
            Operation::Sign,
            move |engine, data| {
                let out = engine.sign(&signers, &data_in);
                data.push(out.result);
                data.push(out.output);
                out.status
            },
            callback,
        )
    }

    pub fn verify<C>(&self, signed: Buffer, callback: C) -> TaskHandle
    where
        C: FnOnce(StatusCode, &DataObjectPtr) + Send + 'static,
    {
        self.submit(
            Operation::Verify,
            move |engine, data| {
                let out = engine.verify(&signed);
                data.push(out.result);
                data.push(out.output);
                out.status
            },
            callback,
        )
    }

    /// Sign, then encrypt the signed message. Stops at the first failure.
    pub fn encrypt_sign<C>(
        &self,
        recipients: Vec<KeyId>,
        signers: Vec<KeyId>,
        plain: Buffer,
        callback: C,
    ) -> TaskHandle
    where
        C: FnOnce(StatusCode, &DataObjectPtr) + Send + 'static,
    {
        self.submit(
            Operation::EncryptSign,
            move |engine, data| {
                let signed = engine.sign(&signers, &plain);
                if signed.status != codes::NO_ERROR {
                    data.push(EncryptResult::default());
                    data.push(signed.result);
                    data.push(Buffer::default());
                    return signed.status;
                }
                let encrypted = engine.encrypt(&recipients, &signed.output);
                data.push(encrypted.result);
                data.push(signed.result);
                data.push(encrypted.output);
                encrypted.status
            },
            callback,
        )
    }

    /// Decrypt, then verify the inner signed message.
    pub fn decrypt_verify<C>(&self, cipher: Buffer, callback: C) -> TaskHandle
    where
        C: FnOnce(StatusCode, &DataObjectPtr) + Send + 'static,
    {
        self.submit(
            Operation::DecryptVerify,
            move |engine, data| {
                let decrypted = engine.decrypt(&cipher);
                if decrypted.status != codes::NO_ERROR {
                    data.push(decrypted.result);
                    data.push(VerifyResult::default());
                    data.push(Buffer::default());
                    return decrypted.status;
                }
                let verified = engine.verify(&decrypted.output);
                data.push(decrypted.result);
                data.push(verified.result);
                data.push(verified.output);
                verified.status
            },
            callback,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportLevel {
    Ok,
    Warn,
    Critical,
}

/// Human-readable analysis of a finished operation, shown in the info board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationReport {
    pub operation: Operation,
    pub status: StatusCode,
    pub level: ReportLevel,
    pub text: String,
}

impl OperationReport {
    /// Read the payload of `operation` and grade the outcome.
    pub fn analyse(operation: Operation, status: StatusCode, data: &DataObjectPtr) -> Self {
        let mut lines = vec![format!(
            "[{operation}] status: {} ({})",
            codes::describe(status),
            status
        )];
        let mut level = if status.is_success() {
            ReportLevel::Ok
        } else {
            ReportLevel::Critical
        };

        match Self::details(operation, data, &mut lines) {
            Ok(warn) if warn && level == ReportLevel::Ok => level = ReportLevel::Warn,
            Ok(_) => {}
            Err(err) => {
                lines.push(format!("unexpected result payload: {err}"));
                level = ReportLevel::Critical;
            }
        }

        Self {
            operation,
            status,
            level,
            text: lines.join("\n"),
        }
    }

    /// Appends detail lines. Returns whether anything deserves a warning.
    fn details(
        operation: Operation,
        data: &DataObjectPtr,
        lines: &mut Vec<String>,
    ) -> Result<bool, PayloadError> {
        let mut warn = false;
        match operation {
            Operation::Encrypt => {
                warn |= encrypt_lines(&data.try_get(0)?, lines);
            }
            Operation::Decrypt => {
                decrypt_lines(&data.try_get(0)?, lines);
            }
            Operation::Sign => {
                sign_lines(&data.try_get(0)?, lines);
            }
            Operation::Verify => {
                warn |= verify_lines(&data.try_get(0)?, lines);
            }
            Operation::EncryptSign => {
                warn |= encrypt_lines(&data.try_get(0)?, lines);
                sign_lines(&data.try_get(1)?, lines);
            }
            Operation::DecryptVerify => {
                decrypt_lines(&data.try_get(0)?, lines);
                warn |= verify_lines(&data.try_get(1)?, lines);
            }
        }
        Ok(warn)
    }

    pub fn is_ok(&self) -> bool {
        self.level == ReportLevel::Ok
    }
}

fn encrypt_lines(result: &EncryptResult, lines: &mut Vec<String>) -> bool {
    for id in &result.invalid_recipients {
        lines.push(format!("invalid recipient: {id}"));
    }
    !result.invalid_recipients.is_empty()
}

fn decrypt_lines(result: &DecryptResult, lines: &mut Vec<String>) {
    if result.recipients.is_empty() {
        lines.push("symmetric message, no recipients".to_string());
    }
    for id in &result.recipients {
        lines.push(format!("recipient: {id}"));
    }
}

fn sign_lines(result: &SignResult, lines: &mut Vec<String>) {
    for id in &result.signers {
        lines.push(format!("signed by: {id}"));
    }
}

fn verify_lines(result: &VerifyResult, lines: &mut Vec<String>) -> bool {
    if result.signatures.is_empty() {
        lines.push("no signature found".to_string());
        return true;
    }
    for sig in &result.signatures {
        let verdict = if sig.valid { "good" } else { "BAD" };
        lines.push(format!("{verdict} signature from {}", sig.key_id));
    }
    !result.all_valid()
}

impl fmt::Display for OperationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
