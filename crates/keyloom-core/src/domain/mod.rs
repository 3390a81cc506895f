//! Domain model (IDs, status codes, payloads, lifecycle state, reports).

pub mod crypto;
pub mod data_object;
pub mod ids;
pub mod report;
pub mod state;
pub mod status;

pub use self::crypto::{
    Buffer, DecryptResult, EncryptResult, KeyId, SignResult, Signature, VerifyResult,
};
pub use self::data_object::{DataObject, DataObjectPtr, ParamTypes, PayloadError};
pub use self::ids::{ContextId, TaskId};
pub use self::report::TaskReport;
pub use self::state::TaskState;
pub use self::status::{IntoStatus, StatusCode};
