//! DataObject - runnable と callback の間で共有される結果チャネル
//!
//! runnable が型付きの値を順番に push し、callback が `check` で形を確認してから
//! 位置と型を指定して取り出します。形が一致しないのは呼び出し側の契約違反です。

use std::any::{Any, TypeId, type_name};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use thiserror::Error;

/// Shared handle passed to both the runnable and the callback.
pub type DataObjectPtr = Arc<DataObject>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("payload slot {index} requested but payload holds {len} values")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("payload slot {index} holds {found}, not {expected}")]
    TypeMismatch {
        index: usize,
        expected: &'static str,
        found: &'static str,
    },
}

struct Slot {
    type_id: TypeId,
    type_name: &'static str,
    value: Arc<dyn Any + Send + Sync>,
}

/// Heterogeneous, ordered container of typed sub-results.
///
/// Only the runnable is expected to write. The lock exists because Rust
/// requires the container to be `Sync` to cross threads at all; the
/// runnable-to-callback hand-off itself is ordered by the task.
#[derive(Default)]
pub struct DataObject {
    slots: RwLock<Vec<Slot>>,
}

impl DataObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_ptr() -> DataObjectPtr {
        Arc::new(Self::new())
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Slot>> {
        self.slots.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a value as the next positional slot.
    pub fn push<T: Any + Send + Sync>(&self, value: T) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots.push(Slot {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            value: Arc::new(value),
        });
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn clear(&self) {
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn type_names(&self) -> Vec<&'static str> {
        self.read().iter().map(|slot| slot.type_name).collect()
    }

    /// Does the payload hold exactly `P`'s types, in order?
    ///
    /// ```ignore
    /// if data.check::<(DecryptResult, Buffer)>() { ... }
    /// ```
    pub fn check<P: ParamTypes>(&self) -> bool {
        let expected = P::type_ids();
        let slots = self.read();
        slots.len() == expected.len()
            && slots
                .iter()
                .zip(expected.iter())
                .all(|(slot, id)| slot.type_id == *id)
    }

    pub fn try_get<T: Any + Clone>(&self, index: usize) -> Result<T, PayloadError> {
        let slots = self.read();
        let slot = slots.get(index).ok_or(PayloadError::IndexOutOfRange {
            index,
            len: slots.len(),
        })?;
        slot.value
            .downcast_ref::<T>()
            .cloned()
            .ok_or(PayloadError::TypeMismatch {
                index,
                expected: type_name::<T>(),
                found: slot.type_name,
            })
    }

    /// Positional, type-checked extraction.
    ///
    /// # Panics
    /// Panics when slot `index` is missing or holds another type. Producer and
    /// consumer disagreeing on the payload shape is a programming error.
    pub fn get<T: Any + Clone>(&self, index: usize) -> T {
        match self.try_get(index) {
            Ok(value) => value,
            Err(err) => panic!("payload shape mismatch: {err}"),
        }
    }
}

impl std::fmt::Debug for DataObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataObject")
            .field("types", &self.type_names())
            .finish()
    }
}

/// Ordered type list used by [`DataObject::check`].
pub trait ParamTypes {
    fn type_ids() -> Vec<TypeId>;
}

impl ParamTypes for () {
    fn type_ids() -> Vec<TypeId> {
        Vec::new()
    }
}

macro_rules! impl_param_types {
    ($($name:ident),+) => {
        impl<$($name: Any),+> ParamTypes for ($($name,)+) {
            fn type_ids() -> Vec<TypeId> {
                vec![$(TypeId::of::<$name>()),+]
            }
        }
    };
}

impl_param_types!(A);
impl_param_types!(A, B);
impl_param_types!(A, B, C);
impl_param_types!(A, B, C, D);
impl_param_types!(A, B, C, D, E);
impl_param_types!(A, B, C, D, E, F);

/// Build a [`DataObjectPtr`] holding the given values in order.
#[macro_export]
macro_rules! data_object {
    () => {
        $crate::domain::DataObject::new_ptr()
    };
    ($($value:expr),+ $(,)?) => {{
        let object = $crate::domain::DataObject::new();
        $(object.push($value);)+
        ::std::sync::Arc::new(object)
    }};
}
