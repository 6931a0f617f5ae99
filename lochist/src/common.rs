use lochist_base::{FormatVersion, RecordId};
use rkyv::ser::serializers::{
    AllocScratchError, AllocSerializer, CompositeSerializerError, SharedSerializeMapError,
};
use rkyv::validation::validators::DefaultValidator;
use rkyv::{check_archived_root, to_bytes, AlignedVec, Archive, CheckBytes, Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Sled(#[from] sled::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{}", .0)]
    Internal(String),

    #[error("rkyv serialize: {}", .0)]
    RkyvSerializeError(String),

    #[error("rkyv check_archived_root failed: {}", .0)]
    RkyvDeserializeError(String),

    #[error("record chain loops back to {}", .0)]
    CyclicChain(RecordId),

    #[error("record {} links to missing record {}", .0, .1)]
    DanglingLink(RecordId, RecordId),

    #[error("record stored under {} claims to be {}", .0, .1)]
    MisplacedRecord(RecordId, RecordId),

    #[error("stored format {stored} is not readable by {current}")]
    IncompatibleFormat {
        stored: FormatVersion,
        current: FormatVersion,
    },

    #[error("session stamp changed from {stored} to {current}")]
    StaleSession { stored: i64, current: i64 },

    #[error("store header is missing but records are present")]
    MissingHeader,

    #[error("config: {}", .0)]
    Config(String),
}

impl From<CompositeSerializerError<Infallible, AllocScratchError, SharedSerializeMapError>>
    for Error
{
    fn from(
        value: CompositeSerializerError<Infallible, AllocScratchError, SharedSerializeMapError>,
    ) -> Self {
        Error::RkyvSerializeError(format!("{value:?}"))
    }
}

impl From<Infallible> for Error {
    fn from(_value: Infallible) -> Self {
        Error::RkyvDeserializeError("Infallible".into())
    }
}

/// Archives a value for storage.
pub(crate) fn encode<T>(value: &T) -> Result<AlignedVec, Error>
where
    T: Serialize<AllocSerializer<256>>,
{
    Ok(to_bytes::<_, 256>(value)?)
}

/// Validates and deserializes stored bytes. Sled hands out unaligned slices, so they are copied
/// into an aligned buffer first.
pub(crate) fn decode<T>(bytes: &[u8]) -> Result<T, Error>
where
    T: Archive,
    T::Archived: for<'a> CheckBytes<DefaultValidator<'a>> + Deserialize<T, rkyv::Infallible>,
{
    let mut aligned = AlignedVec::with_capacity(bytes.len());
    aligned.extend_from_slice(bytes);
    let archived = check_archived_root::<T>(&aligned)
        .map_err(|e| Error::RkyvDeserializeError(format!("{e:?}")))?;
    Ok(archived.deserialize(&mut rkyv::Infallible)?)
}

/// Cooperative cancellation shared between a long running operation and whoever may stop it.
#[derive(Clone, Debug, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn new() -> Self {
        Cancellation::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
