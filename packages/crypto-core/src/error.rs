#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
  #[error("invalid argument")]
  InvalidArgument,
  #[error("not supported")]
  NotSupported,
  #[error("not permitted")]
  NotPermitted,
  #[error("bad state")]
  BadState,
  #[error("buffer too small")]
  BufferTooSmall,
  #[error("already exists")]
  AlreadyExists,
  #[error("not found")]
  NotFound,
  #[error("already in use")]
  AlreadyInUse,
  #[error("insufficient memory")]
  InsufficientMemory,
  #[error("insufficient storage")]
  InsufficientStorage,
  #[error("insufficient data")]
  InsufficientData,
  #[error("invalid signature")]
  InvalidSignature,
  #[error("corruption detected")]
  CorruptionDetected,
  #[error("generic error")]
  GenericError,
}

pub type CoreResult<T> = Result<T, Error>;
