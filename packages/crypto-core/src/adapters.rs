use crate::error::{CoreResult, Error};
use crate::types::KeyId;
use getrandom::getrandom;
use std::fmt::Debug;

/// Persistence collaborator: stores opaque key records keyed by identifier.
/// Only consulted for non-volatile keys.
pub trait StorageAdapter {
    type Error: Debug;
    fn save(&self, id: KeyId, record: &[u8]) -> Result<(), Self::Error>;
    fn load(&self, id: KeyId) -> Result<Option<Vec<u8>>, Self::Error>;
    fn delete(&self, id: KeyId) -> Result<(), Self::Error>;
}

/// Random collaborator: fills a buffer with random bytes.
pub trait EntropyAdapter {
    fn fill(&self, buf: &mut [u8]) -> CoreResult<()>;
}

/// Default entropy adapter backed by the operating system.
#[derive(Default)]
pub struct OsEntropy;

impl EntropyAdapter for OsEntropy {
    fn fill(&self, buf: &mut [u8]) -> CoreResult<()> {
        getrandom(buf).map_err(|_| Error::GenericError)
    }
}
