//! One in-flight refresh per upstream source.

use tokio::sync::{Semaphore, SemaphorePermit};

use crate::errors::RefreshError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Source {
    Official,
    Testing,
    HospitalBeds,
    PatientDb,
}

impl Source {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Source::Official => "official",
            Source::Testing => "testing",
            Source::HospitalBeds => "hospital_beds",
            Source::PatientDb => "patient_db",
        }
    }
}

pub struct RefreshLocks {
    official: Semaphore,
    testing: Semaphore,
    hospital_beds: Semaphore,
    patient_db: Semaphore,
}

impl RefreshLocks {
    pub fn new() -> Self {
        RefreshLocks {
            official: Semaphore::new(1),
            testing: Semaphore::new(1),
            hospital_beds: Semaphore::new(1),
            patient_db: Semaphore::new(1),
        }
    }

    /// Takes the refresh permit for `source` without waiting. A refresh that
    /// is already running for the same source yields `ConcurrentRefresh`.
    pub fn try_permit(&self, source: Source) -> Result<SemaphorePermit<'_>, RefreshError> {
        let lock = match source {
            Source::Official => &self.official,
            Source::Testing => &self.testing,
            Source::HospitalBeds => &self.hospital_beds,
            Source::PatientDb => &self.patient_db,
        };
        lock.try_acquire()
            .map_err(|_| RefreshError::ConcurrentRefresh(source.as_str()))
    }
}

impl Default for RefreshLocks {
    fn default() -> Self {
        Self::new()
    }
}
