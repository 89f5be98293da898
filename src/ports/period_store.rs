//! Versioned period-file storage port.

use crate::domain::error::QuantwalkError;
use crate::domain::period::PeriodFrame;
use crate::domain::version::VersionMetadata;
use chrono::NaiveDate;

pub trait PeriodStore {
    fn list_strategies(&self) -> Result<Vec<String>, QuantwalkError>;

    fn list_versions(&self, strategy: &str) -> Result<Vec<String>, QuantwalkError>;

    /// Allocate the next version directory for `strategy` and return its name.
    fn create_version(&self, strategy: &str) -> Result<String, QuantwalkError>;

    fn read_metadata(&self, strategy: &str, version: &str)
    -> Result<VersionMetadata, QuantwalkError>;

    fn write_metadata(
        &self,
        strategy: &str,
        version: &str,
        metadata: &VersionMetadata,
    ) -> Result<(), QuantwalkError>;

    /// Period names (test start dates) present in the version, ascending.
    fn list_periods(&self, strategy: &str, version: &str) -> Result<Vec<NaiveDate>, QuantwalkError>;

    fn read_period(
        &self,
        strategy: &str,
        version: &str,
        period: NaiveDate,
    ) -> Result<PeriodFrame, QuantwalkError>;

    /// Replaces any existing file for `period`; never leaves a partial file.
    fn write_period(
        &self,
        strategy: &str,
        version: &str,
        period: NaiveDate,
        frame: &PeriodFrame,
    ) -> Result<(), QuantwalkError>;

    fn remove_period(
        &self,
        strategy: &str,
        version: &str,
        period: NaiveDate,
    ) -> Result<(), QuantwalkError>;
}
