use std::fmt;

/// Per-file counters kept by the row filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterStats {
    pub accepted: usize,
    pub excluded: usize,
    pub missing_timestamp: usize,
    pub corrected_timestamps: usize,
    pub parser_errors: usize,
    pub discarded_after_error: usize,
}

impl fmt::Display for FilterStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} accepted, {} excluded, {} without timestamp, {} corrected, {} discarded after parser error",
            self.accepted,
            self.excluded,
            self.missing_timestamp,
            self.corrected_timestamps,
            self.discarded_after_error
        )
    }
}

/// Outcome counters for one scheduler cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub imported: usize,
    pub already_processed: usize,
    pub storage_failures: usize,
    pub generic_failures: usize,
    /// Tasks dropped without a processing attempt (failed preparation or
    /// circuit breaker).
    pub discarded: usize,
    pub archived: usize,
    pub completed: bool,
    pub circuit_open: bool,
    pub preparation_failed: bool,
}

impl BatchReport {
    pub fn attempted(&self) -> usize {
        self.imported + self.already_processed + self.storage_failures + self.generic_failures
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} imported, {} already processed, {} storage failures, {} other failures, {} discarded",
            self.imported,
            self.already_processed,
            self.storage_failures,
            self.generic_failures,
            self.discarded
        )
    }
}
