use std::collections::BTreeSet;

use threadlens_types::{ThreadRecord, unix_now_ms};
use tracing::{debug, warn};

use crate::DiagnosticError;
use crate::host::ThreadSource;

pub struct Enumerator<'a> {
    source: &'a dyn ThreadSource,
}

impl<'a> Enumerator<'a> {
    pub fn new(source: &'a dyn ThreadSource) -> Self {
        Self { source }
    }

    /// Every live thread, sorted by id, stamped with one shared timestamp.
    ///
    /// Duplicate ids keep their first record. Threads that exit while the host
    /// enumerates may or may not appear.
    pub fn enumerate(&self) -> Result<Vec<ThreadRecord>, DiagnosticError> {
        let mut records = self
            .source
            .threads()
            .map_err(|e| DiagnosticError::EnumerationUnavailable(e.to_string()))?;

        let enumerated_at = unix_now_ms();
        let mut seen = BTreeSet::new();
        records.retain(|record| {
            let fresh = seen.insert(record.id);
            if !fresh {
                warn!(thread = record.id, name = %record.name, "duplicate thread id dropped");
            }
            fresh
        });
        for record in &mut records {
            record.enumerated_at_unix_ms = enumerated_at;
        }
        records.sort_by_key(|record| record.id);

        debug!(threads = records.len(), "enumerated threads");
        Ok(records)
    }
}
