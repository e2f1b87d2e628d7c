//! Catalog of scheduler event numbers.

use serde::{Deserialize, Serialize};

use crate::id::CatalogId;

/// Static description of one scheduler event number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogDefinition {
    pub event_number: &'static str,
    pub name: &'static str,
    pub description: &'static str,
}

/// Persisted catalog entry, as looked up while storing a job event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: CatalogId,
    pub event_number: String,
    pub name: String,
    pub description: String,
}

impl From<&CatalogDefinition> for CatalogEntry {
    fn from(def: &CatalogDefinition) -> Self {
        Self {
            id: CatalogId::new(),
            event_number: def.event_number.to_string(),
            name: def.name.to_string(),
            description: def.description.to_string(),
        }
    }
}

macro_rules! catalog {
    ($(($number:literal, $name:literal, $description:literal)),* $(,)?) => {
        &[$(CatalogDefinition { event_number: $number, name: $name, description: $description }),*]
    };
}

/// Every event number the scheduler writes to its user log.
pub static CATALOG: &[CatalogDefinition] = catalog![
    ("000", "SUBMIT", "Job submitted"),
    ("001", "EXECUTE", "Job executing"),
    ("002", "EXECUTABLE_ERROR", "Error in executable"),
    ("003", "CHECKPOINTED", "Job was checkpointed"),
    ("004", "JOB_EVICTED", "Job evicted from machine"),
    ("005", "JOB_TERMINATED", "Job terminated"),
    ("006", "IMAGE_SIZE", "Image size of job updated"),
    ("007", "SHADOW_EXCEPTION", "Shadow threw an exception"),
    ("008", "GENERIC", "Generic log event"),
    ("009", "JOB_ABORTED", "Job aborted"),
    ("010", "JOB_SUSPENDED", "Job was suspended"),
    ("011", "JOB_UNSUSPENDED", "Job was unsuspended"),
    ("012", "JOB_HELD", "Job was held"),
    ("013", "JOB_RELEASED", "Job was released"),
    ("014", "NODE_EXECUTE", "Parallel node executed"),
    ("015", "NODE_TERMINATED", "Parallel node terminated"),
    ("016", "POST_SCRIPT_TERMINATED", "POST script terminated"),
    ("017", "GLOBUS_SUBMIT", "Job submitted to Globus"),
    ("018", "GLOBUS_SUBMIT_FAILED", "Globus submit failed"),
    ("019", "GLOBUS_RESOURCE_UP", "Globus resource up"),
    ("020", "GLOBUS_RESOURCE_DOWN", "Detected Down Globus Resource"),
    ("021", "REMOTE_ERROR", "Remote error"),
    ("022", "JOB_DISCONNECTED", "Remote system call socket lost"),
    ("023", "JOB_RECONNECTED", "Remote system call socket reestablished"),
    ("024", "JOB_RECONNECT_FAILED", "Remote system call reconnect failure"),
    ("025", "GRID_RESOURCE_UP", "Grid Resource Back Up"),
    ("026", "GRID_RESOURCE_DOWN", "Detected Down Grid Resource"),
    ("027", "GRID_SUBMIT", "Job submitted to grid resource"),
    ("028", "JOB_AD_INFORMATION", "Job ad information event triggered"),
    ("029", "JOB_STATUS_UNKNOWN", "The job's remote status is unknown"),
    ("030", "JOB_STATUS_KNOWN", "The job's remote status is known again"),
    ("031", "JOB_STAGE_IN", "Job stage in"),
    ("032", "JOB_STAGE_OUT", "Job stage out"),
    ("033", "ATTRIBUTE_UPDATE", "Job ClassAd attribute update"),
];

/// Look up the static definition of an event number.
pub fn definition(event_number: &str) -> Option<&'static CatalogDefinition> {
    CATALOG.iter().find(|d| d.event_number == event_number)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_is_contiguous_and_unique() {
        for (idx, def) in CATALOG.iter().enumerate() {
            assert_eq!(def.event_number, format!("{idx:03}"));
        }
    }

    #[test]
    fn finds_known_numbers_only() {
        assert_eq!(definition("005").map(|d| d.name), Some("JOB_TERMINATED"));
        assert!(definition("999").is_none());
        assert!(definition("").is_none());
    }

    #[test]
    fn entry_copies_definition() {
        let entry = CatalogEntry::from(definition("009").unwrap());
        assert_eq!(entry.event_number, "009");
        assert_eq!(entry.description, "Job aborted");
    }
}
