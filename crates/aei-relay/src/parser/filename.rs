//! Reader file naming convention
//!
//! Readers name uploads `YYYYMMDDHHmm-FileNo-SiteID_TrainSequenceNo.ext`,
//! e.g. `202109150646-0001-IHT0001_0022.csv`. Names are informational only:
//! a file whose name does not follow the convention is still processed.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileName {
    pub site_id: String,
    pub train_sequence_number: String,
}

impl FileName {
    /// Extract the site id and train sequence number, or `None` when the
    /// name does not follow the convention.
    pub fn parse(filename: &str) -> Option<Self> {
        let base = filename.rsplit('/').next().unwrap_or(filename);
        let stem = base.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(base);
        let (prefix, sequence) = stem.rsplit_once('_')?;

        if sequence.is_empty() || !sequence.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        let site_id = prefix.rsplit('-').next().unwrap_or(prefix).trim();
        if site_id.is_empty() {
            return None;
        }

        Some(Self {
            site_id: site_id.to_string(),
            train_sequence_number: sequence.to_string(),
        })
    }
}
