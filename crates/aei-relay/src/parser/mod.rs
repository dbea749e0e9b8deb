//! AEI train file parser
//!
//! Wayside readers write one file per passing train. The file is a stream of
//! delimited segments, one per line:
//!
//! ```text
//! AEM*IHTRR*IHT0001*210915*0646*0700*060*Y*411*0022*...   train header
//! RRE*001*D*UP  *0000003237*A* *S*G*A*99*99*002*05*01     railcar (repeated)
//! EOT*026*E*UPRQ*0000067046*99*00*K                       end-of-train device
//! EOC*0000001521                                          trailer
//! ```
//!
//! The delimiter is whatever character follows the three-letter segment id
//! (`*` in every file seen so far). [`parse`] turns the whole file into one
//! [`Record`] per railcar/end-of-train row, each carrying the train header.
//! It is pure: the same bytes always give the same records, and any
//! deviation from the layout is a [`MalformedInputError`] with no partial
//! output.

pub mod filename;
pub mod segments;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use filename::FileName;
pub use segments::{EndOfTrain, Railcar, TrainHeader, Trailer};

/// The byte stream does not follow the AEI segment layout
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedInputError {
    #[error("non-ASCII byte 0x{byte:02x} at offset {offset}")]
    NonAscii { offset: usize, byte: u8 },

    #[error("line {line}: {segment} segment expects {expected} fields, found {found}")]
    FieldCount {
        line: usize,
        segment: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("line {line}: invalid {field} value {value:?}")]
    InvalidField {
        line: usize,
        field: &'static str,
        value: String,
    },

    #[error("line {line}: invalid segment delimiter {delimiter:?}")]
    InvalidDelimiter { line: usize, delimiter: char },

    #[error("line {line}: unknown segment {segment:?}")]
    UnknownSegment { line: usize, segment: String },

    #[error("line {line}: expected AEM train header before body rows")]
    MissingHeader { line: usize },

    #[error("line {line}: second AEM train header")]
    DuplicateHeader { line: usize },

    #[error("file ends without an EOC trailer")]
    MissingTrailer,

    #[error("line {line}: content after EOC trailer")]
    TrailingContent { line: usize },

    #[error("line {line}: truncated EOC trailer")]
    TruncatedTrailer { line: usize },
}

/// Body row kinds that are forwarded downstream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "segment", rename_all = "snake_case")]
pub enum Segment {
    Railcar(Railcar),
    EndOfTrain(EndOfTrain),
}

/// One forwarded unit: a body row plus the train it belongs to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// 0-based position among the file's body rows
    pub index: usize,
    pub train: TrainHeader,
    #[serde(flatten)]
    pub segment: Segment,
}

impl Record {
    /// JSON body sent to the downstream API
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// A fully parsed file
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFile {
    /// `None` for empty and header-only files with an opaque header
    pub train: Option<TrainHeader>,
    pub records: Vec<Record>,
}

impl ParsedFile {
    pub fn site_id(&self) -> Option<&str> {
        self.train.as_ref().map(|t| t.site_id.as_str())
    }
}

/// Parse raw file bytes into forwarded records
pub fn parse(raw: &[u8]) -> Result<Vec<Record>, MalformedInputError> {
    parse_file(raw).map(|file| file.records)
}

/// Parse raw file bytes, keeping the train header alongside the records
pub fn parse_file(raw: &[u8]) -> Result<ParsedFile, MalformedInputError> {
    if let Some(offset) = raw.iter().position(|b| !b.is_ascii()) {
        return Err(MalformedInputError::NonAscii {
            offset,
            byte: raw[offset],
        });
    }
    let text = std::str::from_utf8(raw).map_err(|e| MalformedInputError::NonAscii {
        offset: e.valid_up_to(),
        byte: raw.get(e.valid_up_to()).copied().unwrap_or_default(),
    })?;

    let lines: Vec<(usize, &str)> = text
        .split('\n')
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty())
        .collect();

    let Some((&(header_line, header), body)) = lines.split_first() else {
        return Ok(ParsedFile {
            train: None,
            records: Vec::new(),
        });
    };

    let train = if header.starts_with("AEM") {
        let fields = split_segment(header, header_line)?;
        Some(TrainHeader::parse(&fields, header_line)?)
    } else if body.is_empty() {
        // A lone line that is not a train header carries nothing to forward
        None
    } else {
        return Err(MalformedInputError::MissingHeader { line: header_line });
    };

    let Some(train) = train else {
        return Ok(ParsedFile {
            train: None,
            records: Vec::new(),
        });
    };
    if body.is_empty() {
        return Ok(ParsedFile {
            train: Some(train),
            records: Vec::new(),
        });
    }

    let mut records = Vec::new();
    let mut trailer = None;

    for &(line_no, line) in body {
        if trailer.is_some() {
            return Err(MalformedInputError::TrailingContent { line: line_no });
        }

        let fields = split_segment(line, line_no)?;
        let segment = match fields.first().copied().unwrap_or_default() {
            "RRE" => Segment::Railcar(Railcar::parse(&fields, line_no)?),
            "EOT" => Segment::EndOfTrain(EndOfTrain::parse(&fields, line_no)?),
            "EOC" => {
                trailer = Some(Trailer::parse(&fields, line_no)?);
                continue;
            },
            "AEM" => return Err(MalformedInputError::DuplicateHeader { line: line_no }),
            other => {
                return Err(MalformedInputError::UnknownSegment {
                    line: line_no,
                    segment: other.to_string(),
                })
            },
        };

        records.push(Record {
            index: records.len(),
            train: train.clone(),
            segment,
        });
    }

    if trailer.is_none() {
        return Err(MalformedInputError::MissingTrailer);
    }

    Ok(ParsedFile {
        train: Some(train),
        records,
    })
}

/// Split a trimmed line on the delimiter that follows the segment id.
///
/// Lines shorter than a segment id plus delimiter come back as a single field
/// so the segment-specific field count check reports them.
fn split_segment(line: &str, line_no: usize) -> Result<Vec<&str>, MalformedInputError> {
    let Some(delimiter) = line.chars().nth(3) else {
        return Ok(vec![line]);
    };
    if delimiter.is_ascii_alphanumeric() || delimiter.is_whitespace() {
        return Err(MalformedInputError::InvalidDelimiter {
            line: line_no,
            delimiter,
        });
    }
    Ok(line.split(delimiter).collect())
}
