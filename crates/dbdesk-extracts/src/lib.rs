//! CSV extract parsers for the external clients/tickets exports.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use csv::StringRecord;
use dbdesk_core::{RawClientRecord, RawTicketRecord};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

pub const CLIENT_ID_COLUMN: &str = "CLIENTI Id";
pub const CLIENT_NAME_COLUMNS: &[&str] = &["Last Name", "Ragione Sociale"];
pub const CLIENT_CHAIN_COLUMN: &str = "Nome Catena";

pub const TICKET_ID_COLUMN: &str = "TICKET Id";
pub const TICKET_NUMBER_COLUMN: &str = "TICKET Number";
pub const TICKET_CLIENT_ID_COLUMN: &str = "Nome CLIENTI Id";
pub const TICKET_CLIENT_NAME_COLUMN: &str = "Nome CLIENTI";
pub const TICKET_STATUS_COLUMNS: &[&str] = &["Status", "Stato"];
pub const TICKET_PRIORITY_COLUMNS: &[&str] = &["Priority", "Priorità"];
pub const TICKET_SUBJECT_COLUMN: &str = "Subject";
pub const TICKET_DESCRIPTION_COLUMN: &str = "Description";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractKind {
    Clients,
    Tickets,
}

impl ExtractKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Clients => "clients",
            Self::Tickets => "tickets",
        }
    }
}

impl fmt::Display for ExtractKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structural failures. Any of these makes the extract unusable as a whole.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("reading {kind} extract {path}")]
    Io {
        kind: ExtractKind,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed {kind} extract at line {line}")]
    Csv {
        kind: ExtractKind,
        line: u64,
        #[source]
        source: csv::Error,
    },
}

pub trait ExtractParser {
    type Record;

    fn kind(&self) -> ExtractKind;
    fn parse_record(&self, columns: &Columns, row: usize, record: &StringRecord) -> Self::Record;

    /// Parse a whole extract: header row first, empty lines skipped, leading BOM ignored.
    fn parse(&self, bytes: &[u8]) -> Result<Vec<Self::Record>, ExtractError> {
        let kind = self.kind();
        let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(bytes);

        let headers = reader.headers().map_err(|source| ExtractError::Csv {
            kind,
            line: 1,
            source,
        })?;
        let columns = Columns::from_headers(headers);

        let mut out = Vec::new();
        for (idx, result) in reader.records().enumerate() {
            let record = result.map_err(|source| ExtractError::Csv {
                kind,
                line: source
                    .position()
                    .map(|p| p.line())
                    .unwrap_or(idx as u64 + 2),
                source,
            })?;
            out.push(self.parse_record(&columns, idx + 1, &record));
        }
        debug!(%kind, rows = out.len(), "parsed extract");
        Ok(out)
    }
}

/// Header name → column position lookup.
#[derive(Debug, Clone)]
pub struct Columns {
    headers: Vec<String>,
}

impl Columns {
    pub fn from_headers(headers: &StringRecord) -> Self {
        Self {
            headers: headers.iter().map(|h| h.trim().to_string()).collect(),
        }
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Value of `name` in `record`, with empty cells and absent columns as `None`.
    pub fn get(&self, record: &StringRecord, name: &str) -> Option<String> {
        self.position(name)
            .and_then(|idx| record.get(idx))
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }

    /// First non-empty value among alias columns, in the order given.
    pub fn first_of(&self, record: &StringRecord, names: &[&str]) -> Option<String> {
        names.iter().find_map(|name| self.get(record, name))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ClientsExtract;

impl ExtractParser for ClientsExtract {
    type Record = RawClientRecord;

    fn kind(&self) -> ExtractKind {
        ExtractKind::Clients
    }

    fn parse_record(&self, columns: &Columns, row: usize, record: &StringRecord) -> RawClientRecord {
        RawClientRecord {
            row,
            external_id: columns.get(record, CLIENT_ID_COLUMN),
            name: columns.first_of(record, CLIENT_NAME_COLUMNS),
            chain: columns.get(record, CLIENT_CHAIN_COLUMN),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TicketsExtract;

impl ExtractParser for TicketsExtract {
    type Record = RawTicketRecord;

    fn kind(&self) -> ExtractKind {
        ExtractKind::Tickets
    }

    fn parse_record(&self, columns: &Columns, row: usize, record: &StringRecord) -> RawTicketRecord {
        RawTicketRecord {
            row,
            external_id: columns.get(record, TICKET_ID_COLUMN),
            ticket_number: columns.get(record, TICKET_NUMBER_COLUMN),
            client_ref_id: columns.get(record, TICKET_CLIENT_ID_COLUMN),
            client_name: columns.get(record, TICKET_CLIENT_NAME_COLUMN),
            status: columns.first_of(record, TICKET_STATUS_COLUMNS),
            priority: columns.first_of(record, TICKET_PRIORITY_COLUMNS),
            subject: columns.get(record, TICKET_SUBJECT_COLUMN),
            description: columns.get(record, TICKET_DESCRIPTION_COLUMN),
        }
    }
}

/// Parsed extract plus the raw bytes it came from.
#[derive(Debug, Clone)]
pub struct LoadedExtract<T> {
    pub kind: ExtractKind,
    pub path: PathBuf,
    pub bytes: Vec<u8>,
    pub records: Vec<T>,
}

pub fn load_extract<P: ExtractParser>(
    parser: &P,
    path: impl AsRef<Path>,
) -> Result<LoadedExtract<P::Record>, ExtractError> {
    let path = path.as_ref();
    let kind = parser.kind();
    let bytes = fs::read(path).map_err(|source| ExtractError::Io {
        kind,
        path: path.to_path_buf(),
        source,
    })?;
    let records = parser.parse(&bytes)?;
    Ok(LoadedExtract {
        kind,
        path: path.to_path_buf(),
        bytes,
        records,
    })
}

pub fn load_clients(path: impl AsRef<Path>) -> Result<LoadedExtract<RawClientRecord>, ExtractError> {
    load_extract(&ClientsExtract, path)
}

pub fn load_tickets(path: impl AsRef<Path>) -> Result<LoadedExtract<RawTicketRecord>, ExtractError> {
    load_extract(&TicketsExtract, path)
}
