//! Pipe delimited rendering of batches.
//!
//! A row is the sink's fixed columns followed by one field per name in the partition's header
//! set. Attributes a payload does not carry become empty fields so later columns never shift.
//! Fields containing the delimiter, a quote or a line break are quoted, with quotes doubled. So
//! are fields starting with a space or a tab, which readers would otherwise trim.

use bytes::Bytes;

use crate::header::HeaderSet;
use crate::payload::Payload;
use crate::sink::Batch;

pub const DELIMITER: char = '|';
pub const LINE_TERMINATOR: &str = "\n";
const QUOTE: char = '"';

/// Fixed columns a sink puts in front of the attribute columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowLayout {
    /// `source`
    Source,
    /// `id`, `source`, `server_timestamp`, `client_timestamp`
    Full,
}

impl RowLayout {
    pub fn fixed_columns(&self) -> &'static [&'static str] {
        match self {
            RowLayout::Source => &["source"],
            RowLayout::Full => &["id", "source", "server_timestamp", "client_timestamp"],
        }
    }

    /// The header line, terminated.
    pub fn header_line(&self, headers: &HeaderSet) -> String {
        let fields = self
            .fixed_columns()
            .iter()
            .copied()
            .chain(headers.iter())
            .map(escape_field);
        join_line(fields)
    }

    /// One payload rendered against the header set, terminated.
    pub fn row_line(&self, payload: &Payload, headers: &HeaderSet) -> String {
        let fixed: Vec<String> = match self {
            RowLayout::Source => vec![payload.source.clone()],
            RowLayout::Full => vec![
                payload.id.clone(),
                payload.source.clone(),
                payload.server_timestamp.to_string(),
                payload.client_timestamp.to_string(),
            ],
        };

        let attributes = headers.iter().map(|name| {
            payload
                .attributes
                .get(name)
                .map(|value| value.to_string())
                .unwrap_or_default()
        });

        join_line(
            fixed
                .into_iter()
                .chain(attributes)
                .map(|field| escape_field(&field)),
        )
    }

    /// Header followed by every row of the batch.
    pub fn encode_batch(&self, batch: &Batch<'_>) -> Bytes {
        let mut out = self.header_line(batch.headers);
        for payload in batch.rows {
            out.push_str(&self.row_line(payload, batch.headers));
        }
        Bytes::from(out)
    }
}

fn join_line(fields: impl Iterator<Item = String>) -> String {
    let mut line = fields.collect::<Vec<_>>().join(&DELIMITER.to_string());
    line.push_str(LINE_TERMINATOR);
    line
}

fn escape_field(field: &str) -> String {
    let needs_quoting = field.contains(DELIMITER)
        || field.contains(QUOTE)
        || field.contains('\n')
        || field.contains('\r')
        || field.starts_with([' ', '\t']);

    if needs_quoting {
        let escaped = field.replace(QUOTE, "\"\"");
        format!("{QUOTE}{escaped}{QUOTE}")
    } else {
        field.to_string()
    }
}
