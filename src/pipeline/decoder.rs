use csv_async::{AsyncReader, AsyncReaderBuilder, StringRecord};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tracing::{debug, warn};

/// What to do with a row whose field count differs from the header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RowPolicy {
    /// Fail the whole decode at the first mismatched row
    #[default]
    Reject,
    /// Drop the row, log a warning and keep going
    Skip,
}

impl FromStr for RowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(RowPolicy::Reject),
            "skip" => Ok(RowPolicy::Skip),
            other => Err(format!("unknown row policy '{}', expected 'reject' or 'skip'", other)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("input has no header line")]
    MissingHeader,

    #[error("column '{0}' appears more than once in the header")]
    DuplicateColumn(String),

    #[error("line {line}: expected {expected} fields, found {found}")]
    FieldCount {
        line: u64,
        expected: usize,
        found: usize,
    },

    #[error(transparent)]
    Csv(#[from] csv_async::Error),
}

/// One decoded row: cell values keyed by the table's header columns
///
/// All rows of a table share the same column list; the JSON form is an
/// object whose keys follow header order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRow {
    columns: Arc<[String]>,
    values: Vec<String>,
}

impl TableRow {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|idx| self.values.get(idx))
            .map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().map(String::as_str))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Serialize for TableRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (column, value) in self.iter() {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

/// Converts delimited text with a header line into [`TableRow`]s
#[derive(Debug, Clone, Copy)]
pub struct TableDecoder {
    delimiter: u8,
    policy: RowPolicy,
}

impl Default for TableDecoder {
    fn default() -> Self {
        Self::new(b',', RowPolicy::default())
    }
}

impl TableDecoder {
    pub fn new(delimiter: u8, policy: RowPolicy) -> Self {
        Self { delimiter, policy }
    }

    /// Read the header line and return a lazy cursor over the remaining rows.
    pub async fn open<R>(&self, reader: R) -> Result<TableRows<R>, DecodeError>
    where
        R: AsyncRead + Unpin + Send,
    {
        // Field counts are checked per row against the header, so the
        // reader itself must not reject ragged rows.
        let mut reader = AsyncReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(true)
            .flexible(true)
            .create_reader(reader);

        let headers = reader.headers().await?;
        if headers.is_empty() {
            return Err(DecodeError::MissingHeader);
        }

        let mut seen = HashSet::new();
        for column in headers.iter() {
            if !seen.insert(column) {
                return Err(DecodeError::DuplicateColumn(column.to_string()));
            }
        }
        let columns: Arc<[String]> = headers.iter().map(str::to_string).collect();
        debug!("Decoder: header has {} columns", columns.len());

        Ok(TableRows {
            reader,
            columns,
            policy: self.policy,
            record: StringRecord::new(),
            skipped: 0,
            finished: false,
        })
    }

    /// Decode a whole stream into memory.
    pub async fn decode<R>(&self, reader: R) -> Result<Vec<TableRow>, DecodeError>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.open(reader).await?.collect_rows().await
    }
}

/// Forward-only cursor over the rows of one table
///
/// Yields `None` forever once the input is exhausted or an error was returned.
pub struct TableRows<R> {
    reader: AsyncReader<R>,
    columns: Arc<[String]>,
    policy: RowPolicy,
    record: StringRecord,
    skipped: usize,
    finished: bool,
}

impl<R> TableRows<R>
where
    R: AsyncRead + Unpin + Send,
{
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Rows dropped so far under [`RowPolicy::Skip`].
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub async fn next_row(&mut self) -> Option<Result<TableRow, DecodeError>> {
        while !self.finished {
            match self.reader.read_record(&mut self.record).await {
                Ok(true) => {}
                Ok(false) => {
                    self.finished = true;
                    return None;
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(DecodeError::Csv(e)));
                }
            }

            if self.record.len() != self.columns.len() {
                let line = self.record.position().map(|p| p.line()).unwrap_or_default();
                match self.policy {
                    RowPolicy::Reject => {
                        self.finished = true;
                        return Some(Err(DecodeError::FieldCount {
                            line,
                            expected: self.columns.len(),
                            found: self.record.len(),
                        }));
                    }
                    RowPolicy::Skip => {
                        warn!(
                            "Decoder: skipping line {}: expected {} fields, found {}",
                            line,
                            self.columns.len(),
                            self.record.len()
                        );
                        self.skipped += 1;
                        continue;
                    }
                }
            }

            return Some(Ok(TableRow {
                columns: Arc::clone(&self.columns),
                values: self.record.iter().map(str::to_string).collect(),
            }));
        }
        None
    }

    pub async fn collect_rows(mut self) -> Result<Vec<TableRow>, DecodeError> {
        let mut rows = Vec::new();
        while let Some(row) = self.next_row().await {
            rows.push(row?);
        }
        if self.skipped > 0 {
            warn!("Decoder: {} malformed rows skipped", self.skipped);
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(columns: &[String], rows: &[TableRow], delimiter: char) -> String {
        let sep = delimiter.to_string();
        let mut out = columns.join(&sep);
        for row in rows {
            out.push('\n');
            out.push_str(&row.iter().map(|(_, v)| v).collect::<Vec<_>>().join(&sep));
        }
        out
    }

    #[tokio::test]
    async fn decodes_rows_in_source_order() {
        let input = b"name,score\nAlice,10\nBob,20\nCarol,30".as_slice();
        let rows = TableDecoder::default().decode(input).await.unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].get("name"), Some("Alice"));
        assert_eq!(rows[1].get("score"), Some("20"));
        assert_eq!(rows[2].get("name"), Some("Carol"));
        assert_eq!(rows[2].columns(), ["name".to_string(), "score".to_string()]);
    }

    #[tokio::test]
    async fn header_only_input_yields_no_rows() {
        let rows = TableDecoder::default().decode(b"a,b,c\n".as_slice()).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn empty_input_has_no_header() {
        let err = TableDecoder::default().decode(b"".as_slice()).await.unwrap_err();
        assert!(matches!(err, DecodeError::MissingHeader));
    }

    #[tokio::test]
    async fn duplicate_columns_are_rejected() {
        let err = TableDecoder::default()
            .decode(b"id,id\n1,2\n".as_slice())
            .await
            .unwrap_err();
        assert!(matches!(err, DecodeError::DuplicateColumn(c) if c == "id"));
    }

    #[tokio::test]
    async fn reject_policy_fails_on_ragged_row() {
        let input = b"a,b\n1,2\n3\n4,5\n".as_slice();
        let err = TableDecoder::new(b',', RowPolicy::Reject)
            .decode(input)
            .await
            .unwrap_err();
        match err {
            DecodeError::FieldCount {
                line,
                expected,
                found,
            } => {
                assert_eq!(line, 3);
                assert_eq!(expected, 2);
                assert_eq!(found, 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn skip_policy_drops_ragged_rows() {
        let input = b"a,b\n1,2\n3\n4,5,6\n7,8\n".as_slice();
        let mut rows = TableDecoder::new(b',', RowPolicy::Skip).open(input).await.unwrap();

        let mut decoded = Vec::new();
        while let Some(row) = rows.next_row().await {
            decoded.push(row.unwrap());
        }
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[1].get("a"), Some("7"));
        assert_eq!(rows.skipped(), 2);
    }

    #[tokio::test]
    async fn cursor_stays_finished_after_error() {
        let input = b"a,b\n1\n2,3\n".as_slice();
        let mut rows = TableDecoder::default().open(input).await.unwrap();
        assert!(matches!(rows.next_row().await, Some(Err(_))));
        assert!(rows.next_row().await.is_none());
    }

    #[tokio::test]
    async fn custom_delimiter_and_quoted_fields() {
        let input = b"city;note\nOslo;\"cold; dark\"\n".as_slice();
        let rows = TableDecoder::new(b';', RowPolicy::Reject).decode(input).await.unwrap();
        assert_eq!(rows[0].get("note"), Some("cold; dark"));
    }

    #[tokio::test]
    async fn reencoding_preserves_row_count_and_columns() {
        let tables: [&[u8]; 3] = [
            b"x\n1\n2\n",
            b"name,score,team\nAlice,10,red\nBob,,blue\n",
            b"k|v\na|1\nb|2\nc|3\nd|4\n",
        ];
        for table in tables {
            let delimiter = if table.contains(&b'|') { b'|' } else { b',' };
            let decoder = TableDecoder::new(delimiter, RowPolicy::Reject);
            let rows = decoder.decode(table).await.unwrap();
            let columns = rows[0].columns().to_vec();

            let reencoded = encode(&columns, &rows, delimiter as char);
            let again = decoder.decode(reencoded.as_bytes()).await.unwrap();

            assert_eq!(again.len(), rows.len());
            assert_eq!(again[0].columns(), columns.as_slice());
        }
    }

    #[tokio::test]
    async fn serializes_as_ordered_object() {
        let rows = TableDecoder::default()
            .decode(b"zeta,alpha\n1,2\n".as_slice())
            .await
            .unwrap();
        let json = serde_json::to_string(&rows).unwrap();
        assert_eq!(json, r#"[{"zeta":"1","alpha":"2"}]"#);
    }

    #[test]
    fn row_policy_parses_case_insensitively() {
        assert_eq!("Skip".parse::<RowPolicy>().unwrap(), RowPolicy::Skip);
        assert_eq!(" reject ".parse::<RowPolicy>().unwrap(), RowPolicy::Reject);
        assert!("ignore".parse::<RowPolicy>().is_err());
    }
}
