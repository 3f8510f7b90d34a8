use std::str::FromStr;
use std::sync::Arc;

use postgres_types::Oid;

use crate::api::results::{FieldInfo, Tag};
use crate::error::{ErrorInfo, GaussWireError, GaussWireResult};
use crate::messages::BackendMessage;
use crate::messages::data::{DataRow, RowDescription};
use crate::messages::response::CommandComplete;

use super::ReadyState;
use super::hook::ClientLogicHook;
use super::result::Row;

/// Commands whose tag carries a row count.
const COMMANDS_WITH_ROWS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "SELECT", "MOVE", "FETCH", "COPY", "MERGE",
];

impl FromStr for Tag {
    type Err = GaussWireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let segs = s.split_whitespace().collect::<Vec<&str>>();
        let Some(command) = segs.first() else {
            return Ok(Tag::new(""));
        };
        if !COMMANDS_WITH_ROWS.contains(command) {
            return Ok(Tag::new(s));
        }

        let parse_rows = |v: &str| {
            v.parse::<usize>()
                .map_err(|_| GaussWireError::InvalidTag(s.to_owned()))
        };
        match segs.len() {
            1 => Ok(Tag::new(command)),
            2 => Ok(Tag::new(command).with_rows(parse_rows(segs[1])?)),
            // INSERT <oid> <rows>
            3 => {
                let oid = segs[1]
                    .parse::<Oid>()
                    .map_err(|_| GaussWireError::InvalidTag(s.to_owned()))?;
                Ok(Tag::new(command)
                    .with_rows(parse_rows(segs[2])?)
                    .with_oid(oid))
            }
            _ => Err(GaussWireError::InvalidTag(s.to_owned())),
        }
    }
}

/// Outcome of a statement that returned no rows to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecResult {
    tag: Option<Tag>,
    rows_affected: u64,
}

impl ExecResult {
    pub(crate) fn new(tag: Option<Tag>, rows_affected: u64) -> ExecResult {
        ExecResult { tag, rows_affected }
    }

    pub(crate) fn from_tag(tag: Tag) -> ExecResult {
        let rows = tag.rows().unwrap_or(0) as u64;
        ExecResult::new(Some(tag), rows)
    }

    /// Tag of the last command, `None` for an empty query.
    pub fn tag(&self) -> Option<&Tag> {
        self.tag.as_ref()
    }

    /// Rows affected, summed over every execution of a batch.
    pub fn rows_affected(&self) -> u64 {
        self.rows_affected
    }
}

/// One result of a simple query, a query string may contain several
/// statements.
#[derive(Debug)]
pub enum Response {
    EmptyQuery,
    Query {
        tag: Tag,
        fields: Arc<Vec<FieldInfo>>,
        rows: Vec<Row>,
    },
    Execution(Tag),
}

impl Response {
    pub fn tag(&self) -> Option<&Tag> {
        match self {
            Response::EmptyQuery => None,
            Response::Query { tag, .. } => Some(tag),
            Response::Execution(tag) => Some(tag),
        }
    }

    pub fn into_rows(self) -> Vec<Row> {
        match self {
            Response::Query { rows, .. } => rows,
            _ => vec![],
        }
    }
}

struct QueryResponseBuffer {
    fields: Arc<Vec<FieldInfo>>,
    rows: Vec<Row>,
}

/// Collects the messages of one simple query cycle into [`Response`]s.
///
/// A server error does not end the cycle, it is kept and reported once
/// `ReadyForQuery` arrives so the connection stays in sync.
#[derive(new)]
pub(crate) struct SimpleQueryCollector {
    hook: Option<Arc<dyn ClientLogicHook>>,
    #[new(default)]
    current_buffer: Option<QueryResponseBuffer>,
    #[new(default)]
    responses: Vec<Response>,
    #[new(default)]
    error: Option<ErrorInfo>,
}

impl SimpleQueryCollector {
    pub(crate) fn on_message(
        &mut self,
        message: BackendMessage,
    ) -> GaussWireResult<ReadyState<Vec<Response>>> {
        match message {
            BackendMessage::RowDescription(row_description) => {
                self.on_row_description(row_description);
            }
            BackendMessage::DataRow(data_row) => self.on_data_row(data_row)?,
            BackendMessage::CommandComplete(command_complete) => {
                self.on_command_complete(command_complete)?;
            }
            BackendMessage::EmptyQueryResponse(_) => self.responses.push(Response::EmptyQuery),
            BackendMessage::ErrorResponse(error) => {
                self.current_buffer = None;
                self.error.get_or_insert(ErrorInfo::from(error));
            }
            BackendMessage::ReadyForQuery(_) => {
                if let Some(error) = self.error.take() {
                    return Err(error.into());
                }
                return Ok(ReadyState::Ready(std::mem::take(&mut self.responses)));
            }
            other => {
                return Err(GaussWireError::UnexpectedMessage {
                    message: other.message_type() as char,
                    state: "reading simple query results",
                });
            }
        }

        Ok(ReadyState::Pending)
    }

    fn on_row_description(&mut self, message: RowDescription) {
        let fields = message.fields.into_iter().map(FieldInfo::from).collect();
        self.current_buffer = Some(QueryResponseBuffer {
            fields: Arc::new(fields),
            rows: Vec::new(),
        });
    }

    fn on_data_row(&mut self, message: DataRow) -> GaussWireResult<()> {
        // rows of a statement that already failed are not collected
        if self.error.is_some() {
            return Ok(());
        }
        let Some(current_buffer) = self.current_buffer.as_mut() else {
            return Err(GaussWireError::UnexpectedMessage {
                message: 'D',
                state: "reading simple query results without a row description",
            });
        };
        let row = Row::decode(current_buffer.fields.clone(), message, self.hook.as_deref())?;
        current_buffer.rows.push(row);
        Ok(())
    }

    fn on_command_complete(&mut self, message: CommandComplete) -> GaussWireResult<()> {
        let tag = message.tag.parse::<Tag>()?;
        if let Some(current_buffer) = self.current_buffer.take() {
            self.responses.push(Response::Query {
                tag,
                fields: current_buffer.fields,
                rows: current_buffer.rows,
            });
        } else {
            self.responses.push(Response::Execution(tag));
        }
        Ok(())
    }
}

/// Rewrite `?` placeholders to the positional `$1, $2 ...` form.
///
/// Question marks inside string literals, quoted identifiers, dollar quoted
/// strings and comments are left alone. Queries already written with `$N`
/// placeholders pass through unchanged.
pub fn rewrite_placeholders(query: &str) -> String {
    let bytes = query.as_bytes();
    let mut out = String::with_capacity(query.len() + 8);
    let mut count = 0;
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'?' => {
                out.push_str(&query[start..i]);
                count += 1;
                out.push('$');
                out.push_str(&count.to_string());
                i += 1;
                start = i;
            }
            quote @ (b'\'' | b'"') => {
                i = skip_quoted(bytes, i + 1, quote);
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                i = bytes[i..]
                    .iter()
                    .position(|b| *b == b'\n')
                    .map_or(bytes.len(), |p| i + p + 1);
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = query[i + 2..]
                    .find("*/")
                    .map_or(bytes.len(), |p| i + 2 + p + 2);
            }
            b'$' => i = skip_dollar_quoted(query, i),
            _ => i += 1,
        }
    }
    out.push_str(&query[start..]);
    out
}

// doubled quotes are escapes and keep the literal open
fn skip_quoted(bytes: &[u8], mut i: usize, quote: u8) -> usize {
    while i < bytes.len() {
        if bytes[i] == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

fn skip_dollar_quoted(query: &str, i: usize) -> usize {
    let rest = &query[i + 1..];
    let tag_len = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    // `$1` is a placeholder, a dollar quote tag never starts with a digit
    if rest[..tag_len].starts_with(|c: char| c.is_ascii_digit()) || !rest[tag_len..].starts_with('$')
    {
        return i + 1;
    }

    let delimiter = &query[i..i + tag_len + 2];
    let body_start = i + delimiter.len();
    query[body_start..]
        .find(delimiter)
        .map_or(query.len(), |p| body_start + p + delimiter.len())
}

#[cfg(test)]
mod tests {
    use bytes::BufMut;

    use super::*;
    use crate::messages::data::FieldDescription;
    use crate::messages::response::{
        EmptyQueryResponse, ErrorResponse, ReadyForQuery, TransactionStatus,
    };

    #[test]
    fn test_parse_tag() {
        let tag = "INSERT 0 3".parse::<Tag>().unwrap();
        assert_eq!("INSERT", tag.command());
        assert_eq!(Some(3), tag.rows());
        assert_eq!(Some(0), tag.oid());

        let tag = "UPDATE 12".parse::<Tag>().unwrap();
        assert_eq!(Some(12), tag.rows());

        let tag = "MERGE 2".parse::<Tag>().unwrap();
        assert_eq!(Some(2), tag.rows());

        let tag = "CREATE TABLE".parse::<Tag>().unwrap();
        assert_eq!("CREATE TABLE", tag.command());
        assert_eq!(None, tag.rows());

        let tag = "BEGIN".parse::<Tag>().unwrap();
        assert_eq!(None, tag.rows());

        let tag = "COPY".parse::<Tag>().unwrap();
        assert_eq!(None, tag.rows());

        assert!("SELECT x".parse::<Tag>().is_err());
        assert!("INSERT 0 1 2".parse::<Tag>().is_err());
    }

    #[test]
    fn test_exec_result() {
        let result = ExecResult::from_tag("DELETE 4".parse().unwrap());
        assert_eq!(4, result.rows_affected());
        assert_eq!(Some("DELETE"), result.tag().map(Tag::command));

        let result = ExecResult::from_tag("SET".parse().unwrap());
        assert_eq!(0, result.rows_affected());
    }

    #[test]
    fn test_rewrite_placeholders() {
        assert_eq!(
            "insert into t values ($1, $2)",
            rewrite_placeholders("insert into t values (?, ?)")
        );
        assert_eq!(
            "select '?', \"a?\", $1 -- ?\n, $2",
            rewrite_placeholders("select '?', \"a?\", ? -- ?\n, ?")
        );
        assert_eq!(
            "select 'it''s ?', $1 /* ? */",
            rewrite_placeholders("select 'it''s ?', ? /* ? */")
        );
        assert_eq!(
            "select $$ ? $$, $tag$ ? $tag$, $1",
            rewrite_placeholders("select $$ ? $$, $tag$ ? $tag$, ?")
        );
        assert_eq!(
            "select $1, $2 from t where a = $1",
            rewrite_placeholders("select $1, $2 from t where a = $1")
        );
        assert_eq!("select 1", rewrite_placeholders("select 1"));
        assert_eq!("select '?", rewrite_placeholders("select '?"));
    }

    fn data_row(values: &[Option<&[u8]>]) -> DataRow {
        let mut row = DataRow::default();
        for v in values {
            match v {
                Some(v) => {
                    row.data.put_i32(v.len() as i32);
                    row.data.put_slice(v);
                }
                None => row.data.put_i32(-1),
            }
        }
        row.field_count = values.len();
        row
    }

    #[test]
    fn test_simple_query_collector() {
        let mut collector = SimpleQueryCollector::new(None);
        let mut desc = RowDescription::default();
        desc.fields
            .push(FieldDescription::new("id".to_owned(), 0, 0, 23, 4, -1, 0));

        let messages = vec![
            BackendMessage::CommandComplete(CommandComplete::new("CREATE TABLE".to_owned())),
            BackendMessage::RowDescription(desc),
            BackendMessage::DataRow(data_row(&[Some(&b"1"[..])])),
            BackendMessage::DataRow(data_row(&[None])),
            BackendMessage::CommandComplete(CommandComplete::new("SELECT 2".to_owned())),
            BackendMessage::EmptyQueryResponse(EmptyQueryResponse),
        ];
        for m in messages {
            assert!(matches!(
                collector.on_message(m).unwrap(),
                ReadyState::Pending
            ));
        }

        let ReadyState::Ready(responses) = collector
            .on_message(BackendMessage::ReadyForQuery(ReadyForQuery::new(
                TransactionStatus::Idle,
                None,
            )))
            .unwrap()
        else {
            panic!("expect ready");
        };
        assert_eq!(3, responses.len());
        assert_eq!(Some("CREATE TABLE"), responses[0].tag().map(Tag::command));
        assert!(matches!(responses[2], Response::EmptyQuery));

        let mut responses = responses.into_iter();
        responses.next();
        let rows = responses.next().unwrap().into_rows();
        assert_eq!(2, rows.len());
        assert_eq!(Some(1), rows[0].get::<i32>(0).unwrap());
        assert_eq!(None, rows[1].get::<i32>(0).unwrap());
    }

    #[test]
    fn test_simple_query_collector_error() {
        let mut collector = SimpleQueryCollector::new(None);
        let mut error = ErrorResponse::default();
        error.fields.push((b'S', "ERROR".to_owned()));
        error.fields.push((b'C', "42P01".to_owned()));
        error.fields.push((b'M', "relation does not exist".to_owned()));

        assert!(matches!(
            collector
                .on_message(BackendMessage::ErrorResponse(error))
                .unwrap(),
            ReadyState::Pending
        ));
        let err = collector
            .on_message(BackendMessage::ReadyForQuery(ReadyForQuery::new(
                TransactionStatus::Idle,
                None,
            )))
            .unwrap_err();
        assert_eq!(Some("42P01"), err.server_error().map(|e| e.code.as_str()));
        assert!(!err.poisons_connection());

        assert!(
            collector
                .on_message(BackendMessage::DataRow(data_row(&[None])))
                .is_err()
        );
    }
}
