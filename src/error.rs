use std::fmt::Display;
use std::io::{Error as IOError, ErrorKind};

use thiserror::Error;

use crate::messages::response::{ErrorResponse, NoticeResponse};

/// SQLSTATE reported by the server for a wrong password.
pub const SQLSTATE_INVALID_PASSWORD: &str = "28P01";
/// SQLSTATE reported by the server for an unknown role or database access
/// rejected by the host based authentication.
pub const SQLSTATE_INVALID_AUTHORIZATION: &str = "28000";

#[derive(Error, Debug)]
pub enum GaussWireError {
    // protocol
    #[error("Invalid message received, received {0}")]
    InvalidMessageType(u8),
    #[error("Unexpected message {message:?} while {state}")]
    UnexpectedMessage { message: char, state: &'static str },
    #[error("Invalid transaction status, received {0}")]
    InvalidTransactionStatus(u8),
    #[error("Invalid protocol version, received {0}")]
    InvalidProtocolVersion(i32),
    #[error("Invalid startup message")]
    InvalidStartupMessage,
    #[error("Invalid authentication message code: {0}")]
    InvalidAuthenticationMessageCode(i32),
    #[error("Message length {0} exceeds the maximum of {1}")]
    MessageTooLarge(usize, usize),
    #[error("Truncated or malformed {0} message")]
    MalformedMessage(&'static str),
    #[error("Failed to parse utf8 value")]
    InvalidUtf8(#[source] std::str::Utf8Error),
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    // server
    #[error("{0}")]
    ServerError(Box<ErrorInfo>),

    // authentication
    #[error("Password is required for {0} authentication")]
    PasswordRequired(&'static str),
    #[error("GSSAPI protocol not supported")]
    GssApiNotSupported,
    #[error("Password stored method {0} is not supported, must be plain, md5 or sha256")]
    UnsupportedPasswordStoredMethod(i32),
    #[error("Invalid hex string in authentication request")]
    InvalidAuthenticationHex,
    #[error("Unexpected authentication response {0} after the password was sent")]
    UnexpectedAuthenticationResponse(i32),

    // connection state
    #[error("Connection is unusable, discard it and reconnect")]
    BadConnection,
    #[error("Connection is closed")]
    ConnectionClosed,
    #[error("COPY is in progress")]
    CopyInProgress,
    #[error("COPY FROM STDIN is only supported inside a transaction")]
    CopyOutsideTransaction,
    #[error("COPY stream is closed")]
    CopyInClosed,
    #[error("COPY binary format is not supported")]
    CopyBinaryNotSupported,
    #[error("COPY TO is not supported")]
    CopyToNotSupported,
    #[error("COPY stream aborted: {0}")]
    CopyAborted(String),
    #[error("Unexpected command tag {0}, expected {1}")]
    UnexpectedCommandTag(String, &'static str),
    #[error("Current transaction is aborted, commands ignored until end of transaction block")]
    InFailedTransaction,
    #[error("Unexpected transaction status {actual:?}, expected {expected:?}")]
    TransactionStatusMismatch {
        actual: crate::api::client::TransactionStatus,
        expected: crate::api::client::TransactionStatus,
    },

    // client side validation
    #[error("got {given} parameters but the statement may requires {expected}")]
    ParameterCountMismatch { given: usize, expected: usize },
    #[error("got {0} parameters but only 65535 parameters are supported")]
    TooManyParameters(usize),
    #[error("bind message length {0} too long")]
    BindMessageTooLong(u64),
    #[error("value in row {row}, col {column} type error")]
    ColumnTypeMismatch { row: usize, column: usize },
    #[error("Data row index {0} out of bounds")]
    DataRowIndexOutOfBounds(usize),
    #[error("Failed to decode value: {0}")]
    FromSqlError(Box<dyn std::error::Error + Send + Sync>),
    #[error("Failed to encode value: {0}")]
    ToSqlError(Box<dyn std::error::Error + Send + Sync>),
    #[error("Invalid command tag: {0}")]
    InvalidTag(String),

    // configuration
    #[error("Failed to parse connection config, invalid value for: {0}")]
    InvalidConfig(String),
    #[error("Failed to parse connection config: {0}")]
    ConfigParse(String),

    // tls
    #[error("TLS is not enabled on server")]
    TlsRefused,
    #[error(transparent)]
    TlsError(#[from] tokio_rustls::rustls::Error),
    #[error("Invalid server name for TLS: {0}")]
    InvalidServerName(String),

    // dialing
    #[error("Server does not satisfy target_session_attrs={0}")]
    SessionAttrsMismatch(String),
    #[error("No coordinator node available")]
    NoCandidate,
    #[error("Failed to connect to {address}: {source}")]
    ConnectFailed {
        address: String,
        #[source]
        source: Box<GaussWireError>,
    },
    #[error("Timed out connecting to {0}")]
    ConnectTimeout(String),

    // column encryption
    #[error("Client logic error: {0}")]
    ClientLogic(String),
    #[error("Client encryption is enabled but no engine is registered on the connector")]
    ClientLogicUnavailable,
}

impl From<GaussWireError> for IOError {
    fn from(e: GaussWireError) -> Self {
        IOError::new(ErrorKind::Other, e)
    }
}

impl From<ErrorInfo> for GaussWireError {
    fn from(e: ErrorInfo) -> Self {
        GaussWireError::ServerError(Box::new(e))
    }
}

impl GaussWireError {
    /// The structured server error carried by this error, looking through
    /// connect failures.
    pub fn server_error(&self) -> Option<&ErrorInfo> {
        match self {
            GaussWireError::ServerError(info) => Some(info),
            GaussWireError::ConnectFailed { source, .. } => source.server_error(),
            _ => None,
        }
    }

    /// Authentication failures will recur identically on every node, the
    /// dialer stops trying further candidates when it sees one.
    pub fn is_auth_failure(&self) -> bool {
        match self {
            GaussWireError::UnexpectedAuthenticationResponse(_) => true,
            GaussWireError::ConnectFailed { source, .. } => source.is_auth_failure(),
            _ => self.server_error().is_some_and(ErrorInfo::is_auth_failure),
        }
    }

    /// Whether this error leaves the connection in an unknown protocol state.
    ///
    /// Transport and protocol errors, and server errors with severity
    /// `FATAL` or `PANIC` poison the connection. Other server errors and
    /// client side validation errors do not.
    pub fn poisons_connection(&self) -> bool {
        match self {
            GaussWireError::ServerError(info) => info.is_fatal(),
            GaussWireError::InvalidMessageType(_)
            | GaussWireError::UnexpectedMessage { .. }
            | GaussWireError::InvalidTransactionStatus(_)
            | GaussWireError::InvalidAuthenticationMessageCode(_)
            | GaussWireError::UnexpectedAuthenticationResponse(_)
            | GaussWireError::MessageTooLarge(..)
            | GaussWireError::MalformedMessage(_)
            | GaussWireError::InvalidUtf8(_)
            | GaussWireError::IoError(_)
            | GaussWireError::BadConnection
            | GaussWireError::ConnectionClosed
            | GaussWireError::TransactionStatusMismatch { .. }
            | GaussWireError::UnexpectedCommandTag(..)
            | GaussWireError::TlsError(_) => true,
            _ => false,
        }
    }
}

pub type GaussWireResult<T> = Result<T, GaussWireError>;

// Postgres error and notice message fields
// This part of protocol is defined in
// https://www.postgresql.org/docs/current/protocol-error-fields.html
#[non_exhaustive]
#[derive(new, Debug, Clone, PartialEq, Eq, Default)]
pub struct ErrorInfo {
    // severity can be one of `ERROR`, `FATAL`, or `PANIC` (in an error
    // message), or `WARNING`, `NOTICE`, `DEBUG`, `INFO`, or `LOG` (in a notice
    // message), or a localized translation of one of these.
    pub severity: String,
    // error code defined in
    // https://www.postgresql.org/docs/current/errcodes-appendix.html
    pub code: String,
    // readable message
    pub message: String,
    // optional secondary message
    #[new(default)]
    pub detail: Option<String>,
    // optional suggestion for fixing the issue
    #[new(default)]
    pub hint: Option<String>,
    // Position: the field value is a decimal ASCII integer, indicating an error
    // cursor position as an index into the original query string.
    #[new(default)]
    pub position: Option<String>,
    // Internal position: this is defined the same as the P field, but it is
    // used when the cursor position refers to an internally generated command
    // rather than the one submitted by the client
    #[new(default)]
    pub internal_position: Option<String>,
    // Internal query: the text of a failed internally-generated command.
    #[new(default)]
    pub internal_query: Option<String>,
    // Where: an indication of the context in which the error occurred.
    #[new(default)]
    pub where_context: Option<String>,
    #[new(default)]
    pub schema_name: Option<String>,
    #[new(default)]
    pub table_name: Option<String>,
    #[new(default)]
    pub column_name: Option<String>,
    #[new(default)]
    pub data_type_name: Option<String>,
    #[new(default)]
    pub constraint_name: Option<String>,
    // File: the file name of the source-code location where the error was
    // reported.
    #[new(default)]
    pub file_name: Option<String>,
    // Line: the line number of the source-code location where the error was
    // reported.
    #[new(default)]
    pub line: Option<usize>,
    // Routine: the name of the source-code routine reporting the error.
    #[new(default)]
    pub routine: Option<String>,
}

impl Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} (SQLSTATE {})", self.severity, self.message, self.code)
    }
}

impl ErrorInfo {
    /// Severity `FATAL` or `PANIC`, the server closes the session after
    /// sending these.
    pub fn is_fatal(&self) -> bool {
        matches!(self.severity.as_str(), "FATAL" | "PANIC")
    }

    pub fn is_auth_failure(&self) -> bool {
        self.code == SQLSTATE_INVALID_PASSWORD || self.code == SQLSTATE_INVALID_AUTHORIZATION
    }

    fn into_fields(self) -> Vec<(u8, String)> {
        let mut fields = Vec::with_capacity(11);

        fields.push((b'S', self.severity));
        fields.push((b'C', self.code));
        fields.push((b'M', self.message));
        let optional = [
            (b'D', self.detail),
            (b'H', self.hint),
            (b'P', self.position),
            (b'p', self.internal_position),
            (b'q', self.internal_query),
            (b'W', self.where_context),
            (b's', self.schema_name),
            (b't', self.table_name),
            (b'c', self.column_name),
            (b'd', self.data_type_name),
            (b'n', self.constraint_name),
            (b'F', self.file_name),
            (b'L', self.line.map(|l| l.to_string())),
            (b'R', self.routine),
        ];
        fields.extend(
            optional
                .into_iter()
                .filter_map(|(code, value)| value.map(|v| (code, v))),
        );

        fields
    }

    fn from_fields(fields: Vec<(u8, String)>) -> ErrorInfo {
        let mut info = ErrorInfo::default();
        for (code, value) in fields {
            match code {
                b'S' => info.severity = value,
                // `V` is the non-localized severity, prefer it when present
                b'V' => info.severity = value,
                b'C' => info.code = value,
                b'M' => info.message = value,
                b'D' => info.detail = Some(value),
                b'H' => info.hint = Some(value),
                b'P' => info.position = Some(value),
                b'p' => info.internal_position = Some(value),
                b'q' => info.internal_query = Some(value),
                b'W' => info.where_context = Some(value),
                b's' => info.schema_name = Some(value),
                b't' => info.table_name = Some(value),
                b'c' => info.column_name = Some(value),
                b'd' => info.data_type_name = Some(value),
                b'n' => info.constraint_name = Some(value),
                b'F' => info.file_name = Some(value),
                b'L' => info.line = value.parse().ok(),
                b'R' => info.routine = Some(value),
                _ => {}
            }
        }
        info
    }
}

impl From<ErrorInfo> for ErrorResponse {
    fn from(ei: ErrorInfo) -> ErrorResponse {
        ErrorResponse::new(ei.into_fields())
    }
}

impl From<ErrorInfo> for NoticeResponse {
    fn from(ei: ErrorInfo) -> NoticeResponse {
        NoticeResponse::new(ei.into_fields())
    }
}

impl From<ErrorResponse> for ErrorInfo {
    fn from(value: ErrorResponse) -> Self {
        ErrorInfo::from_fields(value.fields)
    }
}

impl From<NoticeResponse> for ErrorInfo {
    fn from(value: NoticeResponse) -> Self {
        ErrorInfo::from_fields(value.fields)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_error_notice_info() {
        let error_info = ErrorInfo::new(
            "FATAL".to_owned(),
            "28P01".to_owned(),
            "Password authentication failed".to_owned(),
        );
        assert_eq!("FATAL", error_info.severity);
        assert_eq!("28P01", error_info.code);
        assert_eq!("Password authentication failed", error_info.message);
        assert!(error_info.file_name.is_none());
        assert!(error_info.is_fatal());
        assert!(error_info.is_auth_failure());
    }

    #[test]
    fn test_error_response_fields_roundtrip() {
        let mut info = ErrorInfo::new(
            "ERROR".to_owned(),
            "42P01".to_owned(),
            "relation \"t\" does not exist".to_owned(),
        );
        info.position = Some("15".to_owned());
        info.line = Some(1180);

        let response = ErrorResponse::from(info.clone());
        let parsed = ErrorInfo::from(response);
        assert_eq!(info, parsed);
        assert!(!parsed.is_fatal());
        assert!(!parsed.is_auth_failure());
    }

    #[test]
    fn test_error_classification() {
        let fatal = GaussWireError::from(ErrorInfo::new(
            "PANIC".to_owned(),
            "XX000".to_owned(),
            "boom".to_owned(),
        ));
        assert!(fatal.poisons_connection());
        assert!(!fatal.is_auth_failure());

        let stmt_level = GaussWireError::from(ErrorInfo::new(
            "ERROR".to_owned(),
            "23505".to_owned(),
            "duplicate key".to_owned(),
        ));
        assert!(!stmt_level.poisons_connection());

        let auth = GaussWireError::ConnectFailed {
            address: "10.0.0.1:8000".to_owned(),
            source: Box::new(GaussWireError::from(ErrorInfo::new(
                "FATAL".to_owned(),
                "28000".to_owned(),
                "no pg_hba.conf entry".to_owned(),
            ))),
        };
        assert!(auth.is_auth_failure());

        assert!(!GaussWireError::CopyOutsideTransaction.poisons_connection());
        assert!(
            !GaussWireError::ParameterCountMismatch {
                given: 7,
                expected: 8
            }
            .poisons_connection()
        );
    }
}
