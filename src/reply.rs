// https://redis.io/docs/reference/protocol-spec

use bytes::Bytes;
use std::fmt;

static CRLF: &[u8; 2] = b"\r\n";

static OK_BYTES: &[u8] = b"+OK\r\n";
static PONG_BYTES: &[u8] = b"+PONG\r\n";
static QUEUED_BYTES: &[u8] = b"+QUEUED\r\n";
static NULL_BULK_BYTES: &[u8] = b"$-1\r\n";
static EMPTY_MULTI_BULK_BYTES: &[u8] = b"*0\r\n";

/// The closed set of results a command can produce. Every variant has exactly
/// one wire representation, produced by [`Reply::to_bytes`].
///
/// `NoReply` encodes to zero bytes; callers must suppress the write entirely
/// instead of flushing an empty buffer.
#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    Status(String),
    Err(String),
    Integer(i64),
    Bulk(Bytes),
    /// Array of bulk strings. `None` elements encode as null bulks.
    MultiBulk(Vec<Option<Bytes>>),
    /// Array of arbitrary nested replies, each encoded with its own rules.
    MultiRaw(Vec<Reply>),
    Ok,
    Pong,
    Queued,
    Null,
    EmptyMultiBulk,
    NoReply,
}

impl Reply {
    pub fn bulk(data: impl Into<Bytes>) -> Reply {
        Reply::Bulk(data.into())
    }

    pub fn status(status: impl Into<String>) -> Reply {
        Reply::Status(status.into())
    }

    pub fn error(message: impl Into<String>) -> Reply {
        Reply::Err(message.into())
    }

    /// Encodes the reply into its wire representation. Encoding is total: it
    /// never fails for any value of the variant set.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Reply::Status(s) => {
                let mut bytes = Vec::with_capacity(1 + s.len() + CRLF.len());
                bytes.push(b'+');
                bytes.extend_from_slice(s.as_bytes());
                bytes.extend_from_slice(CRLF);
                bytes
            }
            Reply::Err(msg) => {
                let mut bytes = Vec::with_capacity(1 + msg.len() + CRLF.len());
                bytes.push(b'-');
                bytes.extend_from_slice(msg.as_bytes());
                bytes.extend_from_slice(CRLF);
                bytes
            }
            Reply::Integer(i) => {
                let digits = i.to_string();
                let mut bytes = Vec::with_capacity(1 + digits.len() + CRLF.len());
                bytes.push(b':');
                bytes.extend_from_slice(digits.as_bytes());
                bytes.extend_from_slice(CRLF);
                bytes
            }
            Reply::Bulk(data) => {
                let mut bytes = Vec::new();
                write_bulk(&mut bytes, Some(data));
                bytes
            }
            Reply::MultiBulk(elements) => {
                let header = elements.len().to_string();
                let mut bytes = Vec::with_capacity(1 + header.len() + CRLF.len());
                bytes.push(b'*');
                bytes.extend_from_slice(header.as_bytes());
                bytes.extend_from_slice(CRLF);
                for element in elements {
                    write_bulk(&mut bytes, element.as_deref());
                }
                bytes
            }
            Reply::MultiRaw(replies) => {
                let header = replies.len().to_string();
                let mut bytes = Vec::with_capacity(1 + header.len() + CRLF.len());
                bytes.push(b'*');
                bytes.extend_from_slice(header.as_bytes());
                bytes.extend_from_slice(CRLF);
                for reply in replies {
                    bytes.extend(reply.to_bytes());
                }
                bytes
            }
            Reply::Ok => OK_BYTES.to_vec(),
            Reply::Pong => PONG_BYTES.to_vec(),
            Reply::Queued => QUEUED_BYTES.to_vec(),
            Reply::Null => NULL_BULK_BYTES.to_vec(),
            Reply::EmptyMultiBulk => EMPTY_MULTI_BULK_BYTES.to_vec(),
            Reply::NoReply => Vec::new(),
        }
    }

    /// True only for the exact `+OK\r\n` encoding, whichever variant produced it.
    pub fn is_ok(&self) -> bool {
        self.to_bytes() == OK_BYTES
    }

    /// True iff the first encoded byte is `-`. `NoReply` has no bytes and is
    /// never an error.
    pub fn is_error(&self) -> bool {
        self.to_bytes().first() == Some(&b'-')
    }

    /// True only for the exact `*0\r\n` encoding.
    pub fn is_empty_multi_bulk(&self) -> bool {
        self.to_bytes() == EMPTY_MULTI_BULK_BYTES
    }
}

fn write_bulk(bytes: &mut Vec<u8>, data: Option<&[u8]>) {
    match data {
        Some(data) => {
            bytes.push(b'$');
            bytes.extend_from_slice(data.len().to_string().as_bytes());
            bytes.extend_from_slice(CRLF);
            bytes.extend_from_slice(data);
            bytes.extend_from_slice(CRLF);
        }
        None => bytes.extend_from_slice(NULL_BULK_BYTES),
    }
}

impl From<Reply> for Vec<u8> {
    fn from(reply: Reply) -> Self {
        reply.to_bytes()
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Status(s) => write!(f, "+{}", s),
            Reply::Err(msg) => write!(f, "-{}", msg),
            Reply::Integer(i) => write!(f, ":{}", i),
            Reply::Bulk(data) => write!(f, "${}", String::from_utf8_lossy(data)),
            Reply::MultiBulk(elements) => write!(f, "*{}", elements.len()),
            Reply::MultiRaw(replies) => write!(f, "*{}", replies.len()),
            Reply::Ok => write!(f, "+OK"),
            Reply::Pong => write!(f, "+PONG"),
            Reply::Queued => write!(f, "+QUEUED"),
            Reply::Null => write!(f, "$-1"),
            Reply::EmptyMultiBulk => write!(f, "*0"),
            Reply::NoReply => Ok(()),
        }
    }
}
