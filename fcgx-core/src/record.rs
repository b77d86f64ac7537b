use crate::error::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const FCGI_VERSION_1: u8 = 1;

/// Largest content a single record can carry (16-bit length field).
pub const MAX_CONTENT_LEN: usize = 65535;

pub const HEADER_LEN: usize = 8;

// FastCGI roles.
pub const FCGI_RESPONDER: u16 = 1;

// BEGIN_REQUEST flags.
pub const FCGI_KEEP_CONN: u8 = 1;

// Padding is never read back, so one shared zero buffer covers every record.
static ZERO_PAD: [u8; 255] = [0u8; 255];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    BeginRequest,
    AbortRequest,
    EndRequest,
    Params,
    Stdin,
    Stdout,
    Stderr,
    Data,
    GetValues,
    GetValuesResult,
    UnknownType,
    Other(u8),
}

impl From<u8> for RecordType {
    fn from(v: u8) -> Self {
        match v {
            1 => Self::BeginRequest,
            2 => Self::AbortRequest,
            3 => Self::EndRequest,
            4 => Self::Params,
            5 => Self::Stdin,
            6 => Self::Stdout,
            7 => Self::Stderr,
            8 => Self::Data,
            9 => Self::GetValues,
            10 => Self::GetValuesResult,
            11 => Self::UnknownType,
            other => Self::Other(other),
        }
    }
}

impl From<RecordType> for u8 {
    fn from(t: RecordType) -> Self {
        match t {
            RecordType::BeginRequest => 1,
            RecordType::AbortRequest => 2,
            RecordType::EndRequest => 3,
            RecordType::Params => 4,
            RecordType::Stdin => 5,
            RecordType::Stdout => 6,
            RecordType::Stderr => 7,
            RecordType::Data => 8,
            RecordType::GetValues => 9,
            RecordType::GetValuesResult => 10,
            RecordType::UnknownType => 11,
            RecordType::Other(v) => v,
        }
    }
}

/// Fixed 8-byte FastCGI record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub record_type: RecordType,
    pub request_id: u16,
    pub content_length: u16,
    pub padding_length: u8,
}

impl Header {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0] = self.version;
        buf[1] = self.record_type.into();
        buf[2..4].copy_from_slice(&self.request_id.to_be_bytes());
        buf[4..6].copy_from_slice(&self.content_length.to_be_bytes());
        buf[6] = self.padding_length;
        buf[7] = 0; // reserved
        buf
    }

    pub fn decode(buf: &[u8; HEADER_LEN]) -> Self {
        Self {
            version: buf[0],
            record_type: RecordType::from(buf[1]),
            request_id: u16::from_be_bytes([buf[2], buf[3]]),
            content_length: u16::from_be_bytes([buf[4], buf[5]]),
            padding_length: buf[6],
        }
    }
}

/// A complete FastCGI record (header + content). Padding is implied by the header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub header: Header,
    pub content: Bytes,
}

impl Record {
    /// Build a record padded to an 8-byte boundary.
    pub fn new(record_type: RecordType, request_id: u16, content: Bytes) -> Result<Self> {
        let padding = (8 - (content.len() % 8)) % 8;
        Self::with_padding(record_type, request_id, content, padding as u8)
    }

    pub fn with_padding(
        record_type: RecordType,
        request_id: u16,
        content: Bytes,
        padding_length: u8,
    ) -> Result<Self> {
        if content.len() > MAX_CONTENT_LEN {
            return Err(Error::RecordTooLarge(content.len()));
        }
        Ok(Self {
            header: Header {
                version: FCGI_VERSION_1,
                record_type,
                request_id,
                content_length: content.len() as u16,
                padding_length,
            },
            content,
        })
    }

    /// Empty record of the given type; closes a stream.
    pub fn end_of_stream(record_type: RecordType, request_id: u16) -> Self {
        Self {
            header: Header {
                version: FCGI_VERSION_1,
                record_type,
                request_id,
                content_length: 0,
                padding_length: 0,
            },
            content: Bytes::new(),
        }
    }

    pub fn record_type(&self) -> RecordType {
        self.header.record_type
    }

    pub fn request_id(&self) -> u16 {
        self.header.request_id
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.content.len() + self.header.padding_length as usize
    }

    /// Serialize header, content and zero padding.
    pub fn encode(&self) -> Bytes {
        debug_assert_eq!(self.header.content_length as usize, self.content.len());
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_slice(&self.header.encode());
        buf.put_slice(&self.content);
        buf.put_slice(&ZERO_PAD[..self.header.padding_length as usize]);
        buf.freeze()
    }
}

/// Body of an FCGI_BEGIN_REQUEST record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeginRequest {
    pub role: u16,
    pub flags: u8,
}

impl BeginRequest {
    pub fn responder(keep_conn: bool) -> Self {
        Self {
            role: FCGI_RESPONDER,
            flags: if keep_conn { FCGI_KEEP_CONN } else { 0 },
        }
    }

    pub fn encode(&self) -> [u8; 8] {
        let mut body = [0u8; 8];
        body[0..2].copy_from_slice(&self.role.to_be_bytes());
        body[2] = self.flags;
        body
    }

    pub fn into_record(self, request_id: u16) -> Record {
        Record {
            header: Header {
                version: FCGI_VERSION_1,
                record_type: RecordType::BeginRequest,
                request_id,
                content_length: 8,
                padding_length: 0,
            },
            content: Bytes::copy_from_slice(&self.encode()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolStatus {
    RequestComplete,
    CantMpxConn,
    Overloaded,
    UnknownRole,
    Other(u8),
}

impl From<u8> for ProtocolStatus {
    fn from(v: u8) -> Self {
        match v {
            0 => Self::RequestComplete,
            1 => Self::CantMpxConn,
            2 => Self::Overloaded,
            3 => Self::UnknownRole,
            other => Self::Other(other),
        }
    }
}

/// Body of an FCGI_END_REQUEST record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndRequest {
    pub app_status: u32,
    pub protocol_status: ProtocolStatus,
}

impl EndRequest {
    /// Lenient decode: a short body is treated as a plain completion.
    pub fn decode(content: &[u8]) -> Self {
        if content.len() < 5 {
            return Self {
                app_status: 0,
                protocol_status: ProtocolStatus::RequestComplete,
            };
        }
        Self {
            app_status: u32::from_be_bytes([content[0], content[1], content[2], content[3]]),
            protocol_status: ProtocolStatus::from(content[4]),
        }
    }
}

/// Read one FastCGI record from an async reader.
///
/// Any short read surfaces as an I/O error; the transport is unusable afterwards.
pub async fn read_record<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Record> {
    let mut hdr_buf = [0u8; HEADER_LEN];
    reader.read_exact(&mut hdr_buf).await?;
    let header = Header::decode(&hdr_buf);

    if header.version != FCGI_VERSION_1 {
        return Err(Error::UnsupportedVersion(header.version));
    }

    let content_len = header.content_length as usize;
    let total = content_len + header.padding_length as usize;

    let mut buf = BytesMut::zeroed(total);
    if total > 0 {
        reader.read_exact(&mut buf).await?;
    }
    buf.truncate(content_len);

    Ok(Record {
        header,
        content: buf.freeze(),
    })
}

/// Write one FastCGI record to an async writer.
pub async fn write_record<W: AsyncWrite + Unpin>(writer: &mut W, record: &Record) -> Result<()> {
    writer.write_all(&record.header.encode()).await?;
    if !record.content.is_empty() {
        writer.write_all(&record.content).await?;
    }
    let padding = record.header.padding_length as usize;
    if padding > 0 {
        writer.write_all(&ZERO_PAD[..padding]).await?;
    }
    Ok(())
}
