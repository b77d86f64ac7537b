use crate::error::Result;
use crate::record::{write_record, Record, RecordType};
use bytes::Bytes;
use tokio::io::AsyncWrite;

/// Split a body into chunks of at most `max` bytes without copying.
///
/// A `max` of zero is treated as one.
pub fn split_body(body: &Bytes, max: usize) -> Vec<Bytes> {
    let max = max.max(1);
    let mut out = Vec::with_capacity(body.len().div_ceil(max));
    let mut off = 0;
    while off < body.len() {
        let end = std::cmp::min(off + max, body.len());
        out.push(body.slice(off..end));
        off = end;
    }
    out
}

/// Frame chunks as a stream of `record_type` records closed by an empty record.
///
/// No chunks means no stream at all: not even the terminator is produced.
pub fn frame_stream<I>(record_type: RecordType, request_id: u16, chunks: I) -> Result<Vec<Record>>
where
    I: IntoIterator<Item = Bytes>,
{
    let mut records = chunks
        .into_iter()
        .map(|chunk| Record::new(record_type, request_id, chunk))
        .collect::<Result<Vec<_>>>()?;
    if !records.is_empty() {
        records.push(Record::end_of_stream(record_type, request_id));
    }
    Ok(records)
}

pub async fn write_stream<W: AsyncWrite + Unpin>(writer: &mut W, records: &[Record]) -> Result<()> {
    for record in records {
        write_record(writer, record).await?;
    }
    Ok(())
}
