//! One-shot file transfer protocol.
//!
//! Every transfer uses its own TCP connection:
//!
//! ```text
//! UntilClose (photos):
//!   [u16 BE n][n bytes modified-UTF-8 filename][raw bytes ... EOF]
//!
//! Sized (clips):
//!   [u16 BE n][n bytes modified-UTF-8 filename][u64 BE size][size bytes]
//! ```
//!
//! Modified UTF-8 is the JVM `DataOutput::writeUTF` encoding: UTF-16 code
//! units encoded individually, with NUL written as `C0 80`. It is what the
//! original collectors expect, so filenames outside the BMP round-trip as
//! surrogate pairs rather than 4-byte sequences.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::CamlinkError;

/// Chunk size for streaming file bodies.
pub const TRANSFER_CHUNK_SIZE: usize = 64 * 1024;

// ── TransferVariant ──────────────────────────────────────────────

/// How the receiver learns where the body ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferVariant {
    /// The body runs until the sender closes the connection.
    UntilClose,
    /// A `u64` size follows the filename; the body is exactly that long.
    Sized,
}

// ── Modified UTF-8 ───────────────────────────────────────────────

/// Encode `s` as modified UTF-8 (without the length prefix).
pub fn encode_modified_utf8(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len());
    for unit in s.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | (unit >> 6) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | (unit >> 12) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    out
}

/// Decode modified UTF-8 bytes back into a `String`.
pub fn decode_modified_utf8(bytes: &[u8]) -> Result<String, CamlinkError> {
    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b0 = bytes[i] as u16;
        match b0 >> 4 {
            0x0..=0x7 => {
                units.push(b0);
                i += 1;
            }
            0xC | 0xD => {
                let b1 = continuation(bytes, i + 1)?;
                units.push(((b0 & 0x1F) << 6) | b1);
                i += 2;
            }
            0xE => {
                let b1 = continuation(bytes, i + 1)?;
                let b2 = continuation(bytes, i + 2)?;
                units.push(((b0 & 0x0F) << 12) | (b1 << 6) | b2);
                i += 3;
            }
            _ => return Err(CamlinkError::MalformedHeader("invalid lead byte in filename")),
        }
    }
    String::from_utf16(&units)
        .map_err(|_| CamlinkError::MalformedHeader("unpaired surrogate in filename"))
}

fn continuation(bytes: &[u8], at: usize) -> Result<u16, CamlinkError> {
    match bytes.get(at) {
        Some(&b) if b & 0xC0 == 0x80 => Ok((b & 0x3F) as u16),
        Some(_) => Err(CamlinkError::MalformedHeader("invalid continuation byte in filename")),
        None => Err(CamlinkError::MalformedHeader("filename ends mid-character")),
    }
}

/// Encode a filename with its `u16` BE length prefix.
pub fn encode_filename(name: &str) -> Result<Bytes, CamlinkError> {
    let encoded = encode_modified_utf8(name);
    let len = u16::try_from(encoded.len())
        .map_err(|_| CamlinkError::FilenameTooLong(encoded.len()))?;
    let mut buf = BytesMut::with_capacity(2 + encoded.len());
    buf.put_u16(len);
    buf.put_slice(&encoded);
    Ok(buf.freeze())
}

/// Reduce a peer-supplied filename to its final path component.
///
/// Both separators are honoured since the sender's platform is unknown.
/// Returns `None` when nothing usable is left.
pub fn sanitize_filename(name: &str) -> Option<String> {
    let last = name.rsplit(['/', '\\']).next().unwrap_or(name).trim();
    match last {
        "" | "." | ".." => None,
        other => Some(other.chars().filter(|c| !c.is_control()).collect()),
    }
}

// ── TransferHeader ───────────────────────────────────────────────

/// Everything that precedes the file body on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferHeader {
    pub filename: String,
    /// `Some` for [`TransferVariant::Sized`].
    pub size: Option<u64>,
}

impl TransferHeader {
    pub fn until_close(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            size: None,
        }
    }

    pub fn sized(filename: impl Into<String>, size: u64) -> Self {
        Self {
            filename: filename.into(),
            size: Some(size),
        }
    }

    pub fn variant(&self) -> TransferVariant {
        match self.size {
            Some(_) => TransferVariant::Sized,
            None => TransferVariant::UntilClose,
        }
    }
}

/// Serialize a transfer header.
pub fn encode_header(header: &TransferHeader) -> Result<Bytes, CamlinkError> {
    let name = encode_filename(&header.filename)?;
    let mut buf = BytesMut::with_capacity(name.len() + 8);
    buf.put_slice(&name);
    if let Some(size) = header.size {
        buf.put_u64(size);
    }
    Ok(buf.freeze())
}

// ── Async readers ────────────────────────────────────────────────

fn eof_as_malformed(what: &'static str) -> impl FnOnce(std::io::Error) -> CamlinkError {
    move |e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            CamlinkError::MalformedHeader(what)
        } else {
            CamlinkError::Connection(e)
        }
    }
}

/// Read a length-prefixed modified-UTF-8 filename.
pub async fn read_filename<R>(reader: &mut R) -> Result<String, CamlinkError>
where
    R: AsyncRead + Unpin,
{
    let len = reader
        .read_u16()
        .await
        .map_err(eof_as_malformed("missing filename length"))?;
    let mut raw = vec![0u8; len as usize];
    reader
        .read_exact(&mut raw)
        .await
        .map_err(eof_as_malformed("filename shorter than declared"))?;
    decode_modified_utf8(&raw)
}

/// Read the header for the given variant.
pub async fn read_header<R>(
    reader: &mut R,
    variant: TransferVariant,
) -> Result<TransferHeader, CamlinkError>
where
    R: AsyncRead + Unpin,
{
    let filename = read_filename(reader).await?;
    let size = match variant {
        TransferVariant::UntilClose => None,
        TransferVariant::Sized => Some(
            reader
                .read_u64()
                .await
                .map_err(eof_as_malformed("missing size field"))?,
        ),
    };
    Ok(TransferHeader { filename, size })
}

/// Copy the body that follows `header` from `reader` into `writer`.
///
/// For sized transfers exactly `size` bytes are consumed and anything
/// shorter is [`CamlinkError::Truncated`]. Returns the byte count written.
pub async fn receive_body<R, W>(
    reader: &mut R,
    writer: &mut W,
    header: &TransferHeader,
) -> Result<u64, CamlinkError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let written = match header.size {
        None => tokio::io::copy(reader, writer).await?,
        Some(expected) => {
            let mut limited = reader.take(expected);
            let actual = tokio::io::copy(&mut limited, writer).await?;
            if actual != expected {
                return Err(CamlinkError::Truncated { expected, actual });
            }
            actual
        }
    };
    writer.flush().await?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_is_unchanged() {
        assert_eq!(encode_modified_utf8("clip_01.mp4"), b"clip_01.mp4");
    }

    #[test]
    fn nul_and_multibyte_encoding() {
        assert_eq!(encode_modified_utf8("\0"), vec![0xC0, 0x80]);
        assert_eq!(encode_modified_utf8("é"), vec![0xC3, 0xA9]);
        assert_eq!(encode_modified_utf8("€"), vec![0xE2, 0x82, 0xAC]);
        // U+1F4F7 (camera) becomes two 3-byte surrogates, not one 4-byte run.
        let camera = encode_modified_utf8("\u{1F4F7}");
        assert_eq!(camera.len(), 6);
        assert_eq!(decode_modified_utf8(&camera).unwrap(), "\u{1F4F7}");
    }

    #[test]
    fn decode_rejects_bad_sequences() {
        assert!(decode_modified_utf8(&[0xC3]).is_err());
        assert!(decode_modified_utf8(&[0xE2, 0x41, 0x41]).is_err());
        assert!(decode_modified_utf8(&[0xFF]).is_err());
    }

    #[test]
    fn filename_prefix() {
        let encoded = encode_filename("a.jpg").unwrap();
        assert_eq!(&encoded[..], &[0, 5, b'a', b'.', b'j', b'p', b'g']);
        let long = "x".repeat(70_000);
        assert!(matches!(
            encode_filename(&long),
            Err(CamlinkError::FilenameTooLong(70_000))
        ));
    }

    #[test]
    fn sanitize_keeps_last_component() {
        assert_eq!(sanitize_filename("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(sanitize_filename("C:\\dcim\\v.mp4").as_deref(), Some("v.mp4"));
        assert_eq!(sanitize_filename("plain.jpg").as_deref(), Some("plain.jpg"));
        assert_eq!(sanitize_filename("dir/.."), None);
        assert_eq!(sanitize_filename(""), None);
    }

    #[tokio::test]
    async fn sized_transfer_reads_exactly_size() {
        let header = TransferHeader::sized("v.mp4", 5);
        let mut wire = encode_header(&header).unwrap().to_vec();
        wire.extend_from_slice(b"hello-trailing");

        let mut reader = &wire[..];
        let parsed = read_header(&mut reader, TransferVariant::Sized).await.unwrap();
        assert_eq!(parsed, header);

        let mut body = Vec::new();
        let n = receive_body(&mut reader, &mut body, &parsed).await.unwrap();
        assert_eq!(n, 5);
        assert_eq!(body, b"hello");
        assert_eq!(reader, b"-trailing");
    }

    #[tokio::test]
    async fn sized_transfer_detects_truncation() {
        let header = TransferHeader::sized("v.mp4", 100);
        let mut wire = encode_header(&header).unwrap().to_vec();
        wire.extend_from_slice(&[7u8; 40]);

        let mut reader = &wire[..];
        let parsed = read_header(&mut reader, TransferVariant::Sized).await.unwrap();
        let mut body = Vec::new();
        let err = receive_body(&mut reader, &mut body, &parsed).await.unwrap_err();
        assert!(matches!(err, CamlinkError::Truncated { expected: 100, actual: 40 }));
    }

    #[tokio::test]
    async fn until_close_reads_to_eof() {
        let header = TransferHeader::until_close("p.jpg");
        let mut wire = encode_header(&header).unwrap().to_vec();
        wire.extend_from_slice(&[1u8; 1000]);

        let mut reader = &wire[..];
        let parsed = read_header(&mut reader, TransferVariant::UntilClose)
            .await
            .unwrap();
        assert_eq!(parsed.filename, "p.jpg");
        assert_eq!(parsed.variant(), TransferVariant::UntilClose);
        let mut body = Vec::new();
        assert_eq!(receive_body(&mut reader, &mut body, &parsed).await.unwrap(), 1000);
    }

    #[tokio::test]
    async fn short_header_is_malformed() {
        let mut reader: &[u8] = &[0, 10, b'a'];
        let err = read_filename(&mut reader).await.unwrap_err();
        assert!(matches!(err, CamlinkError::MalformedHeader(_)));
    }
}
