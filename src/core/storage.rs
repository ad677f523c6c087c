use std::io::{self, Read, Write};

pub const MAGIC: &[u8; 8] = b"STRATA01";
pub const VERSION_V1: u32 = 1;
pub const VERSION_CURRENT: u32 = VERSION_V1;

/// A component that can write itself into (and rebuild itself from) a
/// checkpoint chunk payload.
///
/// Implementations must round-trip exactly: every `f32` is stored by bit
/// pattern, so `read(write(x)) == x`.
pub trait ImagePayload: Sized {
    fn write_image_payload<W: Write>(&self, w: &mut W) -> io::Result<()>;
    fn read_image_payload<R: Read>(r: &mut R) -> io::Result<Self>;
}

pub fn compress_lz4(input: &[u8]) -> Vec<u8> {
    lz4_flex::compress(input)
}

// An LZ4 block never decompresses to more than this many times its size.
const LZ4_MAX_RATIO: usize = 255;

pub fn decompress_lz4(input: &[u8], expected_size: usize) -> io::Result<Vec<u8>> {
    if expected_size > input.len().saturating_mul(LZ4_MAX_RATIO).saturating_add(16) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "declared lz4 size exceeds what the block can hold",
        ));
    }
    // Raw LZ4 block; the uncompressed size travels in the chunk header.
    let out = lz4_flex::decompress(input, expected_size)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "lz4 decompression failed"))?;
    if out.len() != expected_size {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "lz4 chunk size does not match its header",
        ));
    }
    Ok(out)
}

pub struct CountingWriter {
    written: usize,
}

impl CountingWriter {
    pub fn new() -> Self {
        Self { written: 0 }
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

impl Default for CountingWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for CountingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written = self.written.saturating_add(buf.len());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub fn write_u32_le<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn write_u64_le<W: Write>(w: &mut W, v: u64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn write_f32_le<W: Write>(w: &mut W, v: f32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn write_len<W: Write>(w: &mut W, len: usize) -> io::Result<()> {
    let len = u32::try_from(len)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "length exceeds u32"))?;
    write_u32_le(w, len)
}

pub fn write_bytes<W: Write>(w: &mut W, bytes: &[u8]) -> io::Result<()> {
    write_len(w, bytes.len())?;
    w.write_all(bytes)
}

pub fn write_string<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    write_bytes(w, s.as_bytes())
}

/// Length-prefixed `f32` vector.
pub fn write_f32_slice<W: Write>(w: &mut W, values: &[f32]) -> io::Result<()> {
    write_len(w, values.len())?;
    for &v in values {
        write_f32_le(w, v)?;
    }
    Ok(())
}

pub fn read_exact<const N: usize, R: Read>(r: &mut R) -> io::Result<[u8; N]> {
    let mut buf = [0u8; N];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn read_u32_le<R: Read>(r: &mut R) -> io::Result<u32> {
    Ok(u32::from_le_bytes(read_exact::<4, _>(r)?))
}

pub fn read_u64_le<R: Read>(r: &mut R) -> io::Result<u64> {
    Ok(u64::from_le_bytes(read_exact::<8, _>(r)?))
}

pub fn read_f32_le<R: Read>(r: &mut R) -> io::Result<f32> {
    Ok(f32::from_le_bytes(read_exact::<4, _>(r)?))
}

pub fn read_len<R: Read>(r: &mut R) -> io::Result<usize> {
    Ok(read_u32_le(r)? as usize)
}

pub fn read_bytes<R: Read>(r: &mut R) -> io::Result<Vec<u8>> {
    let n = read_len(r)?;
    let mut buf = Vec::new();
    r.take(n as u64).read_to_end(&mut buf)?;
    if buf.len() != n {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "truncated byte string",
        ));
    }
    Ok(buf)
}

pub fn read_string<R: Read>(r: &mut R) -> io::Result<String> {
    let bytes = read_bytes(r)?;
    String::from_utf8(bytes)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "invalid utf-8 string"))
}

pub fn read_f32_vec<R: Read>(r: &mut R) -> io::Result<Vec<f32>> {
    let n = read_len(r)?;
    // Grow as values arrive so a corrupt length cannot force a huge allocation.
    let mut out = Vec::with_capacity(n.min(1 << 16));
    for _ in 0..n {
        out.push(read_f32_le(r)?);
    }
    Ok(out)
}

pub fn write_chunk<W: Write>(w: &mut W, tag: [u8; 4], payload: &[u8]) -> io::Result<()> {
    w.write_all(&tag)?;
    write_len(w, payload.len())?;
    w.write_all(payload)
}

/// Write an LZ4 chunk: payload is compressed and preceded by the uncompressed length (u32).
///
/// Layout:
/// - tag: [u8;4]
/// - len: u32 (bytes following, including the 4-byte uncompressed length)
/// - uncompressed_len: u32
/// - compressed payload bytes
pub fn write_chunk_lz4<W: Write>(w: &mut W, tag: [u8; 4], payload: &[u8]) -> io::Result<()> {
    let compressed = compress_lz4(payload);
    let uncompressed_len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "chunk too large"))?;
    let total_len = 4u32
        .checked_add(
            u32::try_from(compressed.len())
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "chunk too large"))?,
        )
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "chunk too large"))?;

    w.write_all(&tag)?;
    write_u32_le(w, total_len)?;
    write_u32_le(w, uncompressed_len)?;
    w.write_all(&compressed)
}

/// Read the body of a chunk written by [`write_chunk_lz4`], given its declared length.
pub fn read_chunk_lz4_body<R: Read>(r: &mut R, len: u32) -> io::Result<Vec<u8>> {
    let mut take = r.take(len as u64);
    let uncompressed_len = read_u32_le(&mut take)? as usize;
    let mut compressed = Vec::with_capacity((len as usize).saturating_sub(4).min(1 << 20));
    take.read_to_end(&mut compressed)?;
    if compressed.len() + 4 != len as usize {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "truncated compressed chunk",
        ));
    }
    decompress_lz4(&compressed, uncompressed_len)
}

pub fn read_chunk_header<R: Read>(r: &mut R) -> io::Result<([u8; 4], u32)> {
    let tag = read_exact::<4, _>(r)?;
    let len = read_u32_le(r)?;
    Ok((tag, len))
}

/// Serialize a component payload into an in-memory buffer.
pub fn payload_bytes<T: ImagePayload>(value: &T) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    value.write_image_payload(&mut buf)?;
    Ok(buf)
}

/// Decode a component payload and require that every byte was consumed.
pub fn payload_from_bytes<T: ImagePayload>(bytes: &[u8]) -> io::Result<T> {
    let mut cursor = io::Cursor::new(bytes);
    let value = T::read_image_payload(&mut cursor)?;
    if cursor.position() as usize != bytes.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "trailing bytes after payload",
        ));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn f32_vector_keeps_bit_patterns() {
        let values = vec![0.0, -0.0, 1.0, f32::MIN_POSITIVE, 0.1 + 0.2];
        let mut buf = Vec::new();
        write_f32_slice(&mut buf, &values).unwrap();

        let back = read_f32_vec(&mut io::Cursor::new(buf)).unwrap();
        let bits: Vec<u32> = values.iter().map(|v| v.to_bits()).collect();
        let back_bits: Vec<u32> = back.iter().map(|v| v.to_bits()).collect();
        assert_eq!(bits, back_bits);
    }

    #[test]
    fn lz4_chunk_roundtrip() {
        let payload: Vec<u8> = (0..2048u32).map(|i| (i % 7) as u8).collect();
        let mut buf = Vec::new();
        write_chunk_lz4(&mut buf, *b"TEST", &payload).unwrap();

        let mut cursor = io::Cursor::new(buf);
        let (tag, len) = read_chunk_header(&mut cursor).unwrap();
        assert_eq!(&tag, b"TEST");
        let body = read_chunk_lz4_body(&mut cursor, len).unwrap();
        assert_eq!(body, payload);
    }

    #[test]
    fn truncated_lz4_chunk_is_an_error() {
        let payload = vec![9u8; 512];
        let mut buf = Vec::new();
        write_chunk_lz4(&mut buf, *b"TEST", &payload).unwrap();
        buf.truncate(buf.len() - 3);

        let mut cursor = io::Cursor::new(buf);
        let (_, len) = read_chunk_header(&mut cursor).unwrap();
        assert!(read_chunk_lz4_body(&mut cursor, len).is_err());
    }

    #[test]
    fn lz4_chunk_with_a_wrong_declared_size_is_an_error() {
        let payload: Vec<u8> = (0..1024u32).map(|i| (i % 13) as u8).collect();
        let mut buf = Vec::new();
        write_chunk_lz4(&mut buf, *b"TEST", &payload).unwrap();

        // tag (4) + len (4), then the declared uncompressed length.
        for declared in [u32::MAX, payload.len() as u32 + 10, payload.len() as u32 - 10] {
            let mut bad = buf.clone();
            bad[8..12].copy_from_slice(&declared.to_le_bytes());
            let mut cursor = io::Cursor::new(bad);
            let (_, len) = read_chunk_header(&mut cursor).unwrap();
            let err = read_chunk_lz4_body(&mut cursor, len).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        }
    }

    #[test]
    fn string_rejects_short_input() {
        let mut buf = Vec::new();
        write_u32_le(&mut buf, 10).unwrap();
        buf.extend_from_slice(b"abc");
        assert!(read_string(&mut io::Cursor::new(buf)).is_err());
    }

    #[test]
    fn counting_writer_counts() {
        let mut cw = CountingWriter::new();
        write_string(&mut cw, "hello").unwrap();
        assert_eq!(cw.written(), 4 + 5);
    }
}
