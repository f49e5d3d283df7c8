use tracing::debug;
use crate::compression::codecs;
use crate::core::error::Result;

/// Payloads shorter than this are always stored raw
pub const COMPRESSION_THRESHOLD: usize = 50;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Frame tag: first byte of every stored value.
///
/// Tags 0 and 1 double as the legacy two-state format (raw / gzip), so old
/// frames decode without a version switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CodecTag {
    None = 0,
    Gzip = 1,
    Zlib = 2,
    Deflate = 3,
    Lzw = 4,
}

impl CodecTag {
    /// Order in which codecs compete; earlier wins ties
    pub const CANDIDATES: [CodecTag; 4] = [
        CodecTag::Gzip,
        CodecTag::Zlib,
        CodecTag::Deflate,
        CodecTag::Lzw,
    ];

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(CodecTag::None),
            1 => Some(CodecTag::Gzip),
            2 => Some(CodecTag::Zlib),
            3 => Some(CodecTag::Deflate),
            4 => Some(CodecTag::Lzw),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Tags a pre-5-codec writer could have produced
    pub fn is_legacy(self) -> bool {
        matches!(self, CodecTag::None | CodecTag::Gzip)
    }

    fn compress(self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            CodecTag::None => Ok(data.to_vec()),
            CodecTag::Gzip => codecs::compress_gzip(data),
            CodecTag::Zlib => codecs::compress_zlib(data),
            CodecTag::Deflate => codecs::compress_deflate(data),
            CodecTag::Lzw => codecs::compress_lzw(data),
        }
    }

    fn decompress_into(self, data: &[u8], out: &mut Vec<u8>) -> Result<()> {
        match self {
            CodecTag::None => {
                out.extend_from_slice(data);
                Ok(())
            }
            CodecTag::Gzip => codecs::decompress_gzip(data, out),
            CodecTag::Zlib => codecs::decompress_zlib(data, out),
            CodecTag::Deflate => codecs::decompress_deflate(data, out),
            CodecTag::Lzw => codecs::decompress_lzw(data, out),
        }
    }
}

/// How a frame was decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    /// Well-formed frame, payload fully decoded
    Clean,
    /// Untagged gzip stream recognised by its magic number
    Recovered,
    /// Decoding failed; the bytes are the frame minus its tag byte (or the
    /// input unchanged if it carried no known tag) and may be garbage
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub data: Vec<u8>,
    pub status: DecodeStatus,
    pub tag: Option<CodecTag>,
}

impl Decoded {
    pub fn is_degraded(&self) -> bool {
        self.status == DecodeStatus::Degraded
    }
}

/// Frame `raw` with the default threshold
pub fn encode(raw: &[u8]) -> Vec<u8> {
    encode_with_threshold(raw, COMPRESSION_THRESHOLD)
}

/// Frame `raw`, trying every codec when it is at least `threshold` bytes.
///
/// Never fails: a codec that errors simply drops out of the competition.
pub fn encode_with_threshold(raw: &[u8], threshold: usize) -> Vec<u8> {
    if raw.len() < threshold {
        return frame(CodecTag::None, raw);
    }

    let mut best_tag = CodecTag::None;
    let mut best: Option<Vec<u8>> = None;
    let mut best_len = raw.len();

    for tag in CodecTag::CANDIDATES {
        match tag.compress(raw) {
            Ok(compressed) if compressed.len() < best_len => {
                best_len = compressed.len();
                best_tag = tag;
                best = Some(compressed);
            }
            Ok(_) => {}
            Err(e) => debug!(codec = ?tag, error = %e, "codec dropped from selection"),
        }
    }

    match best {
        Some(payload) => frame(best_tag, &payload),
        None => frame(CodecTag::None, raw),
    }
}

fn frame(tag: CodecTag, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 1);
    out.push(tag.as_byte());
    out.extend_from_slice(payload);
    out
}

/// Decode a frame into a fresh buffer
pub fn decode(frame: &[u8]) -> Decoded {
    let mut data = Vec::with_capacity(frame.len().saturating_mul(2));
    let (status, tag) = decode_into(frame, &mut data);
    Decoded { data, status, tag }
}

/// Decode and drop the status; degraded reads come back as best-effort bytes
pub fn decode_lossy(frame: &[u8]) -> Vec<u8> {
    decode(frame).data
}

/// Decode `frame` into `out` (cleared first), reusing its allocation
pub fn decode_into(frame: &[u8], out: &mut Vec<u8>) -> (DecodeStatus, Option<CodecTag>) {
    out.clear();
    if frame.is_empty() {
        return (DecodeStatus::Clean, None);
    }

    let payload = &frame[1..];
    if let Some(tag) = CodecTag::from_byte(frame[0]) {
        return match tag.decompress_into(payload, out) {
            Ok(()) => (DecodeStatus::Clean, Some(tag)),
            Err(e) => {
                debug!(codec = ?tag, error = %e, "frame decode failed, returning payload as-is");
                out.clear();
                out.extend_from_slice(payload);
                (DecodeStatus::Degraded, Some(tag))
            }
        };
    }

    // No known tag. A bare gzip stream still gets a chance.
    if frame.starts_with(&GZIP_MAGIC) && codecs::decompress_gzip(frame, out).is_ok() {
        return (DecodeStatus::Recovered, None);
    }

    out.clear();
    out.extend_from_slice(frame);
    (DecodeStatus::Degraded, None)
}

/// Tag of a stored frame, if it carries a known one
pub fn frame_tag(frame: &[u8]) -> Option<CodecTag> {
    frame.first().and_then(|b| CodecTag::from_byte(*b))
}
