// Copyright 2025 Brian Langenberger
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! For synthesizing RIFF WAVE headers
//!
//! When the caller supplies no wrapper of its own,
//! the encoder stores a generated RIFF WAVE header
//! so the audio can be restored to a valid `.wav` file.
//!
//! Classic RIFF headers carry a 36 byte `junk` chunk
//! which RF64 headers replace with a `ds64` chunk of the same size,
//! so a header can switch between the two when back-patched
//! without changing its length.
//!
//! | Chunk | RIFF | RF64 |
//! |-------|-----:|-----:|
//! | `RIFF`/`RF64` + `WAVE` | 12 | 12 |
//! | `junk` | 36 | |
//! | `ds64` | | 36 |
//! | `fmt ` | 24 or 48 | 24 or 48 |
//! | `data` header | 8 | 8 |

use crate::Error;
use crate::config::Configuration;
use arrayvec::ArrayVec;
use bitstream_io::{ByteWrite, ByteWriter, LittleEndian, ToByteStream};

/// Largest header we may generate, in bytes
pub const MAX_HEADER_SIZE: usize = 128;

/// Data size beyond which an RF64 header is generated
pub const RF64_THRESHOLD: u64 = 0xFF00_0000;

// total samples assumed when the real total is unknown,
// divided by bytes per sample frame
const PLACEHOLDER_BYTES: u64 = 0x7FFF_F000;

const WAVE_FORMAT_PCM: u16 = 1;
const WAVE_FORMAT_IEEE_FLOAT: u16 = 3;
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

const RIFF_HEADER_SIZE: u64 = 12;
const CHUNK_HEADER_SIZE: u64 = 8;
const PADDING_SIZE: u64 = 36;
const FMT_SIZE: u32 = 16;
const FMT_EXTENSIBLE_SIZE: u32 = 40;

// remainder of KSDATAFORMAT_SUBTYPE GUID following its format tag
const SUBTYPE_GUID_TAIL: [u8; 14] = [
    0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0xaa, 0x00, 0x38, 0x9b, 0x71,
];

/// Stream parameters needed to generate a RIFF WAVE header
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RiffFormat {
    /// Samples per second
    pub sample_rate: u32,
    /// Total channel count
    pub channels: u16,
    /// Microsoft channel mask
    pub channel_mask: u32,
    /// Significant bits per sample
    pub bits_per_sample: u16,
    /// Bytes per sample
    pub bytes_per_sample: u16,
    /// Float normalization exponent, for floating point samples
    pub float_norm_exp: Option<u8>,
    /// Bytes of wrapper trailer following the audio data
    pub trailer_bytes: u64,
}

impl From<&Configuration> for RiffFormat {
    fn from(config: &Configuration) -> Self {
        Self {
            sample_rate: config.sample_rate(),
            channels: config.channels() as u16,
            channel_mask: config.channel_mask().into(),
            bits_per_sample: config.bits_per_sample() as u16,
            bytes_per_sample: config.bytes_per_sample() as u16,
            float_norm_exp: config.float_norm_exp(),
            trailer_bytes: 0,
        }
    }
}

impl RiffFormat {
    fn block_align(&self) -> u16 {
        self.bytes_per_sample * self.channels
    }

    fn is_extensible(&self) -> bool {
        self.channels > 2 || self.channel_mask != 5 - u32::from(self.channels)
    }

    /// Generates a RIFF WAVE header for the given number of samples
    ///
    /// If the total is unknown, a large placeholder total is used
    /// so that the header has the same length it will have
    /// once the actual total is known.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NonNormalizedFloat`] for floating
    /// point samples not normalized to ±1.0.
    ///
    /// # Example
    ///
    /// ```
    /// use wavpack_blocks::wrapper::RiffFormat;
    ///
    /// let format = RiffFormat {
    ///     sample_rate: 44100,
    ///     channels: 2,
    ///     channel_mask: 0b11,
    ///     bits_per_sample: 16,
    ///     bytes_per_sample: 2,
    ///     float_norm_exp: None,
    ///     trailer_bytes: 0,
    /// };
    ///
    /// let header = format.create(Some(44100)).unwrap();
    /// assert_eq!(header.len(), 80);
    /// assert_eq!(&header[0..4], b"RIFF");
    /// assert_eq!(&header[8..12], b"WAVE");
    /// assert_eq!(&header[72..76], b"data");
    /// assert_eq!(&header[76..80], &(44100u32 * 4).to_le_bytes());
    /// ```
    pub fn create(&self, total_samples: Option<u64>) -> Result<ArrayVec<u8, MAX_HEADER_SIZE>, Error> {
        let format_tag = match self.float_norm_exp {
            Some(127) => WAVE_FORMAT_IEEE_FLOAT,
            Some(_) => return Err(Error::NonNormalizedFloat),
            None => WAVE_FORMAT_PCM,
        };

        let frame_bytes = u64::from(self.block_align());
        let total_samples =
            total_samples.unwrap_or_else(|| PLACEHOLDER_BYTES / frame_bytes.max(1));
        let data_bytes = total_samples * frame_bytes;
        let rf64 = data_bytes > RF64_THRESHOLD;

        let fmt = WaveFormat {
            sample_rate: self.sample_rate,
            channels: self.channels,
            block_align: self.block_align(),
            bits_per_sample: self.bits_per_sample,
            bytes_per_sample: self.bytes_per_sample,
            channel_mask: self.channel_mask,
            extensible: self.is_extensible(),
            format_tag,
        };

        let riff_bytes = RIFF_HEADER_SIZE
            + u64::from(fmt.size())
            + CHUNK_HEADER_SIZE
            + data_bytes
            + self.trailer_bytes
            + PADDING_SIZE;

        let mut header = ArrayVec::new();
        let mut w = ByteWriter::endian(&mut header, LittleEndian);

        if rf64 {
            w.build(&RiffHeader {
                id: *b"RF64",
                size: u32::MAX,
            })?;
            w.build(&Ds64 {
                riff_size: riff_bytes,
                data_size: data_bytes,
                sample_count: total_samples,
            })?;
        } else {
            w.build(&RiffHeader {
                id: *b"RIFF",
                size: riff_bytes as u32,
            })?;
            w.build(&Junk)?;
        }

        w.build(&fmt)?;
        w.build(&ChunkHeader {
            id: *b"data",
            size: if rf64 { u32::MAX } else { data_bytes as u32 },
        })?;

        Ok(header)
    }
}

struct ChunkHeader {
    id: [u8; 4],
    size: u32,
}

impl ToByteStream for ChunkHeader {
    type Error = std::io::Error;

    fn to_writer<W: ByteWrite + ?Sized>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_bytes(&self.id)?;
        w.write(self.size)
    }
}

struct RiffHeader {
    id: [u8; 4],
    size: u32,
}

impl ToByteStream for RiffHeader {
    type Error = std::io::Error;

    fn to_writer<W: ByteWrite + ?Sized>(&self, w: &mut W) -> std::io::Result<()> {
        w.build(&ChunkHeader {
            id: self.id,
            size: self.size,
        })?;
        w.write_bytes(b"WAVE")
    }
}

// reserves space for a ds64 chunk
struct Junk;

impl ToByteStream for Junk {
    type Error = std::io::Error;

    fn to_writer<W: ByteWrite + ?Sized>(&self, w: &mut W) -> std::io::Result<()> {
        w.build(&ChunkHeader {
            id: *b"junk",
            size: (PADDING_SIZE - CHUNK_HEADER_SIZE) as u32,
        })?;
        w.pad((PADDING_SIZE - CHUNK_HEADER_SIZE) as u32)
    }
}

struct Ds64 {
    riff_size: u64,
    data_size: u64,
    sample_count: u64,
}

impl ToByteStream for Ds64 {
    type Error = std::io::Error;

    fn to_writer<W: ByteWrite + ?Sized>(&self, w: &mut W) -> std::io::Result<()> {
        w.build(&ChunkHeader {
            id: *b"ds64",
            size: (PADDING_SIZE - CHUNK_HEADER_SIZE) as u32,
        })?;
        w.write(self.riff_size)?;
        w.write(self.data_size)?;
        w.write(self.sample_count)?;
        // table length
        w.write(0u32)
    }
}

struct WaveFormat {
    format_tag: u16,
    sample_rate: u32,
    channels: u16,
    block_align: u16,
    bits_per_sample: u16,
    bytes_per_sample: u16,
    channel_mask: u32,
    extensible: bool,
}

impl WaveFormat {
    fn size(&self) -> u32 {
        if self.extensible {
            FMT_EXTENSIBLE_SIZE
        } else {
            FMT_SIZE
        }
    }
}

impl ToByteStream for WaveFormat {
    type Error = std::io::Error;

    fn to_writer<W: ByteWrite + ?Sized>(&self, w: &mut W) -> std::io::Result<()> {
        w.build(&ChunkHeader {
            id: *b"fmt ",
            size: self.size(),
        })?;

        w.write(if self.extensible {
            WAVE_FORMAT_EXTENSIBLE
        } else {
            self.format_tag
        })?;
        w.write(self.channels)?;
        w.write(self.sample_rate)?;
        w.write(self.sample_rate.wrapping_mul(u32::from(self.block_align)))?;
        w.write(self.block_align)?;

        if self.extensible {
            w.write(self.bytes_per_sample * 8)?;
            // cbSize
            w.write(22u16)?;
            w.write(self.bits_per_sample)?;
            w.write(self.channel_mask)?;
            w.write(self.format_tag)?;
            w.write_bytes(&SUBTYPE_GUID_TAIL)
        } else {
            w.write(self.bits_per_sample)
        }
    }
}

#[cfg(test)]
fn test_format(channels: u16, channel_mask: u32) -> RiffFormat {
    RiffFormat {
        sample_rate: 44100,
        channels,
        channel_mask,
        bits_per_sample: 16,
        bytes_per_sample: 2,
        float_norm_exp: None,
        trailer_bytes: 0,
    }
}

#[test]
fn test_rf64_threshold() {
    let format = test_format(2, 0b11);

    // exactly at the threshold stays classic RIFF
    let header = format.create(Some(RF64_THRESHOLD / 4)).unwrap();
    assert_eq!(&header[0..4], b"RIFF");
    assert_eq!(&header[12..16], b"junk");
    assert_eq!(
        &header[76..80],
        &(RF64_THRESHOLD as u32).to_le_bytes()
    );

    let riff_len = header.len();

    let header = format.create(Some(RF64_THRESHOLD / 4 + 1)).unwrap();
    assert_eq!(&header[0..4], b"RF64");
    assert_eq!(&header[4..8], &[0xFF; 4]);
    assert_eq!(&header[12..16], b"ds64");
    assert_eq!(&header[16..20], &28u32.to_le_bytes());
    assert_eq!(&header[28..36], &(RF64_THRESHOLD + 4).to_le_bytes());
    assert_eq!(&header[36..44], &(RF64_THRESHOLD / 4 + 1).to_le_bytes());
    assert_eq!(&header[76..80], &[0xFF; 4]);

    // switching formats never changes the header's length
    assert_eq!(header.len(), riff_len);
}

#[test]
fn test_riff_sizes() {
    let mut format = test_format(2, 0b11);
    format.trailer_bytes = 10;

    let header = format.create(Some(1000)).unwrap();
    assert_eq!(header.len(), 80);
    // everything after the first 8 bytes, plus data and trailer
    assert_eq!(&header[4..8], &(72u32 + 4000 + 10).to_le_bytes());
    assert_eq!(&header[48..52], b"fmt ");
    assert_eq!(&header[52..56], &16u32.to_le_bytes());
    // PCM format tag
    assert_eq!(&header[56..58], &[1, 0]);
    // bytes per second
    assert_eq!(&header[64..68], &(44100u32 * 4).to_le_bytes());

    // unknown totals get a placeholder that fits in 2GB
    let header = format.create(None).unwrap();
    assert_eq!(
        &header[76..80],
        &((PLACEHOLDER_BYTES / 4 * 4) as u32).to_le_bytes()
    );
}

#[test]
fn test_extensible_format() {
    // mono with an unusual mask
    let header = test_format(1, 0b1).create(Some(10)).unwrap();
    assert_eq!(header.len(), 104);
    assert_eq!(&header[52..56], &40u32.to_le_bytes());
    assert_eq!(&header[56..58], &[0xFE, 0xFF]);
    assert_eq!(&header[72..74], &22u16.to_le_bytes());
    assert_eq!(&header[76..80], &1u32.to_le_bytes());
    assert_eq!(&header[80..82], &1u16.to_le_bytes());
    assert_eq!(&header[82..96], &SUBTYPE_GUID_TAIL);
    assert_eq!(&header[96..100], b"data");

    // canonical mono doesn't need it
    assert_eq!(test_format(1, 0b100).create(Some(10)).unwrap().len(), 80);

    // neither does canonical stereo, but 3 channels always do
    assert_eq!(test_format(2, 0b11).create(Some(10)).unwrap().len(), 80);
    assert_eq!(test_format(3, 0b111).create(Some(10)).unwrap().len(), 104);
}

#[test]
fn test_float_format() {
    let mut format = test_format(2, 0b11);
    format.bits_per_sample = 32;
    format.bytes_per_sample = 4;
    format.float_norm_exp = Some(127);
    let header = format.create(Some(10)).unwrap();
    assert_eq!(&header[56..58], &[3, 0]);

    format.float_norm_exp = Some(150);
    assert!(matches!(format.create(Some(10)), Err(Error::NonNormalizedFloat)));
}
