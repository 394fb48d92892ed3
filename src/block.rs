// Copyright 2025 Brian Langenberger
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! For handling WavPack block headers and whole blocks
//!
//! Every WavPack block begins with a 32 byte header,
//! always stored little-endian.
//!
//! | Bytes | Field | Meaning |
//! |------:|-------|---------|
//! | 4     | `"wvpk"` | block magic |
//! | 4     | `size` | block length, not including the first 8 bytes |
//! | 2     | `version` | stream format version |
//! | 1     | | high 8 bits of block index |
//! | 1     | | high 8 bits of total samples |
//! | 4     | | low 32 bits of total samples |
//! | 4     | | low 32 bits of block index |
//! | 4     | `block_samples` | samples in block, 0 for metadata-only blocks |
//! | 4     | `flags` | [block flags](`Flags`) |
//! | 4     | `crc` | checksum of decoded audio |

use crate::Error;
use crate::metadata::{MetadataId, write_sub_block};
use bitstream_io::{
    ByteRead, ByteReader, ByteWrite, ByteWriter, FromByteStream, LittleEndian, ToByteStream,
};

const BLOCK_MAGIC: &[u8; 4] = b"wvpk";

/// WavPack block flags
///
/// Besides single-bit flags, this holds several small fields
/// whose bits are packed into the same 32-bit word.
///
/// | Bits | Field |
/// |-----:|-------|
/// | 0-1  | bytes stored per sample, minus 1 |
/// | 13-17 | shift (unused low bits) |
/// | 18-22 | magnitude (significant bits, minus 1) |
/// | 23-26 | sample rate index |
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct Flags(u32);

impl Flags {
    /// Block holds a single channel
    pub const MONO: Flags = Flags(0x4);
    /// Hybrid (lossy) mode
    pub const HYBRID: Flags = Flags(0x8);
    /// Joint stereo
    pub const JOINT_STEREO: Flags = Flags(0x10);
    /// No-delay cross decorrelation
    pub const CROSS_DECORR: Flags = Flags(0x20);
    /// Noise shaping (hybrid mode only)
    pub const HYBRID_SHAPE: Flags = Flags(0x40);
    /// IEEE 32-bit floating point data
    pub const FLOAT_DATA: Flags = Flags(0x80);
    /// Extended integer handling
    pub const INT32_DATA: Flags = Flags(0x100);
    /// Bitrate noise (hybrid mode only)
    pub const HYBRID_BITRATE: Flags = Flags(0x200);
    /// Balance noise (hybrid stereo mode only)
    pub const HYBRID_BALANCE: Flags = Flags(0x400);
    /// First block of a multichannel cycle
    pub const INITIAL_BLOCK: Flags = Flags(0x800);
    /// Last block of a multichannel cycle
    pub const FINAL_BLOCK: Flags = Flags(0x1000);
    /// Block carries a checksum sub-block
    pub const HAS_CHECKSUM: Flags = Flags(0x1000_0000);
    /// IIR filter for negative noise shaping
    pub const NEW_SHAPING: Flags = Flags(0x2000_0000);
    /// Stereo block whose channels are identical
    pub const FALSE_STEREO: Flags = Flags(0x4000_0000);
    /// DSD audio
    pub const DSD: Flags = Flags(0x8000_0000);

    const BYTES_STORED_MASK: u32 = 0x3;
    const SHIFT_LSB: u32 = 13;
    const MAG_LSB: u32 = 18;
    const SRATE_LSB: u32 = 23;
    const FIVE_BITS: u32 = 0x1f;
    const FOUR_BITS: u32 = 0xf;

    /// Sample rate index meaning "not in the standard table"
    pub const UNKNOWN_SAMPLE_RATE: u32 = 15;

    /// Builds flags from raw bits
    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Returns raw bits
    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Whether all of `other`'s bits are set
    #[inline]
    pub fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Sets all of `other`'s bits
    #[inline]
    pub fn insert(&mut self, other: Flags) {
        self.0 |= other.0
    }

    /// Clears all of `other`'s bits
    #[inline]
    pub fn remove(&mut self, other: Flags) {
        self.0 &= !other.0
    }

    /// Bytes stored per sample, from 1 to 4
    #[inline]
    pub fn bytes_stored(self) -> u32 {
        (self.0 & Self::BYTES_STORED_MASK) + 1
    }

    /// Assigns bytes stored per sample, from 1 to 4
    pub fn set_bytes_stored(&mut self, bytes: u32) {
        debug_assert!((1..=4).contains(&bytes));
        self.0 = (self.0 & !Self::BYTES_STORED_MASK) | ((bytes - 1) & Self::BYTES_STORED_MASK);
    }

    /// Unused low bits per sample
    #[inline]
    pub fn shift(self) -> u32 {
        (self.0 >> Self::SHIFT_LSB) & Self::FIVE_BITS
    }

    /// Assigns unused low bits per sample
    pub fn set_shift(&mut self, shift: u32) {
        self.set_field(Self::SHIFT_LSB, Self::FIVE_BITS, shift)
    }

    /// Significant bits per sample, minus one
    #[inline]
    pub fn magnitude(self) -> u32 {
        (self.0 >> Self::MAG_LSB) & Self::FIVE_BITS
    }

    /// Assigns significant bits per sample, minus one
    pub fn set_magnitude(&mut self, magnitude: u32) {
        self.set_field(Self::MAG_LSB, Self::FIVE_BITS, magnitude)
    }

    /// Index into the standard sample rate table
    #[inline]
    pub fn sample_rate_index(self) -> u32 {
        (self.0 >> Self::SRATE_LSB) & Self::FOUR_BITS
    }

    /// Assigns index into the standard sample rate table
    pub fn set_sample_rate_index(&mut self, index: u32) {
        self.set_field(Self::SRATE_LSB, Self::FOUR_BITS, index)
    }

    fn set_field(&mut self, lsb: u32, mask: u32, value: u32) {
        self.0 = (self.0 & !(mask << lsb)) | ((value & mask) << lsb);
    }
}

impl std::ops::BitOr for Flags {
    type Output = Flags;

    #[inline]
    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for Flags {
    #[inline]
    fn bitor_assign(&mut self, rhs: Flags) {
        self.0 |= rhs.0
    }
}

/// A WavPack block header
///
/// # Example
///
/// ```
/// use bitstream_io::{ByteReader, ByteRead, LittleEndian};
/// use wavpack_blocks::block::{BlockHeader, Flags};
///
/// let data: &[u8] = &[
///     b'w', b'v', b'p', b'k',
///     0x18, 0x00, 0x00, 0x00,  // size
///     0x07, 0x04,              // version
///     0x00,                    // block index, high bits
///     0x00,                    // total samples, high bits
///     0x44, 0xac, 0x00, 0x00,  // total samples, low bits
///     0x00, 0x00, 0x00, 0x00,  // block index, low bits
///     0x00, 0x00, 0x00, 0x00,  // block samples
///     0x00, 0x00, 0x00, 0x00,  // flags
///     0x00, 0x00, 0x00, 0x00,  // CRC
/// ];
///
/// let mut r = ByteReader::endian(data, LittleEndian);
/// assert_eq!(
///     r.parse::<BlockHeader>().unwrap(),
///     BlockHeader {
///         size: 24,
///         version: 0x407,
///         total_samples: Some(44100),
///         block_index: 0,
///         block_samples: 0,
///         flags: Flags::default(),
///         crc: 0,
///     },
/// );
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlockHeader {
    /// Length of the whole block, minus 8
    pub size: u32,
    /// Stream format version
    pub version: u16,
    /// Total samples in the whole file, if known
    pub total_samples: Option<u64>,
    /// Index of the block's first sample
    pub block_index: u64,
    /// Samples in the block, per channel
    pub block_samples: u32,
    /// Block flags
    pub flags: Flags,
    /// Checksum of decoded audio
    pub crc: u32,
}

impl BlockHeader {
    /// Size of header, in bytes
    pub const SIZE: usize = 32;

    /// Largest block index the header can hold (2⁴⁰ - 1)
    pub const MAX_BLOCK_INDEX: u64 = (1 << 40) - 1;

    /// Largest total sample count the header can hold
    ///
    /// The 40-bit total skips every value whose low 32 bits
    /// would read as the "unknown" sentinel.
    pub const MAX_TOTAL_SAMPLES: u64 = 256 * 0xFFFF_FFFF - 1;

    /// Length of the whole block, including this header
    #[inline]
    pub fn block_len(&self) -> usize {
        self.size as usize + 8
    }

    /// Parses a header from the start of a block
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBlock`] if the block is too
    /// short or lacks the block magic.
    pub fn parse(block: &[u8]) -> Result<Self, Error> {
        block
            .get(..Self::SIZE)
            .ok_or(Error::InvalidBlock)
            .and_then(|header| ByteReader::endian(header, LittleEndian).parse())
    }

    /// Overwrites the start of a block with this header
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBlock`] if the block is too short.
    pub fn overwrite(&self, block: &mut [u8]) -> Result<(), Error> {
        let header = block.get_mut(..Self::SIZE).ok_or(Error::InvalidBlock)?;
        ByteWriter::endian(header, LittleEndian).build(self)
    }
}

impl FromByteStream for BlockHeader {
    type Error = Error;

    fn from_reader<R: ByteRead + ?Sized>(r: &mut R) -> Result<Self, Self::Error> {
        let mut magic = [0; 4];
        r.read_bytes(&mut magic)?;
        if &magic != BLOCK_MAGIC {
            return Err(Error::InvalidBlock);
        }

        let size = r.read::<u32>()?;
        if (size as usize) < Self::SIZE - 8 {
            return Err(Error::InvalidBlock);
        }

        let version = r.read::<u16>()?;
        let index_high = r.read::<u8>()?;
        let total_high = r.read::<u8>()?;
        let total_low = r.read::<u32>()?;
        let index_low = r.read::<u32>()?;

        Ok(Self {
            size,
            version,
            total_samples: (total_low != u32::MAX).then(|| {
                u64::from(total_low) + (u64::from(total_high) << 32) - u64::from(total_high)
            }),
            block_index: u64::from(index_low) | (u64::from(index_high) << 32),
            block_samples: r.read()?,
            flags: Flags(r.read()?),
            crc: r.read()?,
        })
    }
}

impl ToByteStream for BlockHeader {
    type Error = Error;

    fn to_writer<W: ByteWrite + ?Sized>(&self, w: &mut W) -> Result<(), Self::Error> {
        if self.block_index > Self::MAX_BLOCK_INDEX {
            return Err(Error::ExcessiveBlockIndex);
        }

        let (total_low, total_high) = match self.total_samples {
            None => (u32::MAX, 0),
            Some(total) if total <= Self::MAX_TOTAL_SAMPLES => {
                let adjusted = total + total / 0xFFFF_FFFF;
                (adjusted as u32, (adjusted >> 32) as u8)
            }
            Some(_) => return Err(Error::ExcessiveTotalSamples),
        };

        w.write_bytes(BLOCK_MAGIC)?;
        w.write(self.size)?;
        w.write(self.version)?;
        w.write((self.block_index >> 32) as u8)?;
        w.write(total_high)?;
        w.write(total_low)?;
        w.write(self.block_index as u32)?;
        w.write(self.block_samples)?;
        w.write(self.flags.0)?;
        w.write(self.crc)?;
        Ok(())
    }
}

/// An output region for one block being built
///
/// The header's `size` field is maintained automatically
/// as sub-blocks are added.
/// Adding a sub-block which would take the block past
/// its capacity fails with [`Error::BlockOverflow`].
#[derive(Debug)]
pub struct BlockBuffer {
    header: BlockHeader,
    data: Vec<u8>,
    capacity: usize,
}

impl BlockBuffer {
    /// Starts an empty block with the given header and total capacity in bytes
    pub fn new(header: BlockHeader, capacity: usize) -> Self {
        Self {
            header: BlockHeader {
                size: (BlockHeader::SIZE - 8) as u32,
                ..header
            },
            data: Vec::new(),
            capacity,
        }
    }

    /// The block's header
    #[inline]
    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    /// The block's header, for updating flags or CRC
    #[inline]
    pub fn header_mut(&mut self) -> &mut BlockHeader {
        &mut self.header
    }

    /// Total block length so far, including header
    #[inline]
    pub fn len(&self) -> usize {
        BlockHeader::SIZE + self.data.len()
    }

    /// Whether no sub-blocks have been added
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes still available before the block overflows
    #[inline]
    pub fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.len())
    }

    /// All sub-blocks added so far
    #[inline]
    pub fn sub_block_data(&self) -> &[u8] {
        &self.data
    }

    /// Appends a metadata sub-block
    ///
    /// # Errors
    ///
    /// Returns [`Error::BlockOverflow`] if the sub-block
    /// doesn't fit in the block's remaining space.
    pub fn add_sub_block(&mut self, id: MetadataId, data: &[u8]) -> Result<(), Error> {
        let len = crate::metadata::encoded_len(data.len());
        if len > self.remaining() {
            return Err(Error::BlockOverflow);
        }
        let size = self
            .header
            .size
            .checked_add(u32::try_from(len).map_err(|_| Error::BlockOverflow)?)
            .ok_or(Error::BlockOverflow)?;
        write_sub_block(&mut ByteWriter::endian(&mut self.data, LittleEndian), id, data)?;
        self.header.size = size;
        Ok(())
    }

    /// Serializes the whole block to wire format
    pub fn into_bytes(self) -> Result<Vec<u8>, Error> {
        let mut block = Vec::with_capacity(self.len());
        ByteWriter::endian(&mut block, LittleEndian).build(&self.header)?;
        block.extend(self.data);
        Ok(block)
    }
}

/// Reads one whole block from the given reader
///
/// Returns `Ok(None)` at a clean end of stream.
///
/// # Errors
///
/// Returns an I/O error if the stream ends partway through
/// a block, or [`Error::InvalidBlock`] if the header is invalid.
pub fn read_block<R: std::io::Read>(mut r: R) -> Result<Option<Vec<u8>>, Error> {
    use std::io::Read;

    let mut header = [0; BlockHeader::SIZE];

    let mut filled = 0;
    while filled < header.len() {
        match r.read(&mut header[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    match filled {
        0 => Ok(None),
        BlockHeader::SIZE => {
            let parsed = BlockHeader::parse(&header)?;
            let body = (parsed.block_len() - BlockHeader::SIZE) as u64;

            // declared size may exceed the data actually present
            let mut block = header.to_vec();
            if r.by_ref().take(body).read_to_end(&mut block)? as u64 != body {
                return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
            }
            Ok(Some(block))
        }
        _ => Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into()),
    }
}

/// An iterator of whole WavPack blocks
pub struct BlockIterator<R: std::io::Read> {
    reader: R,
    failed: bool,
}

impl<R: std::io::Read> Iterator for BlockIterator<R> {
    type Item = Result<Vec<u8>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        match read_block(self.reader.by_ref()) {
            Ok(block) => block.map(Ok),
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

/// Returns iterator of blocks from the given reader
///
/// The iterator stops after the first error.
///
/// # Example
///
/// ```
/// use wavpack_blocks::block::{BlockBuffer, BlockHeader, Flags, read_blocks};
///
/// let header = BlockHeader {
///     size: 0,
///     version: 0x407,
///     total_samples: None,
///     block_index: 0,
///     block_samples: 0,
///     flags: Flags::default(),
///     crc: 0,
/// };
///
/// let mut file = vec![];
/// file.extend(BlockBuffer::new(header.clone(), 1024).into_bytes().unwrap());
/// file.extend(BlockBuffer::new(header.clone(), 1024).into_bytes().unwrap());
///
/// let blocks = read_blocks(file.as_slice()).collect::<Result<Vec<_>, _>>().unwrap();
/// assert_eq!(blocks.len(), 2);
/// assert!(blocks.iter().all(|b| b.len() == BlockHeader::SIZE));
/// ```
pub fn read_blocks<R: std::io::Read>(reader: R) -> BlockIterator<R> {
    BlockIterator {
        reader,
        failed: false,
    }
}

#[test]
fn test_total_samples_field() {
    fn header(total_samples: Option<u64>) -> BlockHeader {
        BlockHeader {
            size: 24,
            version: 0x407,
            total_samples,
            block_index: 0x12_3456_789a,
            block_samples: 0,
            flags: Flags::default(),
            crc: 0,
        }
    }

    for total in [
        None,
        Some(0),
        Some(1),
        Some(0xFFFF_FFFE),
        Some(0xFFFF_FFFF),
        Some(0x1_0000_0000),
        Some(0x1_FFFF_FFFD),
        Some(0x1_FFFF_FFFE),
        Some(BlockHeader::MAX_TOTAL_SAMPLES),
    ] {
        let mut bytes = [0; BlockHeader::SIZE];
        header(total).overwrite(&mut bytes).unwrap();
        // the low 32 bits only read as "unknown" when unknown
        assert_eq!(total.is_none(), bytes[12..16] == [0xFF; 4]);
        assert_eq!(BlockHeader::parse(&bytes).unwrap(), header(total));
    }

    let mut bytes = [0; BlockHeader::SIZE];
    assert!(matches!(
        header(Some(BlockHeader::MAX_TOTAL_SAMPLES + 1)).overwrite(&mut bytes),
        Err(Error::ExcessiveTotalSamples)
    ));
}

#[test]
fn test_flag_fields() {
    let mut flags = Flags::MONO | Flags::INITIAL_BLOCK;
    flags.set_bytes_stored(3);
    flags.set_shift(4);
    flags.set_magnitude(23);
    flags.set_sample_rate_index(9);
    assert_eq!(flags.bytes_stored(), 3);
    assert_eq!(flags.shift(), 4);
    assert_eq!(flags.magnitude(), 23);
    assert_eq!(flags.sample_rate_index(), 9);
    assert!(flags.contains(Flags::MONO));
    flags.remove(Flags::MONO);
    assert!(!flags.contains(Flags::MONO));
    assert!(flags.contains(Flags::INITIAL_BLOCK));
}

#[test]
fn test_read_truncated_block() {
    let mut file = vec![0; BlockHeader::SIZE + 16];
    BlockHeader {
        size: u32::MAX,
        version: 0x407,
        total_samples: None,
        block_index: 0,
        block_samples: 0,
        flags: Flags::default(),
        crc: 0,
    }
    .overwrite(&mut file)
    .unwrap();

    // declared length far exceeds the data available
    assert!(matches!(
        read_block(file.as_slice()),
        Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof
    ));

    let mut header = BlockHeader::parse(&file).unwrap();
    header.size = (file.len() - 8) as u32;
    header.overwrite(&mut file).unwrap();
    assert_eq!(read_block(file.as_slice()).unwrap(), Some(file.clone()));
}
