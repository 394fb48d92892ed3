// Copyright 2025 Brian Langenberger
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! For handling the metadata sub-blocks of a WavPack block
//!
//! Everything in a block after its header is a sequence
//! of tagged sub-blocks, each padded to an even length.
//!
//! | Bytes | Field | Meaning |
//! |------:|-------|---------|
//! | 1     | `id`  | low 6 bits are the ID, plus two flag bits |
//! | 1 or 3 | `words` | payload length in 16-bit words, little-endian |
//! | `words` × 2 | `data` | payload plus a zero pad byte if its length is odd |
//!
//! The ID byte's `0x40` bit indicates an odd payload length
//! (the final pad byte isn't part of the payload)
//! and its `0x80` bit indicates a 3 byte length field,
//! which is used for payloads longer than 510 bytes.

use crate::Error;
use crate::block::BlockHeader;
use bitstream_io::{ByteRead, ByteReader, ByteWrite, FromByteStream, LittleEndian, ToByteStream};
use std::ops::Range;

const ID_UNIQUE: u8 = 0x3f;
const ID_ODD_SIZE: u8 = 0x40;
const ID_LARGE: u8 = 0x80;

const SMALL_MAX: usize = 510;
const LARGE_MAX_WORDS: u32 = (1 << 24) - 1;

/// A 6-bit metadata sub-block identifier
///
/// IDs with the [`MetadataId::OPTIONAL_DATA`] bit set
/// may be skipped by decoders that don't recognize them.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct MetadataId(u8);

impl MetadataId {
    /// Bit marking data decoders may safely ignore
    pub const OPTIONAL_DATA: u8 = 0x20;

    /// Placeholder with no meaning
    pub const DUMMY: MetadataId = MetadataId(0x0);
    /// Encoder information
    pub const ENCODER_INFO: MetadataId = MetadataId(0x1);
    /// Main compressed audio bitstream
    pub const WV_BITSTREAM: MetadataId = MetadataId(0xa);
    /// Correction file bitstream
    pub const WVC_BITSTREAM: MetadataId = MetadataId(0xb);
    /// Extended-precision bitstream for floats and large integers
    pub const WVX_BITSTREAM: MetadataId = MetadataId(0xc);
    /// Channel count and mask
    pub const CHANNEL_INFO: MetadataId = MetadataId(0xd);
    /// DSD audio bitstream
    pub const DSD_BLOCK: MetadataId = MetadataId(0xe);

    /// Wrapper header, such as a RIFF WAVE file's leading chunks
    pub const RIFF_HEADER: MetadataId = MetadataId(Self::OPTIONAL_DATA | 0x1);
    /// Wrapper trailer, such as a RIFF WAVE file's trailing chunks
    pub const RIFF_TRAILER: MetadataId = MetadataId(Self::OPTIONAL_DATA | 0x2);
    /// Wrapper header for non-WAV formats
    pub const ALT_HEADER: MetadataId = MetadataId(Self::OPTIONAL_DATA | 0x3);
    /// Wrapper trailer for non-WAV formats
    pub const ALT_TRAILER: MetadataId = MetadataId(Self::OPTIONAL_DATA | 0x4);
    /// Encoder configuration
    pub const CONFIG_BLOCK: MetadataId = MetadataId(Self::OPTIONAL_DATA | 0x5);
    /// MD5 of the original audio
    pub const MD5_CHECKSUM: MetadataId = MetadataId(Self::OPTIONAL_DATA | 0x6);
    /// Non-standard sample rate
    pub const SAMPLE_RATE: MetadataId = MetadataId(Self::OPTIONAL_DATA | 0x7);
    /// Original file's extension
    pub const ALT_EXTENSION: MetadataId = MetadataId(Self::OPTIONAL_DATA | 0x8);
    /// MD5 of the original audio, for files older decoders can't verify
    pub const ALT_MD5_CHECKSUM: MetadataId = MetadataId(Self::OPTIONAL_DATA | 0x9);
    /// Extended encoder configuration
    pub const NEW_CONFIG_BLOCK: MetadataId = MetadataId(Self::OPTIONAL_DATA | 0xa);
    /// Non-Microsoft channel identities
    pub const CHANNEL_IDENTITIES: MetadataId = MetadataId(Self::OPTIONAL_DATA | 0xb);
    /// Checksum of the block itself
    pub const BLOCK_CHECKSUM: MetadataId = MetadataId(Self::OPTIONAL_DATA | 0xf);

    /// Builds ID from the given value, which must fit in 6 bits
    #[inline]
    pub const fn new(id: u8) -> Option<Self> {
        if id & !ID_UNIQUE == 0 {
            Some(Self(id))
        } else {
            None
        }
    }

    /// Returns our ID value
    #[inline]
    pub const fn get(self) -> u8 {
        self.0
    }

    /// Whether decoders may ignore this sub-block
    #[inline]
    pub const fn is_optional(self) -> bool {
        self.0 & Self::OPTIONAL_DATA != 0
    }
}

impl std::fmt::Display for MetadataId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "0x{:02x}", self.0)
    }
}

/// A sub-block's framing, preceding its payload
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct SubBlockHeader {
    id: MetadataId,
    // payload length in bytes, not including any pad byte
    len: u32,
}

impl SubBlockHeader {
    fn new(id: MetadataId, len: usize) -> Result<Self, Error> {
        u32::try_from(len)
            .ok()
            .filter(|len| len.div_ceil(2) <= LARGE_MAX_WORDS)
            .map(|len| Self { id, len })
            .ok_or(Error::BlockOverflow)
    }

    #[inline]
    fn is_large(&self) -> bool {
        self.len as usize > SMALL_MAX
    }

    #[inline]
    fn is_odd(&self) -> bool {
        self.len % 2 == 1
    }

    // payload bytes on the wire, including any pad byte
    #[inline]
    fn padded_len(&self) -> usize {
        self.len as usize + (self.len % 2) as usize
    }
}

impl FromByteStream for SubBlockHeader {
    type Error = Error;

    fn from_reader<R: ByteRead + ?Sized>(r: &mut R) -> Result<Self, Self::Error> {
        let tag = r.read::<u8>()?;
        let mut words = u32::from(r.read::<u8>()?);
        if tag & ID_LARGE != 0 {
            words |= u32::from(r.read::<u8>()?) << 8;
            words |= u32::from(r.read::<u8>()?) << 16;
        }

        Ok(Self {
            id: MetadataId(tag & ID_UNIQUE),
            len: (words * 2)
                .checked_sub(u32::from(tag & ID_ODD_SIZE != 0))
                .ok_or(Error::InvalidBlock)?,
        })
    }
}

impl ToByteStream for SubBlockHeader {
    type Error = std::io::Error;

    fn to_writer<W: ByteWrite + ?Sized>(&self, w: &mut W) -> Result<(), Self::Error> {
        let words = self.len.div_ceil(2);
        let mut tag = self.id.0;
        if self.is_odd() {
            tag |= ID_ODD_SIZE;
        }

        if self.is_large() {
            w.write(tag | ID_LARGE)?;
            w.write(words as u8)?;
            w.write((words >> 8) as u8)?;
            w.write((words >> 16) as u8)
        } else {
            w.write(tag)?;
            w.write(words as u8)
        }
    }
}

/// Size of a serialized sub-block with the given payload length, in bytes
///
/// # Example
///
/// ```
/// use wavpack_blocks::metadata::encoded_len;
///
/// assert_eq!(encoded_len(0), 2);
/// assert_eq!(encoded_len(1), 4);      // odd length gets a pad byte
/// assert_eq!(encoded_len(510), 512);  // largest 1 byte length
/// assert_eq!(encoded_len(511), 516);  // 3 byte length and pad byte
/// ```
#[inline]
pub fn encoded_len(payload_len: usize) -> usize {
    (if payload_len > SMALL_MAX { 4 } else { 2 }) + payload_len + (payload_len % 2)
}

pub(crate) fn write_sub_block<W: ByteWrite + ?Sized>(
    w: &mut W,
    id: MetadataId,
    data: &[u8],
) -> Result<(), Error> {
    let header = SubBlockHeader::new(id, data.len())?;
    w.build(&header)?;
    w.write_bytes(data)?;
    if header.is_odd() {
        w.write(0u8)?;
    }
    Ok(())
}

/// An iterator over a block's metadata sub-blocks
///
/// Yields each sub-block's ID along with the location
/// of its payload within the block, not including any pad byte.
pub struct SubBlocks<'b> {
    block: &'b [u8],
    position: usize,
    end: usize,
}

impl Iterator for SubBlocks<'_> {
    type Item = Result<(MetadataId, Range<usize>), Error>;

    fn next(&mut self) -> Option<Self::Item> {
        // a sub-block needs at least an ID byte and a length byte
        if self.end.saturating_sub(self.position) < 2 {
            return None;
        }

        let mut remaining = &self.block[self.position..self.end];
        let header = match ByteReader::endian(&mut remaining, LittleEndian).parse::<SubBlockHeader>() {
            Ok(header) => header,
            Err(err) => {
                self.position = self.end;
                return Some(Err(match err {
                    Error::Io(_) => Error::InvalidBlock,
                    err => err,
                }));
            }
        };

        let start = self.end - remaining.len();
        let stop = start + header.padded_len();

        if stop > self.end {
            self.position = self.end;
            Some(Err(Error::InvalidBlock))
        } else {
            self.position = stop;
            Some(Ok((header.id, start..start + header.len as usize)))
        }
    }
}

/// Iterates over the metadata sub-blocks in a serialized block
///
/// # Errors
///
/// Returns [`Error::InvalidBlock`] if the block's header is invalid
/// or the block is shorter than its header indicates.
///
/// # Example
///
/// ```
/// use wavpack_blocks::block::{BlockBuffer, BlockHeader, Flags};
/// use wavpack_blocks::metadata::{MetadataId, sub_blocks};
///
/// let mut block = BlockBuffer::new(
///     BlockHeader {
///         size: 0,
///         version: 0x407,
///         total_samples: None,
///         block_index: 0,
///         block_samples: 0,
///         flags: Flags::default(),
///         crc: 0,
///     },
///     1024,
/// );
/// block.add_sub_block(MetadataId::ALT_EXTENSION, b"w64").unwrap();
/// block.add_sub_block(MetadataId::MD5_CHECKSUM, &[0; 16]).unwrap();
/// let block = block.into_bytes().unwrap();
///
/// let mut items = sub_blocks(&block).unwrap();
/// let (id, range) = items.next().unwrap().unwrap();
/// assert_eq!(id, MetadataId::ALT_EXTENSION);
/// assert_eq!(&block[range], b"w64");
/// let (id, range) = items.next().unwrap().unwrap();
/// assert_eq!(id, MetadataId::MD5_CHECKSUM);
/// assert_eq!(range.len(), 16);
/// assert!(items.next().is_none());
/// ```
pub fn sub_blocks(block: &[u8]) -> Result<SubBlocks<'_>, Error> {
    let header = BlockHeader::parse(block)?;
    if header.block_len() > block.len() {
        return Err(Error::InvalidBlock);
    }

    Ok(SubBlocks {
        block,
        position: BlockHeader::SIZE,
        end: header.block_len(),
    })
}

/// Finds the payload of the first sub-block with the given ID
///
/// The returned range excludes any pad byte.
/// Returns `None` if the block is invalid, has no such sub-block,
/// or a sub-block's length runs past the end of the block
/// before the desired one is found.
pub fn locate(block: &[u8], id: MetadataId) -> Option<Range<usize>> {
    sub_blocks(block)
        .ok()?
        .map_while(Result::ok)
        .find_map(|(found, range)| (found == id).then_some(range))
}

/// Finds the wrapper header stored in a block
///
/// This is the RIFF header if present, or the
/// alternate format header if not.
pub fn wrapper_location(block: &[u8]) -> Option<Range<usize>> {
    locate(block, MetadataId::RIFF_HEADER).or_else(|| locate(block, MetadataId::ALT_HEADER))
}

/// Limits on how much metadata may be pending at once
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MetadataPolicy {
    /// Aggregate payload bytes at which pending metadata
    /// is written out as its own block
    pub cap: usize,
    /// Pending bytes above which metadata gets its own block
    /// rather than riding along with the next audio block
    pub standalone_threshold: usize,
}

impl Default for MetadataPolicy {
    fn default() -> Self {
        Self {
            cap: 1_000_000,
            standalone_threshold: 16384,
        }
    }
}

#[derive(Clone, Debug)]
struct PendingItem {
    id: MetadataId,
    data: Vec<u8>,
}

/// Metadata sub-blocks waiting to be written
///
/// Consecutive appends with the same ID are merged
/// into a single sub-block.
#[derive(Clone, Debug, Default)]
pub struct PendingMetadata {
    items: Vec<PendingItem>,
    bytes: usize,
    policy: MetadataPolicy,
}

impl PendingMetadata {
    /// Builds empty pending list with the given policy
    ///
    /// A cap of 0 is treated as 1.
    pub fn new(policy: MetadataPolicy) -> Self {
        Self {
            items: Vec::new(),
            bytes: 0,
            policy: MetadataPolicy {
                cap: policy.cap.max(1),
                ..policy
            },
        }
    }

    /// Our policy
    #[inline]
    pub fn policy(&self) -> &MetadataPolicy {
        &self.policy
    }

    /// Appends as much data as the aggregate cap allows
    ///
    /// Data is merged into the most recent item if its ID matches,
    /// or starts a new item otherwise.
    /// Returns whatever portion of `data` didn't fit,
    /// which is non-empty only once we are [full](Self::is_full).
    pub fn append<'d>(&mut self, id: MetadataId, data: &'d [u8]) -> &'d [u8] {
        if data.is_empty() || self.is_full() {
            return data;
        }

        let (taken, rest) =
            data.split_at(data.len().min(self.policy.cap.saturating_sub(self.bytes)));

        match self.items.last_mut() {
            Some(item) if item.id == id => item.data.extend_from_slice(taken),
            _ => self.items.push(PendingItem {
                id,
                data: taken.to_vec(),
            }),
        }

        self.bytes += taken.len();
        rest
    }

    /// Whether the aggregate cap has been reached
    #[inline]
    pub fn is_full(&self) -> bool {
        self.bytes >= self.policy.cap
    }

    /// Whether nothing is pending
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of pending items
    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Aggregate payload bytes pending
    #[inline]
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Total size of all pending items once serialized
    pub fn encoded_len(&self) -> usize {
        self.items.iter().map(|i| encoded_len(i.data.len())).sum()
    }

    /// Whether pending items are too large to ride along with audio
    #[inline]
    pub fn needs_own_block(&self) -> bool {
        self.encoded_len() > self.policy.standalone_threshold
    }

    /// Iterates over pending items in the order they were added
    pub fn iter(&self) -> impl Iterator<Item = (MetadataId, &[u8])> {
        self.items.iter().map(|i| (i.id, i.data.as_slice()))
    }

    /// Serializes all pending items, in order, into the given block
    ///
    /// Items remain pending until [cleared](Self::clear).
    pub fn write_to(&self, block: &mut crate::block::BlockBuffer) -> Result<(), Error> {
        self.iter().try_for_each(|(id, data)| block.add_sub_block(id, data))
    }

    /// Discards all pending items
    pub fn clear(&mut self) {
        self.items.clear();
        self.bytes = 0;
    }
}

#[cfg(test)]
fn test_block(items: &[(MetadataId, &[u8])]) -> Vec<u8> {
    use crate::block::{BlockBuffer, Flags};

    let mut block = BlockBuffer::new(
        BlockHeader {
            size: 0,
            version: 0x407,
            total_samples: None,
            block_index: 0,
            block_samples: 0,
            flags: Flags::default(),
            crc: 0,
        },
        usize::MAX,
    );
    for (id, data) in items {
        block.add_sub_block(*id, data).unwrap();
    }
    block.into_bytes().unwrap()
}

#[test]
fn test_locate_lengths() {
    for len in [0, 1, 2, 510, 511, 512, 100_000] {
        let payload = (0..len).map(|i| (i * 7) as u8).collect::<Vec<u8>>();
        let block = test_block(&[
            (MetadataId::ALT_EXTENSION, b"wav"),
            (MetadataId::RIFF_HEADER, &payload),
            (MetadataId::MD5_CHECKSUM, &[1; 16]),
        ]);

        let range = locate(&block, MetadataId::RIFF_HEADER).unwrap();
        assert_eq!(range.len(), len);
        assert_eq!(&block[range.clone()], payload.as_slice());

        // every sub-block is padded to an even length
        assert_eq!(block.len() % 2, 0);
        if len % 2 == 1 {
            assert_eq!(block[range.end], 0);
        }

        let range = locate(&block, MetadataId::MD5_CHECKSUM).unwrap();
        assert_eq!(&block[range], &[1; 16]);
    }
}

#[test]
fn test_locate_missing() {
    let block = test_block(&[(MetadataId::ALT_EXTENSION, b"wav")]);
    assert_eq!(locate(&block, MetadataId::RIFF_HEADER), None);
    assert_eq!(wrapper_location(&block), None);
    assert_eq!(locate(&block[1..], MetadataId::ALT_EXTENSION), None);
}

#[test]
fn test_locate_overrun() {
    let mut block = test_block(&[(MetadataId::RIFF_HEADER, &[5; 20])]);
    // claim 30 words where only 10 exist
    block[BlockHeader::SIZE + 1] = 30;
    assert_eq!(locate(&block, MetadataId::RIFF_HEADER), None);
}

#[test]
fn test_pending_merge_and_cap() {
    let mut pending = PendingMetadata::new(MetadataPolicy {
        cap: 10,
        ..MetadataPolicy::default()
    });

    assert!(pending.append(MetadataId::RIFF_HEADER, &[1, 2, 3]).is_empty());
    assert!(pending.append(MetadataId::RIFF_HEADER, &[4, 5]).is_empty());
    assert_eq!(pending.len(), 1);
    assert!(pending.append(MetadataId::ALT_EXTENSION, b"wv").is_empty());
    assert_eq!(pending.len(), 2);
    assert!(!pending.is_full());

    assert_eq!(pending.append(MetadataId::ALT_EXTENSION, b"abcde"), b"de");
    assert_eq!(pending.append(MetadataId::ALT_EXTENSION, b"de"), b"de");
    assert!(pending.is_full());
    assert_eq!(pending.bytes(), 10);

    let items = pending.iter().collect::<Vec<_>>();
    assert_eq!(items[0], (MetadataId::RIFF_HEADER, &[1, 2, 3, 4, 5][..]));
    assert_eq!(items[1], (MetadataId::ALT_EXTENSION, &b"wvabc"[..]));

    pending.clear();
    assert!(pending.is_empty());
    assert_eq!(pending.bytes(), 0);
}
