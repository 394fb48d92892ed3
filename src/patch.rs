// Copyright 2025 Brian Langenberger
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! For updating a file's first block after encoding
//!
//! When the total number of samples isn't known in advance,
//! such as when encoding from a pipe,
//! the first block's total samples field and any generated
//! RIFF WAVE header can be corrected once encoding is finished.

use crate::Error;
use crate::block::{BlockHeader, read_block};
use crate::metadata::wrapper_location;
use crate::wrapper::RiffFormat;
use std::io::{Read, Seek, SeekFrom, Write};

/// Updates a serialized block with the actual total samples
///
/// If `wrapper` is given and the block contains a stored wrapper header,
/// that header is regenerated with the new total.
/// The regenerated header replaces the stored one only
/// if both are the same length; otherwise the stored header
/// is left as-is.
///
/// # Errors
///
/// Returns [`Error::InvalidBlock`] if the block is invalid
/// or [`Error::ExcessiveTotalSamples`] if the total is too large.
///
/// # Example
///
/// ```
/// use wavpack_blocks::block::{BlockBuffer, BlockHeader, Flags};
/// use wavpack_blocks::patch::update_sample_count;
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
/// )
/// .into_bytes()
/// .unwrap();
///
/// update_sample_count(&mut block, 123456, None).unwrap();
/// assert_eq!(BlockHeader::parse(&block).unwrap().total_samples, Some(123456));
/// ```
pub fn update_sample_count(
    block: &mut [u8],
    total_samples: u64,
    wrapper: Option<&RiffFormat>,
) -> Result<(), Error> {
    let mut header = BlockHeader::parse(block)?;
    if header.block_len() > block.len() {
        return Err(Error::InvalidBlock);
    }
    header.total_samples = Some(total_samples);

    let regenerated = match (wrapper, wrapper_location(block)) {
        (Some(format), Some(location)) => {
            let regenerated = format.create(Some(total_samples))?;
            if regenerated.len() == location.len() {
                Some((location, regenerated))
            } else {
                log::warn!(
                    "regenerated {} byte wrapper doesn't fit stored {} byte wrapper, leaving it unchanged",
                    regenerated.len(),
                    location.len(),
                );
                None
            }
        }
        _ => None,
    };

    header.overwrite(block)?;

    if let Some((location, regenerated)) = regenerated {
        block[location].copy_from_slice(&regenerated);
    }

    Ok(())
}

/// Reads the first block from a file, updates it and writes it back
///
/// The file's stream position is restored afterward.
///
/// # Errors
///
/// Returns any I/O error from the file,
/// [`Error::InvalidBlock`] if it doesn't start with a block,
/// or any error from `update` itself.
pub fn rewrite_first_block<F, U>(mut file: F, update: U) -> Result<(), Error>
where
    F: Read + Write + Seek,
    U: FnOnce(&mut [u8]) -> Result<(), Error>,
{
    let position = file.stream_position()?;

    file.rewind()?;
    let mut block = read_block(&mut file)?.ok_or(Error::InvalidBlock)?;
    update(&mut block)?;

    file.rewind()?;
    file.write_all(&block)?;
    file.seek(SeekFrom::Start(position))?;
    Ok(())
}

#[cfg(test)]
fn test_wrapped_block(format: &RiffFormat, total: Option<u64>) -> Vec<u8> {
    use crate::block::{BlockBuffer, Flags};
    use crate::metadata::MetadataId;

    let mut block = BlockBuffer::new(
        BlockHeader {
            size: 0,
            version: 0x407,
            total_samples: total,
            block_index: 0,
            block_samples: 0,
            flags: Flags::default(),
            crc: 0,
        },
        1024,
    );
    block
        .add_sub_block(MetadataId::RIFF_HEADER, &format.create(total).unwrap())
        .unwrap();
    block.add_sub_block(MetadataId::WV_BITSTREAM, &[1; 10]).unwrap();
    block.into_bytes().unwrap()
}

#[cfg(test)]
fn test_format() -> RiffFormat {
    RiffFormat {
        sample_rate: 44100,
        channels: 2,
        channel_mask: 0b11,
        bits_per_sample: 16,
        bytes_per_sample: 2,
        float_norm_exp: None,
        trailer_bytes: 0,
    }
}

#[test]
fn test_update_wrapper() {
    let format = test_format();
    let mut block = test_wrapped_block(&format, None);

    update_sample_count(&mut block, 1000, Some(&format)).unwrap();
    assert_eq!(block, test_wrapped_block(&format, Some(1000)));

    // updating to the same total changes nothing
    let unchanged = block.clone();
    update_sample_count(&mut block, 1000, Some(&format)).unwrap();
    assert_eq!(block, unchanged);

    // crossing into RF64 keeps the header the same length
    update_sample_count(&mut block, 0x4000_0000, Some(&format)).unwrap();
    let location = wrapper_location(&block).unwrap();
    assert_eq!(&block[location][0..4], b"RF64");
}

#[test]
fn test_update_without_wrapper() {
    let format = test_format();
    let original = test_wrapped_block(&format, None);

    // caller-supplied wrappers are left for the caller
    let mut block = original.clone();
    update_sample_count(&mut block, 1000, None).unwrap();
    assert_eq!(
        BlockHeader::parse(&block).unwrap().total_samples,
        Some(1000)
    );
    assert_eq!(block[BlockHeader::SIZE..], original[BlockHeader::SIZE..]);

    // a wrapper that would change length is left alone
    let mut block = original.clone();
    let mut extensible = test_format();
    extensible.channel_mask = 0b1;
    update_sample_count(&mut block, 1000, Some(&extensible)).unwrap();
    assert_eq!(block[BlockHeader::SIZE..], original[BlockHeader::SIZE..]);
}

#[test]
fn test_rewrite_first_block() {
    use std::io::Cursor;

    let format = test_format();
    let mut file = test_wrapped_block(&format, None);
    file.extend(test_wrapped_block(&format, None));

    let mut file = Cursor::new(file);
    file.seek(SeekFrom::End(0)).unwrap();
    let end = file.position();

    rewrite_first_block(&mut file, |block| {
        update_sample_count(block, 500, Some(&format))
    })
    .unwrap();
    assert_eq!(file.position(), end);

    let file = file.into_inner();
    let first = test_wrapped_block(&format, Some(500));
    assert_eq!(&file[..first.len()], first.as_slice());
    assert_eq!(&file[first.len()..], test_wrapped_block(&format, None).as_slice());
}
