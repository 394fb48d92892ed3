// Copyright 2025 Brian Langenberger
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! For encoding PCM samples to WavPack blocks
//!
//! An [`Encoder`] accepts interleaved samples,
//! divides them among its channel streams,
//! and whenever enough samples have accumulated,
//! asks each stream's [`StreamPacker`] to compress
//! one block's worth of them.
//! Finished blocks are written to the primary output
//! and, in hybrid mode, to an optional correction output.

use crate::Error;
use crate::block::{BlockBuffer, BlockHeader, Flags};
use crate::byteorder::{Endianness, LittleEndian};
use crate::channels::StreamLayout;
use crate::config::{Configuration, EncodingOptions, FileFormat};
use crate::metadata::{MetadataId, PendingMetadata};
use crate::patch;
use crate::stream::{ChannelStream, SignExtend, sign_extender, stream_flags};
use crate::wrapper::RiffFormat;
use std::io::{Read, Seek, Write};

/// One block's worth of a stream's samples, ready to be packed
pub struct PackBlock<'b> {
    /// Samples to pack, interleaved if stereo
    ///
    /// This holds the number of samples per channel given
    /// in the primary block header's `block_samples` field.
    pub samples: &'b [i32],
    /// Channels in the stream, either 1 or 2
    pub channels: usize,
    /// Primary output block
    ///
    /// Its header already carries the block's index, sample count
    /// and flags, which the packer may amend along with the CRC.
    pub primary: &'b mut BlockBuffer,
    /// Correction output block, if a correction stream is being written
    pub correction: Option<&'b mut BlockBuffer>,
}

/// Compresses blocks of samples for a single stream
pub trait StreamPacker {
    /// Packs samples into sub-blocks of the given output blocks,
    /// returning the number of samples per channel actually packed
    ///
    /// The first stream of a block cycle may pack fewer samples
    /// than requested, if it can't fit them all.
    /// Every later stream in the cycle is then asked to pack
    /// that smaller number, and must pack exactly as many
    /// samples as it is asked for.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BlockOverflow`] if a sub-block won't fit,
    /// or any other error the packer encounters.
    fn pack_block(&mut self, block: PackBlock<'_>) -> Result<u32, Error>;
}

impl<F> StreamPacker for F
where
    F: FnMut(PackBlock<'_>) -> Result<u32, Error>,
{
    #[inline]
    fn pack_block(&mut self, block: PackBlock<'_>) -> Result<u32, Error> {
        self(block)
    }
}

/// Parameters for building one stream's packer
pub struct StreamContext<'c> {
    /// The encoder's resolved configuration
    pub config: &'c Configuration,
    /// The stream's channels
    pub layout: &'c StreamLayout,
    /// The stream's position in each block cycle
    pub index: usize,
    /// Flags the stream's block headers start from
    pub flags: Flags,
}

/// A WavPack block encoder
///
/// # Example
///
/// ```
/// use wavpack_blocks::block::{BlockHeader, Flags, read_blocks};
/// use wavpack_blocks::config::EncodingOptions;
/// use wavpack_blocks::encode::{Encoder, PackBlock};
/// use wavpack_blocks::metadata::{MetadataId, locate};
///
/// // stores samples as-is, 4 bytes apiece
/// fn verbatim(block: PackBlock<'_>) -> Result<u32, wavpack_blocks::Error> {
///     let bytes = block
///         .samples
///         .iter()
///         .flat_map(|s| s.to_le_bytes())
///         .collect::<Vec<u8>>();
///     block.primary.add_sub_block(MetadataId::WV_BITSTREAM, &bytes)?;
///     Ok(block.primary.header().block_samples)
/// }
///
/// let wv: Vec<u8> = vec![];
///
/// let mut encoder = Encoder::new(
///     wv,
///     None,
///     EncodingOptions::new(44100, 16, 2, 2),
///     Some(1000),
///     |_| verbatim,
/// )
/// .unwrap();
///
/// encoder.pack(&vec![0; 2000]).unwrap();
/// let (wv, _) = encoder.finalize().unwrap();
///
/// let blocks = read_blocks(wv.as_slice()).collect::<Result<Vec<_>, _>>().unwrap();
/// assert_eq!(blocks.len(), 1);
///
/// let header = BlockHeader::parse(&blocks[0]).unwrap();
/// assert_eq!(header.block_samples, 1000);
/// assert!(header.flags.contains(Flags::INITIAL_BLOCK | Flags::FINAL_BLOCK));
/// assert!(locate(&blocks[0], MetadataId::RIFF_HEADER).is_some());
/// ```
pub struct Encoder<W: Write, P> {
    wv: W,
    wvc: Option<W>,
    config: Configuration,
    total_samples: Option<u64>,
    streams: Vec<ChannelStream<P>>,
    sign_extend: SignExtend,
    // samples per channel buffered in every stream
    acc_samples: u32,
    average_block_samples: u32,
    metadata: PendingMetadata,
    wrapper_added: bool,
    wrapper_created: bool,
    trailer_bytes: u64,
    wv_bytes: u64,
    wvc_bytes: u64,
    md5: Option<md5::Context>,
    error_message: String,
}

impl<W: Write, P: StreamPacker> Encoder<W, P> {
    /// Creates new encoder writing to the given outputs
    ///
    /// `wvc` is the correction output, if one is to be written.
    ///
    /// `total_samples` is the total number of samples per channel,
    /// if known in advance.
    /// If unknown or incorrect, the first block may be
    /// updated once encoding is finished
    /// (see [`Encoder::update_sample_count`]).
    ///
    /// `init` builds a packer for each planned stream.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the encoding options are invalid,
    /// if the total samples are too large to store,
    /// or an I/O error if an oversized file extension
    /// can't be written.
    pub fn new(
        wv: W,
        wvc: Option<W>,
        options: EncodingOptions,
        total_samples: Option<u64>,
        mut init: impl FnMut(&StreamContext<'_>) -> P,
    ) -> Result<Self, Error> {
        if total_samples.is_some_and(|total| total > BlockHeader::MAX_TOTAL_SAMPLES) {
            return Err(Error::ExcessiveTotalSamples);
        }

        let config = options.resolve(wvc.is_some())?;

        let mut first_channel = 0;
        let mut streams = Vec::with_capacity(config.streams().len());
        for (index, layout) in config.streams().iter().enumerate() {
            let flags = stream_flags(config.flags(), layout);
            let packer = init(&StreamContext {
                config: &config,
                layout,
                index,
                flags,
            });
            streams.push(ChannelStream::new(
                *layout,
                first_channel,
                flags,
                config.max_samples(),
                packer,
            ));
            first_channel += usize::from(layout.channels);
        }

        log::debug!(
            "encoding {} channels in {} streams with {} samples per block",
            config.channels(),
            streams.len(),
            config.block_samples(),
        );

        let mut encoder = Self {
            wv,
            wvc,
            total_samples,
            streams,
            sign_extend: sign_extender(
                config.bytes_per_sample(),
                config.dsd_multiplier().is_some(),
            ),
            acc_samples: 0,
            average_block_samples: config.block_samples(),
            metadata: PendingMetadata::new(config.metadata_policy()),
            wrapper_added: false,
            wrapper_created: false,
            trailer_bytes: 0,
            wv_bytes: 0,
            wvc_bytes: 0,
            md5: config.md5().then(md5::Context::new),
            error_message: String::new(),
            config,
        };

        if let Some(extension) = encoder.config.file_extension().map(|e| e.as_bytes().to_vec()) {
            encoder.add_metadata(MetadataId::ALT_EXTENSION, &extension)?;
        }

        Ok(encoder)
    }

    /// Encodes interleaved samples
    ///
    /// Samples narrower than 32 bits are sign-extended
    /// from their configured width, so any bits above that
    /// width are ignored.
    /// Samples are buffered until a whole block's worth
    /// is available, so this may write zero or more blocks.
    ///
    /// Unless a wrapper header has been added, or the original
    /// file format isn't RIFF WAVE, a RIFF WAVE header
    /// is generated before the first samples.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SampleCountMismatch`] if the number
    /// of samples isn't divisible by the channel count,
    /// or any error from packing or writing a block.
    /// Samples of a block which fails to be written remain buffered.
    pub fn pack(&mut self, samples: &[i32]) -> Result<(), Error> {
        let result = self.pack_samples(samples);
        self.record(result)
    }

    /// Encodes interleaved samples from raw PCM bytes
    /// in the given byte order
    ///
    /// Each sample is the configured number of bytes wide.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SampleCountMismatch`] if the bytes
    /// don't divide evenly into whole samples and channels,
    /// or any error from [`Encoder::pack`].
    pub fn pack_bytes<E: Endianness>(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let width = self.config.bytes_per_sample() as usize;
        if bytes.len() % width != 0 {
            return self.record(Err(Error::SampleCountMismatch));
        }

        self.pack(
            &bytes
                .chunks_exact(width)
                .map(E::bytes_to_sample)
                .collect::<Vec<_>>(),
        )
    }

    /// Writes all buffered samples along with any pending metadata
    ///
    /// This is normally called once all samples have been packed,
    /// but may also be used to end a block at a particular sample,
    /// after which packing may continue.
    ///
    /// # Errors
    ///
    /// Returns any error from packing or writing a block.
    pub fn flush(&mut self) -> Result<(), Error> {
        let result = self.flush_samples();
        self.record(result)
    }

    /// Adds data from the original file's wrapper
    ///
    /// Data added before any samples have been written is
    /// stored as the wrapper's header, which suppresses the
    /// automatically generated RIFF WAVE header.
    /// Data added afterward is stored as the wrapper's trailer,
    /// so [`Encoder::flush`] should be called beforehand.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if pending metadata grows
    /// large enough to be written and can't be.
    pub fn add_wrapper(&mut self, data: &[u8]) -> Result<(), Error> {
        let alternate = self.config.file_format() != FileFormat::Wav;

        let id = if self.sample_index() == 0 {
            self.wrapper_added = true;
            if alternate {
                MetadataId::ALT_HEADER
            } else {
                MetadataId::RIFF_HEADER
            }
        } else {
            self.trailer_bytes += data.len() as u64;
            if alternate {
                MetadataId::ALT_TRAILER
            } else {
                MetadataId::RIFF_TRAILER
            }
        };

        let result = self.add_metadata(id, data);
        self.record(result)
    }

    /// Stores an MD5 sum of the original audio
    ///
    /// If any of the low 8 quality mode bits are set,
    /// the sum is stored such that older decoders won't verify it.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if pending metadata grows
    /// large enough to be written and can't be.
    pub fn store_md5_sum(&mut self, md5: [u8; 16]) -> Result<(), Error> {
        let id = if self.config.qmode() & 0xff != 0 {
            MetadataId::ALT_MD5_CHECKSUM
        } else {
            MetadataId::MD5_CHECKSUM
        };

        let result = self.add_metadata(id, &md5);
        self.record(result)
    }

    /// MD5 sum of all samples packed so far, if MD5 was requested
    ///
    /// Samples are hashed in the byte layout of a RIFF WAVE file:
    /// little-endian at their configured width,
    /// with 8-bit PCM samples stored unsigned.
    pub fn computed_md5(&self) -> Option<[u8; 16]> {
        self.md5.as_ref().map(|md5| md5.clone().compute().0)
    }

    /// Updates a serialized first block with the given total samples
    ///
    /// If this encoder generated the block's RIFF WAVE header,
    /// that header is regenerated with the new total also.
    /// A header supplied with [`Encoder::add_wrapper`]
    /// is left for the caller to update, and may be found with
    /// [`wrapper_location`](crate::metadata::wrapper_location).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBlock`] if the block is invalid
    /// or [`Error::ExcessiveTotalSamples`] if the total is too large.
    pub fn update_sample_count(&self, block: &mut [u8], total_samples: u64) -> Result<(), Error> {
        patch::update_sample_count(
            block,
            total_samples,
            self.wrapper_created.then(|| self.riff_format()).as_ref(),
        )
    }

    /// Updates the first block of a finished file
    /// with the number of samples actually written
    ///
    /// # Errors
    ///
    /// Returns any I/O error from the file,
    /// or any error from [`Encoder::update_sample_count`].
    pub fn update_first_block<F: Read + Write + Seek>(&self, file: F) -> Result<(), Error> {
        patch::rewrite_first_block(file, |block| {
            self.update_sample_count(block, self.sample_index())
        })
    }

    /// Flushes all buffered samples and returns our outputs
    ///
    /// # Errors
    ///
    /// Returns any error from [`Encoder::flush`]
    /// or from flushing the outputs themselves.
    pub fn finalize(mut self) -> Result<(W, Option<W>), Error> {
        self.flush()?;
        self.wv.flush()?;
        if let Some(wvc) = self.wvc.as_mut() {
            wvc.flush()?;
        }
        Ok((self.wv, self.wvc))
    }

    fn pack_samples(&mut self, mut samples: &[i32]) -> Result<(), Error> {
        let channels = self.config.channels() as usize;
        if samples.len() % channels != 0 {
            return Err(Error::SampleCountMismatch);
        }

        let max_samples = self.config.max_samples();
        let extend = self.sign_extend;

        while !samples.is_empty() {
            if !self.wrapper_added
                && !self.wrapper_created
                && self.config.file_format() == FileFormat::Wav
            {
                let header = self.riff_format().create(self.total_samples)?;
                self.wrapper_created = true;
                log::debug!("generated {} byte RIFF WAVE header", header.len());
                self.add_metadata(MetadataId::RIFF_HEADER, &header)?;
            }

            let frames = (samples.len() / channels).min((max_samples - self.acc_samples) as usize);
            let (copied, rest) = samples.split_at(frames * channels);

            for stream in self.streams.iter_mut() {
                stream.accumulate(copied, channels, extend);
            }

            if let Some(md5) = self.md5.as_mut() {
                update_md5(
                    md5,
                    copied,
                    self.config.bytes_per_sample() as usize,
                    extend,
                    self.config.dsd_multiplier().is_none(),
                );
            }

            self.acc_samples += frames as u32;
            samples = rest;

            if self.acc_samples == max_samples {
                self.pack_streams(self.config.block_samples())?;
            }
        }

        Ok(())
    }

    fn flush_samples(&mut self) -> Result<(), Error> {
        while self.acc_samples > 0 {
            // split oversized remainders in half
            let block_samples = if self.acc_samples > self.config.block_samples() {
                self.acc_samples / 2
            } else {
                self.acc_samples
            };

            self.pack_streams(block_samples)?;
        }

        self.write_metadata_block()
    }

    // packs and writes one block per stream
    fn pack_streams(&mut self, requested: u32) -> Result<(), Error> {
        if self.metadata.needs_own_block() {
            self.write_metadata_block()?;
        }

        let capacity = requested as usize
            * if self.config.float_norm_exp().is_some() && !self.config.skip_wvx() {
                16
            } else {
                10
            }
            + 4096;

        let mut block_samples = requested;

        for (index, stream) in self.streams.iter_mut().enumerate() {
            let mut flags = stream.flags;
            flags.set_magnitude(flags.bytes_stored() * 8 - 1);

            let header = BlockHeader {
                size: 0,
                version: self.config.stream_version(),
                total_samples: self.total_samples,
                block_index: stream.sample_index,
                block_samples,
                flags,
                crc: 0,
            };

            // pending metadata rides along in the cycle's first block
            let mut primary = if index == 0 {
                let mut primary =
                    BlockBuffer::new(header.clone(), capacity + self.metadata.encoded_len());
                self.metadata.write_to(&mut primary)?;
                primary
            } else {
                BlockBuffer::new(header.clone(), capacity)
            };
            let mut correction = self
                .wvc
                .is_some()
                .then(|| BlockBuffer::new(header, capacity));

            block_samples = match stream.pack(block_samples, &mut primary, correction.as_mut())? {
                0 => return Err(Error::InvalidPackedSampleCount),
                packed if index == 0 && packed < block_samples => {
                    log::debug!("block shrunk from {block_samples} to {packed} samples");
                    packed
                }
                packed if packed == block_samples => packed,
                _ => return Err(Error::InvalidPackedSampleCount),
            };

            primary.header_mut().block_samples = block_samples;
            let block = primary.into_bytes()?;
            self.wv.write_all(&block)?;
            self.wv_bytes += block.len() as u64;

            if index == 0 {
                self.metadata.clear();
            }

            log::trace!(
                "stream {index} wrote {} byte block at sample {}",
                block.len(),
                stream.sample_index,
            );

            if let (Some(mut correction), Some(wvc)) = (correction, self.wvc.as_mut()) {
                correction.header_mut().block_samples = block_samples;
                let block = correction.into_bytes()?;
                wvc.write_all(&block)?;
                self.wvc_bytes += block.len() as u64;
            }
        }

        for stream in self.streams.iter_mut() {
            stream.consume(block_samples);
        }

        self.average_block_samples = ((u64::from(self.average_block_samples) * 7
            + u64::from(block_samples)
            + 4)
            >> 3) as u32;
        self.acc_samples -= block_samples;

        log::debug!(
            "packed {block_samples} samples in {} streams, {} samples remain buffered",
            self.streams.len(),
            self.acc_samples,
        );

        Ok(())
    }

    fn add_metadata(&mut self, id: MetadataId, mut data: &[u8]) -> Result<(), Error> {
        loop {
            data = self.metadata.append(id, data);

            if self.metadata.is_full() {
                log::debug!(
                    "pending metadata reached {} bytes, writing it out",
                    self.metadata.bytes()
                );
                self.write_metadata_block()?;
            }

            if data.is_empty() {
                return Ok(());
            }
        }
    }

    // writes all pending metadata as a block with no samples
    fn write_metadata_block(&mut self) -> Result<(), Error> {
        if self.metadata.is_empty() {
            return Ok(());
        }

        let mut block = BlockBuffer::new(
            BlockHeader {
                size: 0,
                version: self.config.stream_version(),
                total_samples: self.total_samples,
                block_index: 0,
                block_samples: 0,
                flags: Flags::default(),
                crc: 0,
            },
            usize::MAX,
        );
        self.metadata.write_to(&mut block)?;

        let block = block.into_bytes()?;
        self.wv.write_all(&block)?;
        self.wv_bytes += block.len() as u64;

        log::debug!(
            "wrote {} metadata items in {} byte block",
            self.metadata.len(),
            block.len(),
        );

        self.metadata.clear();
        Ok(())
    }
}

impl<W: Read + Write + Seek, P> Encoder<W, P> {
    /// Updates the first block of our own outputs
    /// with the number of samples written so far
    ///
    /// This is typically called after [`Encoder::flush`]
    /// when the total samples weren't known in advance.
    /// The correction output, if any, is updated too.
    /// Output stream positions are unchanged.
    ///
    /// # Errors
    ///
    /// Returns any I/O error from the output,
    /// or any error from [`Encoder::update_sample_count`].
    pub fn update_output(&mut self) -> Result<(), Error> {
        let total_samples = self.sample_index();
        let wrapper = self.wrapper_created.then(|| self.riff_format());

        let result = patch::rewrite_first_block(&mut self.wv, |block| {
            patch::update_sample_count(block, total_samples, wrapper.as_ref())
        })
        .and_then(|()| match self.wvc.as_mut() {
            // correction blocks never carry a wrapper
            Some(wvc) => patch::rewrite_first_block(wvc, |block| {
                patch::update_sample_count(block, total_samples, None)
            }),
            None => Ok(()),
        });
        self.record(result)
    }
}

impl<W: Write, P> Encoder<W, P> {
    fn record<T>(&mut self, result: Result<T, Error>) -> Result<T, Error> {
        if let Err(err) = &result {
            log::error!("{err}");
            self.error_message = err.to_string();
        }
        result
    }

    fn riff_format(&self) -> RiffFormat {
        RiffFormat {
            trailer_bytes: self.trailer_bytes,
            ..RiffFormat::from(&self.config)
        }
    }

    /// Reference to our primary output
    #[inline]
    pub fn get_ref(&self) -> &W {
        &self.wv
    }

    /// The encoder's resolved configuration
    #[inline]
    pub fn configuration(&self) -> &Configuration {
        &self.config
    }

    /// Number of samples per channel written in blocks so far
    ///
    /// Samples still buffered aren't included.
    #[inline]
    pub fn sample_index(&self) -> u64 {
        self.streams.first().map(|s| s.sample_index).unwrap_or(0)
    }

    /// Samples per channel buffered and not yet written
    #[inline]
    pub fn buffered_samples(&self) -> u32 {
        self.acc_samples
    }

    /// Total samples given when the encoder was created
    #[inline]
    pub fn total_samples(&self) -> Option<u64> {
        self.total_samples
    }

    /// Number of streams in each block cycle
    #[inline]
    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// Nominal samples per block
    #[inline]
    pub fn block_samples(&self) -> u32 {
        self.config.block_samples()
    }

    /// Running average of samples per block written
    #[inline]
    pub fn average_block_samples(&self) -> u32 {
        self.average_block_samples
    }

    /// Bytes written to the primary and correction outputs
    #[inline]
    pub fn bytes_written(&self) -> (u64, u64) {
        (self.wv_bytes, self.wvc_bytes)
    }

    /// DSD rate multiplier, for DSD audio
    #[inline]
    pub fn dsd_multiplier(&self) -> Option<u32> {
        self.config.dsd_multiplier()
    }

    /// Version written to block headers
    #[inline]
    pub fn stream_version(&self) -> u16 {
        self.config.stream_version()
    }

    /// Message describing the most recent error, if any
    #[inline]
    pub fn error_message(&self) -> &str {
        &self.error_message
    }
}

fn update_md5(
    md5: &mut md5::Context,
    samples: &[i32],
    width: usize,
    extend: SignExtend,
    pcm: bool,
) {
    let mut bytes = vec![0; samples.len() * width];

    for (sample, bytes) in samples.iter().zip(bytes.chunks_exact_mut(width)) {
        LittleEndian::sample_to_bytes(extend(*sample), bytes);
    }

    // RIFF WAVE stores 8-bit PCM unsigned
    if pcm && width == 1 {
        bytes.iter_mut().for_each(|b| *b ^= 0x80);
    }

    md5.consume(&bytes);
}

#[test]
fn test_md5_layout() {
    let mut md5 = md5::Context::new();
    update_md5(&mut md5, &[0x7F, -1, 0x180], 1, sign_extender(1, false), true);
    assert_eq!(md5.compute(), md5::compute([0xFF, 0x7F, 0x00]));

    let mut md5 = md5::Context::new();
    update_md5(&mut md5, &[-2, 0x1_0001], 2, sign_extender(2, false), true);
    assert_eq!(md5.compute(), md5::compute([0xFE, 0xFF, 0x01, 0x00]));

    let mut md5 = md5::Context::new();
    update_md5(&mut md5, &[-1, 0x69], 1, sign_extender(1, true), false);
    assert_eq!(md5.compute(), md5::compute([0xFF, 0x69]));
}
