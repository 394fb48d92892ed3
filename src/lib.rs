// Copyright 2025 Brian Langenberger
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A library for turning PCM samples into WavPack blocks
//!
//! This crate is the block-formation half of a WavPack encoder.
//! It splits interleaved input into per-stream buffers
//! (mono channels or recognized stereo pairs),
//! decides where blocks begin and end, carries metadata
//! such as the original RIFF WAVE header along with the audio,
//! and hands finished blocks to one or two output streams.
//!
//! The actual compression of a block's samples is performed
//! by an implementation of [`encode::StreamPacker`].
//!
//! # Block Layout
//!
//! | Bytes | Field |
//! |------:|-------|
//! | 32    | [block header](`block::BlockHeader`) |
//! | rest  | [metadata sub-blocks](`metadata`) |

pub mod block;
pub mod byteorder;
pub mod channels;
pub mod config;
pub mod encode;
pub mod metadata;
pub mod patch;
mod stream;
pub mod wrapper;

/// A WavPack block formation error
#[derive(Debug)]
pub enum Error {
    /// An I/O error from an output stream
    Io(std::io::Error),
    /// Channels remain after the maximum number of streams,
    /// with the number of unassigned channels
    TooManyChannels(u32),
    /// Channel count is zero or too large
    InvalidChannelCount,
    /// Bytes-per-sample is not between 1 and 4
    InvalidBytesPerSample,
    /// Bits-per-sample doesn't fit in bytes-per-sample
    InvalidBitsPerSample,
    /// Sample rate is zero
    InvalidSampleRate,
    /// A RIFF WAVE header can't describe floats with this exponent
    NonNormalizedFloat,
    /// Total samples too large for a block header
    ExcessiveTotalSamples,
    /// Block index too large for a block header
    ExcessiveBlockIndex,
    /// Forced block size too large
    ExcessiveBlockSamples,
    /// Encoded block exceeded its output buffer
    BlockOverflow,
    /// Sample count not evenly divisible by channel count
    SampleCountMismatch,
    /// Stream packer returned no samples, more samples than requested,
    /// or fewer samples than an earlier stream in the same cycle
    InvalidPackedSampleCount,
    /// Correction output requested for DSD audio
    UnexpectedCorrection,
    /// Channel layout tag or reordering table is invalid
    InvalidChannelLayout,
    /// File extension is too long to store
    ExtensionTooLong,
    /// Data is not a valid WavPack block
    InvalidBlock,
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error)
    }
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "can't write WavPack data: {e}"),
            Self::TooManyChannels(_) => "too many channels!".fmt(f),
            Self::InvalidChannelCount => "invalid channel count".fmt(f),
            Self::InvalidBytesPerSample => "bytes per sample must be 1 to 4".fmt(f),
            Self::InvalidBitsPerSample => "invalid bits per sample".fmt(f),
            Self::InvalidSampleRate => "invalid sample rate".fmt(f),
            Self::NonNormalizedFloat => {
                "can't create valid RIFF wav header for non-normalized floating data!".fmt(f)
            }
            Self::ExcessiveTotalSamples => "total samples too large".fmt(f),
            Self::ExcessiveBlockIndex => "block index too large".fmt(f),
            Self::ExcessiveBlockSamples => "block size too large".fmt(f),
            Self::BlockOverflow => "output buffer overflowed!".fmt(f),
            Self::SampleCountMismatch => "sample count not a multiple of channel count".fmt(f),
            Self::InvalidPackedSampleCount => "stream packer returned invalid sample count".fmt(f),
            Self::UnexpectedCorrection => "correction file not supported for DSD audio".fmt(f),
            Self::InvalidChannelLayout => "invalid channel layout".fmt(f),
            Self::ExtensionTooLong => "file extension too long".fmt(f),
            Self::InvalidBlock => "invalid WavPack block".fmt(f),
        }
    }
}
