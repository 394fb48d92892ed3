// Copyright 2025 Brian Langenberger
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! For buffering the samples of a single channel stream

use crate::Error;
use crate::block::{BlockBuffer, Flags};
use crate::channels::StreamLayout;
use crate::encode::{PackBlock, StreamPacker};

/// Restores a sample's sign from its stored width
pub(crate) type SignExtend = fn(i32) -> i32;

fn extend_8(sample: i32) -> i32 {
    sample as i8 as i32
}

fn extend_16(sample: i32) -> i32 {
    sample as i16 as i32
}

fn extend_24(sample: i32) -> i32 {
    (sample << 8) >> 8
}

fn extend_32(sample: i32) -> i32 {
    sample
}

// DSD bytes are unsigned bit patterns
fn dsd_byte(sample: i32) -> i32 {
    sample & 0xff
}

/// Returns function for sign-extending samples of the given width
pub(crate) fn sign_extender(bytes_per_sample: u32, dsd: bool) -> SignExtend {
    match (dsd, bytes_per_sample) {
        (true, _) => dsd_byte,
        (false, 1) => extend_8,
        (false, 2) => extend_16,
        (false, 3) => extend_24,
        (false, _) => extend_32,
    }
}

/// Header flags a stream starts every block from
pub(crate) fn stream_flags(base: Flags, layout: &StreamLayout) -> Flags {
    let mut flags = base;

    if layout.initial {
        flags.insert(Flags::INITIAL_BLOCK);
    }

    if layout.last {
        flags.insert(Flags::FINAL_BLOCK);
    }

    if layout.is_mono() {
        flags.remove(Flags::JOINT_STEREO | Flags::CROSS_DECORR | Flags::HYBRID_BALANCE);
        flags.insert(Flags::MONO);
    }

    flags
}

/// One mono or stereo stream's buffered samples and packer
pub(crate) struct ChannelStream<P> {
    layout: StreamLayout,
    // offset of our first channel within each input frame
    first_channel: usize,
    pub flags: Flags,
    // index of the next sample to be packed
    pub sample_index: u64,
    // interleaved if stereo
    buffer: Vec<i32>,
    packer: P,
}

impl<P> ChannelStream<P> {
    pub fn new(
        layout: StreamLayout,
        first_channel: usize,
        flags: Flags,
        max_samples: u32,
        packer: P,
    ) -> Self {
        Self {
            layout,
            first_channel,
            flags,
            sample_index: 0,
            buffer: Vec::with_capacity(max_samples as usize * usize::from(layout.channels)),
            packer,
        }
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.layout.channels.into()
    }

    /// Copies our channels out of whole interleaved frames
    pub fn accumulate(&mut self, frames: &[i32], frame_channels: usize, extend: SignExtend) {
        let channels = self.first_channel..self.first_channel + self.channels();

        for frame in frames.chunks_exact(frame_channels) {
            self.buffer
                .extend(frame[channels.clone()].iter().copied().map(extend));
        }
    }

    /// The first `samples` samples per channel
    #[cfg(test)]
    pub fn samples(&self, samples: u32) -> &[i32] {
        &self.buffer[..samples as usize * self.channels()]
    }

    /// Discards the first `samples` samples per channel
    /// and advances our sample index past them
    pub fn consume(&mut self, samples: u32) {
        self.buffer.drain(..samples as usize * self.channels());
        self.sample_index += u64::from(samples);
    }

    /// Samples per channel currently buffered
    #[cfg(test)]
    pub fn buffered(&self) -> usize {
        self.buffer.len() / self.channels()
    }
}

impl<P: StreamPacker> ChannelStream<P> {
    /// Hands the first `samples` samples per channel to our packer
    pub fn pack(
        &mut self,
        samples: u32,
        primary: &mut BlockBuffer,
        correction: Option<&mut BlockBuffer>,
    ) -> Result<u32, Error> {
        let channels = self.channels();

        self.packer.pack_block(PackBlock {
            samples: &self.buffer[..samples as usize * channels],
            channels,
            primary,
            correction,
        })
    }
}

#[cfg(test)]
fn test_layout(channels: u8) -> StreamLayout {
    StreamLayout {
        channels,
        mask: Default::default(),
        initial: true,
        last: true,
    }
}

#[test]
fn test_sign_extension() {
    let cases: [(u32, &[(i32, i32)]); 4] = [
        (1, &[(0x7F, 127), (0x80, -128), (0xFF, -1), (0x100, 0)]),
        (
            2,
            &[(0x7FFF, 32767), (0x8000, -32768), (0xFFFF, -1), (0x1_0001, 1)],
        ),
        (
            3,
            &[
                (0x7F_FFFF, 8388607),
                (0x80_0000, -8388608),
                (0xFF_FFFF, -1),
                (0x7F00_0000, 0),
            ],
        ),
        (
            4,
            &[(0x7FFF_FFFF, i32::MAX), (i32::MIN, i32::MIN), (-1, -1)],
        ),
    ];

    for (bytes, values) in cases {
        let extend = sign_extender(bytes, false);
        let mut stream = ChannelStream::new(test_layout(1), 0, Flags::default(), 16, ());
        let raw = values.iter().map(|(raw, _)| *raw).collect::<Vec<_>>();
        stream.accumulate(&raw, 1, extend);
        assert_eq!(
            stream.samples(values.len() as u32),
            values.iter().map(|(_, v)| *v).collect::<Vec<_>>().as_slice()
        );
    }

    assert_eq!(sign_extender(1, true)(-1), 0xFF);
    assert_eq!(sign_extender(1, true)(0x80), 0x80);
}

#[test]
fn test_deinterleave() {
    // 5 channels: stereo pair, mono, stereo pair
    let frames = (0..50).collect::<Vec<i32>>();
    let extend = sign_extender(4, false);

    let mut front = ChannelStream::new(test_layout(2), 0, Flags::default(), 16, ());
    let mut center = ChannelStream::new(test_layout(1), 2, Flags::default(), 16, ());
    let mut back = ChannelStream::new(test_layout(2), 3, Flags::default(), 16, ());

    for stream in [&mut front, &mut center, &mut back] {
        stream.accumulate(&frames, 5, extend);
        assert_eq!(stream.buffered(), 10);
    }

    assert_eq!(front.samples(2), &[0, 1, 5, 6]);
    assert_eq!(center.samples(3), &[2, 7, 12]);
    assert_eq!(back.samples(2), &[3, 4, 8, 9]);

    back.consume(9);
    assert_eq!(back.sample_index, 9);
    assert_eq!(back.buffered(), 1);
    assert_eq!(back.samples(1), &[48, 49]);
}

#[test]
fn test_mono_flags() {
    let base = Flags::JOINT_STEREO | Flags::CROSS_DECORR | Flags::HYBRID | Flags::HYBRID_BALANCE;

    let flags = stream_flags(base, &test_layout(1));
    assert!(flags.contains(Flags::MONO | Flags::HYBRID));
    assert!(flags.contains(Flags::INITIAL_BLOCK | Flags::FINAL_BLOCK));
    assert!(!flags.contains(Flags::JOINT_STEREO));
    assert!(!flags.contains(Flags::CROSS_DECORR));
    assert!(!flags.contains(Flags::HYBRID_BALANCE));

    let flags = stream_flags(
        base,
        &StreamLayout {
            initial: false,
            ..test_layout(2)
        },
    );
    assert_eq!(flags, base | Flags::FINAL_BLOCK);
}
