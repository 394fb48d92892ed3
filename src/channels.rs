// Copyright 2025 Brian Langenberger
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! For splitting input channels into WavPack streams
//!
//! A WavPack block holds either one channel or a stereo pair.
//! Multichannel audio is therefore divided into several streams,
//! each of which gets its own block in every block cycle.
//! Adjacent channels of the Microsoft channel mask are paired
//! whenever they form one of the recognized stereo pairs.
//!
//! | Pair | Left | Right |
//! |------|------|-------|
//! | front | [`Channel::FrontLeft`] | [`Channel::FrontRight`] |
//! | back | [`Channel::BackLeft`] | [`Channel::BackRight`] |
//! | front center | [`Channel::FrontLeftOfCenter`] | [`Channel::FrontRightOfCenter`] |
//! | side | [`Channel::SideLeft`] | [`Channel::SideRight`] |
//! | top front | [`Channel::TopFrontLeft`] | [`Channel::TopFrontRight`] |
//! | top rear | [`Channel::TopRearLeft`] | [`Channel::TopRearRight`] |
//! | stereo mix | [`Channel::StereoMixLeft`] | [`Channel::StereoMixRight`] |

use crate::Error;

/// The maximum number of streams in a single block cycle
pub const MAX_STREAMS: usize = 4096;

/// Stream count beyond which older decoders give up
pub const OLD_MAX_STREAMS: usize = 8;

const STEREO_PAIRINGS: [u32; 7] = [
    Channel::FrontLeft as u32 | Channel::FrontRight as u32,
    Channel::BackLeft as u32 | Channel::BackRight as u32,
    Channel::FrontLeftOfCenter as u32 | Channel::FrontRightOfCenter as u32,
    Channel::SideLeft as u32 | Channel::SideRight as u32,
    Channel::TopFrontLeft as u32 | Channel::TopFrontRight as u32,
    Channel::TopRearLeft as u32 | Channel::TopRearRight as u32,
    Channel::StereoMixLeft as u32 | Channel::StereoMixRight as u32,
];

/// The Microsoft channel mask
///
/// Bit *n* being set indicates that the *n*th channel
/// position is present in the stream.
/// Channels are always interleaved in ascending bit order,
/// followed by any channels the mask doesn't define.
///
/// # Example
///
/// ```
/// use wavpack_blocks::channels::{ChannelMask, Channel};
///
/// // 5.1 with side channels
/// let mask: ChannelMask = [
///     Channel::FrontLeft,
///     Channel::FrontRight,
///     Channel::FrontCenter,
///     Channel::Lfe,
///     Channel::SideLeft,
///     Channel::SideRight,
/// ]
/// .into_iter()
/// .collect();
///
/// assert_eq!(u32::from(mask), 0x060F);
/// assert!(mask.contains(Channel::SideLeft));
/// assert!(!mask.contains(Channel::BackLeft));
/// ```
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ChannelMask {
    mask: u32,
}

impl ChannelMask {
    /// The mask a RIFF WAVE file implies when it has none
    ///
    /// Front center for mono, front left and right for stereo.
    /// Other channel counts have no implied mask.
    pub fn implied(channels: u32) -> Option<Self> {
        match channels {
            1 => Some(Self {
                mask: Channel::FrontCenter as u32,
            }),
            2 => Some(Self {
                mask: Channel::FrontLeft as u32 | Channel::FrontRight as u32,
            }),
            _ => None,
        }
    }

    /// Returns true if the given channel is in the mask
    #[inline]
    pub fn contains(&self, channel: Channel) -> bool {
        self.mask & channel as u32 != 0
    }
}

impl From<ChannelMask> for u32 {
    fn from(mask: ChannelMask) -> u32 {
        mask.mask
    }
}

impl From<u32> for ChannelMask {
    fn from(mask: u32) -> ChannelMask {
        ChannelMask { mask }
    }
}

impl FromIterator<Channel> for ChannelMask {
    fn from_iter<I: IntoIterator<Item = Channel>>(iter: I) -> Self {
        Self {
            mask: iter.into_iter().fold(0, |mask, c| mask | c as u32),
        }
    }
}

/// An individual channel mask channel
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Channel {
    /// Front left channel
    FrontLeft = 1 << 0,

    /// Front right channel
    FrontRight = 1 << 1,

    /// Front center channel
    FrontCenter = 1 << 2,

    /// Low-frequency effects (LFE) channel
    Lfe = 1 << 3,

    /// Back left channel
    BackLeft = 1 << 4,

    /// Back right channel
    BackRight = 1 << 5,

    /// Front left of center channel
    FrontLeftOfCenter = 1 << 6,

    /// Front right of center channel
    FrontRightOfCenter = 1 << 7,

    /// Back center channel
    BackCenter = 1 << 8,

    /// Side left channel
    SideLeft = 1 << 9,

    /// Side right channel
    SideRight = 1 << 10,

    /// Top center channel
    TopCenter = 1 << 11,

    /// Top front left channel
    TopFrontLeft = 1 << 12,

    /// Top front center channel
    TopFrontCenter = 1 << 13,

    /// Top front right channel
    TopFrontRight = 1 << 14,

    /// Top rear left channel
    TopRearLeft = 1 << 15,

    /// Top rear center channel
    TopRearCenter = 1 << 16,

    /// Top rear right channel
    TopRearRight = 1 << 17,

    /// Stereo mix left channel (RF64)
    StereoMixLeft = 1 << 29,

    /// Stereo mix right channel (RF64)
    StereoMixRight = 1 << 30,
}

/// One planned stream
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct StreamLayout {
    /// Number of channels, either 1 or 2
    pub channels: u8,
    /// Mask positions assigned to this stream
    ///
    /// This is empty for channels beyond those the mask defines.
    pub mask: ChannelMask,
    /// Whether this is the first stream of the cycle
    pub initial: bool,
    /// Whether this is the last stream of the cycle
    pub last: bool,
}

impl StreamLayout {
    /// Returns true if the stream holds a single channel
    #[inline]
    pub fn is_mono(&self) -> bool {
        self.channels == 1
    }
}

/// Divides channels into mono and stereo streams
///
/// # Example
///
/// ```
/// use wavpack_blocks::channels::{ChannelMask, StreamPlanner};
///
/// // 5.1 surround
/// let streams = StreamPlanner::default()
///     .plan(6, ChannelMask::from(0x3F))
///     .unwrap();
///
/// assert_eq!(
///     streams.iter().map(|s| s.channels).collect::<Vec<_>>(),
///     // front L/R, center, LFE, back L/R
///     vec![2, 1, 1, 2],
/// );
/// assert!(streams[0].initial);
/// assert!(streams[3].last);
/// ```
#[derive(Copy, Clone, Debug)]
pub struct StreamPlanner {
    pair_undefined: bool,
    max_streams: usize,
}

impl Default for StreamPlanner {
    fn default() -> Self {
        Self {
            pair_undefined: false,
            max_streams: MAX_STREAMS,
        }
    }
}

impl StreamPlanner {
    /// Pairs channels beyond the mask's defined positions into stereo streams
    ///
    /// Normally such channels each get a mono stream.
    pub fn pair_undefined(self, pair_undefined: bool) -> Self {
        Self {
            pair_undefined,
            ..self
        }
    }

    /// Limits the number of streams that may be planned
    ///
    /// The limit is clamped to 1..=[`MAX_STREAMS`].
    pub fn max_streams(self, max_streams: usize) -> Self {
        Self {
            max_streams: max_streams.clamp(1, MAX_STREAMS),
            ..self
        }
    }

    /// Divides the given number of channels into streams
    ///
    /// # Errors
    ///
    /// Returns [`Error::TooManyChannels`] with the number of
    /// unassigned channels if the stream limit is reached
    /// with channels still remaining.
    pub fn plan(&self, channels: u32, mask: ChannelMask) -> Result<Vec<StreamLayout>, Error> {
        let mut remaining = channels;
        let mut mask = u32::from(mask);
        let mut streams: Vec<StreamLayout> = Vec::new();

        while remaining > 0 {
            let mut mono_mask = 0;
            let mut stereo_mask = 0;

            for bit in (0..32).map(|pos| 1u32 << pos) {
                if mask & bit != 0 {
                    if mono_mask != 0 {
                        stereo_mask = mono_mask | bit;
                        break;
                    } else {
                        mono_mask = bit;
                    }
                }
            }

            let (chans, assigned) = if remaining > 1 && stereo_mask != 0 {
                if STEREO_PAIRINGS.contains(&stereo_mask) {
                    (2, stereo_mask)
                } else {
                    (1, mono_mask)
                }
            } else if mono_mask != 0 {
                (1, mono_mask)
            } else if self.pair_undefined && remaining > 1 {
                (2, 0)
            } else {
                (1, 0)
            };

            if streams.len() == self.max_streams {
                return Err(Error::TooManyChannels(remaining));
            }

            mask &= !assigned;
            remaining -= chans;

            streams.push(StreamLayout {
                channels: chans as u8,
                mask: assigned.into(),
                initial: streams.is_empty(),
                last: remaining == 0,
            });
        }

        Ok(streams)
    }
}

#[test]
fn test_stereo_pairings() {
    for pair in STEREO_PAIRINGS {
        let streams = StreamPlanner::default().plan(2, pair.into()).unwrap();
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].channels, 2);
        assert_eq!(u32::from(streams[0].mask), pair);
        assert!(streams[0].initial && streams[0].last);
    }
}

#[test]
fn test_unpaired_bits() {
    // front left and back right form no pair
    let mask: ChannelMask = [Channel::FrontLeft, Channel::BackRight].into_iter().collect();
    let streams = StreamPlanner::default().plan(2, mask).unwrap();
    assert_eq!(streams.len(), 2);
    assert_eq!(streams[0].mask, ChannelMask::from(Channel::FrontLeft as u32));
    assert_eq!(streams[1].mask, ChannelMask::from(Channel::BackRight as u32));
    assert!(streams[0].initial && !streams[0].last);
    assert!(!streams[1].initial && streams[1].last);
}
