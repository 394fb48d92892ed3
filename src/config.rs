// Copyright 2025 Brian Langenberger
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! For configuring a WavPack encoder
//!
//! An [`EncodingOptions`] is assembled by the caller with
//! builder methods and then resolved into a [`Configuration`]
//! when the encoder is created.
//! Resolution validates the options, derives the block header
//! flags every stream starts from, plans the channel streams
//! and chooses a nominal block size.

use crate::Error;
use crate::block::Flags;
use crate::channels::{ChannelMask, OLD_MAX_STREAMS, StreamLayout, StreamPlanner};
use crate::metadata::MetadataPolicy;
use std::num::NonZero;

/// Sample rates which may be stored as an index in block flags
///
/// Any other rate is flagged as [`Flags::UNKNOWN_SAMPLE_RATE`]
/// and must be stored separately by the stream packer.
pub const SAMPLE_RATES: [u32; 15] = [
    6000, 8000, 9600, 11025, 12000, 16000, 22050, 24000, 32000, 44100, 48000, 64000, 88200,
    96000, 192000,
];

/// Stream version written by default
pub const DEFAULT_VERSION: u16 = 0x407;

/// Stream version required by DSD audio or more than
/// [`OLD_MAX_STREAMS`] streams
pub const EXTENDED_VERSION: u16 = 0x410;

/// Maximum number of channels
pub const MAX_CHANNELS: u32 = 4096;

/// Largest block size which may be forced by
/// [`EncodingOptions::block_samples`]
pub const MAX_BLOCK_SAMPLES: u32 = 131072;

// longest file extension we'll store, plus one
const EXTENSION_LIMIT: usize = 8;

/// Compression effort
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum Quality {
    /// Fastest encoding
    Fast,
    /// Default encoding
    #[default]
    Normal,
    /// Better compression with larger blocks
    High,
    /// Best compression, which implies [`Quality::High`]
    VeryHigh,
}

impl Quality {
    /// Whether this quality level uses high-mode block sizes
    #[inline]
    pub fn is_high(self) -> bool {
        matches!(self, Self::High | Self::VeryHigh)
    }
}

/// Target bitrate for hybrid (lossy) encoding
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Bitrate {
    /// Average bits per sample
    BitsPerSample(f64),
    /// Kilobits per second across all channels
    Kbps(f64),
}

/// Noise shaping in hybrid mode
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub enum NoiseShaping {
    /// Chosen automatically by the stream packer
    #[default]
    Auto,
    /// No noise shaping
    Off,
    /// Fixed shaping coefficient
    Weight(f32),
}

/// Format of the file being compressed
///
/// Any format besides [`FileFormat::Wav`] stores its
/// wrapper under the alternate header and trailer IDs,
/// so that older decoders don't mistake it for RIFF WAVE.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum FileFormat {
    /// Microsoft RIFF WAVE or RF64
    #[default]
    Wav,
    /// Sony Wave64
    Wave64,
    /// Apple Core Audio Format
    Caf,
    /// Philips DSDIFF
    Dff,
    /// Sony DSD Stream File
    Dsf,
}

impl FileFormat {
    /// The format's numeric identifier
    pub fn id(self) -> u8 {
        match self {
            Self::Wav => 0,
            Self::Wave64 => 1,
            Self::Caf => 2,
            Self::Dff => 3,
            Self::Dsf => 4,
        }
    }
}

/// A Core Audio channel layout, possibly with channel reordering
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChannelLayout {
    tag: u32,
    reorder: Option<Vec<u8>>,
}

impl ChannelLayout {
    /// The layout tag, whose low 8 bits are its channel count
    #[inline]
    pub fn tag(&self) -> u32 {
        self.tag
    }

    /// Number of channels the layout describes
    #[inline]
    pub fn channels(&self) -> u32 {
        self.tag & 0xff
    }

    /// Reordering table, normalized so its smallest entry is 0
    #[inline]
    pub fn reorder(&self) -> Option<&[u8]> {
        self.reorder.as_deref()
    }

    fn validate(tag: u32, reorder: Option<Vec<u8>>, channels: u32) -> Result<Self, Error> {
        if tag & 0xff00_ff00 != 0 || (tag & 0xff) > channels {
            return Err(Error::InvalidChannelLayout);
        }

        let layout_channels = (tag & 0xff) as usize;

        let reorder = match reorder {
            Some(_) if layout_channels == 0 => None,
            Some(mut reorder) if reorder.len() >= layout_channels => {
                reorder.truncate(layout_channels);
                let min = reorder.iter().copied().min().unwrap_or_default();
                reorder.iter_mut().for_each(|c| *c -= min);
                Some(reorder)
            }
            Some(_) => return Err(Error::InvalidChannelLayout),
            None => None,
        };

        Ok(Self { tag, reorder })
    }
}

/// WavPack encoding options
///
/// # Example
///
/// ```
/// use wavpack_blocks::channels::ChannelMask;
/// use wavpack_blocks::config::{EncodingOptions, Quality};
///
/// // 5.1 surround at 48kHz, 24 bits per sample
/// let options = EncodingOptions::new(48000, 24, 3, 6)
///     .channel_mask(ChannelMask::from(0x3F))
///     .quality(Quality::High)
///     .md5(true);
///
/// let config = options.resolve(false).unwrap();
/// assert_eq!(config.streams().len(), 4);
/// assert_eq!(config.block_samples(), 24000);
/// ```
#[derive(Clone, Debug)]
pub struct EncodingOptions {
    sample_rate: u32,
    bits_per_sample: u32,
    bytes_per_sample: u32,
    channels: u32,
    channel_mask: Option<ChannelMask>,
    quality: Quality,
    hybrid: Option<Bitrate>,
    noise_shaping: NoiseShaping,
    joint_stereo: Option<bool>,
    cross_decorrelation: bool,
    optimize_correction: bool,
    extra_mode: Option<u8>,
    skip_wvx: bool,
    md5: bool,
    pair_undefined: bool,
    block_samples: Option<NonZero<u32>>,
    merge_blocks: bool,
    float_norm_exp: Option<u8>,
    qmode: u32,
    dsd: bool,
    channel_layout: Option<(u32, Option<Vec<u8>>)>,
    file_extension: Option<String>,
    file_format: FileFormat,
    stream_version: Option<u16>,
    metadata_policy: MetadataPolicy,
}

impl EncodingOptions {
    /// Starts options for the given stream parameters
    ///
    /// `bytes_per_sample` is the width of each sample in
    /// the original audio, from 1 to 4,
    /// and `bits_per_sample` the number of those bits in use.
    pub fn new(sample_rate: u32, bits_per_sample: u32, bytes_per_sample: u32, channels: u32) -> Self {
        Self {
            sample_rate,
            bits_per_sample,
            bytes_per_sample,
            channels,
            channel_mask: None,
            quality: Quality::default(),
            hybrid: None,
            noise_shaping: NoiseShaping::default(),
            joint_stereo: None,
            cross_decorrelation: false,
            optimize_correction: false,
            extra_mode: None,
            skip_wvx: false,
            md5: false,
            pair_undefined: false,
            block_samples: None,
            merge_blocks: false,
            float_norm_exp: None,
            qmode: 0,
            dsd: false,
            channel_layout: None,
            file_extension: None,
            file_format: FileFormat::default(),
            stream_version: None,
            metadata_policy: MetadataPolicy::default(),
        }
    }

    /// Assigns channel mask
    ///
    /// Without one, mono and stereo audio use their
    /// [implied](ChannelMask::implied) masks and all other
    /// channel counts are treated as undefined positions.
    pub fn channel_mask(self, channel_mask: ChannelMask) -> Self {
        Self {
            channel_mask: Some(channel_mask),
            ..self
        }
    }

    /// Assigns compression effort
    pub fn quality(self, quality: Quality) -> Self {
        Self { quality, ..self }
    }

    /// Enables hybrid (lossy) mode at the given bitrate
    pub fn hybrid(self, bitrate: Bitrate) -> Self {
        Self {
            hybrid: Some(bitrate),
            ..self
        }
    }

    /// Overrides hybrid mode noise shaping
    pub fn noise_shaping(self, noise_shaping: NoiseShaping) -> Self {
        Self {
            noise_shaping,
            ..self
        }
    }

    /// Overrides joint stereo, which is otherwise enabled
    pub fn joint_stereo(self, joint_stereo: bool) -> Self {
        Self {
            joint_stereo: Some(joint_stereo),
            ..self
        }
    }

    /// Requests no-delay cross decorrelation in hybrid mode
    ///
    /// Lossless mode always uses it.
    pub fn cross_decorrelation(self, cross_decorrelation: bool) -> Self {
        Self {
            cross_decorrelation,
            ..self
        }
    }

    /// Maximizes hybrid compression when a correction stream is written
    pub fn optimize_correction(self, optimize_correction: bool) -> Self {
        Self {
            optimize_correction,
            ..self
        }
    }

    /// Enables extra processing, with an optional mode value
    pub fn extra_mode(self, xmode: Option<u8>) -> Self {
        Self {
            extra_mode: Some(xmode.filter(|x| *x != 0).unwrap_or(1)),
            ..self
        }
    }

    /// Skips the extended-precision stream for floats and large integers
    pub fn skip_wvx(self, skip_wvx: bool) -> Self {
        Self { skip_wvx, ..self }
    }

    /// Calculates an MD5 sum of the input samples
    pub fn md5(self, md5: bool) -> Self {
        Self { md5, ..self }
    }

    /// Pairs channels beyond the channel mask into stereo streams
    pub fn pair_undefined_channels(self, pair_undefined: bool) -> Self {
        Self {
            pair_undefined,
            ..self
        }
    }

    /// Forces the number of samples per block
    ///
    /// Sizes over [`MAX_BLOCK_SAMPLES`] are rejected
    /// when the options are resolved.
    pub fn block_samples(self, block_samples: NonZero<u32>) -> Self {
        Self {
            block_samples: Some(block_samples),
            ..self
        }
    }

    /// Allows blocks to be a multiple of the forced block size
    pub fn merge_blocks(self, merge_blocks: bool) -> Self {
        Self {
            merge_blocks,
            ..self
        }
    }

    /// Marks samples as IEEE 32-bit floats with the given
    /// normalization exponent (127 for ±1.0)
    pub fn float(self, norm_exp: u8) -> Self {
        Self {
            float_norm_exp: Some(norm_exp),
            ..self
        }
    }

    /// Assigns quality mode bits
    ///
    /// Any of the low 8 bits being set stores the MD5 sum
    /// under an ID older decoders won't verify.
    pub fn qmode(self, qmode: u32) -> Self {
        Self { qmode, ..self }
    }

    /// Marks samples as 1-bit DSD audio, 8 bits per byte
    pub fn dsd(self, dsd: bool) -> Self {
        Self { dsd, ..self }
    }

    /// Assigns a Core Audio channel layout tag
    /// and optional channel reordering table
    pub fn channel_layout(self, tag: u32, reorder: Option<Vec<u8>>) -> Self {
        Self {
            channel_layout: Some((tag, reorder)),
            ..self
        }
    }

    /// Records the original file's extension and format
    ///
    /// The extension, if any, is stored with the audio.
    pub fn file_information(self, extension: Option<&str>, format: FileFormat) -> Self {
        Self {
            file_extension: extension.map(|e| e.to_owned()),
            file_format: format,
            ..self
        }
    }

    /// Overrides the stream version written to block headers
    pub fn stream_version(self, version: u16) -> Self {
        Self {
            stream_version: Some(version),
            ..self
        }
    }

    /// Overrides limits on pending metadata
    pub fn metadata_policy(self, metadata_policy: MetadataPolicy) -> Self {
        Self {
            metadata_policy,
            ..self
        }
    }

    /// Validates options and resolves them to a complete configuration
    ///
    /// `correction` indicates whether a correction stream is written.
    ///
    /// # Errors
    ///
    /// Returns an error if any parameter is out of range,
    /// the channels can't be divided into streams,
    /// or a correction stream is requested for DSD audio.
    pub fn resolve(self, correction: bool) -> Result<Configuration, Error> {
        Configuration::resolve(self, correction)
    }
}

/// A resolved encoder configuration
#[derive(Clone, Debug)]
pub struct Configuration {
    sample_rate: u32,
    bits_per_sample: u32,
    bytes_per_sample: u32,
    channels: u32,
    channel_mask: ChannelMask,
    flags: Flags,
    hybrid_bits: u32,
    quality: Quality,
    shaping_weight: Option<f32>,
    extra_mode: u8,
    skip_wvx: bool,
    md5: bool,
    float_norm_exp: Option<u8>,
    qmode: u32,
    dsd_multiplier: Option<u32>,
    correction: bool,
    optimize_correction: bool,
    stream_version: u16,
    block_samples: u32,
    max_samples: u32,
    block_boundary: Option<u32>,
    channel_layout: Option<ChannelLayout>,
    file_extension: Option<String>,
    file_format: FileFormat,
    metadata_policy: MetadataPolicy,
    streams: Vec<StreamLayout>,
}

impl Configuration {
    fn resolve(mut options: EncodingOptions, correction: bool) -> Result<Self, Error> {
        if options.channels == 0 || options.channels > MAX_CHANNELS {
            return Err(Error::InvalidChannelCount);
        }
        if !(1..=4).contains(&options.bytes_per_sample) {
            return Err(Error::InvalidBytesPerSample);
        }
        if !(1..=options.bytes_per_sample * 8).contains(&options.bits_per_sample) {
            return Err(Error::InvalidBitsPerSample);
        }
        if options.sample_rate == 0 {
            return Err(Error::InvalidSampleRate);
        }
        if options
            .block_samples
            .is_some_and(|b| b.get() > MAX_BLOCK_SAMPLES)
        {
            return Err(Error::ExcessiveBlockSamples);
        }
        if options
            .file_extension
            .as_ref()
            .is_some_and(|e| e.len() >= EXTENSION_LIMIT)
        {
            return Err(Error::ExtensionTooLong);
        }

        let channel_layout = options
            .channel_layout
            .take()
            .map(|(tag, reorder)| ChannelLayout::validate(tag, reorder, options.channels))
            .transpose()?;

        let channel_mask = options
            .channel_mask
            .or_else(|| ChannelMask::implied(options.channels))
            .unwrap_or_default();

        let mut config = if options.dsd {
            Self::resolve_dsd(&options, correction)?
        } else {
            Self::resolve_pcm(&options, correction)?
        };

        config.channel_mask = channel_mask;
        config.channel_layout = channel_layout;
        config.streams = StreamPlanner::default()
            .pair_undefined(options.pair_undefined)
            .plan(options.channels, channel_mask)?;
        config.stream_version = options.stream_version.unwrap_or(
            if config.streams.len() > OLD_MAX_STREAMS || config.dsd_multiplier.is_some() {
                EXTENDED_VERSION
            } else {
                DEFAULT_VERSION
            },
        );

        let (block_samples, block_boundary) = config.nominal_block_samples(
            options.block_samples.map(NonZero::get),
            options.merge_blocks && !options.dsd,
        );
        config.block_samples = block_samples;
        config.max_samples = block_samples + block_samples / 2;
        config.block_boundary = block_boundary;

        Ok(config)
    }

    fn base(options: &EncodingOptions) -> Self {
        Self {
            sample_rate: options.sample_rate,
            bits_per_sample: options.bits_per_sample,
            bytes_per_sample: options.bytes_per_sample,
            channels: options.channels,
            channel_mask: ChannelMask::default(),
            flags: Flags::default(),
            hybrid_bits: 0,
            quality: options.quality,
            shaping_weight: None,
            extra_mode: 0,
            skip_wvx: options.skip_wvx,
            md5: options.md5,
            float_norm_exp: None,
            qmode: options.qmode,
            dsd_multiplier: None,
            correction: false,
            optimize_correction: false,
            stream_version: DEFAULT_VERSION,
            block_samples: 0,
            max_samples: 0,
            block_boundary: None,
            channel_layout: None,
            file_extension: options.file_extension.clone(),
            file_format: options.file_format,
            metadata_policy: options.metadata_policy,
            streams: Vec::new(),
        }
    }

    fn resolve_dsd(options: &EncodingOptions, correction: bool) -> Result<Self, Error> {
        if options.bytes_per_sample != 1 || options.bits_per_sample != 8 {
            return Err(Error::InvalidBitsPerSample);
        }
        if correction {
            return Err(Error::UnexpectedCorrection);
        }

        let (sample_rate, multiplier) = reduce_dsd_rate(options.sample_rate);

        let mut flags = Flags::DSD;
        flags.set_sample_rate_index(sample_rate_index(sample_rate));

        // only a handful of options have any meaning for DSD
        Ok(Self {
            sample_rate,
            flags,
            quality: if options.quality.is_high() {
                Quality::High
            } else {
                Quality::Normal
            },
            skip_wvx: false,
            dsd_multiplier: Some(multiplier),
            ..Self::base(options)
        })
    }

    fn resolve_pcm(options: &EncodingOptions, correction: bool) -> Result<Self, Error> {
        let mut flags = Flags::default();
        flags.set_bytes_stored(options.bytes_per_sample);
        flags.set_sample_rate_index(sample_rate_index(options.sample_rate));

        // the shift field stays zero, samples arrive at full width
        if options.float_norm_exp.is_some() {
            if options.bytes_per_sample != 4 || options.bits_per_sample != 32 {
                return Err(Error::InvalidBitsPerSample);
            }
            flags.insert(Flags::FLOAT_DATA);
        }

        let mut shaping_weight = None;
        let mut hybrid_bits = 0;

        match options.hybrid {
            Some(bitrate) => {
                flags |= Flags::HYBRID | Flags::HYBRID_BITRATE | Flags::HYBRID_BALANCE;

                match options.noise_shaping {
                    NoiseShaping::Auto => flags |= Flags::HYBRID_SHAPE | Flags::NEW_SHAPING,
                    NoiseShaping::Weight(weight) => {
                        shaping_weight = Some(weight);
                        flags |= Flags::HYBRID_SHAPE | Flags::NEW_SHAPING;
                    }
                    NoiseShaping::Off => {}
                }

                if options.cross_decorrelation || options.optimize_correction {
                    flags |= Flags::CROSS_DECORR;
                }

                hybrid_bits = match bitrate {
                    Bitrate::Kbps(kbps) => ((kbps * 256000.0
                        / f64::from(options.sample_rate)
                        / f64::from(options.channels)
                        + 0.5)
                        .floor() as u32)
                        .min(64 << 8),
                    Bitrate::BitsPerSample(bps) => (bps * 256.0 + 0.5).floor() as u32,
                };
            }
            None => flags |= Flags::CROSS_DECORR,
        }

        if options.joint_stereo.unwrap_or(true) {
            flags |= Flags::JOINT_STEREO;
        }

        Ok(Self {
            flags,
            hybrid_bits,
            shaping_weight,
            extra_mode: options.extra_mode.unwrap_or(0),
            float_norm_exp: options.float_norm_exp,
            correction,
            optimize_correction: options.optimize_correction,
            ..Self::base(options)
        })
    }

    // returns nominal block samples and the forced block boundary, if any
    fn nominal_block_samples(&self, forced: Option<u32>, merge: bool) -> (u32, Option<u32>) {
        let channels = u64::from(self.channels);

        let mut block_samples = u64::from(match self.dsd_multiplier {
            Some(_) => {
                let samples = if self.quality.is_high() { 22050 } else { 44100 };
                if self.channels == 1 { samples * 2 } else { samples }
            }
            None if self.quality.is_high() => self.sample_rate,
            None if self.sample_rate % 2 == 0 => self.sample_rate / 2,
            None => self.sample_rate,
        });

        while block_samples * channels > 150000 {
            block_samples /= 2;
        }

        while block_samples * channels < 40000 {
            block_samples *= 2;
        }

        let block_samples = block_samples as u32;

        match forced {
            Some(forced) if merge && block_samples > forced => {
                (block_samples / forced * forced, Some(forced))
            }
            Some(forced) => (forced, None),
            None => (block_samples, None),
        }
    }

    /// Sample rate, after any DSD rate reduction
    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Significant bits per sample
    #[inline]
    pub fn bits_per_sample(&self) -> u32 {
        self.bits_per_sample
    }

    /// Bytes per sample in the original audio
    #[inline]
    pub fn bytes_per_sample(&self) -> u32 {
        self.bytes_per_sample
    }

    /// Total channel count
    #[inline]
    pub fn channels(&self) -> u32 {
        self.channels
    }

    /// Channel mask
    #[inline]
    pub fn channel_mask(&self) -> ChannelMask {
        self.channel_mask
    }

    /// Flags every stream's block header starts from
    #[inline]
    pub fn flags(&self) -> Flags {
        self.flags
    }

    /// Hybrid mode bitrate, in 1/256ths of a bit per sample
    #[inline]
    pub fn hybrid_bits(&self) -> u32 {
        self.hybrid_bits
    }

    /// Compression effort
    #[inline]
    pub fn quality(&self) -> Quality {
        self.quality
    }

    /// Fixed noise shaping coefficient, if any
    #[inline]
    pub fn shaping_weight(&self) -> Option<f32> {
        self.shaping_weight
    }

    /// Extra processing mode, or 0 if none
    #[inline]
    pub fn extra_mode(&self) -> u8 {
        self.extra_mode
    }

    /// Whether the extended-precision stream is skipped
    #[inline]
    pub fn skip_wvx(&self) -> bool {
        self.skip_wvx
    }

    /// Whether an MD5 sum is calculated
    #[inline]
    pub fn md5(&self) -> bool {
        self.md5
    }

    /// Float normalization exponent, for floating point samples
    #[inline]
    pub fn float_norm_exp(&self) -> Option<u8> {
        self.float_norm_exp
    }

    /// Quality mode bits
    #[inline]
    pub fn qmode(&self) -> u32 {
        self.qmode
    }

    /// DSD rate multiplier, for DSD audio
    ///
    /// The original DSD rate is this times [`Self::sample_rate`].
    #[inline]
    pub fn dsd_multiplier(&self) -> Option<u32> {
        self.dsd_multiplier
    }

    /// Whether a correction stream is written
    #[inline]
    pub fn correction(&self) -> bool {
        self.correction
    }

    /// Whether hybrid compression is maximized for a correction stream
    #[inline]
    pub fn optimize_correction(&self) -> bool {
        self.optimize_correction
    }

    /// Version written to block headers
    #[inline]
    pub fn stream_version(&self) -> u16 {
        self.stream_version
    }

    /// Nominal samples per block
    #[inline]
    pub fn block_samples(&self) -> u32 {
        self.block_samples
    }

    /// Samples buffered before a block is forced, half again the nominal size
    #[inline]
    pub fn max_samples(&self) -> u32 {
        self.max_samples
    }

    /// Forced block size blocks must be a multiple of, when merging blocks
    #[inline]
    pub fn block_boundary(&self) -> Option<u32> {
        self.block_boundary
    }

    /// Core Audio channel layout, if any
    #[inline]
    pub fn channel_layout(&self) -> Option<&ChannelLayout> {
        self.channel_layout.as_ref()
    }

    /// Original file's extension, if any
    #[inline]
    pub fn file_extension(&self) -> Option<&str> {
        self.file_extension.as_deref()
    }

    /// Original file's format
    #[inline]
    pub fn file_format(&self) -> FileFormat {
        self.file_format
    }

    /// Limits on pending metadata
    #[inline]
    pub fn metadata_policy(&self) -> MetadataPolicy {
        self.metadata_policy
    }

    /// Planned streams, in block cycle order
    #[inline]
    pub fn streams(&self) -> &[StreamLayout] {
        &self.streams
    }
}

/// Index of the given rate in [`SAMPLE_RATES`],
/// or [`Flags::UNKNOWN_SAMPLE_RATE`] if not present
pub fn sample_rate_index(sample_rate: u32) -> u32 {
    SAMPLE_RATES
        .iter()
        .position(|r| *r == sample_rate)
        .map(|i| i as u32)
        .unwrap_or(Flags::UNKNOWN_SAMPLE_RATE)
}

/// Divides a DSD sample rate down to a standard PCM rate
///
/// Returns the reduced rate and the power-of-two divisor used,
/// trying standard rates from highest to lowest.
/// Rates with no such divisor are returned unchanged
/// with a divisor of 1.
///
/// # Example
///
/// ```
/// use wavpack_blocks::config::reduce_dsd_rate;
///
/// assert_eq!(reduce_dsd_rate(2822400), (88200, 32));
/// assert_eq!(reduce_dsd_rate(44100), (44100, 1));
/// assert_eq!(reduce_dsd_rate(1234567), (1234567, 1));
/// ```
pub fn reduce_dsd_rate(sample_rate: u32) -> (u32, u32) {
    SAMPLE_RATES
        .iter()
        .rev()
        .find_map(|rate| {
            (sample_rate % rate == 0)
                .then(|| sample_rate / rate)
                .filter(|divisor| divisor.is_power_of_two())
                .map(|divisor| (*rate, divisor))
        })
        .unwrap_or((sample_rate, 1))
}

#[test]
fn test_block_sizing() {
    fn sizing(options: EncodingOptions) -> (u32, u32, Option<u32>) {
        let config = options.resolve(false).unwrap();
        (
            config.block_samples(),
            config.max_samples(),
            config.block_boundary(),
        )
    }

    assert_eq!(
        sizing(EncodingOptions::new(44100, 16, 2, 2)),
        (22050, 33075, None)
    );
    assert_eq!(
        sizing(EncodingOptions::new(44100, 16, 2, 2).quality(Quality::VeryHigh)),
        (44100, 66150, None)
    );
    assert_eq!(
        sizing(EncodingOptions::new(8000, 16, 2, 1)),
        (64000, 96000, None)
    );
    assert_eq!(
        sizing(EncodingOptions::new(192000, 24, 3, 6)),
        (24000, 36000, None)
    );
    assert_eq!(
        sizing(EncodingOptions::new(44100, 16, 2, 2).block_samples(NonZero::new(1000).unwrap())),
        (1000, 1500, None)
    );
    assert_eq!(
        sizing(
            EncodingOptions::new(44100, 16, 2, 2)
                .block_samples(NonZero::new(1000).unwrap())
                .merge_blocks(true)
        ),
        (22000, 33000, Some(1000))
    );
    assert_eq!(
        sizing(EncodingOptions::new(2822400, 8, 1, 2).dsd(true)),
        (44100, 66150, None)
    );
    assert_eq!(
        sizing(
            EncodingOptions::new(2822400, 8, 1, 1)
                .dsd(true)
                .quality(Quality::High)
        ),
        (44100, 66150, None)
    );
}

#[test]
fn test_pcm_flags() {
    let config = EncodingOptions::new(44100, 20, 3, 2).resolve(false).unwrap();
    let flags = config.flags();
    assert_eq!(flags.bytes_stored(), 3);
    assert_eq!(flags.shift(), 0);
    assert_eq!(flags.sample_rate_index(), 9);
    assert!(flags.contains(Flags::JOINT_STEREO | Flags::CROSS_DECORR));
    assert!(!flags.contains(Flags::HYBRID));
    assert_eq!(config.stream_version(), DEFAULT_VERSION);

    let config = EncodingOptions::new(44100, 16, 2, 2)
        .hybrid(Bitrate::Kbps(256.0))
        .joint_stereo(false)
        .resolve(true)
        .unwrap();
    let flags = config.flags();
    assert!(flags.contains(
        Flags::HYBRID
            | Flags::HYBRID_BITRATE
            | Flags::HYBRID_BALANCE
            | Flags::HYBRID_SHAPE
            | Flags::NEW_SHAPING
    ));
    assert!(!flags.contains(Flags::CROSS_DECORR));
    assert!(!flags.contains(Flags::JOINT_STEREO));
    // 256 kbps over 2 channels at 44.1kHz is about 2.9 bits per sample
    assert_eq!(config.hybrid_bits(), 743);
    assert!(config.correction());

    let config = EncodingOptions::new(44100, 16, 2, 2)
        .hybrid(Bitrate::BitsPerSample(3.0))
        .noise_shaping(NoiseShaping::Off)
        .resolve(false)
        .unwrap();
    assert!(!config.flags().contains(Flags::HYBRID_SHAPE));
    assert_eq!(config.hybrid_bits(), 768);

    let config = EncodingOptions::new(96000, 32, 4, 1)
        .float(127)
        .resolve(false)
        .unwrap();
    assert!(config.flags().contains(Flags::FLOAT_DATA));
    assert_eq!(config.flags().shift(), 0);
    assert_eq!(config.flags().sample_rate_index(), 13);

    let config = EncodingOptions::new(44000, 16, 2, 1).resolve(false).unwrap();
    assert_eq!(
        config.flags().sample_rate_index(),
        Flags::UNKNOWN_SAMPLE_RATE
    );
}

#[test]
fn test_dsd_configuration() {
    let config = EncodingOptions::new(5644800, 8, 1, 2)
        .dsd(true)
        .hybrid(Bitrate::BitsPerSample(3.0))
        .extra_mode(Some(3))
        .resolve(false)
        .unwrap();
    assert_eq!(config.sample_rate(), 88200);
    assert_eq!(config.dsd_multiplier(), Some(64));
    assert!(config.flags().contains(Flags::DSD));
    assert!(!config.flags().contains(Flags::HYBRID));
    assert_eq!(config.extra_mode(), 0);
    assert_eq!(config.stream_version(), EXTENDED_VERSION);

    assert!(matches!(
        EncodingOptions::new(2822400, 16, 2, 2)
            .dsd(true)
            .resolve(false),
        Err(Error::InvalidBitsPerSample)
    ));
    assert!(matches!(
        EncodingOptions::new(2822400, 8, 1, 2)
            .dsd(true)
            .resolve(true),
        Err(Error::UnexpectedCorrection)
    ));
}

#[test]
fn test_invalid_options() {
    assert!(matches!(
        EncodingOptions::new(44100, 16, 2, 0).resolve(false),
        Err(Error::InvalidChannelCount)
    ));
    assert!(matches!(
        EncodingOptions::new(44100, 16, 5, 2).resolve(false),
        Err(Error::InvalidBytesPerSample)
    ));
    assert!(matches!(
        EncodingOptions::new(44100, 17, 2, 2).resolve(false),
        Err(Error::InvalidBitsPerSample)
    ));
    assert!(matches!(
        EncodingOptions::new(0, 16, 2, 2).resolve(false),
        Err(Error::InvalidSampleRate)
    ));
    assert!(matches!(
        EncodingOptions::new(44100, 16, 2, 2)
            .file_information(Some("toolong1"), FileFormat::Wav)
            .resolve(false),
        Err(Error::ExtensionTooLong)
    ));
    assert!(
        EncodingOptions::new(44100, 16, 2, 2)
            .file_information(Some("toolong"), FileFormat::Wav)
            .resolve(false)
            .is_ok()
    );

    for forced in [MAX_BLOCK_SAMPLES + 1, 3_000_000_000, u32::MAX] {
        assert!(matches!(
            EncodingOptions::new(44100, 16, 2, 2)
                .block_samples(NonZero::new(forced).unwrap())
                .resolve(false),
            Err(Error::ExcessiveBlockSamples)
        ));
    }
    let config = EncodingOptions::new(44100, 16, 2, 2)
        .block_samples(NonZero::new(MAX_BLOCK_SAMPLES).unwrap())
        .resolve(false)
        .unwrap();
    assert_eq!(config.block_samples(), MAX_BLOCK_SAMPLES);
    assert_eq!(config.max_samples(), MAX_BLOCK_SAMPLES / 2 * 3);
}

#[test]
fn test_channel_layout() {
    let config = EncodingOptions::new(44100, 16, 2, 4)
        .channel_layout(0x0084_0004, Some(vec![3, 5, 4, 6, 9]))
        .resolve(false)
        .unwrap();
    let layout = config.channel_layout().unwrap();
    assert_eq!(layout.channels(), 4);
    assert_eq!(layout.reorder(), Some([0, 2, 1, 3].as_slice()));

    // high bits of each 16-bit half must be clear
    assert!(matches!(
        EncodingOptions::new(44100, 16, 2, 4)
            .channel_layout(0x0000_0104, None)
            .resolve(false),
        Err(Error::InvalidChannelLayout)
    ));

    // more layout channels than audio channels
    assert!(matches!(
        EncodingOptions::new(44100, 16, 2, 2)
            .channel_layout(0x0084_0004, None)
            .resolve(false),
        Err(Error::InvalidChannelLayout)
    ));

    // reordering table too short
    assert!(matches!(
        EncodingOptions::new(44100, 16, 2, 4)
            .channel_layout(0x0084_0004, Some(vec![0, 1]))
            .resolve(false),
        Err(Error::InvalidChannelLayout)
    ));
}
