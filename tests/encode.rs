use std::num::NonZero;
use wavpack_blocks::Error;
use wavpack_blocks::block::{BlockHeader, Flags, read_blocks};
use wavpack_blocks::channels::ChannelMask;
use wavpack_blocks::config::{Bitrate, EncodingOptions, FileFormat};
use wavpack_blocks::encode::{Encoder, PackBlock, StreamContext};
use wavpack_blocks::metadata::{MetadataId, MetadataPolicy, locate, sub_blocks};

type Packer = fn(PackBlock<'_>) -> Result<u32, Error>;

fn le_bytes(samples: &[i32]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

// stores samples as-is, 4 bytes apiece
fn verbatim(block: PackBlock<'_>) -> Result<u32, Error> {
    let bytes = le_bytes(block.samples);
    block
        .primary
        .add_sub_block(MetadataId::WV_BITSTREAM, &bytes)?;
    if let Some(correction) = block.correction {
        correction.add_sub_block(MetadataId::WVC_BITSTREAM, &bytes)?;
    }
    Ok(block.primary.header().block_samples)
}

fn verbatim_encoder(options: EncodingOptions, total_samples: Option<u64>) -> Encoder<Vec<u8>, Packer> {
    Encoder::new(Vec::new(), None, options, total_samples, |_| verbatim as Packer).unwrap()
}

fn random_samples(frames: usize, channels: usize, bits: u32) -> Vec<i32> {
    let min = -(1i64 << (bits - 1));
    let max = (1i64 << (bits - 1)) - 1;
    std::iter::repeat_with(|| fastrand::i64(min..=max) as i32)
        .take(frames * channels)
        .collect()
}

fn blocks(file: &[u8]) -> Vec<Vec<u8>> {
    read_blocks(file).collect::<Result<_, _>>().unwrap()
}

fn headers(file: &[u8]) -> Vec<BlockHeader> {
    blocks(file)
        .iter()
        .map(|b| BlockHeader::parse(b).unwrap())
        .collect()
}

// samples per channel of each block holding audio,
// counting each block cycle once
fn cycle_lengths(file: &[u8]) -> Vec<u32> {
    headers(file)
        .into_iter()
        .filter(|h| h.block_samples > 0 && h.flags.contains(Flags::INITIAL_BLOCK))
        .map(|h| h.block_samples)
        .collect()
}

// reassembles interleaved samples from verbatim blocks
fn unpack(file: &[u8], id: MetadataId) -> Vec<i32> {
    let mut samples = vec![];
    let mut cycle: Vec<(usize, Vec<i32>)> = vec![];

    for block in blocks(file) {
        let header = BlockHeader::parse(&block).unwrap();
        if header.block_samples == 0 {
            continue;
        }
        if header.flags.contains(Flags::INITIAL_BLOCK) {
            cycle.clear();
        }

        let channels = if header.flags.contains(Flags::MONO) { 1 } else { 2 };
        let data = &block[locate(&block, id).unwrap()];
        let stream = data
            .chunks_exact(4)
            .map(|b| i32::from_le_bytes(b.try_into().unwrap()))
            .collect::<Vec<_>>();
        assert_eq!(stream.len(), header.block_samples as usize * channels);
        cycle.push((channels, stream));

        if header.flags.contains(Flags::FINAL_BLOCK) {
            for i in 0..header.block_samples as usize {
                for (channels, stream) in cycle.iter() {
                    samples.extend_from_slice(&stream[i * channels..(i + 1) * channels]);
                }
            }
        }
    }

    samples
}

#[test]
fn test_stereo_session() {
    const FRAMES: usize = 100_000;

    let input = random_samples(FRAMES, 2, 16);
    let mut encoder = verbatim_encoder(EncodingOptions::new(44100, 16, 2, 2), Some(FRAMES as u64));
    assert_eq!(encoder.stream_count(), 1);

    for chunk in input.chunks(2 * 777) {
        encoder.pack(chunk).unwrap();
    }
    encoder.flush().unwrap();

    assert_eq!(encoder.sample_index(), FRAMES as u64);
    assert_eq!(encoder.buffered_samples(), 0);
    let block_samples = encoder.block_samples();
    let (wv_bytes, wvc_bytes) = encoder.bytes_written();
    let (wv, wvc) = encoder.finalize().unwrap();
    assert!(wvc.is_none());
    assert_eq!(wv_bytes, wv.len() as u64);
    assert_eq!(wvc_bytes, 0);

    let blocks = blocks(&wv);

    // wrapper comes first, in the first audio block
    let (id, wrapper) = sub_blocks(&blocks[0]).unwrap().next().unwrap().unwrap();
    assert_eq!(id, MetadataId::RIFF_HEADER);
    assert_eq!(&blocks[0][wrapper.clone()][0..4], b"RIFF");
    assert_eq!(
        blocks[0][wrapper][wrapper_data_size()],
        (FRAMES as u32 * 4).to_le_bytes()
    );

    let mut index = 0;
    for block in blocks.iter() {
        let header = BlockHeader::parse(block).unwrap();
        assert!(header.block_samples > 0);
        assert!(header.block_samples <= block_samples);
        assert!(header.flags.contains(Flags::INITIAL_BLOCK | Flags::FINAL_BLOCK));
        assert_eq!(header.flags.magnitude(), 15);
        assert_eq!(header.flags.bytes_stored(), 2);
        assert_eq!(header.total_samples, Some(FRAMES as u64));
        assert_eq!(header.version, 0x407);
        assert_eq!(header.block_index, index);
        assert_eq!(header.block_len(), block.len());
        index += u64::from(header.block_samples);
    }
    assert_eq!(index, FRAMES as u64);

    assert_eq!(unpack(&wv, MetadataId::WV_BITSTREAM), input);
}

// location of the data chunk's size in a minimal RIFF WAVE header
fn wrapper_data_size() -> std::ops::Range<usize> {
    76..80
}

#[test]
fn test_surround_session() {
    let input = random_samples(10_000, 6, 24);

    let mut encoder = verbatim_encoder(
        EncodingOptions::new(48000, 24, 3, 6).channel_mask(ChannelMask::from(0x3F)),
        None,
    );
    assert_eq!(encoder.stream_count(), 4);

    encoder.pack(&input).unwrap();
    let (wv, _) = encoder.finalize().unwrap();

    let headers = headers(&wv);
    assert_eq!(headers.len() % 4, 0);
    for cycle in headers.chunks(4) {
        assert_eq!(
            cycle
                .iter()
                .map(|h| h.flags.contains(Flags::MONO))
                .collect::<Vec<_>>(),
            vec![false, true, true, false]
        );
        assert!(cycle[0].flags.contains(Flags::INITIAL_BLOCK));
        assert!(!cycle[0].flags.contains(Flags::FINAL_BLOCK));
        assert!(cycle[3].flags.contains(Flags::FINAL_BLOCK));
        // mono streams drop stereo-only flags
        assert!(!cycle[1].flags.contains(Flags::JOINT_STEREO));
        assert!(cycle[0].flags.contains(Flags::JOINT_STEREO));
        assert!(cycle.iter().all(|h| h.block_index == cycle[0].block_index));
        assert!(cycle.iter().all(|h| h.block_samples == cycle[0].block_samples));
    }

    assert_eq!(unpack(&wv, MetadataId::WV_BITSTREAM), input);
}

#[test]
fn test_sign_extension() {
    // high bits beyond each sample's width are discarded
    let input = [0x7F, 0x80, 0xFF, 0x100, -1, -0x81];

    let mut encoder = verbatim_encoder(EncodingOptions::new(44100, 8, 1, 1), None);
    encoder.pack(&input).unwrap();
    let (wv, _) = encoder.finalize().unwrap();
    assert_eq!(
        unpack(&wv, MetadataId::WV_BITSTREAM),
        vec![127, -128, -1, 0, -1, 127]
    );

    let input = [0x7F_FFFF, 0x80_0000, 0xFF_FFFF, 0x100_0000];
    let mut encoder = verbatim_encoder(EncodingOptions::new(44100, 24, 3, 1), None);
    encoder.pack(&input).unwrap();
    let (wv, _) = encoder.finalize().unwrap();
    assert_eq!(
        unpack(&wv, MetadataId::WV_BITSTREAM),
        vec![0x7F_FFFF, -0x80_0000, -1, 0]
    );
}

#[test]
fn test_flush_split() {
    let options = EncodingOptions::new(44100, 16, 2, 2).block_samples(NonZero::new(1000).unwrap());

    let input = random_samples(3000, 2, 16);
    let mut encoder = verbatim_encoder(options, None);
    assert_eq!(encoder.block_samples(), 1000);

    // below the 1.5 block threshold, so nothing is written
    encoder.pack(&input[..1400 * 2]).unwrap();
    assert_eq!(encoder.bytes_written(), (0, 0));
    assert_eq!(encoder.buffered_samples(), 1400);

    // more than one block's worth splits in half
    encoder.flush().unwrap();
    assert_eq!(encoder.sample_index(), 1400);

    // reaching the threshold writes exactly one nominal block
    encoder.pack(&input[1400 * 2..]).unwrap();
    assert_eq!(encoder.sample_index(), 2400);
    assert_eq!(encoder.buffered_samples(), 600);

    let (wv, _) = encoder.finalize().unwrap();
    assert_eq!(cycle_lengths(&wv), vec![700, 700, 1000, 600]);
    assert_eq!(unpack(&wv, MetadataId::WV_BITSTREAM), input);

    // odd remainders split unevenly
    let mut encoder = verbatim_encoder(
        EncodingOptions::new(44100, 16, 2, 1).block_samples(NonZero::new(1000).unwrap()),
        None,
    );
    encoder.pack(&random_samples(1001, 1, 16)).unwrap();
    let (wv, _) = encoder.finalize().unwrap();
    assert_eq!(cycle_lengths(&wv), vec![500, 501]);
}

fn shrinking(limit: u32) -> impl FnMut(PackBlock<'_>) -> Result<u32, Error> {
    move |block: PackBlock<'_>| {
        let samples = block.primary.header().block_samples.min(limit);
        let bytes = le_bytes(&block.samples[..samples as usize * block.channels]);
        block
            .primary
            .add_sub_block(MetadataId::WV_BITSTREAM, &bytes)?;
        Ok(samples)
    }
}

#[test]
fn test_shrinking_packer() {
    let input = random_samples(1400, 6, 16);

    let mut encoder = Encoder::new(
        Vec::<u8>::new(),
        None,
        EncodingOptions::new(44100, 16, 2, 6)
            .channel_mask(ChannelMask::from(0x3F))
            .block_samples(NonZero::new(1000).unwrap()),
        None,
        |context: &StreamContext<'_>| shrinking(if context.index == 0 { 300 } else { u32::MAX }),
    )
    .unwrap();

    encoder.pack(&input).unwrap();
    encoder.flush().unwrap();
    assert_eq!(encoder.sample_index(), 1400);
    let (wv, _) = encoder.finalize().unwrap();

    // later streams follow the first stream's count
    for cycle in headers(&wv).chunks(4) {
        assert!(cycle.iter().all(|h| h.block_samples == cycle[0].block_samples));
    }
    assert_eq!(cycle_lengths(&wv), vec![300, 300, 300, 300, 200]);
    assert_eq!(unpack(&wv, MetadataId::WV_BITSTREAM), input);
}

#[test]
fn test_invalid_packed_count() {
    fn perform_test(init: impl FnMut(&StreamContext<'_>) -> Box<dyn FnMut(PackBlock<'_>) -> Result<u32, Error>>) {
        let mut encoder = Encoder::new(
            Vec::<u8>::new(),
            None,
            EncodingOptions::new(44100, 16, 2, 3)
                .channel_mask(ChannelMask::from(0x7))
                .block_samples(NonZero::new(100).unwrap()),
            None,
            init,
        )
        .unwrap();

        assert!(matches!(
            encoder.pack(&random_samples(150, 3, 16)),
            Err(Error::InvalidPackedSampleCount)
        ));
        assert!(!encoder.error_message().is_empty());

        // nothing is lost from the buffer
        assert_eq!(encoder.sample_index(), 0);
        assert_eq!(encoder.buffered_samples(), 150);
    }

    // a later stream can't shrink the block
    perform_test(|context| {
        let index = context.index;
        Box::new(move |block: PackBlock<'_>| -> Result<u32, Error> {
            let samples = block.primary.header().block_samples;
            Ok(if index == 1 { samples - 1 } else { samples })
        })
    });

    // nor can any stream pack nothing
    perform_test(|_| Box::new(|_: PackBlock<'_>| -> Result<u32, Error> { Ok(0) }));

    // nor more than it was given
    perform_test(|_| {
        Box::new(|block: PackBlock<'_>| -> Result<u32, Error> {
            Ok(block.primary.header().block_samples + 1)
        })
    });
}

#[test]
fn test_sample_count_mismatch() {
    let mut encoder = verbatim_encoder(EncodingOptions::new(44100, 16, 2, 2), None);
    assert!(matches!(
        encoder.pack(&[1, 2, 3]),
        Err(Error::SampleCountMismatch)
    ));
    assert_eq!(encoder.buffered_samples(), 0);
    assert!(matches!(
        encoder.pack_bytes::<wavpack_blocks::byteorder::LittleEndian>(&[1, 2, 3]),
        Err(Error::SampleCountMismatch)
    ));
    assert_eq!(encoder.error_message(), "sample count not a multiple of channel count");
}

#[test]
fn test_pack_bytes() {
    use wavpack_blocks::byteorder::{BigEndian, Endianness, LittleEndian};

    fn perform_test<E: Endianness>(bytes_per_sample: u32) {
        let input = random_samples(5000, 2, bytes_per_sample * 8);

        let mut bytes = vec![0; input.len() * bytes_per_sample as usize];
        for (sample, bytes) in input
            .iter()
            .zip(bytes.chunks_exact_mut(bytes_per_sample as usize))
        {
            E::sample_to_bytes(*sample, bytes);
        }

        let mut encoder = verbatim_encoder(
            EncodingOptions::new(44100, bytes_per_sample * 8, bytes_per_sample, 2),
            None,
        );
        for chunk in bytes.chunks(bytes_per_sample as usize * 2 * 333) {
            encoder.pack_bytes::<E>(chunk).unwrap();
        }
        let (wv, _) = encoder.finalize().unwrap();
        assert_eq!(unpack(&wv, MetadataId::WV_BITSTREAM), input);
    }

    for bytes_per_sample in 1..=4 {
        perform_test::<LittleEndian>(bytes_per_sample);
        perform_test::<BigEndian>(bytes_per_sample);
    }
}

#[test]
fn test_correction_stream() {
    let input = random_samples(50_000, 2, 16);

    let mut encoder = Encoder::new(
        Vec::<u8>::new(),
        Some(Vec::new()),
        EncodingOptions::new(44100, 16, 2, 2).hybrid(Bitrate::BitsPerSample(3.0)),
        Some(50_000),
        |_| verbatim as Packer,
    )
    .unwrap();
    assert!(encoder.configuration().correction());

    encoder.pack(&input).unwrap();
    encoder.flush().unwrap();
    let (wv_bytes, wvc_bytes) = encoder.bytes_written();

    // a sum stored after flushing gets its own block
    let md5 = [1; 16];
    encoder.store_md5_sum(md5).unwrap();
    let (wv, wvc) = encoder.finalize().unwrap();
    let wvc = wvc.unwrap();

    assert_eq!(wvc_bytes, wvc.len() as u64);
    assert!(wv_bytes < wv.len() as u64);

    let wv_headers = headers(&wv)
        .into_iter()
        .filter(|h| h.block_samples > 0)
        .collect::<Vec<_>>();
    let wvc_headers = headers(&wvc);
    assert_eq!(wv_headers.len(), wvc_headers.len());

    for (wv, wvc) in wv_headers.iter().zip(wvc_headers.iter()) {
        assert_eq!(wv.block_index, wvc.block_index);
        assert_eq!(wv.block_samples, wvc.block_samples);
        assert_eq!(wv.flags, wvc.flags);
        assert!(wv.flags.contains(Flags::HYBRID));
    }

    // metadata goes to the primary output only
    for block in blocks(&wvc) {
        assert!(locate(&block, MetadataId::RIFF_HEADER).is_none());
        assert!(locate(&block, MetadataId::MD5_CHECKSUM).is_none());
    }
    let last = blocks(&wv).pop().unwrap();
    assert_eq!(BlockHeader::parse(&last).unwrap().block_samples, 0);
    assert_eq!(&last[locate(&last, MetadataId::MD5_CHECKSUM).unwrap()], &md5);

    assert_eq!(unpack(&wv, MetadataId::WV_BITSTREAM), input);
    assert_eq!(unpack(&wvc, MetadataId::WVC_BITSTREAM), input);
}

#[test]
fn test_output_failure() {
    struct Full;

    impl std::io::Write for Full {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("disk full"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    let mut encoder = Encoder::new(
        Full,
        None,
        EncodingOptions::new(44100, 16, 2, 2).block_samples(NonZero::new(1000).unwrap()),
        None,
        |_| verbatim as Packer,
    )
    .unwrap();

    assert!(matches!(
        encoder.pack(&random_samples(2000, 2, 16)),
        Err(Error::Io(_))
    ));
    assert!(encoder.error_message().contains("disk full"));

    // samples of the failed block remain buffered
    assert_eq!(encoder.sample_index(), 0);
    assert_eq!(encoder.buffered_samples(), 1500);
    assert_eq!(encoder.bytes_written(), (0, 0));

    assert!(matches!(encoder.flush(), Err(Error::Io(_))));
    assert_eq!(encoder.buffered_samples(), 1500);
}

#[test]
fn test_metadata_cap() {
    let wrapper = std::iter::repeat_with(|| fastrand::u8(..))
        .take(250)
        .collect::<Vec<_>>();

    let mut encoder = verbatim_encoder(
        EncodingOptions::new(44100, 16, 2, 2).metadata_policy(MetadataPolicy {
            cap: 100,
            standalone_threshold: 16384,
        }),
        None,
    );

    // each time the cap fills, a metadata block is written
    encoder.add_wrapper(&wrapper).unwrap();
    assert!(encoder.bytes_written().0 > 0);

    let input = random_samples(1000, 2, 16);
    encoder.pack(&input).unwrap();
    let (wv, _) = encoder.finalize().unwrap();

    let blocks = blocks(&wv);
    let stored = blocks
        .iter()
        .filter_map(|b| locate(b, MetadataId::RIFF_HEADER).map(|r| (b, r)))
        .map(|(b, r)| {
            assert!(r.len() <= 100);
            b[r].to_vec()
        })
        .collect::<Vec<_>>();
    assert_eq!(stored.len(), 3);
    assert_eq!(stored.concat(), wrapper);

    let headers = headers(&wv);
    assert_eq!(
        headers.iter().map(|h| h.block_samples).collect::<Vec<_>>(),
        vec![0, 0, 1000]
    );
    assert!(headers[..2].iter().all(|h| h.block_index == 0));
    assert_eq!(unpack(&wv, MetadataId::WV_BITSTREAM), input);
}

#[test]
fn test_standalone_metadata() {
    let mut encoder = verbatim_encoder(
        EncodingOptions::new(44100, 16, 2, 2).metadata_policy(MetadataPolicy {
            cap: 1_000_000,
            standalone_threshold: 64,
        }),
        None,
    );

    // large wrappers get a block of their own
    encoder.add_wrapper(&[0; 100]).unwrap();
    encoder.pack(&random_samples(10, 2, 16)).unwrap();
    let (wv, _) = encoder.finalize().unwrap();

    let blocks = blocks(&wv);
    assert_eq!(blocks.len(), 2);
    assert_eq!(BlockHeader::parse(&blocks[0]).unwrap().block_samples, 0);
    assert_eq!(
        locate(&blocks[0], MetadataId::RIFF_HEADER).map(|r| r.len()),
        Some(100)
    );
    assert!(locate(&blocks[1], MetadataId::RIFF_HEADER).is_none());
}

#[test]
fn test_wrapper_and_trailer() {
    let mut encoder = verbatim_encoder(EncodingOptions::new(44100, 16, 2, 2), None);

    // supplied headers suppress the generated one
    encoder.add_wrapper(b"RIFF....WAVE").unwrap();
    encoder.add_wrapper(b"fmt ....").unwrap();
    encoder.pack(&random_samples(100, 2, 16)).unwrap();
    encoder.flush().unwrap();

    encoder.add_wrapper(b"LIST").unwrap();
    encoder.add_wrapper(b"....").unwrap();
    let (wv, _) = encoder.finalize().unwrap();

    let blocks = blocks(&wv);
    assert_eq!(blocks.len(), 2);
    // consecutive appends merge into one item
    assert_eq!(
        &blocks[0][locate(&blocks[0], MetadataId::RIFF_HEADER).unwrap()],
        b"RIFF....WAVEfmt ...."
    );
    assert_eq!(sub_blocks(&blocks[0]).unwrap().count(), 2);
    assert_eq!(
        &blocks[1][locate(&blocks[1], MetadataId::RIFF_TRAILER).unwrap()],
        b"LIST...."
    );
}

#[test]
fn test_alternate_format() {
    let mut encoder = verbatim_encoder(
        EncodingOptions::new(44100, 16, 2, 2).file_information(Some("w64"), FileFormat::Wave64),
        None,
    );

    encoder.add_wrapper(b"riff").unwrap();
    encoder.pack(&random_samples(100, 2, 16)).unwrap();
    encoder.flush().unwrap();
    encoder.add_wrapper(b"trailer").unwrap();
    let (wv, _) = encoder.finalize().unwrap();

    let blocks = blocks(&wv);
    assert_eq!(&blocks[0][locate(&blocks[0], MetadataId::ALT_EXTENSION).unwrap()], b"w64");
    assert_eq!(&blocks[0][locate(&blocks[0], MetadataId::ALT_HEADER).unwrap()], b"riff");
    assert!(locate(&blocks[0], MetadataId::RIFF_HEADER).is_none());
    assert_eq!(
        &blocks[1][locate(&blocks[1], MetadataId::ALT_TRAILER).unwrap()],
        b"trailer"
    );

    // non-WAV formats get no generated header
    let mut encoder = verbatim_encoder(
        EncodingOptions::new(44100, 16, 2, 2).file_information(None, FileFormat::Caf),
        None,
    );
    encoder.pack(&random_samples(100, 2, 16)).unwrap();
    let (wv, _) = encoder.finalize().unwrap();
    assert_eq!(self::blocks(&wv).len(), 1);
    assert_eq!(sub_blocks(&wv).unwrap().count(), 1);

    assert!(matches!(
        Encoder::new(
            Vec::<u8>::new(),
            None,
            EncodingOptions::new(44100, 16, 2, 2).file_information(Some("toolong!"), FileFormat::Wav),
            None,
            |_| verbatim as Packer,
        ),
        Err(Error::ExtensionTooLong)
    ));
}

#[test]
fn test_md5() {
    let input = random_samples(20_000, 2, 16);

    let mut expected = md5::Context::new();
    for sample in input.iter() {
        expected.consume((*sample as i16).to_le_bytes());
    }
    let expected = expected.compute().0;

    let mut encoder = verbatim_encoder(EncodingOptions::new(44100, 16, 2, 2).md5(true), None);
    encoder.pack(&input).unwrap();
    assert_eq!(encoder.computed_md5(), Some(expected));

    // the sum may be stored in either of two tags
    encoder.store_md5_sum(expected).unwrap();
    let (wv, _) = encoder.finalize().unwrap();
    let last = blocks(&wv).pop().unwrap();
    assert_eq!(&last[locate(&last, MetadataId::MD5_CHECKSUM).unwrap()], &expected);

    let mut encoder = verbatim_encoder(EncodingOptions::new(44100, 16, 2, 2).qmode(0x1), None);
    assert_eq!(encoder.computed_md5(), None);
    encoder.store_md5_sum(expected).unwrap();
    let (wv, _) = encoder.finalize().unwrap();
    assert!(locate(&wv, MetadataId::MD5_CHECKSUM).is_none());
    assert_eq!(&wv[locate(&wv, MetadataId::ALT_MD5_CHECKSUM).unwrap()], &expected);

    // 8-bit samples are hashed unsigned
    let mut encoder = verbatim_encoder(EncodingOptions::new(44100, 8, 1, 1).md5(true), None);
    encoder.pack(&[-128, -1, 0, 127]).unwrap();
    assert_eq!(
        encoder.computed_md5(),
        Some(md5::compute([0x00, 0x7F, 0x80, 0xFF]).0)
    );
}

#[test]
fn test_dsd_session() {
    let input = std::iter::repeat_with(|| fastrand::i32(..))
        .take(2 * 10_000)
        .collect::<Vec<_>>();

    let mut encoder = verbatim_encoder(
        EncodingOptions::new(2822400, 8, 1, 2).dsd(true),
        Some(10_000),
    );
    assert_eq!(encoder.dsd_multiplier(), Some(32));
    assert_eq!(encoder.stream_version(), 0x410);

    encoder.pack(&input).unwrap();
    let (wv, _) = encoder.finalize().unwrap();

    for header in headers(&wv) {
        assert!(header.flags.contains(Flags::DSD));
        assert_eq!(header.version, 0x410);
    }

    // DSD bytes are stored unsigned
    assert_eq!(
        unpack(&wv, MetadataId::WV_BITSTREAM),
        input.iter().map(|s| s & 0xFF).collect::<Vec<_>>()
    );

    assert!(matches!(
        Encoder::new(
            Vec::<u8>::new(),
            Some(Vec::new()),
            EncodingOptions::new(2822400, 8, 1, 2).dsd(true),
            None,
            |_| verbatim as Packer,
        ),
        Err(Error::UnexpectedCorrection)
    ));
}

#[test]
fn test_many_streams() {
    // ten undefined channels exceed what older decoders handle
    let input = random_samples(1000, 10, 16);

    let mut encoder = verbatim_encoder(EncodingOptions::new(44100, 16, 2, 10), None);
    assert_eq!(encoder.stream_count(), 10);
    assert_eq!(encoder.stream_version(), 0x410);
    encoder.pack(&input).unwrap();
    let (wv, _) = encoder.finalize().unwrap();
    assert!(headers(&wv).iter().all(|h| h.version == 0x410));
    assert_eq!(unpack(&wv, MetadataId::WV_BITSTREAM), input);

    // unless they're paired
    let encoder = verbatim_encoder(
        EncodingOptions::new(44100, 16, 2, 10).pair_undefined_channels(true),
        None,
    );
    assert_eq!(encoder.stream_count(), 5);
    assert_eq!(encoder.stream_version(), 0x407);
}

#[test]
fn test_excessive_total() {
    assert!(matches!(
        Encoder::new(
            Vec::<u8>::new(),
            None,
            EncodingOptions::new(44100, 16, 2, 2),
            Some(BlockHeader::MAX_TOTAL_SAMPLES + 1),
            |_| verbatim as Packer,
        ),
        Err(Error::ExcessiveTotalSamples)
    ));
}

#[test]
fn test_container_width() {
    // 20 bits in 3 byte containers, packed at full width
    let input = random_samples(5000, 2, 20);

    let mut encoder = verbatim_encoder(EncodingOptions::new(96000, 20, 3, 2), None);
    encoder.pack(&input).unwrap();
    let (wv, _) = encoder.finalize().unwrap();

    for header in headers(&wv) {
        assert_eq!(header.flags.shift(), 0);
        assert_eq!(header.flags.bytes_stored(), 3);
        assert_eq!(header.flags.magnitude(), 23);
    }
    assert_eq!(unpack(&wv, MetadataId::WV_BITSTREAM), input);

    let mut encoder = verbatim_encoder(EncodingOptions::new(8000, 12, 2, 1), None);
    encoder.pack(&random_samples(100, 1, 12)).unwrap();
    let (wv, _) = encoder.finalize().unwrap();
    assert!(headers(&wv).iter().all(|h| h.flags.shift() == 0));
}

#[test]
fn test_non_normalized_float() {
    let options = || EncodingOptions::new(44100, 32, 4, 2).float(126);
    let input = random_samples(100, 2, 32);

    // no RIFF WAVE header can describe these samples
    let mut encoder = verbatim_encoder(options(), None);
    assert!(matches!(encoder.pack(&input), Err(Error::NonNormalizedFloat)));
    assert!(!encoder.error_message().is_empty());

    // but a caller-supplied header is fine
    let mut encoder = verbatim_encoder(options(), None);
    encoder.add_wrapper(b"RIFF\0\0\0\0WAVE").unwrap();
    encoder.pack(&input).unwrap();
    let (wv, _) = encoder.finalize().unwrap();
    let first = blocks(&wv).remove(0);
    assert_eq!(&first[locate(&first, MetadataId::RIFF_HEADER).unwrap()], b"RIFF\0\0\0\0WAVE");
    assert!(BlockHeader::parse(&first).unwrap().flags.contains(Flags::FLOAT_DATA));
}

#[test]
fn test_excessive_block_samples() {
    assert!(matches!(
        Encoder::new(
            Vec::<u8>::new(),
            None,
            EncodingOptions::new(44100, 16, 2, 2).block_samples(NonZero::new(u32::MAX).unwrap()),
            None,
            |_| verbatim as Packer,
        ),
        Err(Error::ExcessiveBlockSamples)
    ));
}
