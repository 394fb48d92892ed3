use std::io::Cursor;
use std::num::NonZero;
use wavpack_blocks::Error;
use wavpack_blocks::block::{BlockHeader, read_blocks};
use wavpack_blocks::config::{Bitrate, EncodingOptions};
use wavpack_blocks::encode::{Encoder, PackBlock};
use wavpack_blocks::metadata::{MetadataId, locate, wrapper_location};
use wavpack_blocks::patch::update_sample_count;
use wavpack_blocks::wrapper::RiffFormat;

type Packer = fn(PackBlock<'_>) -> Result<u32, Error>;

fn verbatim(block: PackBlock<'_>) -> Result<u32, Error> {
    let bytes = block
        .samples
        .iter()
        .flat_map(|s| s.to_le_bytes())
        .collect::<Vec<u8>>();
    block
        .primary
        .add_sub_block(MetadataId::WV_BITSTREAM, &bytes)?;
    if let Some(correction) = block.correction {
        correction.add_sub_block(MetadataId::WVC_BITSTREAM, &bytes)?;
    }
    Ok(block.primary.header().block_samples)
}

fn random_samples(samples: usize) -> Vec<i32> {
    std::iter::repeat_with(|| fastrand::i32(-32768..=32767))
        .take(samples)
        .collect()
}

fn blocks(file: &[u8]) -> Vec<Vec<u8>> {
    read_blocks(file).collect::<Result<_, _>>().unwrap()
}

fn options() -> EncodingOptions {
    EncodingOptions::new(44100, 16, 2, 2).block_samples(NonZero::new(1000).unwrap())
}

#[test]
fn test_update_output() {
    const FRAMES: u64 = 5000;

    let mut encoder =
        Encoder::new(Cursor::new(Vec::<u8>::new()), None, options(), None, |_| verbatim as Packer).unwrap();

    encoder.pack(&random_samples(FRAMES as usize * 2)).unwrap();
    encoder.flush().unwrap();
    encoder.add_wrapper(b"LIST\x0c\x00\x00\x00INFOISFT").unwrap();
    encoder.flush().unwrap();

    let original = blocks(encoder.get_ref().get_ref());
    let format = RiffFormat {
        trailer_bytes: 16,
        ..RiffFormat::from(encoder.configuration())
    };

    encoder.update_output().unwrap();
    let (wv, _) = encoder.finalize().unwrap();
    assert_eq!(wv.position(), wv.get_ref().len() as u64);

    let updated = blocks(wv.get_ref());
    assert_eq!(updated.len(), original.len());

    let header = BlockHeader::parse(&updated[0]).unwrap();
    assert_eq!(header.total_samples, Some(FRAMES));
    assert_eq!(
        &updated[0][wrapper_location(&updated[0]).unwrap()],
        format.create(Some(FRAMES)).unwrap().as_slice()
    );

    // only the first block changes
    assert_ne!(updated[0], original[0]);
    assert_eq!(updated[1..], original[1..]);
    assert!(
        updated[1..]
            .iter()
            .all(|b| BlockHeader::parse(b).unwrap().total_samples.is_none())
    );
}

#[test]
fn test_update_idempotence() {
    const FRAMES: u64 = 3000;

    let mut encoder =
        Encoder::new(Vec::<u8>::new(), None, options(), Some(FRAMES), |_| verbatim as Packer).unwrap();
    encoder.pack(&random_samples(FRAMES as usize * 2)).unwrap();
    encoder.flush().unwrap();

    // the stored total is already correct
    let mut file = Cursor::new(encoder.get_ref().clone());
    encoder.update_first_block(&mut file).unwrap();
    assert_eq!(file.get_ref(), encoder.get_ref());

    let mut first = blocks(encoder.get_ref()).remove(0);
    let unchanged = first.clone();
    encoder.update_sample_count(&mut first, FRAMES).unwrap();
    assert_eq!(first, unchanged);

    // a different total changes the header and wrapper
    encoder.update_sample_count(&mut first, FRAMES * 2).unwrap();
    assert_eq!(
        BlockHeader::parse(&first).unwrap().total_samples,
        Some(FRAMES * 2)
    );
    let wrapper = &first[wrapper_location(&first).unwrap()];
    assert_eq!(&wrapper[76..80], &(FRAMES as u32 * 2 * 4).to_le_bytes());
    assert_eq!(first.len(), unchanged.len());
}

#[test]
fn test_supplied_wrapper_untouched() {
    let supplied = b"RIFF\0\0\0\0WAVE".to_vec();

    let mut encoder =
        Encoder::new(Vec::<u8>::new(), None, options(), None, |_| verbatim as Packer).unwrap();
    encoder.add_wrapper(&supplied).unwrap();
    encoder.pack(&random_samples(200)).unwrap();
    encoder.flush().unwrap();

    let mut file = Cursor::new(encoder.get_ref().clone());
    encoder.update_first_block(&mut file).unwrap();

    let first = blocks(file.get_ref()).remove(0);
    assert_eq!(BlockHeader::parse(&first).unwrap().total_samples, Some(100));
    assert_eq!(&first[wrapper_location(&first).unwrap()], supplied.as_slice());
}

#[test]
fn test_rf64_switch() {
    let format = RiffFormat::from(&options().resolve(false).unwrap());

    let mut encoder =
        Encoder::new(Vec::<u8>::new(), None, options(), None, |_| verbatim as Packer).unwrap();
    encoder.pack(&random_samples(20)).unwrap();
    encoder.flush().unwrap();
    let mut first = blocks(encoder.get_ref()).remove(0);

    // a total past the RIFF limit still fits the reserved space
    let total = 0x4000_0000;
    update_sample_count(&mut first, total, Some(&format)).unwrap();
    let wrapper = &first[wrapper_location(&first).unwrap()];
    assert_eq!(&wrapper[0..4], b"RF64");
    assert_eq!(wrapper, format.create(Some(total)).unwrap().as_slice());
}

#[test]
fn test_update_correction_output() {
    const FRAMES: u64 = 4000;

    let mut encoder = Encoder::new(
        Cursor::new(Vec::<u8>::new()),
        Some(Cursor::new(Vec::new())),
        options().hybrid(Bitrate::BitsPerSample(3.0)),
        None,
        |_| verbatim as Packer,
    )
    .unwrap();

    encoder.pack(&random_samples(FRAMES as usize * 2)).unwrap();
    encoder.flush().unwrap();
    encoder.update_output().unwrap();

    let (wv, wvc) = encoder.finalize().unwrap();
    let wvc = wvc.unwrap();
    assert_eq!(wvc.position(), wvc.get_ref().len() as u64);

    let primary = blocks(wv.get_ref());
    let correction = blocks(wvc.get_ref());
    assert_eq!(correction.len(), primary.len());

    assert_eq!(
        BlockHeader::parse(&primary[0]).unwrap().total_samples,
        Some(FRAMES)
    );
    assert_eq!(
        BlockHeader::parse(&correction[0]).unwrap().total_samples,
        Some(FRAMES)
    );
    assert!(wrapper_location(&correction[0]).is_none());
    assert!(locate(&correction[0], MetadataId::WVC_BITSTREAM).is_some());
    assert!(
        correction[1..]
            .iter()
            .all(|b| BlockHeader::parse(b).unwrap().total_samples.is_none())
    );
}
