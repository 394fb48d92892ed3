// Copyright 2025 Brian Langenberger
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Byte order for raw PCM samples
//!
//! Samples may be 1 to 4 bytes wide.
//! Every sample is treated as signed,
//! so 8-bit PCM from RIFF WAVE files (which is unsigned)
//! must be offset by 128 beforehand.

/// Sample byte order
pub trait Endianness {
    /// Converts 1 to 4 bytes in this byte order to a sign-extended sample
    fn bytes_to_sample(bytes: &[u8]) -> i32;

    /// Converts sample to 1 to 4 bytes in this byte order,
    /// discarding any bits that don't fit
    fn sample_to_bytes(sample: i32, bytes: &mut [u8]);
}

#[inline]
fn extend(unsigned: u32, width: usize) -> i32 {
    debug_assert!((1..=4).contains(&width));
    let unused = 32 - (width as u32 * 8);
    ((unsigned << unused) as i32) >> unused
}

/// Little-endian byte order
pub struct LittleEndian;

impl Endianness for LittleEndian {
    #[inline]
    fn bytes_to_sample(bytes: &[u8]) -> i32 {
        extend(
            bytes
                .iter()
                .rev()
                .fold(0, |acc, byte| (acc << 8) | u32::from(*byte)),
            bytes.len(),
        )
    }

    #[inline]
    fn sample_to_bytes(sample: i32, bytes: &mut [u8]) {
        let width = bytes.len();
        bytes.copy_from_slice(&sample.to_le_bytes()[..width]);
    }
}

/// Big-endian byte order
pub struct BigEndian;

impl Endianness for BigEndian {
    #[inline]
    fn bytes_to_sample(bytes: &[u8]) -> i32 {
        extend(
            bytes
                .iter()
                .fold(0, |acc, byte| (acc << 8) | u32::from(*byte)),
            bytes.len(),
        )
    }

    #[inline]
    fn sample_to_bytes(sample: i32, bytes: &mut [u8]) {
        let width = bytes.len();
        bytes.copy_from_slice(&sample.to_be_bytes()[4 - width..]);
    }
}

#[cfg(test)]
fn test_endianness<E: Endianness>(expected: fn(i32, usize) -> Vec<u8>, width: usize) {
    let bits = width as u32 * 8;
    let min = -(1i64 << (bits - 1));
    let max = (1i64 << (bits - 1)) - 1;

    let boundaries = [min, min + 1, -1, 0, 1, max - 1, max];
    let random = std::iter::repeat_with(|| fastrand::i64(min..=max)).take(1000);

    for sample in boundaries.into_iter().chain(random).map(|s| s as i32) {
        let mut buf = [0; 4];
        E::sample_to_bytes(sample, &mut buf[..width]);
        assert_eq!(E::bytes_to_sample(&buf[..width]), sample);

        assert_eq!(buf[..width], expected(sample, width));
    }
}

#[test]
fn test_samples_le() {
    for width in 1..=4 {
        test_endianness::<LittleEndian>(|s, w| s.to_le_bytes()[..w].to_vec(), width);
    }

    // values wider than their width lose their high bits
    let mut buf = [0; 1];
    LittleEndian::sample_to_bytes(0x180, &mut buf);
    assert_eq!(buf, [0x80]);
    assert_eq!(LittleEndian::bytes_to_sample(&buf), -128);
    assert_eq!(LittleEndian::bytes_to_sample(&[0xFF, 0x7F]), 0x7FFF);
    assert_eq!(LittleEndian::bytes_to_sample(&[0x00, 0x00, 0x80]), -0x80_0000);
}

#[test]
fn test_samples_be() {
    for width in 1..=4 {
        test_endianness::<BigEndian>(|s, w| s.to_be_bytes()[4 - w..].to_vec(), width);
    }

    assert_eq!(BigEndian::bytes_to_sample(&[0x7F, 0xFF]), 0x7FFF);
    assert_eq!(BigEndian::bytes_to_sample(&[0x80, 0x00, 0x00]), -0x80_0000);
}
