//! Shared helpers for the byte-exact fixture tests.

use crate::bit_reader::BitReader;
use crate::bit_writer::BitWriter;
use crate::error::RepuffResult;
use crate::huffer::Huffer;
use crate::puff_data::PuffData;
use crate::puff_reader::PuffReader;
use crate::puff_writer::PuffWriter;
use crate::puffer::Puffer;

/// Compare two byte sequences and, on mismatch, point at the first bad byte
/// with a short hex window around it. `assert_eq!` on kilobyte fixtures
/// drowns the interesting byte in output; this keeps the diff readable.
#[track_caller]
pub fn assert_bytes_eq(actual: &[u8], expected: &[u8]) {
    if actual == expected {
        return;
    }
    if actual.len() != expected.len() {
        panic!(
            "byte sequences differ in length: {} actual vs {} expected",
            actual.len(),
            expected.len()
        );
    }
    let at = actual
        .iter()
        .zip(expected)
        .position(|(a, e)| a != e)
        .unwrap();
    let from = at.saturating_sub(8);
    let to = (at + 9).min(expected.len());
    panic!(
        "byte {at} is {:#04X}, expected {:#04X}\n  actual[{from}..{to}]:   {:02X?}\n  expected[{from}..{to}]: {:02X?}",
        actual[at],
        expected[at],
        &actual[from..to],
        &expected[from..to]
    );
}

/// Puff a whole deflate buffer, checking that the input is fully consumed
/// and that the counting pass predicted the real size.
pub fn puff_full(deflate: &[u8]) -> RepuffResult<Vec<u8>> {
    let puffer = Puffer::new();

    let mut reader = BitReader::new(deflate);
    let mut counting = PuffWriter::counting();
    puffer.puff_deflate(&mut reader, &mut counting, None)?;
    assert_eq!(reader.bytes_consumed(), deflate.len(), "input not consumed");

    let mut out = vec![0u8; counting.size()];
    let mut reader = BitReader::new(deflate);
    let mut writer = PuffWriter::new(&mut out);
    puffer.puff_deflate(&mut reader, &mut writer, None)?;
    assert_eq!(writer.size(), out.len());
    Ok(out)
}

/// Huff a whole puff buffer back into deflate bytes.
pub fn huff_full(puff: &[u8], deflate_size: usize) -> RepuffResult<Vec<u8>> {
    let huffer = Huffer::new();
    let mut out = vec![0u8; deflate_size];
    let mut reader = PuffReader::new(puff);
    let mut writer = BitWriter::new(&mut out);
    huffer.huff_deflate(&mut reader, &mut writer)?;
    assert_eq!(reader.bytes_left(), 0, "puff not consumed");
    let size = writer.size();
    out.truncate(size);
    Ok(out)
}

/// Resolve a puff stream into the raw bytes it describes, applying literal
/// runs and back-references.
pub fn decompress_puff(puff: &[u8]) -> RepuffResult<Vec<u8>> {
    let mut reader = PuffReader::new(puff);
    let mut out = Vec::new();
    while reader.bytes_left() > 0 {
        match reader.get_next()? {
            PuffData::BlockMetadata(_) | PuffData::EndOfBlock => {}
            PuffData::Literal(byte) => out.push(byte),
            PuffData::Literals(bytes) => out.extend_from_slice(bytes),
            PuffData::LenDist { length, distance } => {
                let distance = distance as usize;
                assert!(distance <= out.len(), "distance outside produced output");
                for _ in 0..length {
                    out.push(out[out.len() - distance]);
                }
            }
        }
    }
    Ok(out)
}
