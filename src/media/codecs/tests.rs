use super::*;
use crate::error::ConvertError;

fn quantization_bound(sample: i16) -> i32 {
    let mag = (sample as i32).unsigned_abs().max(1);
    if mag < 512 {
        8
    } else {
        1 << (mag.ilog2() - 5)
    }
}

#[test]
fn test_bit_inverse_round_trip() {
    for b in 0..=255u8 {
        assert_eq!(bit_inverse(bit_inverse(b)), b);
    }
    assert_eq!(bit_inverse(0x01), 0x80);
    assert_eq!(bit_inverse(0x0F), 0xF0);
    assert_eq!(bit_inverse(0xD5), 0xAB);
}

#[test]
fn test_table_coverage() {
    let tables = build_tables();
    assert_eq!(tables.decode_table().len(), 256);
    assert_eq!(tables.encode_table().len(), 65536);

    // every a-law code must be reachable from some linear sample
    let mut seen = [false; 256];
    for code in tables.encode_table() {
        seen[*code as u8 as usize] = true;
    }
    assert!(seen.iter().all(|s| *s), "encode table misses a-law codes");

    // no two codes decode to the same value
    let mut decoded: Vec<i16> = tables.decode_table().to_vec();
    decoded.sort_unstable();
    decoded.dedup();
    assert_eq!(decoded.len(), 256);
}

#[test]
fn test_build_tables_is_shared() {
    let a = build_tables() as *const CodecTables;
    let b = build_tables() as *const CodecTables;
    assert_eq!(a, b);
}

#[test]
fn test_known_alaw_values() {
    let tables = build_tables();
    assert_eq!(tables.encode(0), 0xD5);
    assert_eq!(tables.decode(0xD5), 8);
    assert_eq!(tables.decode(0x55), -8);
    assert_eq!(tables.encode(i16::MAX), 0xAA);
    assert_eq!(tables.decode(0xAA), 32256);
    assert_eq!(tables.encode(i16::MIN), 0x2A);
    assert_eq!(tables.decode(0x2A), -32256);
}

#[test]
fn test_segment_boundaries() {
    let tables = build_tables();
    let segment = |s: i16| (tables.encode(s) ^ 0x55) >> 4 & 0x07;
    assert_eq!(segment(0xFF), 0);
    for exp in 1..=7u8 {
        let start = 0x80i16 << exp;
        assert_eq!(segment(start - 1), exp - 1, "below {:#x}", start);
        assert_eq!(segment(start), exp, "at {:#x}", start);
        assert_eq!(segment(-start), exp, "at -{:#x}", start);
    }
    assert_eq!(segment(i16::MAX), 7);
}

#[test]
fn test_lossy_round_trip_bound() {
    let tables = build_tables();
    for s in i16::MIN..=i16::MAX {
        let decoded = tables.decode(tables.encode(s)) as i32;
        let err = (decoded - s as i32).abs();
        assert!(
            err <= quantization_bound(s),
            "sample {} decoded to {} (error {})",
            s,
            decoded,
            err
        );
    }
}

#[test]
fn test_convert_contract() {
    let input = [0xABu8, 0x2A, 0x54, 0x00];
    let mut out = [0i16; 4];
    assert_eq!(convert_line_to_audio(&input, &mut out).unwrap(), 4);

    let mut short = [7i16; 3];
    match convert_line_to_audio(&input, &mut short) {
        Err(ConvertError::BufferTooSmall { needed, available }) => {
            assert_eq!(needed, 4);
            assert_eq!(available, 3);
        }
        other => panic!("unexpected result {:?}", other),
    }
    assert_eq!(short, [7i16; 3]);

    let mut line = [9u8; 2];
    assert!(convert_audio_to_line(&[1, 2, 3], &mut line).is_err());
    assert_eq!(line, [9u8; 2]);
}

#[test]
fn test_convert_applies_bit_inversion() {
    let tables = build_tables();
    let mut out = [0i16; 1];
    // silence travels as the bit reversed 0xD5
    convert_line_to_audio(&[0xAB], &mut out).unwrap();
    assert_eq!(out[0], tables.decode(0xD5));

    let mut line = [0u8; 1];
    convert_audio_to_line(&[0], &mut line).unwrap();
    assert_eq!(line[0], 0xAB);
    assert_eq!(alaw::line_silence(), 0xAB);
}

#[test]
fn test_line_round_trip_sine() {
    let samples: Vec<i16> = (0..160)
        .map(|i| ((i as f32 * 0.1).sin() * 32767.0) as i16)
        .collect();
    let mut line = vec![0u8; samples.len()];
    let mut decoded = vec![0i16; samples.len()];
    convert_audio_to_line(&samples, &mut line).unwrap();
    convert_line_to_audio(&line, &mut decoded).unwrap();

    for (orig, dec) in samples.iter().zip(decoded.iter()) {
        assert!((*orig as i32 - *dec as i32).abs() <= quantization_bound(*orig));
    }
}
