use astropix::{
    serialize, AsicError, ExtractOptions, Geometry, HitDecoder, RegisterGroup, RegisterMap,
};

/// Bits in front of the receiver words: 35 digital + 6 bias + 19 DACs x 6
const RECEIVER_OFFSET: usize = 35 + 6 + 19 * 6;
const WORD_WIDTH: usize = 38;

fn differing_bits(a: &str, b: &str) -> Vec<usize> {
    a.chars()
        .zip(b.chars())
        .enumerate()
        .filter(|(_, (x, y))| x != y)
        .map(|(i, _)| i)
        .collect()
}

#[test]
fn serializer_length_matches_declared_widths() {
    for (rows, cols) in [(35, 35), (8, 12), (61, 1)] {
        let mut map = RegisterMap::new(Geometry::new(rows, cols).unwrap());
        map.enable_pixel(0, 0);
        let expected: usize = map
            .groups()
            .flat_map(|(_, bank)| bank.iter().map(|entry| entry.width()))
            .sum();

        assert_eq!(serialize(&map, true).unwrap().len(), expected);
        assert_eq!(serialize(&map, false).unwrap().len(), expected);
    }
    assert_eq!(RegisterMap::default().total_bits(), RECEIVER_OFFSET + 35 * WORD_WIDTH);
}

#[test]
fn serializer_is_deterministic() {
    let mut map = RegisterMap::default();
    map.apply_overrides(RegisterGroup::Dac, [("vn1", 42)]).unwrap();
    map.select_analog_output_column(3);

    assert_eq!(serialize(&map, true).unwrap(), serialize(&map, true).unwrap());
    assert_eq!(serialize(&map.clone(), false).unwrap(), serialize(&map, false).unwrap());
}

#[test]
fn single_mutation_only_touches_its_entry() {
    let mut map = RegisterMap::default();
    let before = serialize(&map, false).unwrap().to_bit_string();

    map.enable_pixel(3, 4);
    let after = serialize(&map, false).unwrap().to_bit_string();

    let word_start = RECEIVER_OFFSET + 3 * WORD_WIDTH;
    let diff = differing_bits(&before, &after);
    // mask bit 5 of a 38 bit MSB-first word
    assert_eq!(diff, [word_start + WORD_WIDTH - 1 - 5]);

    // same change seen through the transmitted (reversed) vector
    let total = map.total_bits();
    map.disable_pixel(3, 4);
    let restored = serialize(&map, true).unwrap().to_bit_string();
    map.enable_pixel(3, 4);
    let enabled = serialize(&map, true).unwrap().to_bit_string();
    assert_eq!(differing_bits(&restored, &enabled), [total - 1 - (word_start + WORD_WIDTH - 1 - 5)]);
}

#[test]
fn dac_override_stays_inside_its_field() {
    let mut map = RegisterMap::default();
    let before = serialize(&map, false).unwrap().to_bit_string();
    map.apply_overrides(RegisterGroup::Dac, [("vncomp", 63)]).unwrap();
    let after = serialize(&map, false).unwrap().to_bit_string();

    let vncomp = map
        .group(RegisterGroup::Dac)
        .names()
        .position(|name| name == "vncomp")
        .unwrap();
    let start = 35 + 6 + vncomp * 6;
    assert!(differing_bits(&before, &after).iter().all(|&i| (start..start + 6).contains(&i)));
    assert_eq!(&after[start..start + 6], "111111");
}

#[test]
fn analog_select_is_exclusive_after_any_history() {
    let mut map = RegisterMap::default();
    map.apply_digital_mask("1\n1\n1\n", true).unwrap();
    for col in [0, 34, 17, 17, 5] {
        map.select_analog_output_column(col);
        let selected = map
            .group(RegisterGroup::Receiver)
            .iter()
            .filter(|word| word.value() >> 37 & 1 == 1)
            .count();
        assert_eq!(selected, 1);
        assert_eq!(map.analog_output_column(), Some(col));
    }
}

#[test]
fn readout_to_hits() {
    // two hits in wire order (bit-reversed per byte), separated by filler
    let raw = [
        0xBC, 0xBC, //
        0x10, 0x81, 0xA0, 0x40, 0x0C, //
        0xFF, //
        0x88, 0x02, 0xFF, 0x00, 0x80, //
        0xBC,
    ];
    let decoder = HitDecoder::default();
    let hits = decoder.decode_readout(&raw, 21).unwrap();
    assert_eq!(hits.len(), 2);

    assert_eq!(hits[0].chip_id, 1);
    assert_eq!(hits[0].location, 1);
    assert!(hits[0].is_column);
    assert_eq!(hits[0].timestamp, 5);
    assert_eq!(hits[0].tot_total, 560);

    // 0x88 -> 0x11, 0x02 -> 0x40, 0xFF -> 0xFF, 0x00 -> 0x00, 0x80 -> 0x01
    assert_eq!(hits[1].chip_id, 2);
    assert_eq!(hits[1].payload, 1);
    assert_eq!(hits[1].location, 0);
    assert!(!hits[1].is_column);
    assert_eq!(hits[1].timestamp, 255);
    assert_eq!(hits[1].tot_total, 1);
    assert!(hits.iter().all(|hit| hit.readout_index == 21));
}

#[test]
fn truncated_readout_yields_no_spurious_hit() {
    let raw = [0xBC, 0x10, 0x81, 0xA0, 0x40, 0x0C, 0xBC, 0x01, 0x02, 0x03];
    let decoder = HitDecoder::default();

    let err = decoder.decode_readout(&raw, 2).unwrap_err();
    assert!(err.is_decode_error());
    assert!(matches!(err, AsicError::TruncatedFrame { readout_index: 2, remaining: 3, .. }));

    let options = ExtractOptions::default();
    let frames: Vec<_> = astropix::extract_frames(&raw, &options, 2).collect();
    assert_eq!(frames.len(), 2);
    assert!(frames[0].is_ok());
    assert!(frames[1].is_err());
}
