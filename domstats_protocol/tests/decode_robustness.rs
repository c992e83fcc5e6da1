//! Robustness tests: decoders must reject, never panic, whatever the
//! producer side writes into its file or pages.

use proptest::prelude::*;

use domstats_protocol::{crc32, PayloadDecoder, ProtocolVersion, ReadOutcome};

fn v2_payload(timestamp: u64, values: &[f64]) -> Vec<u8> {
    let entries: Vec<String> = (0..values.len())
        .map(|i| format!(r#"{{"name": "m{i}", "owner": "host"}}"#))
        .collect();
    let meta = format!(r#"{{"datasources": [{}]}}"#, entries.join(","));

    let mut data = Vec::new();
    data.extend_from_slice(&timestamp.to_be_bytes());
    for v in values {
        data.extend_from_slice(&v.to_bits().to_be_bytes());
    }

    let mut buf = Vec::new();
    buf.extend_from_slice(b"DATASOURCES\0");
    buf.extend_from_slice(&crc32(&data).to_be_bytes());
    buf.extend_from_slice(&crc32(meta.as_bytes()).to_be_bytes());
    buf.extend_from_slice(&(values.len() as u32).to_be_bytes());
    buf.extend_from_slice(&data);
    buf.extend_from_slice(&(meta.len() as u32).to_be_bytes());
    buf.extend_from_slice(meta.as_bytes());
    buf
}

proptest! {
    #[test]
    fn arbitrary_bytes_never_panic_v1(bytes in proptest::collection::vec(any::<u8>(), 0..2048)) {
        let mut decoder = PayloadDecoder::new(ProtocolVersion::V1);
        let _ = decoder.decode(&bytes);
    }

    #[test]
    fn arbitrary_bytes_never_panic_v2(bytes in proptest::collection::vec(any::<u8>(), 0..2048)) {
        let mut decoder = PayloadDecoder::new(ProtocolVersion::V2);
        let _ = decoder.decode(&bytes);
    }

    #[test]
    fn valid_magic_with_garbage_tail_never_panics(
        tail in proptest::collection::vec(any::<u8>(), 0..512)
    ) {
        let mut buf = b"DATASOURCES\0".to_vec();
        buf.extend_from_slice(&tail);
        let mut decoder = PayloadDecoder::new(ProtocolVersion::V2);
        let _ = decoder.decode(&buf);

        let mut buf = b"DATASOURCES\n".to_vec();
        buf.extend_from_slice(&tail);
        let mut decoder = PayloadDecoder::new(ProtocolVersion::V1);
        let _ = decoder.decode(&buf);
    }

    #[test]
    fn truncated_v2_payload_always_errors(
        values in proptest::collection::vec(-1e9f64..1e9, 1..32),
        cut_fraction in 0.0f64..1.0,
    ) {
        let full = v2_payload(1_700_000_000, &values);
        let cut = ((full.len() - 1) as f64 * cut_fraction) as usize;
        let mut decoder = PayloadDecoder::new(ProtocolVersion::V2);
        prop_assert!(decoder.decode(&full[..cut]).is_err());
    }

    #[test]
    fn flipped_byte_in_v2_never_yields_update_with_stale_state(
        values in proptest::collection::vec(-1e6f64..1e6, 1..16),
        flip_at in any::<prop::sample::Index>(),
    ) {
        let mut buf = v2_payload(42, &values);
        let idx = flip_at.index(buf.len());
        buf[idx] ^= 0x01;

        let mut decoder = PayloadDecoder::new(ProtocolVersion::V2);
        // Whatever happens, it must not panic; a flip in the checksummed
        // regions must not decode into a silently wrong update with the
        // original checksums intact.
        match decoder.decode(&buf) {
            Ok(ReadOutcome::Update(_)) => {
                // Only reachable when the flip landed in a checksum field's
                // covered data AND recomputation matched, which CRC32
                // excludes for single-bit flips, or in a field that is
                // allowed to vary (none here). Flips in the magic or the
                // declared checksums themselves always error.
                let original = v2_payload(42, &values);
                prop_assert_ne!(buf, original);
                prop_assert!(false, "single-bit flip decoded as a clean update");
            }
            Ok(ReadOutcome::NoUpdate) => prop_assert!(false, "fresh decoder cannot see NoUpdate"),
            Err(_) => {}
        }
    }
}

#[test]
fn round_trip_survives_interleaved_producers() {
    // One decoder per producer; payloads do not cross-talk.
    let a1 = v2_payload(1, &[1.0]);
    let a2 = v2_payload(2, &[2.0]);
    let b1 = v2_payload(1, &[9.0]);

    let mut decoder_a = PayloadDecoder::new(ProtocolVersion::V2);
    let mut decoder_b = PayloadDecoder::new(ProtocolVersion::V2);

    assert!(matches!(
        decoder_a.decode(&a1).unwrap(),
        ReadOutcome::Update(_)
    ));
    assert!(matches!(
        decoder_b.decode(&b1).unwrap(),
        ReadOutcome::Update(_)
    ));
    assert!(matches!(
        decoder_a.decode(&a1).unwrap(),
        ReadOutcome::NoUpdate
    ));
    assert!(matches!(
        decoder_a.decode(&a2).unwrap(),
        ReadOutcome::Update(_)
    ));
    assert!(matches!(
        decoder_b.decode(&b1).unwrap(),
        ReadOutcome::NoUpdate
    ));
}
