//! The alignment payload: the framed record exchanged when a replica is
//! brought in sync, carrying a global version vector and, optionally, the
//! per-class object counts the receiving side pre-sizes its storage with.
//!
//! Two encodings exist because they serve different callers. The raw
//! encoding is a fixed 24-bytes-per-entry little-endian layout with no
//! framing overhead beyond a count — cheap to produce on a hot alignment
//! path, but it cannot carry class capacities. The message encoding is a
//! length-delimited MessagePack frame that carries everything, used
//! wherever the extra bytes don't matter.

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use velox_core::{ClassId, Error, GlobalTerm, GlobalVersion, Result, Version};

/// What stage of an alignment exchange this payload represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlignmentPayloadType {
    /// No alignment in progress.
    None,
    /// First frame of an alignment exchange.
    Beginning,
    /// A regular frame carrying version-vector progress.
    Alignment,
    /// Final frame closing out the exchange.
    End,
}

/// The object capacity a class should be pre-sized to on the receiving
/// side. Only carried by the message encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassCapacity {
    /// The class this capacity hint applies to.
    pub class_id: ClassId,
    /// Suggested object count to reserve storage for.
    pub capacity: u64,
}

/// An alignment protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentPayload {
    /// Which stage of the exchange this frame represents.
    pub payload_type: AlignmentPayloadType,
    /// The global version vector as of this frame, if the frame carries one.
    pub global_version: Option<Vec<GlobalVersion>>,
    /// Per-class capacity hints, if the frame carries them. Never present
    /// in a raw-encoded frame — see [`AlignmentPayload::to_raw_bytes`].
    pub class_capacity: Option<Vec<ClassCapacity>>,
}

const RAW_ENTRY_LEN: usize = 24; // 16-byte term + 8-byte version

impl AlignmentPayload {
    /// Encode as the raw fixed-width little-endian layout:
    /// `[type: u8][entry_count: u32][entry_count * 24 bytes]`, one 24-byte
    /// `(term: u128, version: u64)` pair per entry.
    ///
    /// Fails with [`Error::InvalidArgument`] if `class_capacity` is
    /// present and non-empty — the raw encoding has no field for it by
    /// design, so a payload that needs capacities must use
    /// [`AlignmentPayload::to_message_bytes`] instead.
    pub fn to_raw_bytes(&self) -> Result<Vec<u8>> {
        if self.class_capacity.as_ref().is_some_and(|c| !c.is_empty()) {
            return Err(Error::InvalidArgument(
                "raw alignment encoding cannot carry class capacities".into(),
            ));
        }

        let entries = self.global_version.as_deref().unwrap_or(&[]);
        let mut buf = Vec::with_capacity(1 + 4 + entries.len() * RAW_ENTRY_LEN);
        buf.write_u8(self.payload_type as u8).expect("write to Vec cannot fail");
        buf.write_u32::<LittleEndian>(entries.len() as u32).expect("write to Vec cannot fail");
        for gv in entries {
            buf.write_u128::<LittleEndian>(gv.term.as_u128()).expect("write to Vec cannot fail");
            buf.write_u64::<LittleEndian>(gv.version.as_u64()).expect("write to Vec cannot fail");
        }
        Ok(buf)
    }

    /// Decode the raw fixed-width encoding produced by
    /// [`AlignmentPayload::to_raw_bytes`].
    ///
    /// The result always has `class_capacity: None` and `global_version:
    /// Some(..)` (possibly empty) — raw frames never distinguish "no
    /// version vector" from "empty version vector".
    pub fn from_raw_bytes(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);
        let payload_type = decode_payload_type(
            cursor
                .read_u8()
                .map_err(|e| Error::InvalidArgument(format!("truncated alignment payload: {e}")))?,
        )?;
        let count = cursor
            .read_u32::<LittleEndian>()
            .map_err(|e| Error::InvalidArgument(format!("truncated alignment payload: {e}")))?;

        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let term = cursor
                .read_u128::<LittleEndian>()
                .map_err(|e| Error::InvalidArgument(format!("truncated alignment entry: {e}")))?;
            let version = cursor
                .read_u64::<LittleEndian>()
                .map_err(|e| Error::InvalidArgument(format!("truncated alignment entry: {e}")))?;
            entries.push(GlobalVersion::new(GlobalTerm::new(term), Version::new(version)));
        }

        let mut trailing = Vec::new();
        cursor
            .read_to_end(&mut trailing)
            .map_err(|e| Error::InvalidArgument(format!("failed to read alignment payload: {e}")))?;
        if !trailing.is_empty() {
            return Err(Error::InvalidArgument("trailing bytes after alignment entries".into()));
        }

        Ok(AlignmentPayload {
            payload_type,
            global_version: Some(entries),
            class_capacity: None,
        })
    }

    /// Encode as a length-delimited MessagePack frame:
    /// `[len: u32 LE][rmp-serde bytes]`. Carries every field, including
    /// class capacities.
    pub fn to_message_bytes(&self) -> Result<Vec<u8>> {
        let body = rmp_serde::to_vec(self).map_err(|e| Error::InvalidArgument(format!("failed to encode alignment payload: {e}")))?;
        let mut buf = Vec::with_capacity(4 + body.len());
        buf.write_u32::<LittleEndian>(body.len() as u32).expect("write to Vec cannot fail");
        buf.extend_from_slice(&body);
        Ok(buf)
    }

    /// Decode a frame produced by [`AlignmentPayload::to_message_bytes`].
    pub fn from_message_bytes(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);
        let len = cursor
            .read_u32::<LittleEndian>()
            .map_err(|e| Error::InvalidArgument(format!("truncated alignment frame length: {e}")))? as usize;

        let start = cursor.position() as usize;
        let body = bytes
            .get(start..start + len)
            .ok_or_else(|| Error::InvalidArgument("alignment frame shorter than declared length".into()))?;
        if bytes.len() != start + len {
            return Err(Error::InvalidArgument("trailing bytes after alignment frame".into()));
        }

        rmp_serde::from_slice(body).map_err(|e| Error::InvalidArgument(format!("failed to decode alignment payload: {e}")))
    }
}

fn decode_payload_type(tag: u8) -> Result<AlignmentPayloadType> {
    match tag {
        0 => Ok(AlignmentPayloadType::None),
        1 => Ok(AlignmentPayloadType::Beginning),
        2 => Ok(AlignmentPayloadType::Alignment),
        3 => Ok(AlignmentPayloadType::End),
        other => Err(Error::InvalidArgument(format!("unknown alignment payload type tag {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_versions() -> Vec<GlobalVersion> {
        vec![
            GlobalVersion::new(GlobalTerm::new(1), Version::new(100)),
            GlobalVersion::new(GlobalTerm::new(2), Version::new(200)),
        ]
    }

    #[test]
    fn raw_round_trips_when_class_capacity_absent() {
        let payload = AlignmentPayload {
            payload_type: AlignmentPayloadType::Alignment,
            global_version: Some(sample_versions()),
            class_capacity: None,
        };
        let bytes = payload.to_raw_bytes().unwrap();
        let decoded = AlignmentPayload::from_raw_bytes(&bytes).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn raw_rejects_class_capacities() {
        let payload = AlignmentPayload {
            payload_type: AlignmentPayloadType::Beginning,
            global_version: None,
            class_capacity: Some(vec![ClassCapacity { class_id: 1, capacity: 10 }]),
        };
        assert!(payload.to_raw_bytes().is_err());
    }

    #[test]
    fn raw_none_global_version_decodes_as_empty_vec() {
        let payload = AlignmentPayload {
            payload_type: AlignmentPayloadType::None,
            global_version: None,
            class_capacity: None,
        };
        let bytes = payload.to_raw_bytes().unwrap();
        let decoded = AlignmentPayload::from_raw_bytes(&bytes).unwrap();
        assert_eq!(decoded.global_version, Some(vec![]));
    }

    #[test]
    fn message_round_trips_full_fidelity() {
        let payload = AlignmentPayload {
            payload_type: AlignmentPayloadType::End,
            global_version: Some(sample_versions()),
            class_capacity: Some(vec![
                ClassCapacity { class_id: 1, capacity: 1000 },
                ClassCapacity { class_id: 2, capacity: 2000 },
            ]),
        };
        let bytes = payload.to_message_bytes().unwrap();
        let decoded = AlignmentPayload::from_message_bytes(&bytes).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn message_round_trips_all_none_fields() {
        let payload = AlignmentPayload {
            payload_type: AlignmentPayloadType::None,
            global_version: None,
            class_capacity: None,
        };
        let bytes = payload.to_message_bytes().unwrap();
        let decoded = AlignmentPayload::from_message_bytes(&bytes).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn raw_decode_rejects_truncated_bytes() {
        let bytes = [0u8, 1, 0, 0]; // type + partial count
        assert!(AlignmentPayload::from_raw_bytes(&bytes).is_err());
    }

    #[test]
    fn raw_decode_rejects_unknown_type_tag() {
        let bytes = [9u8, 0, 0, 0, 0];
        assert!(AlignmentPayload::from_raw_bytes(&bytes).is_err());
    }

    proptest::proptest! {
        #[test]
        fn raw_round_trips_for_any_version_vector(
            terms in proptest::collection::vec((0u128..=u128::MAX, 0u64..=u64::MAX), 0..8)
        ) {
            let payload = AlignmentPayload {
                payload_type: AlignmentPayloadType::Alignment,
                global_version: Some(
                    terms
                        .into_iter()
                        .map(|(t, v)| GlobalVersion::new(GlobalTerm::new(t), Version::new(v)))
                        .collect(),
                ),
                class_capacity: None,
            };
            let bytes = payload.to_raw_bytes().unwrap();
            let decoded = AlignmentPayload::from_raw_bytes(&bytes).unwrap();
            proptest::prop_assert_eq!(decoded, payload);
        }

        #[test]
        fn message_round_trips_for_any_payload(
            terms in proptest::collection::vec((0u128..=u128::MAX, 0u64..=u64::MAX), 0..8),
            capacities in proptest::collection::vec((0u16..=u16::MAX, 0u64..=u64::MAX), 0..8),
        ) {
            let payload = AlignmentPayload {
                payload_type: AlignmentPayloadType::End,
                global_version: Some(
                    terms
                        .into_iter()
                        .map(|(t, v)| GlobalVersion::new(GlobalTerm::new(t), Version::new(v)))
                        .collect(),
                ),
                class_capacity: Some(
                    capacities
                        .into_iter()
                        .map(|(class_id, capacity)| ClassCapacity { class_id, capacity })
                        .collect(),
                ),
            };
            let bytes = payload.to_message_bytes().unwrap();
            let decoded = AlignmentPayload::from_message_bytes(&bytes).unwrap();
            proptest::prop_assert_eq!(decoded, payload);
        }
    }
}
