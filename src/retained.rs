//! Retained-memory codec.
//!
//! Layout: byte 0 is the batch count, the rest is a UTF-8 JSON array of
//! readings. Anything that does not match decodes to the empty state; a torn
//! write from a crash is indistinguishable from garbage and is treated the
//! same way.

use alloc::vec::Vec;

use log::{debug, warn};

use crate::error::CodecError;
use crate::model::{Reading, RetainedState};
use crate::traits::RetainedMemory;

pub fn decode(buffer: &[u8]) -> RetainedState {
    let Some((&count, json)) = buffer.split_first() else {
        return RetainedState::default();
    };

    match serde_json::from_slice::<Vec<Reading>>(json) {
        Ok(readings) => RetainedState { count, readings },
        Err(_) => {
            debug!("retained: {} bytes did not decode, starting empty", buffer.len());
            RetainedState::default()
        }
    }
}

/// Serialize `state`. Never truncates: an encoding longer than `capacity` is
/// rejected and the caller decides what to drop. Non-finite readings are
/// rejected too, since they would come back as `null` and fail to decode.
pub fn encode(state: &RetainedState, capacity: usize) -> Result<Vec<u8>, CodecError> {
    if !state.readings.iter().all(Reading::is_finite) {
        return Err(CodecError::NonFinite);
    }
    let json = serde_json::to_vec(&state.readings).map_err(|_| CodecError::Serialize)?;
    let len = json.len() + 1;
    if len > capacity {
        return Err(CodecError::EncodingTooLarge { len, capacity });
    }

    let mut buffer = Vec::with_capacity(len);
    buffer.push(state.count);
    buffer.extend_from_slice(&json);
    Ok(buffer)
}

pub fn load<M: RetainedMemory>(memory: &M) -> RetainedState {
    decode(memory.load())
}

/// Write `state` to `memory`, dropping the oldest readings until the encoding
/// fits. Returns how many readings were dropped. The count byte is kept as is.
///
/// On error nothing was written and the previous contents are intact.
pub fn persist<M: RetainedMemory>(
    memory: &mut M,
    state: &mut RetainedState,
    capacity: usize,
) -> Result<usize, CodecError> {
    let mut dropped = 0;
    let buffer = loop {
        match encode(state, capacity) {
            Ok(buffer) => break buffer,
            Err(CodecError::EncodingTooLarge { len, capacity }) if !state.readings.is_empty() => {
                debug!("retained: {} bytes over {}, dropping oldest", len, capacity);
                state.readings.remove(0);
                dropped += 1;
            }
            Err(e) => return Err(e),
        }
    };

    if dropped > 0 {
        warn!(
            "retained: dropped {} oldest readings to fit {} bytes",
            dropped, capacity
        );
    }

    memory.store(&buffer).map_err(CodecError::Store)?;
    Ok(dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryRetained, reading};

    #[test]
    fn round_trips_state_within_capacity() {
        let state = RetainedState {
            count: 3,
            readings: vec![reading(100, 21.5), reading(160, 21.75), reading(220, -3.25)],
        };

        let buffer = encode(&state, 2048).unwrap();
        assert_eq!(buffer[0], 3);
        assert_eq!(decode(&buffer), state);
    }

    #[test]
    fn empty_state_encodes_as_count_and_empty_array() {
        let buffer = encode(&RetainedState::default(), 2048).unwrap();
        assert_eq!(buffer, b"\x00[]");
    }

    #[test]
    fn uses_wire_field_names() {
        let state = RetainedState {
            count: 1,
            readings: vec![reading(7, 20.0)],
        };
        let buffer = encode(&state, 2048).unwrap();
        let json = core::str::from_utf8(&buffer[1..]).unwrap();
        assert!(json.contains("\"timestamp\":7"));
        assert!(json.contains("\"temp\":20"));
        assert!(json.contains("\"pressure\""));
        assert!(json.contains("\"humidity\""));
    }

    #[test]
    fn malformed_buffers_decode_to_empty_state() {
        let garbage: [&[u8]; 7] = [
            b"",
            b"\x05",
            b"\x05[",
            b"\x05[{\"timestamp\":1}]",
            b"\x02not json",
            b"\x09[]trailing",
            &[0xff, 0xfe, 0x00, 0x80],
        ];
        for buffer in garbage {
            assert_eq!(decode(buffer), RetainedState::default(), "{:?}", buffer);
        }
    }

    #[test]
    fn truncated_encoding_decodes_to_empty_state() {
        let state = RetainedState {
            count: 2,
            readings: vec![reading(1, 10.0), reading(2, 11.0)],
        };
        let buffer = encode(&state, 2048).unwrap();
        assert_eq!(decode(&buffer[..buffer.len() - 3]), RetainedState::default());
    }

    #[test]
    fn rejects_oversized_encoding() {
        let state = RetainedState {
            count: 4,
            readings: vec![reading(1, 1.0); 4],
        };
        let err = encode(&state, 32).unwrap_err();
        assert!(matches!(err, CodecError::EncodingTooLarge { capacity: 32, .. }));
    }

    #[test]
    fn persist_drops_oldest_until_it_fits() {
        let readings: Vec<Reading> = (0..10).map(|i| reading(i, i as f32)).collect();
        let one = encode(
            &RetainedState {
                count: 0,
                readings: vec![readings[0]],
            },
            usize::MAX,
        )
        .unwrap()
        .len();
        // Room for roughly three readings.
        let capacity = one * 3;
        let mut memory = MemoryRetained::new(capacity);
        let mut state = RetainedState {
            count: 10,
            readings: readings.clone(),
        };

        let dropped = persist(&mut memory, &mut state, capacity).unwrap();

        assert!(dropped > 0);
        assert_eq!(state.count, 10);
        assert_eq!(state.readings.len(), 10 - dropped);
        assert_eq!(state.readings.last(), readings.last());
        assert!(memory.load().len() <= capacity);
        assert_eq!(load(&memory), state);
    }

    #[test]
    fn rejects_non_finite_readings() {
        let mut last = reading(3, 20.0);
        last.humidity_pct = f32::NAN;
        let mut state = RetainedState {
            count: 3,
            readings: vec![reading(1, 20.0), reading(2, 20.0), last],
        };
        assert_eq!(encode(&state, 2048), Err(CodecError::NonFinite));

        state.readings[2].humidity_pct = f32::INFINITY;
        let mut memory = MemoryRetained::new(2048);
        assert_eq!(persist(&mut memory, &mut state, 2048), Err(CodecError::NonFinite));
        assert!(memory.load().is_empty());
    }

    #[test]
    fn persist_keeps_previous_contents_when_nothing_fits() {
        let mut memory = MemoryRetained::new(2048);
        let mut previous = RetainedState {
            count: 1,
            readings: vec![reading(1, 1.0)],
        };
        persist(&mut memory, &mut previous, 2048).unwrap();
        let stored = memory.load().to_vec();

        // Even the empty batch needs three bytes.
        let mut next = RetainedState {
            count: 2,
            readings: vec![reading(1, 1.0), reading(2, 2.0)],
        };
        let err = persist(&mut memory, &mut next, 2).unwrap_err();

        assert!(matches!(err, CodecError::EncodingTooLarge { len: 3, capacity: 2 }));
        assert!(next.readings.is_empty());
        assert_eq!(memory.load(), &stored[..]);
    }

    #[test]
    fn persist_keeps_previous_contents_when_store_fails() {
        let mut memory = MemoryRetained::new(2048);
        let mut previous = RetainedState {
            count: 1,
            readings: vec![reading(1, 1.0)],
        };
        persist(&mut memory, &mut previous, 2048).unwrap();
        memory.fail_writes = true;

        let mut next = RetainedState {
            count: 2,
            readings: vec![reading(1, 1.0), reading(2, 2.0)],
        };
        assert!(persist(&mut memory, &mut next, 2048).is_err());
        assert_eq!(load(&memory), previous);
    }
}
