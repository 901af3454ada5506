//! Reader command codes, command builders, and response parsers.
//!
//! Builders validate their arguments and return
//! [`Error::InvalidParameter`] before anything is encoded, so a bad call
//! never reaches the wire.

use uhflib_core::error::{Error, Result};
use uhflib_core::settings::{ACCESS_PASSWORD_LEN, MAX_RF_POWER, MIN_RF_POWER};
use uhflib_core::types::{EPC_LEN, ResponseCode, TagPollData};

use crate::frame::{Frame, FrameType, build_command};

// ---------------------------------------------------------------
// Command codes
// ---------------------------------------------------------------

/// Inventory one tag.
pub const SINGLE_POLL: u8 = 0x22;
/// Start continuous inventory; tags arrive as notices.
pub const START_POLL: u8 = 0x27;
/// Stop continuous inventory.
pub const STOP_POLL: u8 = 0x28;
/// Write tag memory (used for the EPC bank).
pub const WRITE_EPC: u8 = 0x49;
/// Lock tag memory.
pub const LOCK_TAG: u8 = 0x82;
/// Set RF output power.
pub const SET_RF_POWER: u8 = 0xB6;
/// Get RF output power.
pub const GET_RF_POWER: u8 = 0xB7;
/// Command byte the module uses for error responses to any command.
pub const ERROR_RESPONSE: u8 = 0xFF;

/// Reserved byte preceding the poll count in a start-poll command.
const START_POLL_RESERVED: u8 = 0x22;

/// Tag memory bank holding the EPC.
pub const EPC_MEMORY_BANK: u8 = 0x01;
/// First EPC word after the CRC and PC words.
pub const EPC_START_WORD: u16 = 0x0002;
/// Number of 16-bit words in a 96-bit EPC.
pub const EPC_WORD_COUNT: u16 = (EPC_LEN / 2) as u16;

/// Length of a lock payload (mask and action bits).
pub const LOCK_PAYLOAD_LEN: usize = 3;

// ---------------------------------------------------------------
// Builders
// ---------------------------------------------------------------

pub fn single_poll() -> Result<Vec<u8>> {
    build_command(SINGLE_POLL, &[])
}

/// Start continuous polling for `count` inventory rounds (0 = until stopped).
pub fn start_polling(count: u16) -> Result<Vec<u8>> {
    let [hi, lo] = count.to_be_bytes();
    build_command(START_POLL, &[START_POLL_RESERVED, hi, lo])
}

pub fn stop_polling() -> Result<Vec<u8>> {
    build_command(STOP_POLL, &[])
}

/// Validate an RF power level in dBm.
pub fn validate_rf_power(dbm: i32) -> Result<u8> {
    if !(MIN_RF_POWER as i32..=MAX_RF_POWER as i32).contains(&dbm) {
        return Err(Error::InvalidParameter(format!(
            "RF power {dbm} dBm out of range ({MIN_RF_POWER}-{MAX_RF_POWER})"
        )));
    }
    Ok(dbm as u8)
}

/// Set RF power. The module takes hundredths of a dBm, big-endian.
pub fn set_rf_power(dbm: i32) -> Result<Vec<u8>> {
    let dbm = validate_rf_power(dbm)?;
    let centi = u16::from(dbm) * 100;
    build_command(SET_RF_POWER, &centi.to_be_bytes())
}

pub fn get_rf_power() -> Result<Vec<u8>> {
    build_command(GET_RF_POWER, &[])
}

fn check_len(what: &str, bytes: &[u8], expected: usize) -> Result<()> {
    if bytes.len() != expected {
        return Err(Error::InvalidParameter(format!(
            "{what} must be {expected} bytes, got {}",
            bytes.len()
        )));
    }
    Ok(())
}

/// Write `epc` into the EPC bank of the tag in the field.
///
/// Parameters: access password (4), memory bank (1), start word (2), word
/// count (2), data (12).
pub fn write_epc(password: &[u8], epc: &[u8]) -> Result<Vec<u8>> {
    check_len("access password", password, ACCESS_PASSWORD_LEN)?;
    check_len("EPC", epc, EPC_LEN)?;

    let mut params = Vec::with_capacity(ACCESS_PASSWORD_LEN + 5 + EPC_LEN);
    params.extend_from_slice(password);
    params.push(EPC_MEMORY_BANK);
    params.extend_from_slice(&EPC_START_WORD.to_be_bytes());
    params.extend_from_slice(&EPC_WORD_COUNT.to_be_bytes());
    params.extend_from_slice(epc);
    build_command(WRITE_EPC, &params)
}

/// Lock tag memory. Parameters: access password (4), lock payload (3).
pub fn lock_tag(password: &[u8], payload: &[u8]) -> Result<Vec<u8>> {
    check_len("access password", password, ACCESS_PASSWORD_LEN)?;
    check_len("lock payload", payload, LOCK_PAYLOAD_LEN)?;

    let mut params = Vec::with_capacity(ACCESS_PASSWORD_LEN + LOCK_PAYLOAD_LEN);
    params.extend_from_slice(password);
    params.extend_from_slice(payload);
    build_command(LOCK_TAG, &params)
}

// ---------------------------------------------------------------
// Parsers
// ---------------------------------------------------------------

/// Decode a tag observation from a continuous-poll notice.
///
/// Returns `None` for any other frame, for notices with fewer than four
/// parameter bytes, and for notices whose EPC is shorter than 12 bytes.
pub fn parse_tag_poll_data(frame: &Frame) -> Option<TagPollData> {
    if frame.frame_type() != FrameType::Notice
        || frame.command() != START_POLL
        || frame.parameters().len() < 4
    {
        return None;
    }
    TagPollData::from_payload(frame.parameters())
}

/// Map a response frame to `Ok` or the reader error it carries.
pub fn check_response(frame: &Frame) -> Result<()> {
    match frame.response_code() {
        Some(ResponseCode::Success) => Ok(()),
        Some(code) => Err(Error::Reader(code)),
        None => Err(Error::Protocol(format!(
            "expected a response code, got {}",
            frame.describe()
        ))),
    }
}

/// Extract the RF power in dBm from a get-power response.
///
/// The response carries the success code followed by the power in
/// centi-dBm, big-endian. Values outside 0-30 dBm are rejected.
pub fn parse_rf_power(frame: &Frame) -> Result<u8> {
    check_response(frame)?;
    let raw = match frame.parameters().get(1..3) {
        Some(&[hi, lo]) => u16::from_be_bytes([hi, lo]),
        _ => {
            return Err(Error::Protocol(format!(
                "short RF power response: {}",
                frame.describe()
            )));
        }
    };
    match u8::try_from(raw / 100) {
        Ok(dbm) if dbm <= MAX_RF_POWER => Ok(dbm),
        _ => Err(Error::Protocol(format!("RF power out of range: {raw} cdBm"))),
    }
}

/// Extract the tags reported in reply to a single poll.
///
/// A success response carries zero or one tag record after the code; a
/// notice carries the record directly. "Tag not found" is an empty result,
/// not an error.
pub fn parse_single_poll(frame: &Frame) -> Result<Vec<TagPollData>> {
    match frame.frame_type() {
        FrameType::Notice => Ok(TagPollData::from_payload(frame.parameters())
            .into_iter()
            .collect()),
        _ => match frame.response_code() {
            Some(ResponseCode::TagNotFound) => Ok(Vec::new()),
            _ => {
                check_response(frame)?;
                Ok(TagPollData::from_payload(&frame.parameters()[1..])
                    .into_iter()
                    .collect())
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{build_notice, build_response, parse_frame};
    use uhflib_core::types::READER_EPC_PREFIX;

    const PASSWORD: [u8; 4] = [0x00, 0x00, 0x00, 0x00];

    fn reader_epc() -> [u8; EPC_LEN] {
        [0x52, 0x46, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xAB, 0xCD]
    }

    fn tag_record() -> Vec<u8> {
        let mut params = vec![0xC8, 0x30, 0x00];
        params.extend_from_slice(&reader_epc());
        params
    }

    fn response(command: u8, params: &[u8]) -> Frame {
        parse_frame(&build_response(command, params).unwrap()).unwrap()
    }

    // ---------------------------------------------------------------
    // Builders
    // ---------------------------------------------------------------

    #[test]
    fn builders_round_trip() {
        let mut write_params = PASSWORD.to_vec();
        write_params.extend_from_slice(&[0x01, 0x00, 0x02, 0x00, 0x06]);
        write_params.extend_from_slice(&reader_epc());
        let mut lock_params = PASSWORD.to_vec();
        lock_params.extend_from_slice(&[0x02, 0x00, 0x80]);

        let cases = [
            (single_poll().unwrap(), SINGLE_POLL, vec![]),
            (start_polling(0).unwrap(), START_POLL, vec![0x22, 0x00, 0x00]),
            (stop_polling().unwrap(), STOP_POLL, vec![]),
            (set_rf_power(26).unwrap(), SET_RF_POWER, vec![0x0A, 0x28]),
            (get_rf_power().unwrap(), GET_RF_POWER, vec![]),
            (write_epc(&PASSWORD, &reader_epc()).unwrap(), WRITE_EPC, write_params),
            (lock_tag(&PASSWORD, &[0x02, 0x00, 0x80]).unwrap(), LOCK_TAG, lock_params),
        ];
        for (bytes, command, params) in cases {
            let frame = parse_frame(&bytes).unwrap();
            assert_eq!(frame.frame_type(), FrameType::Command);
            assert_eq!(frame.command(), command);
            assert_eq!(frame.parameters(), params.as_slice());
            assert!(frame.checksum_valid());
            assert_eq!(frame.raw_bytes(), Some(bytes.as_slice()));
        }
    }

    #[test]
    fn start_polling_encodes_count() {
        let frame = parse_frame(&start_polling(10_000).unwrap()).unwrap();
        assert_eq!(frame.parameters(), vec![0x22, 0x27, 0x10]);
        let frame = parse_frame(&start_polling(0).unwrap()).unwrap();
        assert_eq!(frame.parameters(), vec![0x22, 0x00, 0x00]);
    }

    #[test]
    fn set_rf_power_encodes_centi_dbm() {
        assert_eq!(
            set_rf_power(20).unwrap(),
            vec![0xBB, 0x00, 0xB6, 0x00, 0x02, 0x07, 0xD0, 0x8F, 0x7E]
        );
    }

    #[test]
    fn set_rf_power_range() {
        assert!(set_rf_power(0).is_ok());
        assert!(set_rf_power(30).is_ok());
        assert!(matches!(set_rf_power(-1), Err(Error::InvalidParameter(_))));
        assert!(matches!(set_rf_power(31), Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn write_epc_layout() {
        let frame = parse_frame(&write_epc(&[1, 2, 3, 4], &reader_epc()).unwrap()).unwrap();
        assert_eq!(&frame.parameters()[..4], &[1, 2, 3, 4]);
        assert_eq!(&frame.parameters()[4..9], &[0x01, 0x00, 0x02, 0x00, 0x06]);
        assert_eq!(&frame.parameters()[9..], &reader_epc());
    }

    #[test]
    fn write_epc_validates_lengths() {
        assert!(matches!(
            write_epc(&PASSWORD, &[0u8; 11]),
            Err(Error::InvalidParameter(_))
        ));
        assert!(matches!(
            write_epc(&PASSWORD, &[0u8; 13]),
            Err(Error::InvalidParameter(_))
        ));
        assert!(matches!(
            write_epc(&[0u8; 3], &reader_epc()),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn lock_tag_validates_lengths() {
        assert!(matches!(
            lock_tag(&[0u8; 5], &[0, 0, 0]),
            Err(Error::InvalidParameter(_))
        ));
        assert!(matches!(
            lock_tag(&PASSWORD, &[0, 0]),
            Err(Error::InvalidParameter(_))
        ));
        let frame = parse_frame(&lock_tag(&[9, 9, 9, 9], &[1, 2, 3]).unwrap()).unwrap();
        assert_eq!(frame.parameters(), vec![9, 9, 9, 9, 1, 2, 3]);
    }

    // ---------------------------------------------------------------
    // Parsers
    // ---------------------------------------------------------------

    #[test]
    fn tag_poll_notice_decodes() {
        let frame = parse_frame(&build_notice(START_POLL, &tag_record()).unwrap()).unwrap();
        let tag = parse_tag_poll_data(&frame).unwrap();
        assert_eq!(tag.rssi, 0xC8);
        assert_eq!(tag.pc, 0x3000);
        assert!(tag.epc.starts_with(&READER_EPC_PREFIX));
        assert!(tag.is_reader_tag());
        assert_eq!(tag.epc_hex(), "52460000000000000000ABCD");
    }

    #[test]
    fn tag_poll_rejects_wrong_frames() {
        // Response instead of notice
        assert!(parse_tag_poll_data(&response(START_POLL, &tag_record())).is_none());
        // Wrong command
        let frame = parse_frame(&build_notice(SINGLE_POLL, &tag_record()).unwrap()).unwrap();
        assert!(parse_tag_poll_data(&frame).is_none());
        // Too short
        let frame = parse_frame(&build_notice(START_POLL, &[0xC8, 0x30, 0x00]).unwrap()).unwrap();
        assert!(parse_tag_poll_data(&frame).is_none());
        // Truncated EPC
        let frame =
            parse_frame(&build_notice(START_POLL, &tag_record()[..10]).unwrap()).unwrap();
        assert!(parse_tag_poll_data(&frame).is_none());
    }

    #[test]
    fn check_response_maps_codes() {
        assert!(check_response(&response(WRITE_EPC, &[0x10])).is_ok());
        let err = check_response(&response(WRITE_EPC, &[0x14])).unwrap_err();
        assert_eq!(err.response_code(), Some(ResponseCode::MemoryLocked));
        assert_eq!(err.to_string(), "reader error: memory locked");
        assert!(matches!(
            check_response(&response(WRITE_EPC, &[])),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn rf_power_parsing() {
        assert_eq!(parse_rf_power(&response(GET_RF_POWER, &[0x10, 0x07, 0xD0])).unwrap(), 20);
        assert_eq!(parse_rf_power(&response(GET_RF_POWER, &[0x10, 0x0A, 0x28])).unwrap(), 26);
        assert_eq!(parse_rf_power(&response(GET_RF_POWER, &[0x10, 0x0B, 0xB8])).unwrap(), 30);
        assert!(matches!(
            parse_rf_power(&response(GET_RF_POWER, &[0x11, 0x00, 0x00])),
            Err(Error::Reader(ResponseCode::InvalidCommand))
        ));
        assert!(matches!(
            parse_rf_power(&response(GET_RF_POWER, &[0x10])),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn rf_power_rejects_impossible_values() {
        // Two-byte reply: the success code is not a power high byte.
        assert!(matches!(
            parse_rf_power(&response(GET_RF_POWER, &[0x10, 0x14])),
            Err(Error::Protocol(_))
        ));
        // 100 dBm
        assert!(matches!(
            parse_rf_power(&response(GET_RF_POWER, &[0x10, 0x27, 0x10])),
            Err(Error::Protocol(_))
        ));
        // 31 dBm
        assert!(matches!(
            parse_rf_power(&response(GET_RF_POWER, &[0x10, 0x0C, 0x1C])),
            Err(Error::Protocol(_))
        ));
        // Beyond u8 after scaling
        assert!(matches!(
            parse_rf_power(&response(GET_RF_POWER, &[0x10, 0xFF, 0xFF])),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn single_poll_parsing() {
        assert!(parse_single_poll(&response(SINGLE_POLL, &[0x10])).unwrap().is_empty());
        assert!(parse_single_poll(&response(ERROR_RESPONSE, &[0x15])).unwrap().is_empty());

        let mut params = vec![0x10];
        params.extend_from_slice(&tag_record());
        let tags = parse_single_poll(&response(SINGLE_POLL, &params)).unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].epc, reader_epc());

        let notice = parse_frame(&build_notice(SINGLE_POLL, &tag_record()).unwrap()).unwrap();
        assert_eq!(parse_single_poll(&notice).unwrap().len(), 1);

        assert!(matches!(
            parse_single_poll(&response(ERROR_RESPONSE, &[0x16])),
            Err(Error::Reader(ResponseCode::ReadFailed))
        ));
    }
}
