//! BNO055 UART wire protocol: command framing, the byte-at-a-time receive
//! state machine and payload decoders.
//!
//! The module talks a simple request/response register protocol. Commands go
//! out as `[0xAA, op, reg, len(, data)]`; replies come back either as a
//! two-byte ACK (`0xEE, status`) or as a data frame (`0xBB, len, payload`).
//! There is no request id on the wire, so the caller primes a [`ReadRequest`]
//! before transmitting and the decoder matches the next completed data frame
//! against it.

use heapless::Vec;

pub const BNO055_BAUD_RATE: u32 = 115_200;

// Command/reply framing
const START_BYTE: u8 = 0xAA;
const CMD_WRITE: u8 = 0x00;
const CMD_READ: u8 = 0x01;
const ACK_HEADER: u8 = 0xEE;
const DATA_HEADER: u8 = 0xBB;

/// Largest payload a data frame may carry.
pub const PAYLOAD_CAP: usize = 16;
/// A partial frame older than this is abandoned on the next received byte.
const FRAME_MAX_TIME_MS: u32 = 10;
/// A primed request older than this no longer matches a completing frame.
pub const REQUEST_STALE_MS: u32 = 500;

// Register map (page 0)
pub const REG_CHIP_ID: u8 = 0x00;
pub const REG_EUL_YAW_LSB: u8 = 0x1A;
pub const REG_CALIB_STAT: u8 = 0x35;
pub const REG_OPR_MODE: u8 = 0x3D;
pub const REG_PWR_MODE: u8 = 0x3E;

pub const CHIP_ID: u8 = 0xA0;
pub const OPR_MODE_NDOF: u8 = 0x0C;
pub const PWR_MODE_NORMAL: u8 = 0x00;

/// Yaw/roll/pitch as three consecutive int16 register pairs.
pub const EUL_READ_LEN: u8 = 6;

// ── Outgoing commands ─────────────────────────────────────────────────────────

pub fn encode_register_write(reg: u8, value: u8) -> [u8; 5] {
    [START_BYTE, CMD_WRITE, reg, 1, value]
}

pub fn encode_register_read(reg: u8, len: u8) -> [u8; 4] {
    [START_BYTE, CMD_READ, reg, len]
}

// ── Request correlation ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum ReadKind {
    ChipId,
    EulerAngles,
    CalibrationStatus,
}

/// One outstanding read command. The issuer sends this through a capacity-1
/// channel before writing the command bytes; the single slot is what enforces
/// "at most one command in flight".
#[derive(Debug, Clone, Copy)]
pub struct ReadRequest {
    pub kind: ReadKind,
    pub sent_at_ms: u32,
}

impl ReadRequest {
    pub fn new(kind: ReadKind, now_ms: u32) -> Self {
        Self {
            kind,
            sent_at_ms: now_ms,
        }
    }

    /// True once the reply window has long passed; a frame completing now is
    /// treated as unsolicited rather than decoded against this request.
    pub fn is_stale(&self, now_ms: u32) -> bool {
        now_ms.wrapping_sub(self.sent_at_ms) > REQUEST_STALE_MS
    }
}

/// The one outstanding-command slot. Whoever issues a command parks a
/// [`ReadRequest`] here before the bytes go out; the frame decoder takes it
/// back when the reply completes. Issuing is refused while a fresh request is
/// parked, which makes "one command in flight" an enforced invariant instead
/// of a timing accident. A request older than [`REQUEST_STALE_MS`] counts as
/// lost: it may be replaced, and a frame completing against it is unsolicited.
#[derive(Default)]
pub struct RequestSlot {
    pending: Option<ReadRequest>,
}

impl RequestSlot {
    pub const fn new() -> Self {
        Self { pending: None }
    }

    pub fn try_issue(&mut self, kind: ReadKind, now_ms: u32) -> bool {
        match self.pending {
            Some(prev) if !prev.is_stale(now_ms) => false,
            _ => {
                self.pending = Some(ReadRequest::new(kind, now_ms));
                true
            }
        }
    }

    /// Take the request a completing frame answers. `None` means the frame is
    /// unsolicited: nothing was pending, or the pending request is long lost.
    pub fn take(&mut self, now_ms: u32) -> Option<ReadKind> {
        let prev = self.pending.take()?;
        if prev.is_stale(now_ms) {
            None
        } else {
            Some(prev.kind)
        }
    }
}

// ── Receive state machine ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxState {
    Idle,
    /// ACK header seen; the next byte is the status.
    AckStatus,
    /// Data header seen; the next byte is the payload length.
    DataLength,
    /// Accumulating payload bytes until the announced length is reached.
    DataPayload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Ack(u8),
    Data(Vec<u8, PAYLOAD_CAP>),
}

/// Incremental frame parser. Feed it one byte at a time together with a
/// wrapping millisecond timestamp; a `Some` return is a completed frame.
pub struct FrameParser {
    state: RxState,
    payload: Vec<u8, PAYLOAD_CAP>,
    frame_len: usize,
    frame_start_ms: u32,
}

impl FrameParser {
    pub const fn new() -> Self {
        Self {
            state: RxState::Idle,
            payload: Vec::new(),
            frame_len: 0,
            frame_start_ms: 0,
        }
    }

    pub fn reset(&mut self) {
        self.state = RxState::Idle;
        self.payload.clear();
    }

    pub fn push_byte(&mut self, byte: u8, now_ms: u32) -> Option<Frame> {
        // Failsafe for stuck frames: abandon the partial frame and match this
        // byte against Idle in the same call.
        if self.state != RxState::Idle
            && now_ms.wrapping_sub(self.frame_start_ms) > FRAME_MAX_TIME_MS
        {
            self.reset();
        }

        match self.state {
            RxState::Idle => {
                match byte {
                    ACK_HEADER => {
                        self.frame_start_ms = now_ms;
                        self.state = RxState::AckStatus;
                    }
                    DATA_HEADER => {
                        self.frame_start_ms = now_ms;
                        self.state = RxState::DataLength;
                    }
                    _ => {}
                }
                None
            }
            RxState::AckStatus => {
                self.state = RxState::Idle;
                Some(Frame::Ack(byte))
            }
            RxState::DataLength => {
                let len = byte as usize;
                if len == 0 || len > PAYLOAD_CAP {
                    // The header promises more than the buffer holds (or an
                    // empty frame the module never sends). Drop it.
                    self.reset();
                    return None;
                }
                self.frame_len = len;
                self.payload.clear();
                self.state = RxState::DataPayload;
                None
            }
            RxState::DataPayload => {
                // Cannot overflow: frame_len was checked against the capacity.
                let _ = self.payload.push(byte);
                if self.payload.len() == self.frame_len {
                    self.state = RxState::Idle;
                    return Some(Frame::Data(self.payload.clone()));
                }
                None
            }
        }
    }
}

// ── Payload decoding ──────────────────────────────────────────────────────────

/// Euler angles in tenths of a degree.
///
/// The raw register LSB is 1/16 degree (datasheet 3.6.5.4), so dividing the
/// int16 by 1.6 lands directly in decidegrees. Pitch is reversed to match the
/// host attitude convention.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EulerDecidegrees {
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
}

/// The four 2-bit confidence fields of the CALIB_STAT register.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CalibrationScores {
    pub mag: u8,
    pub acc: u8,
    pub gyr: u8,
    pub sys: u8,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bno055Reading {
    ChipId(u8),
    Euler(EulerDecidegrees),
    Calibration(CalibrationScores),
}

/// Interpret a completed data-frame payload for the request it answers.
pub fn decode_reading(kind: ReadKind, payload: &[u8]) -> Option<Bno055Reading> {
    match kind {
        ReadKind::ChipId => payload.first().map(|&id| Bno055Reading::ChipId(id)),
        ReadKind::EulerAngles => decode_euler(payload).map(Bno055Reading::Euler),
        ReadKind::CalibrationStatus => payload
            .first()
            .map(|&status| Bno055Reading::Calibration(decode_calibration(status))),
    }
}

/// A 6-byte read starting at EUL_YAW_LSB: yaw, roll, pitch as little-endian
/// int16 pairs, in that order.
pub fn decode_euler(payload: &[u8]) -> Option<EulerDecidegrees> {
    if payload.len() < EUL_READ_LEN as usize {
        return None;
    }
    let yaw = i16::from_le_bytes([payload[0], payload[1]]) as f32;
    let roll = i16::from_le_bytes([payload[2], payload[3]]) as f32;
    let pitch = i16::from_le_bytes([payload[4], payload[5]]) as f32;
    Some(EulerDecidegrees {
        roll: roll / 1.6,
        pitch: pitch / -1.6,
        yaw: yaw / 1.6,
    })
}

pub fn decode_calibration(status: u8) -> CalibrationScores {
    CalibrationScores {
        mag: status & 0x03,
        acc: (status >> 2) & 0x03,
        gyr: (status >> 4) & 0x03,
        sys: (status >> 6) & 0x03,
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum InitError {
    /// No complete identity frame arrived within the probe window.
    NoResponse,
    /// The module answered with something other than the BNO055 chip id.
    IdentMismatch(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum ProtocolError {
    /// Reserved operation with no implementation behind it yet.
    Unsupported,
}

// ── Calibration profile (extension point) ─────────────────────────────────────

/// Persisted calibration coefficients (offset and radius registers,
/// datasheet 3.6.4). Nothing reads or writes these yet.
#[derive(Debug, Clone, Copy, Default)]
pub struct CalibrationProfile {
    pub acc_offset: [i16; 3],
    pub mag_offset: [i16; 3],
    pub gyr_offset: [i16; 3],
    pub acc_radius: i16,
    pub mag_radius: i16,
}

/// Writing a stored profile back requires a switch to CONFIG mode and a burst
/// write of 22 registers; neither exists yet.
pub fn restore_calibration_profile(_profile: &CalibrationProfile) -> Result<(), ProtocolError> {
    Err(ProtocolError::Unsupported)
}

/// Reading the live coefficients out of the module is likewise reserved.
pub fn capture_calibration_profile() -> Result<CalibrationProfile, ProtocolError> {
    Err(ProtocolError::Unsupported)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(parser: &mut FrameParser, bytes: &[u8], now_ms: u32) -> Option<Frame> {
        let mut last = None;
        for &b in bytes {
            if let Some(frame) = parser.push_byte(b, now_ms) {
                last = Some(frame);
            }
        }
        last
    }

    #[test]
    fn test_ack_frame_completes_with_status() {
        let mut p = FrameParser::new();
        match feed(&mut p, &[0xEE, 0x07], 0) {
            Some(Frame::Ack(status)) => assert_eq!(status, 0x07),
            other => panic!("expected ack, got {:?}", other),
        }
    }

    #[test]
    fn test_idle_ignores_noise() {
        let mut p = FrameParser::new();
        for b in [0x00, 0x55, 0xAA, 0xFF, 0x1A] {
            assert!(p.push_byte(b, 0).is_none());
            assert_eq!(p.state, RxState::Idle);
        }
        // Still synchronizes on a real frame afterwards.
        assert_eq!(feed(&mut p, &[0xEE, 0x01], 0), Some(Frame::Ack(0x01)));
    }

    #[test]
    fn test_data_frame_requires_full_payload() {
        let mut p = FrameParser::new();
        assert!(feed(&mut p, &[0xBB, 3, 1, 2], 0).is_none());
        match p.push_byte(3, 0) {
            Some(Frame::Data(payload)) => assert_eq!(payload.as_slice(), &[1, 2, 3]),
            other => panic!("expected data, got {:?}", other),
        }
    }

    #[test]
    fn test_exactly_one_frame_per_sequence() {
        let mut p = FrameParser::new();
        let mut completions = 0;
        for &b in &[0xBB, 6, 0, 0, 0, 0, 0, 0] {
            if p.push_byte(b, 0).is_some() {
                completions += 1;
            }
        }
        assert_eq!(completions, 1);
    }

    #[test]
    fn test_oversize_length_is_rejected() {
        let mut p = FrameParser::new();
        assert!(p.push_byte(0xBB, 0).is_none());
        assert!(p.push_byte(PAYLOAD_CAP as u8 + 1, 0).is_none());
        // The frame was dropped and the parser is back in Idle.
        assert!(matches!(
            feed(&mut p, &[0xBB, 1, 0xA0], 0),
            Some(Frame::Data(_))
        ));
    }

    #[test]
    fn test_zero_length_is_rejected() {
        let mut p = FrameParser::new();
        assert!(p.push_byte(0xBB, 0).is_none());
        assert!(p.push_byte(0, 0).is_none());
        assert_eq!(p.state, RxState::Idle);
    }

    #[test]
    fn test_payload_never_exceeds_capacity() {
        // Deterministic byte soup: whatever arrives, the buffer never grows
        // past its capacity.
        let mut p = FrameParser::new();
        let mut x: u32 = 0x2545_F491;
        for i in 0..4096u32 {
            x ^= x << 13;
            x ^= x >> 17;
            x ^= x << 5;
            let _ = p.push_byte((x & 0xFF) as u8, i / 8);
            assert!(p.payload.len() <= PAYLOAD_CAP);
        }
    }

    #[test]
    fn test_stuck_frame_times_out() {
        let mut p = FrameParser::new();
        assert!(p.push_byte(0xBB, 0).is_none());
        assert!(p.push_byte(6, 5).is_none()); // still inside the 10 ms window
        // 11 ms after the first header byte the partial frame is abandoned;
        // this byte is matched against Idle and starts a new frame.
        assert!(p.push_byte(0xBB, 11).is_none());
        assert!(matches!(
            feed(&mut p, &[1, 0xA0], 11),
            Some(Frame::Data(_))
        ));
    }

    #[test]
    fn test_euler_decode_field_order_and_scale() {
        // yaw = 160 raw (10°), roll = -320 raw (-20°), pitch = 480 raw (30°)
        let mut payload = [0u8; 6];
        payload[0..2].copy_from_slice(&160i16.to_le_bytes());
        payload[2..4].copy_from_slice(&(-320i16).to_le_bytes());
        payload[4..6].copy_from_slice(&480i16.to_le_bytes());

        let e = decode_euler(&payload).unwrap();
        assert!((e.yaw - 100.0).abs() < 0.01); // decidegrees
        assert!((e.roll + 200.0).abs() < 0.01);
        assert!((e.pitch + 300.0).abs() < 0.01); // sign flipped
    }

    #[test]
    fn test_euler_decode_rejects_short_payload() {
        assert!(decode_euler(&[1, 2, 3, 4, 5]).is_none());
    }

    #[test]
    fn test_calibration_decode_unpacks_bitfields() {
        // sys=3, gyr=2, acc=1, mag=0
        let s = decode_calibration(0b1110_0100);
        assert_eq!(s.mag, 0);
        assert_eq!(s.acc, 1);
        assert_eq!(s.gyr, 2);
        assert_eq!(s.sys, 3);
    }

    #[test]
    fn test_calibration_reading_ignores_trailing_bytes() {
        // A 3-byte frame still decodes from payload byte 0 only.
        let mut p = FrameParser::new();
        let Some(Frame::Data(payload)) = feed(&mut p, &[0xBB, 3, 0b0101_0101, 0xDE, 0xAD], 0)
        else {
            panic!("frame did not complete");
        };
        match decode_reading(ReadKind::CalibrationStatus, &payload) {
            Some(Bno055Reading::Calibration(s)) => {
                assert_eq!((s.mag, s.acc, s.gyr, s.sys), (1, 1, 1, 1));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_identity_probe_scenarios() {
        let mut p = FrameParser::new();
        let Some(Frame::Data(payload)) = feed(&mut p, &[0xBB, 1, 0xA0], 0) else {
            panic!("frame did not complete");
        };
        assert_eq!(
            decode_reading(ReadKind::ChipId, &payload),
            Some(Bno055Reading::ChipId(CHIP_ID))
        );

        // A wrong identity still decodes; the caller rejects it.
        let Some(Frame::Data(payload)) = feed(&mut p, &[0xBB, 1, 0x00], 0) else {
            panic!("frame did not complete");
        };
        assert_eq!(
            decode_reading(ReadKind::ChipId, &payload),
            Some(Bno055Reading::ChipId(0x00))
        );
    }

    #[test]
    fn test_request_staleness() {
        let req = ReadRequest::new(ReadKind::EulerAngles, 1000);
        assert!(!req.is_stale(1000 + REQUEST_STALE_MS));
        assert!(req.is_stale(1000 + REQUEST_STALE_MS + 1));

        // Millisecond counter wraps; a request issued just before the wrap is
        // still fresh just after it.
        let req = ReadRequest::new(ReadKind::ChipId, u32::MAX - 5);
        assert!(!req.is_stale(10));
    }

    #[test]
    fn test_request_slot_allows_one_in_flight() {
        let mut slot = RequestSlot::new();
        assert!(slot.try_issue(ReadKind::EulerAngles, 0));
        // Second issue while the first is fresh is refused.
        assert!(!slot.try_issue(ReadKind::CalibrationStatus, 100));
        // The completing frame takes the original request.
        assert_eq!(slot.take(100), Some(ReadKind::EulerAngles));
        // The slot is free again.
        assert!(slot.try_issue(ReadKind::CalibrationStatus, 100));
    }

    #[test]
    fn test_request_slot_reclaims_lost_requests() {
        let mut slot = RequestSlot::new();
        assert!(slot.try_issue(ReadKind::EulerAngles, 0));
        // The reply never came; once stale the slot may be re-issued.
        let later = REQUEST_STALE_MS + 1;
        assert!(slot.try_issue(ReadKind::EulerAngles, later));
        assert_eq!(slot.take(later), Some(ReadKind::EulerAngles));

        // A frame completing against a lost request is unsolicited.
        assert!(slot.try_issue(ReadKind::CalibrationStatus, later));
        assert_eq!(slot.take(later + REQUEST_STALE_MS + 1), None);
        // And taking it, matched or not, freed the slot.
        assert!(slot.try_issue(ReadKind::ChipId, later + REQUEST_STALE_MS + 1));
    }

    #[test]
    fn test_command_encoding() {
        assert_eq!(
            encode_register_read(REG_EUL_YAW_LSB, EUL_READ_LEN),
            [0xAA, 0x01, 0x1A, 6]
        );
        assert_eq!(
            encode_register_write(REG_OPR_MODE, OPR_MODE_NDOF),
            [0xAA, 0x00, 0x3D, 1, 0x0C]
        );
    }

    #[test]
    fn test_calibration_profile_transfer_is_reserved() {
        let profile = CalibrationProfile::default();
        assert_eq!(
            restore_calibration_profile(&profile),
            Err(ProtocolError::Unsupported)
        );
        assert!(capture_calibration_profile().is_err());
    }
}
