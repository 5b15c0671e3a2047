//! Framed SMPP v3.4 codec for use with `tokio_util::codec::Framed`.
//!
//! Wire layout of every PDU:
//! `command_length(4) | command_id(4) | command_status(4) | sequence_number(4) | body`,
//! all integers big-endian. C-octet strings are null-terminated,
//! `short_message` is length-prefixed.

use bytes::{BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use super::command::{Command, Status};
use super::pdu::{BindFields, BindRespFields, DeliverSm, DeliverSmResp, Pdu, SubmitSm, SubmitSmResp};

/// Header size common to all PDUs.
pub const HEADER_LEN: usize = 16;

/// Default cap on `command_length`; larger frames are malformed.
pub const DEFAULT_MAX_PDU_LEN: u32 = 64 * 1024;

/// Longest `short_message` a single PDU can carry (`sm_length` is one octet,
/// 255 is reserved).
pub const MAX_SHORT_MESSAGE_LEN: usize = 254;

/// Decoded PDU header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub command: Command,
    pub status: Status,
    pub sequence: u32,
}

impl Header {
    pub fn new(command: Command, sequence: u32) -> Self {
        Self {
            command,
            status: Status::Ok,
            sequence,
        }
    }

    pub fn with_status(command: Command, sequence: u32, status: Status) -> Self {
        Self {
            command,
            status,
            sequence,
        }
    }
}

/// One decoded frame: header plus body.
#[derive(Debug, Clone, PartialEq)]
pub struct PduFrame {
    pub header: Header,
    pub pdu: Pdu,
}

impl PduFrame {
    pub fn sequence(&self) -> u32 {
        self.header.sequence
    }

    pub fn command(&self) -> Command {
        self.header.command
    }

    pub fn status(&self) -> Status {
        self.header.status
    }

    pub fn is_response(&self) -> bool {
        self.header.command.is_response()
    }
}

/// Codec errors. Any decode error means the stream is unrecoverable and the
/// connection should be closed.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed PDU: {0}")]
    Malformed(String),

    #[error("PDU length {len} exceeds cap {cap}")]
    TooLarge { len: u32, cap: u32 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// SMPP framing codec.
#[derive(Debug, Clone)]
pub struct SmppCodec {
    max_pdu_len: u32,
}

impl SmppCodec {
    pub fn new() -> Self {
        Self {
            max_pdu_len: DEFAULT_MAX_PDU_LEN,
        }
    }

    pub fn with_max_pdu_len(max_pdu_len: u32) -> Self {
        Self { max_pdu_len }
    }
}

impl Default for SmppCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for SmppCodec {
    type Item = PduFrame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<PduFrame>, CodecError> {
        if src.len() < 4 {
            return Ok(None);
        }

        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]);
        if length < HEADER_LEN as u32 {
            return Err(CodecError::Malformed(format!(
                "command_length {length} below header size"
            )));
        }
        if length > self.max_pdu_len {
            return Err(CodecError::TooLarge {
                len: length,
                cap: self.max_pdu_len,
            });
        }

        let length = length as usize;
        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        let frame = src.split_to(length);
        decode_frame(&frame)
    }
}

impl Encoder<(Header, Pdu)> for SmppCodec {
    type Error = CodecError;

    fn encode(&mut self, item: (Header, Pdu), dst: &mut BytesMut) -> Result<(), CodecError> {
        let (header, pdu) = item;
        let start = dst.len();

        dst.put_u32(0); // patched below
        dst.put_u32(header.command.id());
        dst.put_u32(header.status.code());
        dst.put_u32(header.sequence);

        encode_body(&pdu, dst)?;

        let length = (dst.len() - start) as u32;
        dst[start..start + 4].copy_from_slice(&length.to_be_bytes());
        Ok(())
    }
}

fn decode_frame(frame: &[u8]) -> Result<Option<PduFrame>, CodecError> {
    let command_id = u32::from_be_bytes([frame[4], frame[5], frame[6], frame[7]]);
    let status = u32::from_be_bytes([frame[8], frame[9], frame[10], frame[11]]);
    let sequence = u32::from_be_bytes([frame[12], frame[13], frame[14], frame[15]]);

    let command = Command::from_id(command_id);
    let header = Header {
        command,
        status: Status::from_code(status),
        sequence,
    };

    let mut body = BodyReader::new(&frame[HEADER_LEN..]);

    let pdu = match command {
        Command::BindReceiver => Pdu::BindReceiver(decode_bind(&mut body)?),
        Command::BindTransmitter => Pdu::BindTransmitter(decode_bind(&mut body)?),
        Command::BindTransceiver => Pdu::BindTransceiver(decode_bind(&mut body)?),
        Command::BindReceiverResp => Pdu::BindReceiverResp(decode_bind_resp(&mut body)?),
        Command::BindTransmitterResp => Pdu::BindTransmitterResp(decode_bind_resp(&mut body)?),
        Command::BindTransceiverResp => Pdu::BindTransceiverResp(decode_bind_resp(&mut body)?),
        Command::Unbind => Pdu::Unbind,
        Command::UnbindResp => Pdu::UnbindResp,
        Command::SubmitSm => Pdu::SubmitSm(decode_submit_sm(&mut body)?),
        Command::SubmitSmResp => Pdu::SubmitSmResp(SubmitSmResp {
            message_id: body.c_octet_or_empty()?,
        }),
        Command::DeliverSm => Pdu::DeliverSm(decode_deliver_sm(&mut body)?),
        Command::DeliverSmResp => Pdu::DeliverSmResp(DeliverSmResp {
            message_id: body.c_octet_or_empty()?,
        }),
        Command::EnquireLink => Pdu::EnquireLink,
        Command::EnquireLinkResp => Pdu::EnquireLinkResp,
        Command::GenericNack => Pdu::GenericNack,
        Command::Unknown(_) => Pdu::Unknown,
    };

    Ok(Some(PduFrame { header, pdu }))
}

fn decode_bind(body: &mut BodyReader<'_>) -> Result<BindFields, CodecError> {
    Ok(BindFields {
        system_id: body.c_octet()?,
        password: body.c_octet()?,
        system_type: body.c_octet()?,
        interface_version: body.u8()?,
        addr_ton: body.u8()?,
        addr_npi: body.u8()?,
        address_range: body.c_octet()?,
    })
}

fn decode_bind_resp(body: &mut BodyReader<'_>) -> Result<BindRespFields, CodecError> {
    Ok(BindRespFields {
        system_id: body.c_octet_or_empty()?,
    })
}

fn decode_submit_sm(body: &mut BodyReader<'_>) -> Result<SubmitSm, CodecError> {
    Ok(SubmitSm {
        service_type: body.c_octet()?,
        source_addr_ton: body.u8()?,
        source_addr_npi: body.u8()?,
        source_addr: body.c_octet()?,
        dest_addr_ton: body.u8()?,
        dest_addr_npi: body.u8()?,
        dest_addr: body.c_octet()?,
        esm_class: body.u8()?,
        protocol_id: body.u8()?,
        priority_flag: body.u8()?,
        schedule_delivery_time: body.c_octet()?,
        validity_period: body.c_octet()?,
        registered_delivery: body.u8()?,
        replace_if_present_flag: body.u8()?,
        data_coding: body.u8()?,
        sm_default_msg_id: body.u8()?,
        short_message: body.short_message()?,
    })
}

fn decode_deliver_sm(body: &mut BodyReader<'_>) -> Result<DeliverSm, CodecError> {
    Ok(DeliverSm {
        service_type: body.c_octet()?,
        source_addr_ton: body.u8()?,
        source_addr_npi: body.u8()?,
        source_addr: body.c_octet()?,
        dest_addr_ton: body.u8()?,
        dest_addr_npi: body.u8()?,
        dest_addr: body.c_octet()?,
        esm_class: body.u8()?,
        protocol_id: body.u8()?,
        priority_flag: body.u8()?,
        schedule_delivery_time: body.c_octet()?,
        validity_period: body.c_octet()?,
        registered_delivery: body.u8()?,
        replace_if_present_flag: body.u8()?,
        data_coding: body.u8()?,
        sm_default_msg_id: body.u8()?,
        short_message: body.short_message()?,
    })
}

fn encode_body(pdu: &Pdu, dst: &mut BytesMut) -> Result<(), CodecError> {
    match pdu {
        Pdu::BindReceiver(b) | Pdu::BindTransmitter(b) | Pdu::BindTransceiver(b) => {
            put_c_octet(dst, &b.system_id);
            put_c_octet(dst, &b.password);
            put_c_octet(dst, &b.system_type);
            dst.put_u8(b.interface_version);
            dst.put_u8(b.addr_ton);
            dst.put_u8(b.addr_npi);
            put_c_octet(dst, &b.address_range);
        }
        Pdu::BindReceiverResp(r) | Pdu::BindTransmitterResp(r) | Pdu::BindTransceiverResp(r) => {
            put_c_octet(dst, &r.system_id);
        }
        Pdu::Unbind
        | Pdu::UnbindResp
        | Pdu::EnquireLink
        | Pdu::EnquireLinkResp
        | Pdu::GenericNack => {}
        Pdu::SubmitSm(sm) => {
            encode_sm_body(
                dst,
                &sm.service_type,
                sm.source_addr_ton,
                sm.source_addr_npi,
                &sm.source_addr,
                sm.dest_addr_ton,
                sm.dest_addr_npi,
                &sm.dest_addr,
                sm.esm_class,
                sm.protocol_id,
                sm.priority_flag,
                &sm.schedule_delivery_time,
                &sm.validity_period,
                sm.registered_delivery,
                sm.replace_if_present_flag,
                sm.data_coding,
                sm.sm_default_msg_id,
                &sm.short_message,
            )?;
        }
        Pdu::DeliverSm(sm) => {
            encode_sm_body(
                dst,
                &sm.service_type,
                sm.source_addr_ton,
                sm.source_addr_npi,
                &sm.source_addr,
                sm.dest_addr_ton,
                sm.dest_addr_npi,
                &sm.dest_addr,
                sm.esm_class,
                sm.protocol_id,
                sm.priority_flag,
                &sm.schedule_delivery_time,
                &sm.validity_period,
                sm.registered_delivery,
                sm.replace_if_present_flag,
                sm.data_coding,
                sm.sm_default_msg_id,
                &sm.short_message,
            )?;
        }
        Pdu::SubmitSmResp(r) => put_c_octet(dst, &r.message_id),
        Pdu::DeliverSmResp(r) => put_c_octet(dst, &r.message_id),
        Pdu::Unknown => {
            return Err(CodecError::Malformed("cannot encode unknown PDU".into()));
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn encode_sm_body(
    dst: &mut BytesMut,
    service_type: &str,
    source_addr_ton: u8,
    source_addr_npi: u8,
    source_addr: &str,
    dest_addr_ton: u8,
    dest_addr_npi: u8,
    dest_addr: &str,
    esm_class: u8,
    protocol_id: u8,
    priority_flag: u8,
    schedule_delivery_time: &str,
    validity_period: &str,
    registered_delivery: u8,
    replace_if_present_flag: u8,
    data_coding: u8,
    sm_default_msg_id: u8,
    short_message: &[u8],
) -> Result<(), CodecError> {
    if short_message.len() > MAX_SHORT_MESSAGE_LEN {
        return Err(CodecError::Malformed(format!(
            "short_message length {} exceeds {MAX_SHORT_MESSAGE_LEN}",
            short_message.len()
        )));
    }

    put_c_octet(dst, service_type);
    dst.put_u8(source_addr_ton);
    dst.put_u8(source_addr_npi);
    put_c_octet(dst, source_addr);
    dst.put_u8(dest_addr_ton);
    dst.put_u8(dest_addr_npi);
    put_c_octet(dst, dest_addr);
    dst.put_u8(esm_class);
    dst.put_u8(protocol_id);
    dst.put_u8(priority_flag);
    put_c_octet(dst, schedule_delivery_time);
    put_c_octet(dst, validity_period);
    dst.put_u8(registered_delivery);
    dst.put_u8(replace_if_present_flag);
    dst.put_u8(data_coding);
    dst.put_u8(sm_default_msg_id);
    dst.put_u8(short_message.len() as u8);
    dst.put_slice(short_message);
    Ok(())
}

fn put_c_octet(dst: &mut BytesMut, value: &str) {
    dst.put_slice(value.as_bytes());
    dst.put_u8(0);
}

/// Sequential reader over a PDU body.
struct BodyReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BodyReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        if self.remaining() < 1 {
            return Err(CodecError::Malformed("body truncated".into()));
        }
        let v = self.buf[self.pos];
        self.pos += 1;
        Ok(v)
    }

    fn c_octet(&mut self) -> Result<String, CodecError> {
        let rest = &self.buf[self.pos..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| CodecError::Malformed("unterminated c-octet string".into()))?;
        self.pos += nul + 1;
        Ok(String::from_utf8_lossy(&rest[..nul]).into_owned())
    }

    /// Like [`c_octet`] but tolerates a body that ends before the field,
    /// which rejected `*_resp` PDUs legitimately omit.
    fn c_octet_or_empty(&mut self) -> Result<String, CodecError> {
        if self.remaining() == 0 {
            return Ok(String::new());
        }
        self.c_octet()
    }

    fn short_message(&mut self) -> Result<Vec<u8>, CodecError> {
        let len = self.u8()? as usize;
        if self.remaining() < len {
            return Err(CodecError::Malformed(format!(
                "sm_length {len} exceeds remaining body {}",
                self.remaining()
            )));
        }
        let bytes = self.buf[self.pos..self.pos + len].to_vec();
        self.pos += len;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(header: Header, pdu: Pdu) -> BytesMut {
        let mut codec = SmppCodec::new();
        let mut buf = BytesMut::new();
        codec.encode((header, pdu), &mut buf).unwrap();
        buf
    }

    fn round_trip(header: Header, pdu: Pdu) {
        let mut buf = encode(header.clone(), pdu.clone());
        let wire = buf.clone();

        let mut codec = SmppCodec::new();
        let frame = codec.decode(&mut buf).unwrap().expect("complete frame");
        assert_eq!(frame.header, header);
        assert_eq!(frame.pdu, pdu);

        // re-encoding the decoded frame is bit-identical
        let reencoded = encode(frame.header, frame.pdu);
        assert_eq!(reencoded, wire);
    }

    fn sample_submit() -> SubmitSm {
        SubmitSm {
            source_addr: "49170111222".into(),
            dest_addr: "49170333444".into(),
            registered_delivery: 1,
            short_message: b"hello world".to_vec(),
            ..Default::default()
        }
    }

    #[test]
    fn round_trip_bind_transceiver() {
        let bind = BindFields {
            system_id: "bridge".into(),
            password: "secret".into(),
            system_type: "SMPP".into(),
            interface_version: 0x34,
            addr_ton: 0,
            addr_npi: 0,
            address_range: String::new(),
        };
        round_trip(
            Header::new(Command::BindTransceiver, 1),
            Pdu::BindTransceiver(bind),
        );
    }

    #[test]
    fn round_trip_bind_resp() {
        round_trip(
            Header::new(Command::BindTransceiverResp, 1),
            Pdu::BindTransceiverResp(BindRespFields {
                system_id: "SMPP-GATEWAY".into(),
            }),
        );
    }

    #[test]
    fn round_trip_submit_sm() {
        round_trip(Header::new(Command::SubmitSm, 42), Pdu::SubmitSm(sample_submit()));
    }

    #[test]
    fn round_trip_submit_sm_resp() {
        round_trip(
            Header::new(Command::SubmitSmResp, 42),
            Pdu::SubmitSmResp(SubmitSmResp {
                message_id: "A1".into(),
            }),
        );
    }

    #[test]
    fn round_trip_deliver_sm() {
        let deliver = DeliverSm {
            source_addr: "500".into(),
            dest_addr: "600".into(),
            esm_class: 0x04,
            short_message: b"id:A1 stat:DELIVRD".to_vec(),
            ..Default::default()
        };
        assert!(deliver.is_delivery_receipt());
        round_trip(Header::new(Command::DeliverSm, 7), Pdu::DeliverSm(deliver));
    }

    #[test]
    fn round_trip_bodyless_pdus() {
        round_trip(Header::new(Command::EnquireLink, 9), Pdu::EnquireLink);
        round_trip(Header::new(Command::EnquireLinkResp, 9), Pdu::EnquireLinkResp);
        round_trip(Header::new(Command::Unbind, 10), Pdu::Unbind);
        round_trip(Header::new(Command::UnbindResp, 10), Pdu::UnbindResp);
        round_trip(
            Header::with_status(Command::GenericNack, 11, Status::InvalidCommandId),
            Pdu::GenericNack,
        );
    }

    #[test]
    fn partial_frame_needs_more_data() {
        let buf = encode(Header::new(Command::SubmitSm, 1), Pdu::SubmitSm(sample_submit()));
        let mut partial = BytesMut::from(&buf[..buf.len() - 3]);

        let mut codec = SmppCodec::new();
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.extend_from_slice(&buf[buf.len() - 3..]);
        assert!(codec.decode(&mut partial).unwrap().is_some());
    }

    #[test]
    fn two_frames_in_one_buffer() {
        let mut buf = encode(Header::new(Command::EnquireLink, 1), Pdu::EnquireLink);
        buf.extend_from_slice(&encode(Header::new(Command::EnquireLink, 2), Pdu::EnquireLink));

        let mut codec = SmppCodec::new();
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().sequence(), 1);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().sequence(), 2);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn command_length_below_header_is_malformed() {
        let mut buf = BytesMut::new();
        buf.put_u32(15);
        buf.put_u32(Command::EnquireLink.id());
        buf.put_u32(0);
        buf.put_u32(1);

        let mut codec = SmppCodec::new();
        assert!(matches!(
            codec.decode(&mut buf),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn command_length_above_cap_is_malformed() {
        let mut buf = BytesMut::new();
        buf.put_u32(DEFAULT_MAX_PDU_LEN + 1);
        buf.put_u32(Command::SubmitSm.id());
        buf.put_u32(0);
        buf.put_u32(1);

        let mut codec = SmppCodec::new();
        assert!(matches!(
            codec.decode(&mut buf),
            Err(CodecError::TooLarge { .. })
        ));
    }

    #[test]
    fn unterminated_c_octet_is_malformed() {
        // bind_transceiver whose body is "abc" with no null terminator
        let mut buf = BytesMut::new();
        buf.put_u32(16 + 3);
        buf.put_u32(Command::BindTransceiver.id());
        buf.put_u32(0);
        buf.put_u32(1);
        buf.put_slice(b"abc");

        let mut codec = SmppCodec::new();
        assert!(matches!(
            codec.decode(&mut buf),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn unknown_command_id_decodes_as_unknown() {
        let mut buf = BytesMut::new();
        buf.put_u32(16);
        buf.put_u32(0x0000_0103); // query_sm, not modelled
        buf.put_u32(0);
        buf.put_u32(77);

        let mut codec = SmppCodec::new();
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.pdu, Pdu::Unknown);
        assert_eq!(frame.command(), Command::Unknown(0x0103));
        assert_eq!(frame.sequence(), 77);
    }

    #[test]
    fn bind_resp_without_body_decodes_empty_system_id() {
        // rejected binds may omit the body entirely
        let mut buf = BytesMut::new();
        buf.put_u32(16);
        buf.put_u32(Command::BindTransceiverResp.id());
        buf.put_u32(Status::BindFailed.code());
        buf.put_u32(3);

        let mut codec = SmppCodec::new();
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.status(), Status::BindFailed);
        assert_eq!(
            frame.pdu,
            Pdu::BindTransceiverResp(BindRespFields::default())
        );
    }

    #[test]
    fn oversized_short_message_refuses_to_encode() {
        let sm = SubmitSm {
            short_message: vec![0u8; MAX_SHORT_MESSAGE_LEN + 1],
            ..Default::default()
        };
        let mut codec = SmppCodec::new();
        let mut buf = BytesMut::new();
        assert!(codec
            .encode((Header::new(Command::SubmitSm, 1), Pdu::SubmitSm(sm)), &mut buf)
            .is_err());
    }
}
