//! PDU bodies for the commands the bridge speaks.

use super::command::Command;

/// Body shared by the three `bind_*` requests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindFields {
    pub system_id: String,
    pub password: String,
    pub system_type: String,
    pub interface_version: u8,
    pub addr_ton: u8,
    pub addr_npi: u8,
    pub address_range: String,
}

/// Body shared by the three `bind_*_resp` replies.
///
/// On a rejected bind the body may be absent on the wire; that decodes as
/// an empty `system_id`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindRespFields {
    pub system_id: String,
}

/// `submit_sm` request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitSm {
    pub service_type: String,
    pub source_addr_ton: u8,
    pub source_addr_npi: u8,
    pub source_addr: String,
    pub dest_addr_ton: u8,
    pub dest_addr_npi: u8,
    pub dest_addr: String,
    pub esm_class: u8,
    pub protocol_id: u8,
    pub priority_flag: u8,
    pub schedule_delivery_time: String,
    pub validity_period: String,
    pub registered_delivery: u8,
    pub replace_if_present_flag: u8,
    pub data_coding: u8,
    pub sm_default_msg_id: u8,
    pub short_message: Vec<u8>,
}

impl Default for SubmitSm {
    fn default() -> Self {
        Self {
            service_type: String::new(),
            source_addr_ton: 1,
            source_addr_npi: 1,
            source_addr: String::new(),
            dest_addr_ton: 1,
            dest_addr_npi: 1,
            dest_addr: String::new(),
            esm_class: 0,
            protocol_id: 0,
            priority_flag: 0,
            schedule_delivery_time: String::new(),
            validity_period: String::new(),
            registered_delivery: 0,
            replace_if_present_flag: 0,
            data_coding: 0,
            sm_default_msg_id: 0,
            short_message: Vec::new(),
        }
    }
}

/// `submit_sm_resp` body. Empty on error responses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitSmResp {
    pub message_id: String,
}

/// `deliver_sm` request body. Same layout as `submit_sm`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliverSm {
    pub service_type: String,
    pub source_addr_ton: u8,
    pub source_addr_npi: u8,
    pub source_addr: String,
    pub dest_addr_ton: u8,
    pub dest_addr_npi: u8,
    pub dest_addr: String,
    pub esm_class: u8,
    pub protocol_id: u8,
    pub priority_flag: u8,
    pub schedule_delivery_time: String,
    pub validity_period: String,
    pub registered_delivery: u8,
    pub replace_if_present_flag: u8,
    pub data_coding: u8,
    pub sm_default_msg_id: u8,
    pub short_message: Vec<u8>,
}

impl DeliverSm {
    /// Bit 2 of `esm_class` marks an SMSC delivery receipt.
    pub fn is_delivery_receipt(&self) -> bool {
        self.esm_class & 0x04 != 0
    }
}

/// `deliver_sm_resp` body; `message_id` is unused in v3.4 and stays empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliverSmResp {
    pub message_id: String,
}

/// A decoded PDU body.
#[derive(Debug, Clone, PartialEq)]
pub enum Pdu {
    BindReceiver(BindFields),
    BindReceiverResp(BindRespFields),
    BindTransmitter(BindFields),
    BindTransmitterResp(BindRespFields),
    BindTransceiver(BindFields),
    BindTransceiverResp(BindRespFields),
    Unbind,
    UnbindResp,
    SubmitSm(SubmitSm),
    SubmitSmResp(SubmitSmResp),
    DeliverSm(DeliverSm),
    DeliverSmResp(DeliverSmResp),
    EnquireLink,
    EnquireLinkResp,
    GenericNack,
    /// A command id we do not model; sessions answer `generic_nack`.
    Unknown,
}

impl Pdu {
    /// The command this body belongs to. [`Pdu::Unknown`] carries no id of
    /// its own; the frame header keeps the original value.
    pub fn command(&self) -> Option<Command> {
        Some(match self {
            Pdu::BindReceiver(_) => Command::BindReceiver,
            Pdu::BindReceiverResp(_) => Command::BindReceiverResp,
            Pdu::BindTransmitter(_) => Command::BindTransmitter,
            Pdu::BindTransmitterResp(_) => Command::BindTransmitterResp,
            Pdu::BindTransceiver(_) => Command::BindTransceiver,
            Pdu::BindTransceiverResp(_) => Command::BindTransceiverResp,
            Pdu::Unbind => Command::Unbind,
            Pdu::UnbindResp => Command::UnbindResp,
            Pdu::SubmitSm(_) => Command::SubmitSm,
            Pdu::SubmitSmResp(_) => Command::SubmitSmResp,
            Pdu::DeliverSm(_) => Command::DeliverSm,
            Pdu::DeliverSmResp(_) => Command::DeliverSmResp,
            Pdu::EnquireLink => Command::EnquireLink,
            Pdu::EnquireLinkResp => Command::EnquireLinkResp,
            Pdu::GenericNack => Command::GenericNack,
            Pdu::Unknown => return None,
        })
    }
}
