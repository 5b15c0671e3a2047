//! SMPP v3.4 protocol support.
//!
//! Split between the wire codec ([`codec`]) and the PDU domain model
//! ([`pdu`]): the codec owns framing and field layout, the PDU types stay
//! plain data that sessions can construct and match on.

pub mod codec;
pub mod command;
pub mod pdu;

pub use codec::{
    CodecError, Header, PduFrame, SmppCodec, DEFAULT_MAX_PDU_LEN, HEADER_LEN,
    MAX_SHORT_MESSAGE_LEN,
};
pub use command::{Command, Status};
pub use pdu::{BindFields, BindRespFields, DeliverSm, DeliverSmResp, Pdu, SubmitSm, SubmitSmResp};
