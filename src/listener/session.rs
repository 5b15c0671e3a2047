//! SMPP session state machine for accepted ESME connections.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, trace, warn};

use crate::bootstrap::ShutdownState;
use crate::config::AuthCredential;
use crate::http::{InboundSms, SmscClient};
use crate::proto::{
    BindFields, BindRespFields, CodecError, Command, Header, Pdu, PduFrame, SmppCodec, Status,
    SubmitSm, SubmitSmResp,
};

use super::connection::{Connection, ConnectionState};

/// Session error types.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("authentication failed for system_id {0}")]
    AuthFailed(String),

    #[error("connection closed")]
    Closed,
}

/// Serves one accepted ESME connection until unbind, close or auth failure.
pub struct EsmeSession {
    connection: Arc<Connection>,
    credentials: Arc<Vec<AuthCredential>>,
    egress: SmscClient,
    shutdown_rx: watch::Receiver<ShutdownState>,
}

impl EsmeSession {
    pub fn new(
        connection: Arc<Connection>,
        credentials: Arc<Vec<AuthCredential>>,
        egress: SmscClient,
        shutdown_rx: watch::Receiver<ShutdownState>,
    ) -> Self {
        Self {
            connection,
            credentials,
            egress,
            shutdown_rx,
        }
    }

    /// Run the session until completion.
    pub async fn run(mut self, stream: TcpStream) -> Result<(), SessionError> {
        let mut framed = Framed::new(stream, SmppCodec::new());

        let result = self.run_loop(&mut framed).await;

        self.connection.set_state(ConnectionState::Closed).await;
        result
    }

    async fn run_loop(
        &mut self,
        framed: &mut Framed<TcpStream, SmppCodec>,
    ) -> Result<(), SessionError> {
        loop {
            tokio::select! {
                biased;

                changed = self.shutdown_rx.changed() => {
                    if changed.is_err()
                        || *self.shutdown_rx.borrow() == ShutdownState::Stopping
                    {
                        debug!(id = %self.connection.id(), "session closing on shutdown");
                        return Ok(());
                    }
                }

                frame = framed.next() => {
                    match frame {
                        Some(Ok(frame)) => {
                            if !self.handle_pdu(framed, frame).await? {
                                return Ok(());
                            }
                        }
                        Some(Err(e)) => {
                            error!(id = %self.connection.id(), error = %e, "decode error");
                            return Err(e.into());
                        }
                        None => {
                            debug!(id = %self.connection.id(), "connection closed by client");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    /// Handle one PDU; returns false when the session should end.
    async fn handle_pdu(
        &mut self,
        framed: &mut Framed<TcpStream, SmppCodec>,
        frame: PduFrame,
    ) -> Result<bool, SessionError> {
        let state = self.connection.state().await;
        let PduFrame { header, pdu } = frame;

        match pdu {
            Pdu::BindTransmitter(bind) => {
                if state != ConnectionState::Unbound {
                    self.send_nack(framed, header.sequence, Status::InvalidBindStatus)
                        .await?;
                    return Ok(true);
                }
                self.handle_bind(
                    framed,
                    header,
                    bind,
                    Command::BindTransmitterResp,
                    ConnectionState::BoundTx,
                )
                .await
            }

            Pdu::BindReceiver(bind) => {
                if state != ConnectionState::Unbound {
                    self.send_nack(framed, header.sequence, Status::InvalidBindStatus)
                        .await?;
                    return Ok(true);
                }
                self.handle_bind(
                    framed,
                    header,
                    bind,
                    Command::BindReceiverResp,
                    ConnectionState::BoundRx,
                )
                .await
            }

            Pdu::BindTransceiver(bind) => {
                if state != ConnectionState::Unbound {
                    self.send_nack(framed, header.sequence, Status::InvalidBindStatus)
                        .await?;
                    return Ok(true);
                }
                self.handle_bind(
                    framed,
                    header,
                    bind,
                    Command::BindTransceiverResp,
                    ConnectionState::BoundTrx,
                )
                .await
            }

            Pdu::Unbind => {
                if !state.is_bound() {
                    self.send_nack(framed, header.sequence, Status::InvalidBindStatus)
                        .await?;
                    return Ok(true);
                }
                info!(id = %self.connection.id(), "unbind request");
                framed
                    .send((Header::new(Command::UnbindResp, header.sequence), Pdu::UnbindResp))
                    .await?;
                Ok(false)
            }

            Pdu::EnquireLink => {
                trace!(id = %self.connection.id(), "enquire_link");
                framed
                    .send((
                        Header::new(Command::EnquireLinkResp, header.sequence),
                        Pdu::EnquireLinkResp,
                    ))
                    .await?;
                Ok(true)
            }

            Pdu::SubmitSm(submit) => {
                if !state.can_send() {
                    self.send_nack(framed, header.sequence, Status::InvalidBindStatus)
                        .await?;
                    return Ok(true);
                }
                self.handle_submit_sm(framed, header, submit).await?;
                Ok(true)
            }

            Pdu::DeliverSmResp(_) | Pdu::EnquireLinkResp | Pdu::GenericNack => {
                // nothing outstanding towards ESMEs
                warn!(id = %self.connection.id(), command = %header.command, "ignoring");
                Ok(true)
            }

            Pdu::Unknown => {
                warn!(
                    id = %self.connection.id(),
                    command = %header.command,
                    "unknown command, sending generic_nack"
                );
                self.send_nack(framed, header.sequence, Status::InvalidCommandId)
                    .await?;
                Ok(true)
            }

            other => {
                warn!(
                    id = %self.connection.id(),
                    command = %header.command,
                    pdu = ?other.command(),
                    "unsupported command"
                );
                self.send_nack(framed, header.sequence, Status::InvalidCommandId)
                    .await?;
                Ok(true)
            }
        }
    }

    /// Authenticate and answer a bind; closes the session on bad credentials.
    async fn handle_bind(
        &mut self,
        framed: &mut Framed<TcpStream, SmppCodec>,
        header: Header,
        bind: BindFields,
        resp_command: Command,
        bound_state: ConnectionState,
    ) -> Result<bool, SessionError> {
        info!(
            id = %self.connection.id(),
            system_id = %bind.system_id,
            command = %header.command,
            "bind request"
        );

        let authorized = self
            .credentials
            .iter()
            .any(|cred| cred.system_id == bind.system_id && cred.password == bind.password);

        if !authorized {
            warn!(
                id = %self.connection.id(),
                system_id = %bind.system_id,
                "bind rejected"
            );
            framed
                .send((
                    Header::with_status(resp_command, header.sequence, Status::BindFailed),
                    bind_resp_pdu(resp_command, BindRespFields::default()),
                ))
                .await?;
            return Err(SessionError::AuthFailed(bind.system_id));
        }

        self.connection.set_system_id(bind.system_id.clone()).await;
        self.connection.set_state(bound_state).await;

        framed
            .send((
                Header::new(resp_command, header.sequence),
                bind_resp_pdu(
                    resp_command,
                    BindRespFields {
                        system_id: "SMPP-GATEWAY".to_string(),
                    },
                ),
            ))
            .await?;

        info!(
            id = %self.connection.id(),
            system_id = %bind.system_id,
            state = %bound_state,
            "bound"
        );

        Ok(true)
    }

    /// Forward a submit_sm to the SMSC and mirror the outcome to the client.
    async fn handle_submit_sm(
        &mut self,
        framed: &mut Framed<TcpStream, SmppCodec>,
        header: Header,
        submit: SubmitSm,
    ) -> Result<(), SessionError> {
        debug!(
            id = %self.connection.id(),
            source = %submit.source_addr,
            dest = %submit.dest_addr,
            "submit_sm request"
        );

        let sms = InboundSms::from_submit(&submit);

        match self.egress.forward(&sms).await {
            Ok(()) => {
                let message_id = format!("msg-{}", unix_millis());
                framed
                    .send((
                        Header::new(Command::SubmitSmResp, header.sequence),
                        Pdu::SubmitSmResp(SubmitSmResp {
                            message_id: message_id.clone(),
                        }),
                    ))
                    .await?;
                debug!(id = %self.connection.id(), message_id = %message_id, "submit_sm accepted");
            }
            Err(e) => {
                warn!(id = %self.connection.id(), error = %e, "egress failed for submit_sm");
                framed
                    .send((
                        Header::with_status(
                            Command::SubmitSmResp,
                            header.sequence,
                            Status::SystemError,
                        ),
                        Pdu::SubmitSmResp(SubmitSmResp::default()),
                    ))
                    .await?;
            }
        }

        Ok(())
    }

    async fn send_nack(
        &mut self,
        framed: &mut Framed<TcpStream, SmppCodec>,
        sequence: u32,
        status: Status,
    ) -> Result<(), SessionError> {
        framed
            .send((
                Header::with_status(Command::GenericNack, sequence, status),
                Pdu::GenericNack,
            ))
            .await?;
        Ok(())
    }
}

fn bind_resp_pdu(command: Command, fields: BindRespFields) -> Pdu {
    match command {
        Command::BindTransmitterResp => Pdu::BindTransmitterResp(fields),
        Command::BindReceiverResp => Pdu::BindReceiverResp(fields),
        _ => Pdu::BindTransceiverResp(fields),
    }
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}
