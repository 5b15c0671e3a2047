//! Client session to one upstream SMPP peer.
//!
//! Each configured peer gets one actor task that owns the TCP socket for the
//! whole process lifetime and drives connect → bind → bound → reconnect.
//! Submissions arrive over a command channel and are correlated with
//! response PDUs by sequence number; the current state is published on a
//! watch channel for the pool and the router.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, trace, warn};

use crate::bootstrap::{Shutdown, ShutdownState};
use crate::config::PeerConfig;
use crate::http::{InboundSms, SmscClient};
use crate::proto::{
    BindFields, CodecError, Command, DeliverSm, DeliverSmResp, Header, Pdu, PduFrame, SmppCodec,
    Status, SubmitSm,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const PENDING_SWEEP_INTERVAL: Duration = Duration::from_secs(1);
const COMMAND_QUEUE: usize = 64;
const DELIVER_QUEUE: usize = 32;

/// Sequence numbers are 1..=2^31-1; 0 is reserved and the counter wraps
/// back to 1.
pub(crate) fn next_sequence(current: u32) -> u32 {
    if current >= 0x7FFF_FFFF {
        1
    } else {
        current + 1
    }
}

/// Peer session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Disconnected,
    Connecting,
    Binding,
    Bound,
    Closing,
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerState::Disconnected => write!(f, "DISCONNECTED"),
            PeerState::Connecting => write!(f, "CONNECTING"),
            PeerState::Binding => write!(f, "BINDING"),
            PeerState::Bound => write!(f, "BOUND"),
            PeerState::Closing => write!(f, "CLOSING"),
        }
    }
}

/// Session error types.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("no response within deadline")]
    Timeout,

    #[error("bind rejected: {0}")]
    BindRejected(Status),

    #[error("peer not bound")]
    NotBound,

    #[error("connection closed")]
    Closed,
}

/// Outcome of a correlated `submit_sm`.
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub status: Status,
    pub message_id: String,
}

enum SessionCommand {
    Submit {
        submit: SubmitSm,
        reply: oneshot::Sender<Result<SubmitOutcome, SessionError>>,
    },
}

/// Shared handle to a peer session.
pub struct PeerHandle {
    config: Arc<PeerConfig>,
    state: watch::Receiver<PeerState>,
    cmd_tx: mpsc::Sender<SessionCommand>,
}

impl PeerHandle {
    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &PeerConfig {
        &self.config
    }

    pub fn state(&self) -> PeerState {
        *self.state.borrow()
    }

    pub fn is_bound(&self) -> bool {
        self.state() == PeerState::Bound
    }

    /// Watch receiver for state changes.
    pub fn subscribe(&self) -> watch::Receiver<PeerState> {
        self.state.clone()
    }

    /// Submit on this session and await the correlated response.
    ///
    /// Resolves with the response status, [`SessionError::Timeout`] when the
    /// response deadline passes, or [`SessionError::NotBound`]/[`Closed`]
    /// when the session cannot take traffic.
    pub async fn submit(&self, submit: SubmitSm) -> Result<SubmitOutcome, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(SessionCommand::Submit { submit, reply })
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)?
    }
}

/// Spawn the session task for one configured peer.
pub(crate) fn spawn(
    config: Arc<PeerConfig>,
    egress: SmscClient,
    shutdown: &Shutdown,
) -> Arc<PeerHandle> {
    let (state_tx, state_rx) = watch::channel(PeerState::Disconnected);
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE);

    let session = PeerSession {
        config: config.clone(),
        state: state_tx,
        cmd_rx,
        egress,
        shutdown_rx: shutdown.subscribe(),
        sequence: 0,
        pending: HashMap::new(),
    };

    tokio::spawn(session.run());

    Arc::new(PeerHandle {
        config,
        state: state_rx,
        cmd_tx,
    })
}

struct PendingRequest {
    command: Command,
    sent_at: Instant,
    reply: Option<oneshot::Sender<Result<SubmitOutcome, SessionError>>>,
}

struct PeerSession {
    config: Arc<PeerConfig>,
    state: watch::Sender<PeerState>,
    cmd_rx: mpsc::Receiver<SessionCommand>,
    egress: SmscClient,
    shutdown_rx: watch::Receiver<ShutdownState>,
    sequence: u32,
    pending: HashMap<u32, PendingRequest>,
}

impl PeerSession {
    async fn run(mut self) {
        info!(
            peer = %self.config.id,
            address = %self.config.address(),
            "peer session started"
        );

        loop {
            if self.is_stopping() {
                break;
            }

            match self.connect_and_serve().await {
                // only shutdown ends the session cleanly
                Ok(()) => break,
                Err(e) => {
                    warn!(peer = %self.config.id, error = %e, "session lost");
                    self.fail_pending();
                    if !self.wait_reconnect().await {
                        break;
                    }
                }
            }
        }

        self.set_state(PeerState::Closing);
        self.fail_pending();
        info!(peer = %self.config.id, "peer session stopped");
    }

    async fn connect_and_serve(&mut self) -> Result<(), SessionError> {
        self.set_state(PeerState::Connecting);
        let addr = self.config.address();
        debug!(peer = %self.config.id, address = %addr, "connecting");

        let stream = tokio::select! {
            biased;
            _ = Self::stopping(&mut self.shutdown_rx) => return Ok(()),
            res = timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr)) => {
                res.map_err(|_| SessionError::Timeout)??
            }
        };

        let mut framed = Framed::new(stream, SmppCodec::new());

        self.set_state(PeerState::Binding);
        self.bind(&mut framed).await?;
        self.set_state(PeerState::Bound);

        self.serve(&mut framed).await
    }

    /// Issue the transceiver bind and wait for its response.
    async fn bind(
        &mut self,
        framed: &mut Framed<TcpStream, SmppCodec>,
    ) -> Result<(), SessionError> {
        let sequence = self.next_sequence();
        let bind = BindFields {
            system_id: self.config.system_id.clone(),
            password: self.config.password.clone(),
            system_type: self.config.system_type.clone().unwrap_or_default(),
            interface_version: 0x34,
            addr_ton: 0,
            addr_npi: 0,
            address_range: String::new(),
        };

        framed
            .send((
                Header::new(Command::BindTransceiver, sequence),
                Pdu::BindTransceiver(bind),
            ))
            .await?;

        let deadline = tokio::time::Instant::now() + self.config.response_deadline();

        loop {
            let frame = tokio::time::timeout_at(deadline, framed.next())
                .await
                .map_err(|_| SessionError::Timeout)?
                .ok_or(SessionError::Closed)??;

            match frame.pdu {
                Pdu::BindTransceiverResp(resp) if frame.header.sequence == sequence => {
                    let status = frame.header.status;
                    if status.is_ok() {
                        info!(
                            peer = %self.config.id,
                            system_id = %resp.system_id,
                            "bound as transceiver"
                        );
                        return Ok(());
                    }
                    return Err(SessionError::BindRejected(status));
                }
                Pdu::EnquireLink => {
                    framed
                        .send((
                            Header::new(Command::EnquireLinkResp, frame.header.sequence),
                            Pdu::EnquireLinkResp,
                        ))
                        .await?;
                }
                _ => {
                    warn!(
                        peer = %self.config.id,
                        command = %frame.command(),
                        "unexpected PDU while binding"
                    );
                }
            }
        }
    }

    /// Bound loop: all socket writes funnel through here, so the keepalive
    /// and spawned deliver_sm acks cannot reorder ahead of in-flight writes.
    async fn serve(
        &mut self,
        framed: &mut Framed<TcpStream, SmppCodec>,
    ) -> Result<(), SessionError> {
        let (resp_tx, mut resp_rx) = mpsc::channel::<(Header, Pdu)>(DELIVER_QUEUE);

        let enquire_delay = self.config.enquire_link_delay();
        let mut enquire =
            tokio::time::interval_at(tokio::time::Instant::now() + enquire_delay, enquire_delay);
        let mut sweep = tokio::time::interval(PENDING_SWEEP_INTERVAL);
        let mut last_write = Instant::now();

        loop {
            tokio::select! {
                biased;

                _ = Self::stopping(&mut self.shutdown_rx) => {
                    let sequence = self.next_sequence();
                    // best-effort; the socket is closed either way
                    let _ = timeout(
                        Duration::from_secs(1),
                        framed.send((Header::new(Command::Unbind, sequence), Pdu::Unbind)),
                    )
                    .await;
                    return Ok(());
                }

                frame = framed.next() => {
                    let frame = match frame {
                        Some(Ok(frame)) => frame,
                        Some(Err(e)) => {
                            error!(peer = %self.config.id, error = %e, "decode error");
                            return Err(e.into());
                        }
                        None => return Err(SessionError::Closed),
                    };
                    self.handle_frame(frame, framed, &resp_tx).await?;
                }

                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(SessionCommand::Submit { submit, reply }) => {
                            self.send_submit(framed, submit, reply).await?;
                            last_write = Instant::now();
                        }
                        None => return Err(SessionError::Closed),
                    }
                }

                reply = resp_rx.recv() => {
                    // resp_tx lives in this scope, recv never yields None
                    if let Some((header, pdu)) = reply {
                        framed.send((header, pdu)).await?;
                        last_write = Instant::now();
                    }
                }

                _ = enquire.tick() => {
                    if last_write.elapsed() >= enquire_delay {
                        let sequence = self.next_sequence();
                        self.pending.insert(sequence, PendingRequest {
                            command: Command::EnquireLink,
                            sent_at: Instant::now(),
                            reply: None,
                        });
                        framed
                            .send((Header::new(Command::EnquireLink, sequence), Pdu::EnquireLink))
                            .await?;
                        last_write = Instant::now();
                        trace!(peer = %self.config.id, sequence, "enquire_link sent");
                    }
                }

                _ = sweep.tick() => {
                    self.sweep_pending();
                }
            }
        }
    }

    async fn send_submit(
        &mut self,
        framed: &mut Framed<TcpStream, SmppCodec>,
        submit: SubmitSm,
        reply: oneshot::Sender<Result<SubmitOutcome, SessionError>>,
    ) -> Result<(), SessionError> {
        let sequence = self.next_sequence();
        debug!(
            peer = %self.config.id,
            sequence,
            dest = %submit.dest_addr,
            "submit_sm"
        );

        self.pending.insert(
            sequence,
            PendingRequest {
                command: Command::SubmitSm,
                sent_at: Instant::now(),
                reply: Some(reply),
            },
        );

        framed
            .send((Header::new(Command::SubmitSm, sequence), Pdu::SubmitSm(submit)))
            .await?;
        Ok(())
    }

    async fn handle_frame(
        &mut self,
        frame: PduFrame,
        framed: &mut Framed<TcpStream, SmppCodec>,
        resp_tx: &mpsc::Sender<(Header, Pdu)>,
    ) -> Result<(), SessionError> {
        if frame.is_response() {
            self.handle_response(frame);
            return Ok(());
        }

        let PduFrame { header, pdu } = frame;

        match pdu {
            Pdu::EnquireLink => {
                framed
                    .send((
                        Header::new(Command::EnquireLinkResp, header.sequence),
                        Pdu::EnquireLinkResp,
                    ))
                    .await?;
            }

            Pdu::DeliverSm(deliver) => {
                self.handle_deliver(header.sequence, deliver, resp_tx);
            }

            Pdu::Unbind => {
                info!(peer = %self.config.id, "peer requested unbind");
                let _ = framed
                    .send((Header::new(Command::UnbindResp, header.sequence), Pdu::UnbindResp))
                    .await;
                return Err(SessionError::Closed);
            }

            Pdu::Unknown => {
                warn!(
                    peer = %self.config.id,
                    command = %header.command,
                    "unknown command, sending generic_nack"
                );
                framed
                    .send((
                        Header::with_status(
                            Command::GenericNack,
                            header.sequence,
                            Status::InvalidCommandId,
                        ),
                        Pdu::GenericNack,
                    ))
                    .await?;
            }

            other => {
                warn!(
                    peer = %self.config.id,
                    command = %header.command,
                    pdu = ?other.command(),
                    "unexpected request on client session"
                );
                framed
                    .send((
                        Header::with_status(
                            Command::GenericNack,
                            header.sequence,
                            Status::InvalidCommandId,
                        ),
                        Pdu::GenericNack,
                    ))
                    .await?;
            }
        }

        Ok(())
    }

    /// Forward a deliver_sm on its own task so a slow SMSC cannot stall the
    /// session; the ack funnels back through the writer queue afterwards.
    /// The peer is acked even when egress fails, resend storms upstream are
    /// worse than local loss.
    fn handle_deliver(
        &self,
        sequence: u32,
        deliver: DeliverSm,
        resp_tx: &mpsc::Sender<(Header, Pdu)>,
    ) {
        let peer = self.config.id.clone();
        let egress = self.egress.clone();
        let resp_tx = resp_tx.clone();

        debug!(
            peer = %peer,
            sequence,
            source = %deliver.source_addr,
            dest = %deliver.dest_addr,
            receipt = deliver.is_delivery_receipt(),
            "deliver_sm received"
        );

        tokio::spawn(async move {
            let sms = InboundSms::from_deliver(&deliver);
            if let Err(e) = egress.forward(&sms).await {
                warn!(peer = %peer, sequence, error = %e, "egress failed for deliver_sm");
            }

            let resp = (
                Header::new(Command::DeliverSmResp, sequence),
                Pdu::DeliverSmResp(DeliverSmResp::default()),
            );
            if resp_tx.send(resp).await.is_err() {
                warn!(peer = %peer, sequence, "session gone before deliver_sm_resp");
            }
        });
    }

    fn handle_response(&mut self, frame: PduFrame) {
        let sequence = frame.sequence();

        match self.pending.remove(&sequence) {
            Some(pending) => {
                trace!(
                    peer = %self.config.id,
                    sequence,
                    command = %pending.command,
                    latency_ms = pending.sent_at.elapsed().as_millis() as u64,
                    "response received"
                );

                if let Some(reply) = pending.reply {
                    let outcome = match frame.pdu {
                        Pdu::SubmitSmResp(resp) => SubmitOutcome {
                            status: frame.header.status,
                            message_id: resp.message_id,
                        },
                        // a nack or mismatched response still resolves the
                        // request, with its status or a synthetic failure
                        _ => SubmitOutcome {
                            status: if frame.header.status.is_ok() {
                                Status::SystemError
                            } else {
                                frame.header.status
                            },
                            message_id: String::new(),
                        },
                    };
                    let _ = reply.send(Ok(outcome));
                }
            }
            None => {
                warn!(peer = %self.config.id, sequence, "unexpected response");
            }
        }
    }

    fn sweep_pending(&mut self) {
        let deadline = self.config.response_deadline();
        let now = Instant::now();

        let timed_out: Vec<u32> = self
            .pending
            .iter()
            .filter(|(_, req)| now.duration_since(req.sent_at) > deadline)
            .map(|(seq, _)| *seq)
            .collect();

        for sequence in timed_out {
            if let Some(pending) = self.pending.remove(&sequence) {
                warn!(
                    peer = %self.config.id,
                    sequence,
                    command = %pending.command,
                    "request timed out"
                );
                if let Some(reply) = pending.reply {
                    let _ = reply.send(Err(SessionError::Timeout));
                }
            }
        }
    }

    fn fail_pending(&mut self) {
        for (_, pending) in self.pending.drain() {
            if let Some(reply) = pending.reply {
                let _ = reply.send(Err(SessionError::Closed));
            }
        }
    }

    /// Sleep out the reconnect interval, answering queued submissions with
    /// NotBound. Returns false when shutdown arrived instead.
    async fn wait_reconnect(&mut self) -> bool {
        self.set_state(PeerState::Disconnected);
        if self.is_stopping() {
            return false;
        }

        let delay = self.config.reconnect_delay();
        debug!(
            peer = %self.config.id,
            delay_ms = delay.as_millis() as u64,
            "reconnect scheduled"
        );

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                biased;

                _ = Self::stopping(&mut self.shutdown_rx) => return false,

                cmd = self.cmd_rx.recv() => match cmd {
                    Some(SessionCommand::Submit { reply, .. }) => {
                        let _ = reply.send(Err(SessionError::NotBound));
                    }
                    None => return false,
                },

                _ = &mut sleep => return true,
            }
        }
    }

    fn next_sequence(&mut self) -> u32 {
        self.sequence = next_sequence(self.sequence);
        self.sequence
    }

    fn set_state(&self, state: PeerState) {
        self.state.send_if_modified(|current| {
            if *current != state {
                debug!(peer = %self.config.id, from = %current, to = %state, "state transition");
                *current = state;
                true
            } else {
                false
            }
        });
    }

    fn is_stopping(&self) -> bool {
        *self.shutdown_rx.borrow() == ShutdownState::Stopping
    }

    async fn stopping(rx: &mut watch::Receiver<ShutdownState>) {
        while *rx.borrow() != ShutdownState::Stopping {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
pub(crate) fn test_handle(
    config: PeerConfig,
) -> (Arc<PeerHandle>, watch::Sender<PeerState>) {
    let (state_tx, state_rx) = watch::channel(PeerState::Disconnected);
    let (cmd_tx, _cmd_rx) = mpsc::channel(1);
    let handle = Arc::new(PeerHandle {
        config: Arc::new(config),
        state: state_rx,
        cmd_tx,
    });
    (handle, state_tx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_wraps_past_i32_max_to_one() {
        assert_eq!(next_sequence(0), 1);
        assert_eq!(next_sequence(1), 2);
        assert_eq!(next_sequence(0x7FFF_FFFE), 0x7FFF_FFFF);
        assert_eq!(next_sequence(0x7FFF_FFFF), 1);
        // the counter can never produce the reserved value 0
        assert_ne!(next_sequence(u32::MAX), 0);
    }
}
