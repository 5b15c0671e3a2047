//! Forwards inbound SMPP messages to the SMSC over HTTP.
//!
//! Every inbound SMS (MO or delivery receipt, from an upstream peer or a
//! local ESME) becomes a `GET {kamailio_url}?from=&to=&text=&dcs=` with a
//! fixed retry budget. Anything 2xx is success.

use std::fmt::Write as _;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::proto::{DeliverSm, SubmitSm};

const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);
const RETRY_DELAY: Duration = Duration::from_secs(1);
const MAX_ATTEMPTS: u32 = 3;

/// Egress failure after the retry budget is spent.
#[derive(Debug, Error)]
pub enum EgressError {
    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("all {attempts} attempts failed, last: {last}")]
    AttemptsExhausted { attempts: u32, last: String },
}

/// An inbound SMS normalized for the SMSC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundSms {
    pub from: String,
    pub to: String,
    /// UTF-8 text for `dcs = 0`, hex-encoded octets otherwise
    pub text: String,
    pub dcs: u8,
    /// Set for SMSC delivery receipts (`esm_class & 0x04`)
    pub receipt: bool,
}

impl InboundSms {
    /// Normalize a deliver_sm. The short message stays opaque: it is passed
    /// as UTF-8 only for the default coding, hex otherwise so downstream
    /// can decode UCS-2 and friends via `dcs`.
    pub fn from_deliver(deliver: &DeliverSm) -> Self {
        let text = if deliver.data_coding == 0 {
            String::from_utf8_lossy(&deliver.short_message).into_owned()
        } else {
            hex_encode(&deliver.short_message)
        };

        Self {
            from: deliver.source_addr.clone(),
            to: deliver.dest_addr.clone(),
            text,
            dcs: deliver.data_coding,
            receipt: deliver.is_delivery_receipt(),
        }
    }

    /// Normalize a submit_sm accepted from a local ESME.
    pub fn from_submit(submit: &SubmitSm) -> Self {
        let text = if submit.data_coding == 0 {
            String::from_utf8_lossy(&submit.short_message).into_owned()
        } else {
            hex_encode(&submit.short_message)
        };

        Self {
            from: submit.source_addr.clone(),
            to: submit.dest_addr.clone(),
            text,
            dcs: submit.data_coding,
            receipt: false,
        }
    }
}

/// HTTP client towards the SMSC with bounded retry.
#[derive(Clone)]
pub struct SmscClient {
    client: reqwest::Client,
    url: String,
    attempts: u32,
    retry_delay: Duration,
}

impl SmscClient {
    pub fn new(url: impl Into<String>) -> Result<Self, EgressError> {
        Self::with_retry(url, MAX_ATTEMPTS, RETRY_DELAY)
    }

    pub fn with_retry(
        url: impl Into<String>,
        attempts: u32,
        retry_delay: Duration,
    ) -> Result<Self, EgressError> {
        let client = reqwest::Client::builder()
            .timeout(ATTEMPT_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
            attempts,
            retry_delay,
        })
    }

    /// Deliver one message, retrying transport errors and non-2xx replies.
    pub async fn forward(&self, sms: &InboundSms) -> Result<(), EgressError> {
        let dcs = sms.dcs.to_string();
        let mut params = vec![
            ("from", sms.from.as_str()),
            ("to", sms.to.as_str()),
            ("text", sms.text.as_str()),
            ("dcs", dcs.as_str()),
        ];
        if sms.receipt {
            params.push(("receipt", "1"));
        }

        let mut last = String::new();

        for attempt in 1..=self.attempts {
            match self.client.get(&self.url).query(&params).send().await {
                Ok(resp) if resp.status().is_success() => {
                    debug!(to = %sms.to, attempt, "forwarded to smsc");
                    return Ok(());
                }
                Ok(resp) => {
                    last = format!("smsc returned {}", resp.status());
                    warn!(to = %sms.to, attempt, status = %resp.status(), "smsc rejected message");
                }
                Err(e) => {
                    last = e.to_string();
                    warn!(to = %sms.to, attempt, error = %e, "smsc request failed");
                }
            }

            if attempt < self.attempts {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        Err(EgressError::AttemptsExhausted {
            attempts: self.attempts,
            last,
        })
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use axum::extract::{RawQuery, State};
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    struct StubSmsc {
        /// 2xx after this many failures
        fail_first: AtomicU32,
        queries: mpsc::UnboundedSender<String>,
    }

    async fn stub_handler(
        State(state): State<Arc<StubSmsc>>,
        RawQuery(query): RawQuery,
    ) -> StatusCode {
        let _ = state.queries.send(query.unwrap_or_default());
        if state.fail_first.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
            n.checked_sub(1)
        })
        .is_ok()
        {
            StatusCode::INTERNAL_SERVER_ERROR
        } else {
            StatusCode::OK
        }
    }

    async fn start_stub(fail_first: u32) -> (String, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(StubSmsc {
            fail_first: AtomicU32::new(fail_first),
            queries: tx,
        });

        let app = Router::new()
            .route("/sms", get(stub_handler))
            .with_state(state);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        (format!("http://{addr}/sms"), rx)
    }

    fn sms() -> InboundSms {
        InboundSms {
            from: "500".into(),
            to: "600".into(),
            text: "hello".into(),
            dcs: 0,
            receipt: false,
        }
    }

    #[tokio::test]
    async fn first_attempt_success_sends_expected_query() {
        let (url, mut queries) = start_stub(0).await;
        let client = SmscClient::with_retry(url, 3, Duration::from_millis(10)).unwrap();

        client.forward(&sms()).await.unwrap();

        assert_eq!(
            queries.recv().await.unwrap(),
            "from=500&to=600&text=hello&dcs=0"
        );
    }

    #[tokio::test]
    async fn two_failures_then_success() {
        let (url, mut queries) = start_stub(2).await;
        let client = SmscClient::with_retry(url, 3, Duration::from_millis(10)).unwrap();

        client.forward(&sms()).await.unwrap();

        // all three attempts reached the stub
        for _ in 0..3 {
            assert!(queries.recv().await.is_some());
        }
    }

    #[tokio::test]
    async fn three_failures_exhaust_the_budget() {
        let (url, _queries) = start_stub(u32::MAX).await;
        let client = SmscClient::with_retry(url, 3, Duration::from_millis(10)).unwrap();

        let err = client.forward(&sms()).await.unwrap_err();
        assert!(matches!(
            err,
            EgressError::AttemptsExhausted { attempts: 3, .. }
        ));
    }

    #[tokio::test]
    async fn receipts_are_flagged() {
        let (url, mut queries) = start_stub(0).await;
        let client = SmscClient::with_retry(url, 1, Duration::from_millis(10)).unwrap();

        let mut receipt = sms();
        receipt.receipt = true;
        client.forward(&receipt).await.unwrap();

        assert_eq!(
            queries.recv().await.unwrap(),
            "from=500&to=600&text=hello&dcs=0&receipt=1"
        );
    }

    #[test]
    fn non_default_coding_is_hex_encoded() {
        let deliver = DeliverSm {
            source_addr: "500".into(),
            dest_addr: "600".into(),
            data_coding: 0x08,
            short_message: vec![0x00, 0x48, 0x00, 0x69], // "Hi" in UCS-2
            ..Default::default()
        };

        let sms = InboundSms::from_deliver(&deliver);
        assert_eq!(sms.text, "00480069");
        assert_eq!(sms.dcs, 8);
    }

    #[test]
    fn default_coding_passes_utf8_text() {
        let deliver = DeliverSm {
            source_addr: "500".into(),
            dest_addr: "600".into(),
            short_message: b"hello".to_vec(),
            ..Default::default()
        };

        let sms = InboundSms::from_deliver(&deliver);
        assert_eq!(sms.text, "hello");
        assert!(!sms.receipt);
    }
}
