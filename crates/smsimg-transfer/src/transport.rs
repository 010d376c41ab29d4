//! Delivery of encrypted wire fragments between sender and receiver.
//!
//! The pipeline only sees [`Transport`]; it never assumes delivery order or
//! completeness, since reassembly sorts by the framed index.

use std::future::Future;

use smsimg_core::{SmsimgError, SmsimgResult};
use tokio::sync::mpsc;

pub trait Transport: Send {
    /// Hand one wire fragment to the channel.
    fn send(&mut self, wire: String) -> impl Future<Output = SmsimgResult<()>> + Send;

    /// No more fragments will be sent.
    fn finish(&mut self);

    /// Next delivered fragment, or `None` once the channel is finished and
    /// drained.
    fn recv(&mut self) -> impl Future<Output = Option<String>> + Send;

    /// A fragment that has already arrived, without waiting. Transports that
    /// only deliver on `finish` keep the default.
    fn try_recv(&mut self) -> Option<String> {
        None
    }
}

/// Ordered in-process echo: everything sent is received, in send order.
pub struct LoopbackTransport {
    tx: Option<mpsc::UnboundedSender<String>>,
    rx: mpsc::UnboundedReceiver<String>,
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx: Some(tx), rx }
    }
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transport for LoopbackTransport {
    async fn send(&mut self, wire: String) -> SmsimgResult<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| SmsimgError::Other(anyhow::anyhow!("send after finish")))?;
        tx.send(wire)
            .map_err(|_| SmsimgError::Other(anyhow::anyhow!("loopback receiver closed")))
    }

    fn finish(&mut self) {
        self.tx = None;
    }

    async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    fn try_recv(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }
}
