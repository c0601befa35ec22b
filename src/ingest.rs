// MIT License - Copyright (c) 2026 Peter Wright
// Serial ingestion worker

//! Owns the serial connection: reads bytes, frames them with the active
//! panel model's policy, parses frames into records and queues them for
//! the publisher.
//!
//! The active model arrives through a `watch` channel. A change is picked
//! up at the top of the loop, never while a read is in flight: the port is
//! closed, framing state is dropped and the port is reopened with the new
//! model's serial settings.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::{sleep_or_cancel, Backoff};
use crate::error::{BridgeError, Result};
use crate::framing::{Frame, Framer};
use crate::message::{ClientIdentity, ParsedEvent, RecordType};
use crate::panels::{PanelModel, ReportOutcome};
use crate::queue::DurableQueue;
use crate::serial::{PortOpener, SerialLink, SerialOverrides, SerialSettings};
use crate::severity::SeverityTable;

const READ_BUF_SIZE: usize = 1024;

#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub reconnect_base: Duration,
    pub reconnect_cap: Duration,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            reconnect_base: Duration::from_secs(1),
            reconnect_cap: Duration::from_secs(60),
        }
    }
}

pub struct SerialIngest<O: PortOpener> {
    opener: Arc<O>,
    model_rx: watch::Receiver<PanelModel>,
    overrides: SerialOverrides,
    severity: Arc<SeverityTable>,
    identity: ClientIdentity,
    queue: Arc<DurableQueue>,
    serial_up: Arc<AtomicBool>,
    settings: IngestSettings,
}

/// What the loop should do after a read.
enum Step {
    Continue,
    Reconnect,
    Cancelled,
}

impl<O: PortOpener> SerialIngest<O> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        opener: Arc<O>,
        model_rx: watch::Receiver<PanelModel>,
        overrides: SerialOverrides,
        severity: Arc<SeverityTable>,
        identity: ClientIdentity,
        queue: Arc<DurableQueue>,
        serial_up: Arc<AtomicBool>,
        settings: IngestSettings,
    ) -> Self {
        Self {
            opener,
            model_rx,
            overrides,
            severity,
            identity,
            queue,
            serial_up,
            settings,
        }
    }

    fn serial_settings(&self, model: PanelModel) -> SerialSettings {
        self.overrides.apply(model.serial_defaults())
    }

    /// Run until cancelled. Transport and decode errors are handled here.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        let mut backoff = Backoff::new(self.settings.reconnect_base, self.settings.reconnect_cap);
        let mut model = *self.model_rx.borrow_and_update();
        let mut identity = self.identity.with_model_id(model.id());
        let mut framer = Framer::new(model.frame_policy());
        let mut link: Option<O::Link> = None;
        let mut buf = vec![0u8; READ_BUF_SIZE];
        info!("Serial ingestion started for {model}");

        while !cancel.is_cancelled() {
            if self.model_rx.has_changed().unwrap_or(false) {
                let next = *self.model_rx.borrow_and_update();
                if next != model {
                    info!("Panel model changed: {model} -> {next}, reopening serial port");
                    model = next;
                    identity = identity.with_model_id(model.id());
                    framer = Framer::new(model.frame_policy());
                    if link.take().is_some() {
                        self.set_serial_up(false);
                    }
                }
            }

            let settings = self.serial_settings(model);
            let Some(port) = link.as_mut() else {
                match self.opener.open(&settings).await {
                    Ok(opened) => {
                        info!("Serial port open ({} baud)", settings.baud_rate);
                        link = Some(opened);
                        framer.reset();
                        backoff.reset();
                        self.set_serial_up(true);
                    }
                    Err(e) if !e.is_retryable() => {
                        self.set_serial_up(false);
                        error!("Serial port cannot be opened with these settings: {e}");
                        return Err(e);
                    }
                    Err(e) => {
                        self.set_serial_up(false);
                        let delay = backoff.next_delay();
                        error!("Cannot open serial port: {e}. Retrying in {delay:?}");
                        if !sleep_or_cancel(&cancel, delay).await {
                            break;
                        }
                    }
                }
                continue;
            };

            let step = self
                .read_once(port, &mut buf, &mut framer, model, &identity, settings.read_timeout, &cancel)
                .await;
            match step {
                Step::Continue => {}
                Step::Cancelled => break,
                Step::Reconnect => {
                    link = None;
                    framer.reset();
                    self.set_serial_up(false);
                    let delay = backoff.next_delay();
                    if !sleep_or_cancel(&cancel, delay).await {
                        break;
                    }
                }
            }
        }

        self.set_serial_up(false);
        info!("Serial ingestion stopped");
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn read_once(
        &self,
        port: &mut O::Link,
        buf: &mut [u8],
        framer: &mut Framer,
        model: PanelModel,
        identity: &ClientIdentity,
        read_timeout: Duration,
        cancel: &CancellationToken,
    ) -> Step {
        let read = tokio::select! {
            _ = cancel.cancelled() => return Step::Cancelled,
            read = tokio::time::timeout(read_timeout, port.read(buf)) => read,
        };

        let read = match read {
            // nothing within the poll window
            Err(_) => return Step::Continue,
            Ok(Ok(0)) => Err(BridgeError::SerialClosed),
            Ok(Ok(n)) => Ok(n),
            Ok(Err(e)) => Err(BridgeError::Io(e)),
        };

        match read {
            Ok(n) => {
                let feed = framer.feed(&buf[..n]);
                for frame in feed.frames {
                    self.dispatch(model, identity, frame);
                }
                if let Some(e) = feed.decode_error {
                    debug!("{e}, discarding serial input");
                    if let Err(e) = port.discard_input() {
                        error!("Failed to clear serial input buffer: {e}");
                        return Step::Reconnect;
                    }
                }
                Step::Continue
            }
            Err(e) => {
                error!("Lost serial connection: {e}");
                Step::Reconnect
            }
        }
    }

    fn dispatch(&self, model: PanelModel, identity: &ClientIdentity, frame: Frame) {
        match frame {
            Frame::Event(text) => match model.parse_event(&text) {
                Some(record) => {
                    let severity = model.resolve_severity(&self.severity, &record.code);
                    let event =
                        ParsedEvent::from_record(identity, RecordType::Event, record, Some(severity));
                    info!("Event queued: {} (severity {severity})", event.code);
                    self.queue.enqueue(event.into_message());
                }
                None => warn!("Unparseable event from {model}, dropped: {text:?}"),
            },
            Frame::Report(text) => match model.parse_report(&text) {
                ReportOutcome::Parsed(record) => {
                    let report = ParsedEvent::from_record(identity, RecordType::Report, record, None);
                    info!("Report queued ({} bytes)", text.len());
                    self.queue.enqueue(report.into_message());
                }
                ReportOutcome::Unparseable => warn!("Unparseable report from {model}, dropped"),
                ReportOutcome::Unsupported => {
                    warn!("Reports are not supported for {model}, dismissing report")
                }
            },
        }
    }

    fn set_serial_up(&self, up: bool) {
        if self.serial_up.swap(up, Ordering::Relaxed) != up {
            debug!("Serial link {}", if up { "up" } else { "down" });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::pin::Pin;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncRead, AsyncWriteExt, DuplexStream, ReadBuf};

    struct MemoryLink {
        inner: DuplexStream,
        discards: Arc<AtomicUsize>,
    }

    impl AsyncRead for MemoryLink {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            Pin::new(&mut self.inner).poll_read(cx, buf)
        }
    }

    impl SerialLink for MemoryLink {
        fn discard_input(&mut self) -> std::io::Result<()> {
            self.discards.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Hands out prepared links in order; fails once they run out.
    #[derive(Default)]
    struct MemoryOpener {
        links: Mutex<VecDeque<MemoryLink>>,
        opened: Mutex<Vec<SerialSettings>>,
        discards: Arc<AtomicUsize>,
        rejects_settings: AtomicBool,
    }

    impl MemoryOpener {
        fn add_link(&self) -> DuplexStream {
            let (panel, gateway) = tokio::io::duplex(4096);
            self.links.lock().unwrap().push_back(MemoryLink {
                inner: gateway,
                discards: Arc::clone(&self.discards),
            });
            panel
        }

        fn opened(&self) -> Vec<SerialSettings> {
            self.opened.lock().unwrap().clone()
        }
    }

    impl PortOpener for MemoryOpener {
        type Link = MemoryLink;

        async fn open(&self, settings: &SerialSettings) -> Result<MemoryLink> {
            if self.rejects_settings.load(Ordering::SeqCst) {
                return Err(BridgeError::Serial(tokio_serial::Error::new(
                    tokio_serial::ErrorKind::InvalidInput,
                    "unsupported baud rate",
                )));
            }
            let link = self.links.lock().unwrap().pop_front();
            match link {
                Some(link) => {
                    self.opened.lock().unwrap().push(settings.clone());
                    Ok(link)
                }
                None => Err(BridgeError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no such port",
                ))),
            }
        }
    }

    struct Harness {
        opener: Arc<MemoryOpener>,
        model_tx: watch::Sender<PanelModel>,
        queue: Arc<DurableQueue>,
        serial_up: Arc<AtomicBool>,
        cancel: CancellationToken,
        task: tokio::task::JoinHandle<Result<()>>,
    }

    fn start(model: PanelModel, opener: Arc<MemoryOpener>) -> Harness {
        let (model_tx, model_rx) = watch::channel(model);
        let queue = Arc::new(DurableQueue::new());
        let serial_up = Arc::new(AtomicBool::new(false));
        let severity = SeverityTable::new(999)
            .with_levels(10001, [("FIRE ALARM", 6)])
            .with_levels(10003, [("TROUBLE", 2)]);
        let identity = ClientIdentity {
            client_id: "C1".into(),
            panel_id: 3,
            panel_model_name: "test".into(),
            panel_model_id: model.id(),
            coordinates: None,
        };
        let ingest = SerialIngest::new(
            Arc::clone(&opener),
            model_rx,
            SerialOverrides::default(),
            Arc::new(severity),
            identity,
            Arc::clone(&queue),
            Arc::clone(&serial_up),
            IngestSettings::default(),
        );
        let cancel = CancellationToken::new();
        let task = tokio::spawn(ingest.run(cancel.clone()));
        Harness {
            opener,
            model_tx,
            queue,
            serial_up,
            cancel,
            task,
        }
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..500 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("condition not met");
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_is_parsed_and_queued() {
        let opener = Arc::new(MemoryOpener::default());
        let mut panel = opener.add_link();
        let h = start(PanelModel::EdwardsIo1000, Arc::clone(&opener));

        panel
            .write_all(b"FIRE ALARM | 10:15:32 03/14/24 NODE:1\r\nLOBBY\r\n\r\n")
            .await
            .unwrap();
        wait_until(|| h.queue.len() == 1).await;
        assert!(h.serial_up.load(Ordering::SeqCst));

        let msg = h.queue.dequeue_if_any().unwrap();
        let ev = ParsedEvent::from_payload(msg.payload()).unwrap();
        assert_eq!(ev.code, "FIRE ALARM");
        assert_eq!(ev.severity, Some(6));
        assert_eq!(ev.record_type, RecordType::Event);
        assert_eq!(ev.metadata, "NODE: 1 | Additional_Metadata: LOBBY");

        h.cancel.cancel();
        h.task.await.unwrap().unwrap();
        assert!(!h.serial_up.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_accented_event_is_queued() {
        let opener = Arc::new(MemoryOpener::default());
        let mut panel = opener.add_link();
        let h = start(PanelModel::EdwardsIo1000, Arc::clone(&opener));

        panel
            .write_all(b"FIRE ALARM | 10:15:32 03/14/24 NODE:1\r\n\xc1REA COMEDOR\r\n\r\n")
            .await
            .unwrap();
        wait_until(|| h.queue.len() == 1).await;
        let ev = ParsedEvent::from_payload(h.queue.dequeue_if_any().unwrap().payload()).unwrap();
        assert_eq!(ev.metadata, "NODE: 1 | Additional_Metadata: \u{c1}REA COMEDOR");
        assert_eq!(h.opener.discards.load(Ordering::SeqCst), 0);

        h.cancel.cancel();
        h.task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_settings_end_the_worker() {
        let opener = Arc::new(MemoryOpener::default());
        opener.rejects_settings.store(true, Ordering::SeqCst);
        let h = start(PanelModel::EdwardsIo1000, Arc::clone(&opener));

        let err = h.task.await.unwrap().unwrap_err();
        assert!(matches!(err, BridgeError::Serial(_)));
        assert!(!h.serial_up.load(Ordering::SeqCst));
        assert!(h.opener.opened().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unparseable_frame_is_dropped() {
        let opener = Arc::new(MemoryOpener::default());
        let mut panel = opener.add_link();
        let h = start(PanelModel::EdwardsIo1000, Arc::clone(&opener));

        panel.write_all(b"garbage without pipe\n\nTROUBLE | 1:00:00 01/01/24\n\n").await.unwrap();
        wait_until(|| h.queue.len() == 1).await;
        let ev = ParsedEvent::from_payload(h.queue.dequeue_if_any().unwrap().payload()).unwrap();
        assert_eq!(ev.code, "TROUBLE");
        assert_eq!(ev.severity, Some(999));

        h.cancel.cancel();
        h.task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_port_loss() {
        let opener = Arc::new(MemoryOpener::default());
        let panel = opener.add_link();
        let h = start(PanelModel::EdwardsIo1000, Arc::clone(&opener));
        wait_until(|| h.serial_up.load(Ordering::SeqCst)).await;

        // unplug; no second port yet
        drop(panel);
        wait_until(|| !h.serial_up.load(Ordering::SeqCst)).await;

        let mut panel = opener.add_link();
        wait_until(|| h.serial_up.load(Ordering::SeqCst)).await;
        panel.write_all(b"RESET | 2:00:00 01/01/24\n\n").await.unwrap();
        wait_until(|| h.queue.len() == 1).await;
        assert_eq!(h.opener.opened().len(), 2);

        h.cancel.cancel();
        h.task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_decode_error_discards_input_and_flushes() {
        let opener = Arc::new(MemoryOpener::default());
        let mut panel = opener.add_link();
        let h = start(PanelModel::EdwardsIo1000, Arc::clone(&opener));

        panel.write_all(b"FIRE ALARM | 10:15:32 03/14/24\n\x00\xfe\n").await.unwrap();
        wait_until(|| h.queue.len() == 1).await;
        assert_eq!(h.opener.discards.load(Ordering::SeqCst), 1);

        // the connection survives
        panel.write_all(b"RESET | 2:00:00 01/01/24\n\n").await.unwrap();
        wait_until(|| h.queue.len() == 2).await;
        assert_eq!(h.opener.opened().len(), 1);

        h.cancel.cancel();
        h.task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_model_swap_reopens_with_new_settings() {
        let opener = Arc::new(MemoryOpener::default());
        let mut first = opener.add_link();
        let h = start(PanelModel::EdwardsIo1000, Arc::clone(&opener));
        wait_until(|| h.opener.opened().len() == 1).await;

        // half a frame is pending when the model changes
        first.write_all(b"FIRE ALARM | 10:15:32 03/14/24\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut second = opener.add_link();
        h.model_tx.send(PanelModel::NotifierNfs).unwrap();
        wait_until(|| h.opener.opened().len() == 2).await;
        assert_eq!(h.opener.opened()[1].baud_rate, 2400);
        assert_eq!(h.opener.opened()[1].data_bits, 7);

        second.write_all(b"TROUBLE   AC FAIL   2:00P 010124\r\n").await.unwrap();
        wait_until(|| h.queue.len() == 1).await;
        let ev = ParsedEvent::from_payload(h.queue.dequeue_if_any().unwrap().payload()).unwrap();
        assert_eq!(ev.code, "TROUBLE");
        assert_eq!(ev.panel_model_id, 10003);
        assert_eq!(ev.severity, Some(2));

        h.cancel.cancel();
        h.task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_port_missing() {
        let opener = Arc::new(MemoryOpener::default());
        let h = start(PanelModel::Simplex, Arc::clone(&opener));
        // let the backoff grow
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(!h.serial_up.load(Ordering::SeqCst));

        let started = tokio::time::Instant::now();
        h.cancel.cancel();
        h.task.await.unwrap().unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
