// MIT License - Copyright (c) 2026 Peter Wright
// Application wiring

//! Builds the pipeline from a [`Config`], runs it under the supervisor and
//! performs the shutdown sequence.
//!
//! ```text
//! serial port -> SerialIngest -> DurableQueue -> Publisher -> broker
//!                      ^                              |
//!                      +--- watch<PanelModel> <-------+ (id_modelo_panel)
//! ```

use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::attributes::AttributeHub;
use crate::config::{Config, RelayToml};
use crate::constants::PANEL_MODEL_ATTRIBUTE;
use crate::ingest::{IngestSettings, SerialIngest};
use crate::message::ClientIdentity;
use crate::mqtt::MqttTransport;
use crate::panels::PanelModel;
use crate::publisher::{BrokerTransport, Publisher, PublisherSettings};
use crate::queue::{DurableQueue, Snapshotter, persist};
use crate::rate_limit::RateLimiter;
use crate::relay::{RelayMonitor, SysfsContact};
use crate::serial::{DevicePortOpener, PortOpener, SerialOverrides};
use crate::severity::SeverityTable;
use crate::supervisor::{RestartPolicy, Supervisor, worker_fn};

/// Applies remote `id_modelo_panel` values to the running pipeline.
struct ModelSwitch<T: BrokerTransport> {
    model_tx: Arc<watch::Sender<PanelModel>>,
    publisher: Weak<Publisher<T>>,
}

impl<T: BrokerTransport> ModelSwitch<T> {
    fn apply(&self, value: &Value) {
        let id = match value {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse::<u64>().ok(),
            _ => None,
        };
        let Some(id) = id.and_then(|id| u32::try_from(id).ok()) else {
            warn!("Ignoring {PANEL_MODEL_ATTRIBUTE} value {value}");
            return;
        };

        let model = match PanelModel::from_id(id) {
            Ok(model) => model,
            Err(e) => {
                let current = *self.model_tx.borrow();
                warn!("{e}, keeping {} ({})", current.name(), current.id());
                return;
            }
        };

        let changed = self.model_tx.send_if_modified(|current| {
            if *current == model {
                false
            } else {
                *current = model;
                true
            }
        });
        if changed {
            info!("Panel model changed to {} ({id})", model.name());
            if let Some(publisher) = self.publisher.upgrade() {
                publisher.set_panel_model_id(id);
            }
        } else {
            debug!("Panel model {id} already active");
        }
    }
}

/// The whole gateway, generic over its two I/O seams.
pub struct Gateway<T: BrokerTransport, O: PortOpener> {
    config: Config,
    transport: Arc<T>,
    hub: Arc<AttributeHub>,
    opener: Arc<O>,
    severity: Arc<SeverityTable>,
}

impl Gateway<MqttTransport, DevicePortOpener> {
    /// Production gateway: rumqttc broker connection and a real serial device.
    pub fn from_config(config: Config) -> Result<Self> {
        let severity = config.load_severity_table().with_context(|| {
            format!(
                "Failed to load severity table {}",
                config.severity.path.display()
            )
        })?;
        let identity = config.identity()?;
        let hub = Arc::new(AttributeHub::new());
        let transport = Arc::new(MqttTransport::new(
            &config.mqtt_settings(),
            config.topics(),
            &identity,
            Arc::clone(&hub),
        ));
        let opener = Arc::new(DevicePortOpener::new(config.serial.port.clone()));
        Ok(Self::new(config, transport, hub, opener, severity))
    }
}

impl<T: BrokerTransport, O: PortOpener> Gateway<T, O> {
    /// `hub` must be the one `transport` routes attribute messages to.
    pub fn new(
        config: Config,
        transport: Arc<T>,
        hub: Arc<AttributeHub>,
        opener: Arc<O>,
        severity: SeverityTable,
    ) -> Self {
        Self {
            config,
            transport,
            hub,
            opener,
            severity: Arc::new(severity),
        }
    }

    /// Run until `shutdown` resolves or a worker dies beyond recovery.
    ///
    /// Either way the shutdown sequence runs: stop workers, write the final
    /// queue snapshot, disconnect from the broker. A worker failure is
    /// returned as an error so the process exits non-zero.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let config = &self.config;
        let identity = config.identity()?;
        let initial_model = config.panel_model()?;
        info!(
            "Starting gateway for {} panel {} ({})",
            identity.client_id,
            identity.panel_id,
            initial_model.name()
        );

        let queue = Arc::new(DurableQueue::new());
        queue.load_from(&config.queue.path);

        let serial_up = Arc::new(AtomicBool::new(false));
        let publisher = Arc::new(Publisher::new(
            Arc::clone(&self.transport),
            Arc::clone(&queue),
            Arc::new(RateLimiter::new(config.rate_quotas())),
            Arc::clone(&self.hub),
            config.topics(),
            PublisherSettings::default(),
            identity.clone(),
            Arc::clone(&serial_up),
        ));

        if let Err(e) = publisher.connect(config.connect_timeout()).await {
            warn!("Broker not reachable yet ({e}), messages will be queued");
        }

        let (model_tx, _) = watch::channel(initial_model);
        let model_tx = Arc::new(model_tx);
        self.watch_panel_model(&publisher, &model_tx).await;

        let supervisor = Supervisor::new(config.supervisor_settings());
        self.start_workers(&supervisor, &publisher, &model_tx, &queue, &identity, &serial_up)?;

        let monitor_cancel = CancellationToken::new();
        tokio::select! {
            _ = shutdown => info!("Shutdown requested"),
            _ = supervisor.monitor(monitor_cancel.clone()) => {}
        }
        monitor_cancel.cancel();
        let failed = supervisor.shutdown_token().is_cancelled();

        let stragglers = supervisor.stop_all().await;
        if !stragglers.is_empty() {
            warn!("Aborted {} workers", stragglers.len());
        }
        match persist(Arc::clone(&queue), config.queue.path.clone()).await {
            Ok(n) => info!("Saved {n} queued messages"),
            Err(e) => error!("Failed to save queue: {e}"),
        }
        if let Err(e) = publisher.stop().await {
            warn!("Broker disconnect failed: {e}");
        }

        if failed {
            anyhow::bail!("Gateway stopped after a worker failure");
        }
        info!("Shutdown complete");
        Ok(())
    }

    /// Subscribe to remote panel model changes and ask for the current value.
    async fn watch_panel_model(
        &self,
        publisher: &Arc<Publisher<T>>,
        model_tx: &Arc<watch::Sender<PanelModel>>,
    ) {
        let switch = Arc::new(ModelSwitch {
            model_tx: Arc::clone(model_tx),
            publisher: Arc::downgrade(publisher),
        });

        let on_update = Arc::clone(&switch);
        publisher.subscribe_attribute(
            PANEL_MODEL_ATTRIBUTE,
            Arc::new(move |value| match value {
                Ok(value) => on_update.apply(&value),
                Err(e) => warn!("Panel model update failed: {e}"),
            }),
        );

        let on_response = Arc::clone(&switch);
        let requested = publisher
            .request_attributes(
                &[PANEL_MODEL_ATTRIBUTE],
                Box::new(move |result| match result {
                    Ok(values) => {
                        if let Some(value) = values.get(PANEL_MODEL_ATTRIBUTE) {
                            on_response.apply(value);
                        }
                    }
                    Err(e) => warn!("Panel model request failed: {e}"),
                }),
            )
            .await;
        if let Err(e) = requested {
            warn!("Could not request {PANEL_MODEL_ATTRIBUTE}: {e}");
        }
    }

    fn start_workers(
        &self,
        supervisor: &Supervisor,
        publisher: &Arc<Publisher<T>>,
        model_tx: &Arc<watch::Sender<PanelModel>>,
        queue: &Arc<DurableQueue>,
        identity: &ClientIdentity,
        serial_up: &Arc<AtomicBool>,
    ) -> Result<()> {
        let config = &self.config;
        let restart = RestartPolicy::Restart {
            max_restarts: config.supervisor.max_restarts,
        };

        let ingest = IngestWorker {
            opener: Arc::clone(&self.opener),
            model_tx: Arc::clone(model_tx),
            overrides: config.serial.overrides.clone(),
            severity: Arc::clone(&self.severity),
            identity: identity.clone(),
            queue: Arc::clone(queue),
            serial_up: Arc::clone(serial_up),
            settings: config.ingest_settings(),
        };
        supervisor.start(
            "serial",
            restart,
            worker_fn(move |cancel| ingest.build().run(cancel)),
        )?;

        let drain = Arc::clone(publisher);
        supervisor.start(
            "publisher",
            RestartPolicy::Escalate,
            worker_fn(move |cancel| {
                let drain = Arc::clone(&drain);
                async move { drain.run(cancel).await }
            }),
        )?;

        let snapshot_queue = Arc::clone(queue);
        let snapshot_path: PathBuf = config.queue.path.clone();
        let interval = config.snapshot_interval();
        supervisor.start(
            "snapshot",
            restart,
            worker_fn(move |cancel| {
                Snapshotter::new(Arc::clone(&snapshot_queue), snapshot_path.clone(), interval)
                    .run(cancel)
            }),
        )?;

        if let Some(relay) = &config.relay_monitor {
            let (alarm, trouble) = relay_contacts(relay);
            let relay_publisher = Arc::clone(publisher);
            let interval = Duration::from_secs(relay.publish_interval_secs);
            supervisor.start(
                "relay",
                restart,
                worker_fn(move |cancel| {
                    RelayMonitor::new(
                        Arc::clone(&relay_publisher),
                        alarm.clone(),
                        trouble.clone(),
                        interval,
                    )
                    .run(cancel)
                }),
            )?;
        }
        Ok(())
    }
}

fn relay_contacts(relay: &RelayToml) -> (SysfsContact, SysfsContact) {
    let alarm = SysfsContact::with_root(&relay.gpio_root, relay.alarm_pin, relay.alarm_active_high);
    let trouble = SysfsContact::with_root(
        &relay.gpio_root,
        relay.trouble_pin,
        relay.trouble_active_high,
    );
    for contact in [&alarm, &trouble] {
        if let Err(e) = contact.export() {
            warn!("GPIO export failed: {e}");
        }
    }
    (alarm, trouble)
}

/// Everything needed to build a fresh ingestion worker on each (re)start.
struct IngestWorker<O: PortOpener> {
    opener: Arc<O>,
    model_tx: Arc<watch::Sender<PanelModel>>,
    overrides: SerialOverrides,
    severity: Arc<SeverityTable>,
    identity: ClientIdentity,
    queue: Arc<DurableQueue>,
    serial_up: Arc<AtomicBool>,
    settings: IngestSettings,
}

impl<O: PortOpener> IngestWorker<O> {
    fn build(&self) -> SerialIngest<O> {
        SerialIngest::new(
            Arc::clone(&self.opener),
            self.model_tx.subscribe(),
            self.overrides.clone(),
            Arc::clone(&self.severity),
            self.identity.clone(),
            Arc::clone(&self.queue),
            Arc::clone(&self.serial_up),
            self.settings.clone(),
        )
    }
}
