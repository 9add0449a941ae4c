use super::{
    DEVICE_NAME, MIDI_CHARACTERISTIC, NotificationFn, StopReason, Transport, TransportError,
};
use btleplug::api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use crossbeam::channel::Sender;
use futures::StreamExt;
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

const SCAN_TIMEOUT: Duration = Duration::from_secs(10);
const SCAN_POLL: Duration = Duration::from_millis(500);

/// The keyboard's Bluetooth LE link.
pub struct BleTransport {
    runtime: Runtime,
    use_bdaddr: bool,
    peripheral: Option<Peripheral>,
    characteristic: Option<Characteristic>,
    listener: Option<JoinHandle<()>>,
}

fn link(e: btleplug::Error) -> TransportError {
    TransportError::Link(e.to_string())
}

impl BleTransport {
    pub fn new(use_bdaddr: bool) -> Result<Self, TransportError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .map_err(|e| TransportError::Link(e.to_string()))?;

        if use_bdaddr && !cfg!(target_os = "macos") {
            debug!("--macos-use-bdaddr only changes device identity on macOS");
        }

        Ok(Self {
            runtime,
            use_bdaddr,
            peripheral: None,
            characteristic: None,
            listener: None,
        })
    }

    async fn find_device(&self, adapter: &Adapter) -> Result<Peripheral, TransportError> {
        adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(link)?;

        let deadline = Instant::now() + SCAN_TIMEOUT;
        while Instant::now() < deadline {
            for peripheral in adapter.peripherals().await.map_err(link)? {
                let Ok(Some(props)) = peripheral.properties().await else {
                    continue;
                };
                if props.local_name.as_deref() == Some(DEVICE_NAME) {
                    if self.use_bdaddr {
                        info!("found {} at {}", DEVICE_NAME, props.address);
                    } else {
                        info!("found {} ({:?})", DEVICE_NAME, peripheral.id());
                    }
                    let _ = adapter.stop_scan().await;
                    return Ok(peripheral);
                }
            }
            tokio::time::sleep(SCAN_POLL).await;
        }

        let _ = adapter.stop_scan().await;
        Err(TransportError::DeviceNotFound(DEVICE_NAME.to_string()))
    }
}

impl Transport for BleTransport {
    fn connect(&mut self) -> Result<(), TransportError> {
        let characteristic_id =
            Uuid::parse_str(MIDI_CHARACTERISTIC).map_err(|e| TransportError::Link(e.to_string()))?;

        let (peripheral, characteristic) = self.runtime.block_on(async {
            info!("starting scan...");
            let manager = Manager::new().await.map_err(link)?;
            let adapter = manager
                .adapters()
                .await
                .map_err(link)?
                .into_iter()
                .next()
                .ok_or(TransportError::NoAdapter)?;

            let peripheral = self.find_device(&adapter).await?;

            info!("connecting to device...");
            peripheral.connect().await.map_err(link)?;
            peripheral.discover_services().await.map_err(link)?;

            let characteristic = peripheral
                .characteristics()
                .into_iter()
                .find(|c| c.uuid == characteristic_id)
                .ok_or_else(|| {
                    TransportError::Link(format!("characteristic {MIDI_CHARACTERISTIC} missing"))
                })?;

            Ok::<_, TransportError>((peripheral, characteristic))
        })?;

        self.peripheral = Some(peripheral);
        self.characteristic = Some(characteristic);
        Ok(())
    }

    fn subscribe(
        &mut self,
        mut on_notification: NotificationFn,
        stop: Sender<StopReason>,
    ) -> Result<(), TransportError> {
        let (Some(peripheral), Some(characteristic)) = (&self.peripheral, &self.characteristic)
        else {
            return Err(TransportError::Link("not connected".into()));
        };

        let notifications = self.runtime.block_on(async {
            peripheral.subscribe(characteristic).await.map_err(link)?;
            peripheral.notifications().await.map_err(link)
        })?;

        let uuid = characteristic.uuid;
        self.listener = Some(self.runtime.spawn(async move {
            let mut notifications = notifications;
            while let Some(notification) = notifications.next().await {
                if notification.uuid == uuid {
                    on_notification(notification.value);
                }
            }
            warn!("notification stream ended");
            let _ = stop.send(StopReason::TransportClosed);
        }));
        Ok(())
    }

    fn unsubscribe(&mut self) -> Result<(), TransportError> {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        let (Some(peripheral), Some(characteristic)) = (&self.peripheral, &self.characteristic)
        else {
            return Ok(());
        };
        self.runtime
            .block_on(peripheral.unsubscribe(characteristic))
            .map_err(link)
    }

    fn disconnect(&mut self) {
        if let Some(peripheral) = self.peripheral.take() {
            if let Err(e) = self.runtime.block_on(peripheral.disconnect()) {
                warn!("disconnect failed: {}", e);
            }
            info!("disconnected");
        }
    }
}
