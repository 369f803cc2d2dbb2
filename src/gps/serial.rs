//! NMEA-0183 GPS receiver on a serial port

use super::connection::{LocationEvent, LocationProvider};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bridge_shared::location::MPS_PER_KNOT;
use bridge_shared::nmea::{parse_sentence, Gga, NmeaSentence, Rmc};
use bridge_shared::{Location, ProviderStatus};
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

/// Default baud rate of most NMEA receivers
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Combines RMC and GGA sentences into location events
#[derive(Debug, Default)]
pub struct FixAssembler {
    last_gga: Option<Gga>,
    status: Option<ProviderStatus>,
}

impl FixAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one sentence; returns the events it produces
    pub fn push(&mut self, sentence: NmeaSentence) -> Vec<LocationEvent> {
        match sentence {
            NmeaSentence::Gga(gga) => {
                self.last_gga = Some(gga);
                Vec::new()
            }
            NmeaSentence::Rmc(rmc) => self.on_rmc(rmc),
            NmeaSentence::Other(_) => Vec::new(),
        }
    }

    fn on_rmc(&mut self, rmc: Rmc) -> Vec<LocationEvent> {
        let mut events = Vec::new();

        let position = match (rmc.active, rmc.latitude, rmc.longitude) {
            (true, Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        };
        let status = if position.is_some() {
            ProviderStatus::Available
        } else {
            ProviderStatus::TemporarilyUnavailable
        };

        if self.status != Some(status) {
            self.status = Some(status);
            events.push(LocationEvent::StatusChanged(status));
        }

        if let Some((latitude, longitude)) = position {
            let mut location = Location::new(latitude, longitude);
            location.speed_mps = rmc.speed_knots.map(|knots| knots * MPS_PER_KNOT);
            location.bearing_deg = rmc.course_deg;

            if let Some(gga) = self.last_gga.as_ref().filter(|g| g.fix_quality > 0) {
                location.altitude_m = gga.altitude_m;
                location.satellites = gga.satellites;
                location.hdop = gga.hdop;
            }
            events.push(LocationEvent::LocationChanged(location));
        }

        events
    }
}

/// Read sentences from `reader` and forward events until end of input
///
/// Sends `ProviderEnabled` first and `OutOfService` + `ProviderDisabled`
/// when the input ends or fails. Location events are throttled to one per
/// `min_interval`; status events are never dropped.
pub async fn stream_events<R>(
    reader: R,
    tx: mpsc::Sender<LocationEvent>,
    min_interval: Duration,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    tx.send(LocationEvent::ProviderEnabled).await?;

    let result = pump_sentences(reader, &tx, min_interval).await;
    if let Err(ref e) = result {
        warn!("[GPS] Receiver read failed: {}", e);
    }

    let _ = tx
        .send(LocationEvent::StatusChanged(ProviderStatus::OutOfService))
        .await;
    let _ = tx.send(LocationEvent::ProviderDisabled).await;
    result
}

async fn pump_sentences<R>(
    mut reader: R,
    tx: &mpsc::Sender<LocationEvent>,
    min_interval: Duration,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut assembler = FixAssembler::new();
    let mut last_fix: Option<Instant> = None;
    let mut line = Vec::with_capacity(128);

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            return Ok(());
        }

        // Receivers emit garbage while syncing; don't reject the stream for it
        let text = String::from_utf8_lossy(&line);
        let sentence = match parse_sentence(&text) {
            Ok(sentence) => sentence,
            Err(e) => {
                debug!("[GPS] Skipping sentence: {}", e);
                continue;
            }
        };

        for event in assembler.push(sentence) {
            if matches!(event, LocationEvent::LocationChanged(_)) {
                let now = Instant::now();
                if last_fix.is_some_and(|t| now.duration_since(t) < min_interval) {
                    continue;
                }
                last_fix = Some(now);
            }
            if tx.send(event).await.is_err() {
                return Err(anyhow!("location receiver dropped"));
            }
        }
    }
}

/// GPS receiver attached to a serial port
pub struct NmeaSerialProvider {
    port: String,
    baud: u32,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl NmeaSerialProvider {
    pub fn new(port: impl Into<String>, baud: u32) -> Self {
        Self {
            port: port.into(),
            baud,
            task: Mutex::new(None),
        }
    }

    fn replace_task(&self, task: Option<JoinHandle<()>>) {
        let previous = {
            let mut slot = self.task.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *slot, task)
        };
        if let Some(previous) = previous {
            previous.abort();
        }
    }
}

#[async_trait]
impl LocationProvider for NmeaSerialProvider {
    async fn request_updates(&self, min_interval: Duration) -> Result<mpsc::Receiver<LocationEvent>> {
        let port = tokio_serial::new(&self.port, self.baud)
            .open_native_async()
            .map_err(|e| anyhow!("failed to open GPS port {}: {}", self.port, e))?;
        info!("[GPS] Reading NMEA from {} at {} baud", self.port, self.baud);

        let (tx, rx) = mpsc::channel(64);
        let port_name = self.port.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = stream_events(BufReader::new(port), tx, min_interval).await {
                debug!("[GPS] {} stopped: {}", port_name, e);
            }
        });
        self.replace_task(Some(task));

        Ok(rx)
    }

    async fn remove_updates(&self) {
        self.replace_task(None);
    }
}
