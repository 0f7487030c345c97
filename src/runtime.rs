//! Host runtime.
//!
//! Runs the firmware core on tokio. The board's execution contexts become tasks:
//!
//! | Board | Host |
//! |---|---|
//! | USART receive interrupt | receive pump task, bytes into the receive ring |
//! | USART transmit-ready interrupt | transmit pump task, woken by [`TxReady`] |
//! | systick | interval task calling [`Shared::systick`] |
//! | main loop | blocking thread calling [`Firmware::step`] |
//!
//! The link is any `AsyncRead`/`AsyncWrite` pair: a serial port, stdio, or an in-memory
//! duplex in tests.
//!
//! [`TxReady`]: crate::comms::TxReady

use crate::clock::Rtc;
use crate::comms::{self, ByteConsumer, ByteProducer, TxReady};
use crate::config::Settings;
use crate::configuration::FlashFile;
use crate::error::{AppResult, DaqError};
use crate::files::{HostVolume, Volume};
use crate::firmware::{BootOptions, Firmware, Peripherals, Shared};
use crate::hardware::mock::{MockAdc, MockGpio};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Longest wait for the transmit pump to flush at shutdown.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Peripherals for a host run: simulated ADC and GPIO, a directory volume and a flash
/// page file. The ADC handle is returned so callers can change the simulated inputs.
pub fn host_peripherals(settings: &Settings) -> AppResult<(Peripherals, MockAdc)> {
    let adc = MockAdc::new(settings.simulation.channel_array())
        .with_noise(settings.simulation.noise);

    let mut volume = HostVolume::new(
        &settings.storage.volume_dir,
        settings.storage.capacity_bytes,
        settings.storage.sectors_per_cluster,
    );
    if settings.storage.format_if_missing && volume.mount().is_err() {
        info!(dir = %settings.storage.volume_dir.display(), "creating volume directory");
        volume
            .format()
            .map_err(|status| DaqError::Configuration(format!("volume: {status}")))?;
    }

    Ok((
        Peripherals {
            adc: Box::new(adc.clone()),
            gpio: Box::new(MockGpio::new()),
            volume: Box::new(volume),
            flash: Box::new(FlashFile::new(&settings.storage.flash_page)),
        },
        adc,
    ))
}

/// Boot options derived from the settings.
pub fn boot_options(settings: &Settings) -> BootOptions {
    BootOptions {
        defaults: settings.defaults,
        conversion_timeout: settings.timing.conversion_timeout(),
        calibration_timeout: settings.timing.calibration_timeout(),
    }
}

/// Boot the firmware over `reader`/`writer` and run it until `shutdown` resolves, the
/// link closes, or a hardware fault stops the main loop.
///
/// Every connection point is disconnected before this returns.
pub async fn run<R, W, F>(
    settings: &Settings,
    peripherals: Peripherals,
    reader: R,
    writer: W,
    shutdown: F,
) -> AppResult<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
    F: Future<Output = ()>,
{
    let (channel, ends) = comms::channel(settings.link.rx_buffer, settings.link.tx_buffer);
    let channel = channel.with_send_timeout(settings.timing.tx_wait());
    let firmware = Firmware::boot(
        peripherals,
        channel,
        Rtc::from_host(),
        boot_options(settings),
    )?;
    let shared = firmware.shared();

    let closing = Arc::new(AtomicBool::new(false));
    let rx_task = tokio::spawn(receive_pump(reader, ends.rx, shared.clone()));
    let tx_task = tokio::spawn(transmit_pump(
        writer,
        ends.tx,
        ends.tx_ready.clone(),
        closing.clone(),
    ));
    let tick_task = tokio::spawn(systick(shared.clone(), settings.timing.systick_ms));
    let idle = settings.timing.idle();
    let mut main_task = tokio::task::spawn_blocking(move || main_loop(firmware, idle));

    let result = tokio::select! {
        joined = &mut main_task => joined,
        () = shutdown => {
            info!("shutdown requested");
            shared.request_shutdown();
            main_task.await
        }
    };
    shared.request_shutdown();

    tick_task.abort();
    rx_task.abort();
    closing.store(true, Ordering::Release);
    ends.tx_ready.request();
    finish(tx_task).await;

    match result {
        Ok(outcome) => outcome,
        Err(join) => Err(DaqError::Runtime(format!("main loop panicked: {join}"))),
    }
}

async fn finish(task: JoinHandle<()>) {
    if tokio::time::timeout(FLUSH_TIMEOUT, task).await.is_err() {
        warn!("transmit pump did not drain before shutdown");
    }
}

/// Main loop on a blocking thread.
fn main_loop(mut firmware: Firmware, idle: Duration) -> AppResult<()> {
    let shared = firmware.shared();
    let outcome = loop {
        if shared.shutdown_requested() {
            firmware.drain_commands();
            break Ok(());
        }
        match firmware.step() {
            Ok(true) => {}
            Ok(false) => std::thread::sleep(idle),
            Err(e) => {
                error!(error = %e, "fatal fault, stopping acquisition");
                break Err(e);
            }
        }
    };
    firmware.shutdown();
    let diagnostics = firmware.diagnostics();
    info!(
        rejected = diagnostics.rejected_commands,
        rx_dropped = diagnostics.rx_dropped,
        tx_dropped = diagnostics.tx_dropped,
        "main loop stopped"
    );
    outcome
}

/// Receive interrupt: move bytes from the link into the receive ring.
async fn receive_pump<R>(mut reader: R, mut rx: ByteProducer, shared: Arc<Shared>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 64];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                info!("link closed by peer");
                shared.request_shutdown();
                return;
            }
            Ok(n) => {
                let stored = rx.push_all(&buf[..n]);
                if stored < n {
                    debug!(lost = n - stored, "receive ring full");
                }
            }
            Err(e) => {
                warn!(error = %e, "link read failed");
                shared.request_shutdown();
                return;
            }
        }
    }
}

/// Transmit-ready interrupt: drain the transmit ring whenever output is queued.
async fn transmit_pump<W>(
    mut writer: W,
    mut tx: ByteConsumer,
    tx_ready: Arc<TxReady>,
    closing: Arc<AtomicBool>,
) where
    W: AsyncWrite + Unpin,
{
    let mut out = Vec::with_capacity(256);
    loop {
        tx_ready.wait().await;
        out.clear();
        tx.drain_into(&mut out);
        if tx.is_empty() {
            tx_ready.disable();
        }
        if !out.is_empty() {
            if let Err(e) = writer.write_all(&out).await {
                warn!(error = %e, "link write failed");
                return;
            }
            if let Err(e) = writer.flush().await {
                warn!(error = %e, "link flush failed");
            }
        }
        if closing.load(Ordering::Acquire) && tx.is_empty() {
            return;
        }
    }
}

/// Systick: one [`Shared::systick`] call per simulated millisecond.
async fn systick(shared: Arc<Shared>, period_ms: u64) {
    let mut interval = tokio::time::interval(Duration::from_millis(period_ms.max(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Burst);
    loop {
        interval.tick().await;
        for _ in 0..period_ms.max(1) {
            shared.systick();
        }
    }
}

/// Open the configured serial device.
#[cfg(feature = "serial")]
pub fn open_serial(settings: &Settings) -> AppResult<tokio_serial::SerialStream> {
    use tokio_serial::SerialPortBuilderExt;

    let path = settings
        .link
        .port
        .as_deref()
        .ok_or_else(|| DaqError::Serial("no serial port configured".to_string()))?;
    tokio_serial::new(path, settings.link.baud_rate)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(tokio_serial::FlowControl::None)
        .open_native_async()
        .map_err(|e| DaqError::Serial(format!("{path}: {e}")))
}
