//! Device wiring: peripherals, Wi-Fi, storage and the control loop.

pub mod server;
pub mod wifi;

use crate::{
    config::RoasterConfig,
    controller::RoastController,
    hardware::{BurstOutput, FanController, Max31855},
    protocol::{InboundMessage, Outbound},
    runtime::Roaster,
    session_log::SessionLog,
    status::StatusSnapshot,
    storage::{FileGainStore, GainStore, MemoryGainStore, NvsGainStore},
};
use embassy_futures::select::{select, Either};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel, mutex::Mutex};
use embassy_time::{Instant, Timer};
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::hal::gpio::PinDriver;
use esp_idf_svc::hal::prelude::*;
use esp_idf_svc::hal::spi::{config::Config as SpiConfig, SpiDeviceDriver, SpiDriver, SpiDriverConfig};
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::sys::{esp, esp_vfs_spiffs_conf_t, esp_vfs_spiffs_register};
use log::{info, warn};
use std::ffi::CString;
use std::sync::Arc;

pub type CommandChannel = Channel<CriticalSectionRawMutex, InboundMessage, 8>;
pub type OutboundChannel = Channel<CriticalSectionRawMutex, String, 32>;
pub type SharedStatus = Arc<Mutex<CriticalSectionRawMutex, StatusSnapshot>>;

const SPIFFS_BASE_PATH: &str = "/spiffs";

pub async fn run() -> anyhow::Result<()> {
    let config = RoasterConfig::default();
    info!("Starting coffee roaster controller");

    let peripherals = Peripherals::take()?;
    let sys_loop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    // Outputs first so the element is held low before anything else can fail.
    let triac = BurstOutput::new(PinDriver::output(peripherals.pins.gpio4)?, config.triac_period())?;
    let fan = FanController::new(PinDriver::output(peripherals.pins.gpio5)?)?;

    let spi = SpiDriver::new(
        peripherals.spi2,
        peripherals.pins.gpio18,
        peripherals.pins.gpio23,
        Some(peripherals.pins.gpio19),
        &SpiDriverConfig::new(),
    )?;
    let spi = SpiDeviceDriver::new(
        spi,
        Some(peripherals.pins.gpio15),
        &SpiConfig::new().baudrate(4.MHz().into()),
    )?;
    let sensor = Max31855::new(spi);

    let _wifi = wifi::start_access_point(
        peripherals.modem,
        sys_loop,
        nvs.clone(),
        &config.ap_ssid,
        &config.ap_password,
    )?;

    let spiffs_mounted = match mount_spiffs() {
        Ok(()) => true,
        Err(e) => {
            warn!("SPIFFS mount failed: {:?} - session log disabled", e);
            false
        }
    };
    let session_log = spiffs_mounted.then(|| SessionLog::new(&config.session_log_path));

    let gain_store: Box<dyn GainStore> = match NvsGainStore::new(nvs) {
        Ok(store) => Box::new(store),
        Err(e) if spiffs_mounted => {
            warn!("NVS unavailable ({}), keeping gains in {}", e, config.gains_path);
            Box::new(FileGainStore::new(&config.gains_path))
        }
        Err(e) => {
            warn!("NVS unavailable ({}), gains will not survive a reboot", e);
            Box::new(MemoryGainStore::default())
        }
    };

    let controller = RoastController::new(
        sensor,
        triac,
        fan,
        config.default_gains,
        config.derivative_mode,
    )
    .with_output_limits(config.output_min, config.output_max)
    .with_max_sensor_faults(config.max_sensor_faults)
    .with_profile(config.profile);

    let mut roaster = Roaster::new(controller, &config, session_log, gain_store);
    roaster.load_config();

    let commands = Arc::new(CommandChannel::new());
    let outbound = Arc::new(OutboundChannel::new());
    let status: SharedStatus = Arc::new(Mutex::new(roaster.snapshot()));

    let _server = server::start(
        config.http_port,
        config.session_log_path.clone(),
        Arc::clone(&commands),
        Arc::clone(&outbound),
        Arc::clone(&status),
    )?;

    info!("Starting roast control loop");
    loop {
        for message in roaster.poll(Instant::now()) {
            publish(&outbound, &message);
        }
        *status.lock().await = roaster.snapshot();

        match select(commands.receive(), Timer::after(config.fast_tick())).await {
            Either::First(message) => {
                for reply in roaster.apply_message(&message) {
                    publish(&outbound, &reply);
                }
            }
            Either::Second(()) => {}
        }
    }
}

fn publish(outbound: &OutboundChannel, message: &Outbound) {
    match message.to_json() {
        Ok(json) => {
            if outbound.try_send(json).is_err() {
                warn!("Outbound queue full, dropping {:?}", message);
            }
        }
        Err(e) => warn!("Failed to encode {:?}: {}", message, e),
    }
}

fn mount_spiffs() -> anyhow::Result<()> {
    let base_path = CString::new(SPIFFS_BASE_PATH)?;
    let conf = esp_vfs_spiffs_conf_t {
        base_path: base_path.as_ptr(),
        partition_label: core::ptr::null(),
        max_files: 4,
        format_if_mount_failed: true,
    };
    esp!(unsafe { esp_vfs_spiffs_register(&conf) })?;
    info!("SPIFFS mounted at {}", SPIFFS_BASE_PATH);
    Ok(())
}
