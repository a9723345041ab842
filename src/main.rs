#[cfg(target_os = "espidf")]
#[embassy_executor::main]
async fn main(_spawner: embassy_executor::Spawner) {
    // It is necessary to call this function once. Otherwise some patches to the runtime
    // implemented by esp-idf-sys might not link properly. See https://github.com/esp-rs/esp-idf-template/issues/71
    esp_idf_svc::sys::link_patches();

    // Bind the log crate to the ESP Logging facilities
    esp_idf_svc::log::EspLogger::initialize_default();

    if let Err(e) = roaster_rs::firmware::run().await {
        log::error!("Roaster firmware stopped: {:?}", e);
    }
}

#[cfg(not(target_os = "espidf"))]
fn main() {
    eprintln!("roaster-rs is firmware for ESP32 (target_os = \"espidf\"); build it for an ESP-IDF target.");
}
