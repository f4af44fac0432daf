//! Example running a full echo session over the in-memory radio
//!
//! A peripheral advertises the echo service, a central scans for it,
//! connects, completes the notification handshake and sends a few messages.
//! Run with `RUST_LOG=debug` to see every session step.

use std::time::Instant;

use bletestbed::gatt::{BdAddr, GattClientConfig, GattServerConfig, SessionState};
use bletestbed::LoopbackRadio;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let radio = LoopbackRadio::new();
    let peripheral: BdAddr = "AA:BB:CC:DD:EE:01".parse()?;
    let central: BdAddr = "11:22:33:44:55:66".parse()?;

    let mut server = radio.gatt_server(peripheral, "bletestbed", GattServerConfig::default());
    server.set_log_callback(Box::new(|level: log::Level, message: &str| {
        println!("[server {}] {}", level, message)
    }));
    server.start()?;

    let mut client = radio.gatt_client(central, GattClientConfig::default());
    client.set_log_callback(Box::new(|level: log::Level, message: &str| {
        println!("[client {}] {}", level, message)
    }));
    client.set_message_callback(|uuid, message| println!("Received on {}: {}", uuid, message));

    client.start_scan()?;
    let scan_end = client.scan_deadline().ok_or("scan did not start")?;
    server.process_events();
    client.process_events();
    // The loopback radio reports at once, so skip ahead to the end of the window
    client.poll(Instant::now().max(scan_end));

    let device = client
        .scan_results()
        .get(&peripheral)
        .cloned()
        .ok_or("peripheral not found")?;
    println!("Found {} ({:?})", device.address, device.name);

    client.connect(&device)?;
    while client.state() != SessionState::Ready {
        server.process_events();
        client.process_events();
        if client.state() == SessionState::Disconnected {
            return Err("session failed".into());
        }
    }
    println!("Session ready");

    for message in ["hello", "bluetooth", "echo"] {
        client.send_text(message)?;
        server.process_events();
        client.process_events();
    }

    server.send_timestamp()?;
    client.process_events();

    client.disconnect();
    server.process_events();
    println!("Connected peers after disconnect: {}", server.connected_peers().len());

    Ok(())
}
