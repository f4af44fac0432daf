//! Example of per-peer subscription on the peripheral side
//!
//! Two centrals connect; the second one turns its time notifications off
//! again, so only the first receives timestamps.

use bletestbed::gatt::{BdAddr, Device, GattClientConfig, GattServerConfig, ServerEvent};
use bletestbed::registry::{
    CHARACTERISTIC_TIME_UUID, CLIENT_CONFIGURATION_DESCRIPTOR_UUID, DISABLE_NOTIFICATION_VALUE,
};
use bletestbed::LoopbackRadio;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let radio = LoopbackRadio::new();
    let peripheral: BdAddr = "AA:BB:CC:DD:EE:02".parse()?;
    let mut server = radio.gatt_server(peripheral, "clock", GattServerConfig::default());
    server.start()?;

    let mut subscribed = radio.gatt_client("11:11:11:11:11:11".parse()?, GattClientConfig::default());
    let mut muted = radio.gatt_client("22:22:22:22:22:22".parse()?, GattClientConfig::default());
    subscribed.set_message_callback(|_, message| println!("subscribed <- {}", message));
    muted.set_message_callback(|_, message| println!("muted <- {}", message));

    let device = Device::new(peripheral);
    subscribed.connect(&device)?;
    muted.connect(&device)?;
    for _ in 0..4 {
        server.process_events();
        subscribed.process_events();
        muted.process_events();
    }

    // Same request the platform delivers when a peer rewrites its descriptor
    server.event_sender().post(ServerEvent::DescriptorWriteRequest {
        peer: muted.adapter().address(),
        request_id: 0,
        characteristic: CHARACTERISTIC_TIME_UUID,
        descriptor: CLIENT_CONFIGURATION_DESCRIPTOR_UUID,
        response_needed: false,
        value: DISABLE_NOTIFICATION_VALUE.to_vec(),
    });
    server.process_events();

    for _ in 0..3 {
        let pushed = server.send_timestamp()?;
        println!("Timestamp pushed to {} peer(s)", pushed);
        subscribed.process_events();
        muted.process_events();
    }

    Ok(())
}
