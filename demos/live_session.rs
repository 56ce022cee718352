use std::sync::{Arc, Mutex};
use std::time::Duration;

use knee_rehab_core::{
    ConnectionManager, DeviceInfo, LegAngles, LinkEvent, OrientationProcessor,
    RepetitionDetector, SensorId, SensorLink, SensorPacket, Side, TransportError, codec,
};
use nalgebra::{UnitQuaternion, Vector3};
use tokio::sync::mpsc;

const SAMPLE_PERIOD: Duration = Duration::from_millis(20); // 50 Hz notifications

/// Stands in for the radio: streams three slow knee bends, then ends the stream
struct SimulatedArray;

impl SensorLink for SimulatedArray {
    async fn request_device(&self) -> Result<DeviceInfo, TransportError> {
        Ok(DeviceInfo {
            id: "00:11:22:33:44:55".to_string(),
            name: "KneeSensor-Demo".to_string(),
        })
    }

    async fn connect(
        &self,
        _device: &DeviceInfo,
    ) -> Result<mpsc::Receiver<LinkEvent>, TransportError> {
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            for i in 0..300u32 {
                // replace this with notifications from the real sensor array
                let bend = 65.0 * (1.0 - (i as f32 / 100.0 * 2.0 * std::f32::consts::PI).cos());
                let shin = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), bend.to_radians());
                let packet = SensorPacket::identity(i * 20)
                    .with_orientation(SensorId::RightShin, shin.into_inner());

                let bytes = codec::encode_binary(&packet).to_vec();
                if tx.send(LinkEvent::Notification(bytes)).await.is_err() {
                    return;
                }
                tokio::time::sleep(SAMPLE_PERIOD).await;
            }
        });
        Ok(rx)
    }

    async fn disconnect(&self) {}
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), TransportError> {
    let manager = ConnectionManager::new(SimulatedArray);
    let pipeline = Arc::new(Mutex::new((
        OrientationProcessor::new(),
        RepetitionDetector::new(80.0),
    )));

    let _state = manager.on_state_change(|state| println!("Connection: {:?}", state.status));

    let session = Arc::clone(&pipeline);
    let _data = manager.on_data_received(move |packet| {
        let mut session = session.lock().unwrap();
        let (processor, detector) = &mut *session;

        // the first packet of a session defines the reference pose
        if !processor.is_calibrated() {
            processor.calibrate(packet);
        }
        let processed = processor.process(packet, true);
        let knee = LegAngles::from_packet(&processed).knee(Side::Right);

        if detector.feed(knee) {
            println!("Rep {} at {:.1}°", detector.rep_count(), knee);
        }
    });

    manager.request_device().await?;
    manager.connect().await?;
    tokio::time::sleep(SAMPLE_PERIOD * 320).await;
    manager.disconnect().await;

    let total = pipeline.lock().unwrap().1.rep_count();
    println!("Total reps: {total}");
    Ok(())
}
