use core::cell::RefCell;

use embassy_executor::task;
use embassy_stm32::peripherals::{DMA1_CH1, USART3};
use embassy_stm32::usart::UartRx;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::channel::Sender;
use embassy_time::Instant;

use crate::drivers::bno055::{decode_reading, Bno055Reading, Frame, FrameParser, RequestSlot};

/// BNO055 RX pump — feeds every received byte through the frame parser and
/// publishes the decoded reading for the request it answers.
#[task]
pub async fn bno055_rx_task(
    mut imu_rx: UartRx<'static, USART3, DMA1_CH1>,
    request_slot: &'static Mutex<CriticalSectionRawMutex, RefCell<RequestSlot>>,
    reading_tx: Sender<'static, CriticalSectionRawMutex, Bno055Reading, 1>,
) {
    let mut parser = FrameParser::new();
    let mut buf = [0u8; 32];

    loop {
        // Replies are short (≤ 18 bytes); one idle gap ends a burst.
        let n = match imu_rx.read_until_idle(&mut buf).await {
            Ok(n) => n,
            Err(_) => continue, // framing/overrun noise; the parser resyncs
        };

        let now_ms = Instant::now().as_millis() as u32;
        for &byte in &buf[..n] {
            match parser.push_byte(byte, now_ms) {
                Some(Frame::Ack(status)) => {
                    // Write commands are acknowledged; nothing examines the status.
                    defmt::trace!("bno055 ack status={=u8}", status);
                }
                Some(Frame::Data(payload)) => {
                    let kind = request_slot.lock(|slot| slot.borrow_mut().take(now_ms));
                    let Some(kind) = kind else {
                        defmt::debug!("bno055: unsolicited or late data frame dropped");
                        continue;
                    };
                    match decode_reading(kind, &payload) {
                        Some(reading) => {
                            let _ = reading_tx.try_send(reading);
                        }
                        None => defmt::warn!("bno055: short payload for {}", kind),
                    }
                }
                None => {}
            }
        }
    }
}
