//! Receiver transport.
//!
//! The receiver is wired to a serial port at 115200 baud, 8N1, no flow
//! control. Reads time out after one second so a cycle never hangs waiting
//! for navigation data. Ports named `stub://...` select a synthetic receiver
//! that emits well-formed SBF.

use rand::Rng;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{self, Read};

use crate::config::ReceiverSettings;
use crate::error::{AcquisitionError, Device};
use crate::sbf::{encode_pvt_geodetic, frame_block, BlockId, PvtGeodetic, PVT_GEODETIC};

/// An open byte stream from the receiver.
pub enum ReceiverStream {
    Serial(Box<dyn SerialPort>),
    Synthetic(SyntheticReceiver),
}

impl Read for ReceiverStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ReceiverStream::Serial(port) => port.read(buf),
            ReceiverStream::Synthetic(receiver) => receiver.read(buf),
        }
    }
}

/// Open the receiver port with the fixed line settings.
pub fn open_receiver(settings: &ReceiverSettings) -> Result<ReceiverStream, AcquisitionError> {
    if let Some(name) = settings.port.strip_prefix("stub://") {
        log::info!("receiver: using synthetic stream {}", settings.port);
        return Ok(ReceiverStream::Synthetic(SyntheticReceiver::new(
            name == "nofix",
        )));
    }

    let port = serialport::new(&settings.port, settings.baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(settings.read_timeout)
        .open()
        .map_err(|err| {
            AcquisitionError::unavailable(
                Device::Receiver,
                format!("{}: {}", settings.port, err),
            )
        })?;
    log::info!(
        "receiver: opened {} at {} baud",
        settings.port,
        settings.baud_rate
    );
    Ok(ReceiverStream::Serial(port))
}

/// Emits one ReceiverStatus block and one PVTGeodetic block per read,
/// advancing time of week by one second each time.
pub struct SyntheticReceiver {
    no_fix: bool,
    time_of_week_ms: u32,
    week_number: u16,
    pending: Vec<u8>,
}

impl SyntheticReceiver {
    const ORIGIN_LAT_RAD: f64 = 0.910_386;
    const ORIGIN_LON_RAD: f64 = 0.079_412;
    const ORIGIN_HEIGHT_M: f64 = 96.5;

    pub fn new(no_fix: bool) -> Self {
        Self {
            no_fix,
            time_of_week_ms: 0,
            week_number: 2345,
            pending: Vec::new(),
        }
    }

    fn next_epoch(&mut self) -> Vec<u8> {
        self.time_of_week_ms = self.time_of_week_ms.wrapping_add(1000) % 604_800_000;

        let pvt = if self.no_fix {
            PvtGeodetic::no_fix(self.time_of_week_ms, self.week_number)
        } else {
            let mut rng = rand::thread_rng();
            PvtGeodetic {
                time_of_week_ms: self.time_of_week_ms,
                week_number: self.week_number,
                mode: 1,
                error: 0,
                latitude_rad: Self::ORIGIN_LAT_RAD + rng.gen_range(-1e-7..1e-7),
                longitude_rad: Self::ORIGIN_LON_RAD + rng.gen_range(-1e-7..1e-7),
                height_m: Self::ORIGIN_HEIGHT_M + rng.gen_range(-0.5..0.5),
                undulation_m: 47.1,
                velocity_north_mps: 0.0,
                velocity_east_mps: 0.0,
                velocity_up_mps: 0.0,
                course_over_ground_deg: -2e10,
                time_system: 0,
                datum: 0,
                satellites_used: rng.gen_range(7..14),
                horizontal_accuracy_cm: rng.gen_range(80..250),
                vertical_accuracy_cm: rng.gen_range(120..400),
            }
        };

        let mut bytes = frame_block(BlockId::new(4014, 1), &[0u8; 24]);
        bytes.extend(encode_pvt_geodetic(BlockId::new(PVT_GEODETIC, 2), &pvt));
        bytes
    }
}

impl Read for SyntheticReceiver {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            self.pending = self.next_epoch();
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}
