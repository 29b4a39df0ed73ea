//! Mock capture source standing in for a depth camera.
//!
//! Every tick yields the payloads a real capture session produces for one
//! frame:
//!
//! ```text
//! <frame>.jpg          synthetic JPEG-framed image
//! <frame>.bin          float16 depth map, copied out of a stride-padded buffer
//! <event>.csv          camera intrinsics (first frame of the event only)
//! imu_<event>.csv      one device-motion sample
//! ```

use chrono::{DateTime, TimeZone};
use depthlink_core::sensor::{
    encode_calibration, encode_depth_frame, encode_imu_sample, DepthBuffer, ImuSample, Intrinsics,
    DEPTH_ELEMENT_SIZE,
};
use depthlink_core::{naming, ContentKind, EncodeError, Payload};

// ── Configuration ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub image_bytes:  usize,
    pub depth_width:  usize,
    pub depth_height: usize,
    /// Row padding of the depth buffer in bytes.
    pub depth_padding: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            image_bytes:   48 * 1024,
            depth_width:   256,
            depth_height:  192,
            depth_padding: 64,
        }
    }
}

// ── MockCapture ───────────────────────────────────────────────────────────────

pub struct MockCapture {
    config: CaptureConfig,
    /// Event name and IMU file stem, fixed by the first frame.
    event: Option<(String, String)>,
    frame_counter: u64,
    depth_scratch: Vec<u8>,
}

impl MockCapture {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            event: None,
            frame_counter: 0,
            depth_scratch: Vec::new(),
        }
    }

    /// Event name of the running session, once the first frame was taken.
    pub fn event(&self) -> Option<&str> {
        self.event.as_ref().map(|(event, _)| event.as_str())
    }

    pub fn frames_taken(&self) -> u64 {
        self.frame_counter
    }

    /// Produce the payloads for one frame captured at `now`.
    pub fn next_frame<Tz: TimeZone>(&mut self, now: &DateTime<Tz>) -> Result<Vec<Payload>, EncodeError>
    where
        Tz::Offset: std::fmt::Display,
    {
        let mut out = Vec::with_capacity(4);

        let imu = match &self.event {
            Some((_, imu)) => imu.clone(),
            None => {
                let event = naming::event_name(now);
                let imu = naming::imu_name(now);
                out.push(Payload::new(
                    ContentKind::Metadata,
                    format!("{}.csv", event),
                    encode_calibration(&mock_intrinsics()),
                ));
                self.event = Some((event, imu.clone()));
                imu
            }
        };

        let counter = self.frame_counter;
        let frame = naming::frame_name(now, counter);
        out.push(Payload::new(
            ContentKind::Image,
            format!("{}.jpg", frame),
            synthetic_jpeg(self.config.image_bytes, counter),
        ));
        out.push(Payload::new(
            ContentKind::Binary,
            format!("{}.bin", frame),
            self.depth_frame(counter)?,
        ));

        let sample = mock_imu(now.timestamp_millis() as f64 / 1000.0, counter);
        out.push(Payload::new(
            ContentKind::Metadata,
            format!("{}.csv", imu),
            encode_imu_sample(&sample),
        ));

        self.frame_counter += 1;
        Ok(out)
    }

    fn depth_frame(&mut self, counter: u64) -> Result<Vec<u8>, EncodeError> {
        let CaptureConfig { depth_width: w, depth_height: h, depth_padding, .. } = self.config;
        let stride = w * DEPTH_ELEMENT_SIZE + depth_padding;

        self.depth_scratch.clear();
        self.depth_scratch.resize(stride * h, 0xEE);
        for (y, row) in self.depth_scratch.chunks_mut(stride).enumerate() {
            for x in 0..w {
                // float16 values in [1.0, 2.0): exponent 0x3C00 plus a moving ramp.
                let mantissa = ((x + y) as u64 + counter) % 0x400;
                let bits = 0x3C00u16 | mantissa as u16;
                row[x * DEPTH_ELEMENT_SIZE..(x + 1) * DEPTH_ELEMENT_SIZE].copy_from_slice(&bits.to_le_bytes());
            }
        }

        encode_depth_frame(&DepthBuffer {
            data: &self.depth_scratch,
            width: w,
            height: h,
            bytes_per_row: stride,
            element_size: DEPTH_ELEMENT_SIZE,
        })
    }
}

// ── Synthetic sensor data ─────────────────────────────────────────────────────

fn synthetic_jpeg(len: usize, counter: u64) -> Vec<u8> {
    let body = len.saturating_sub(4);
    let mut out = Vec::with_capacity(body + 4);
    out.extend_from_slice(&[0xFF, 0xD8]);
    out.extend((0..body).map(|i| ((i as u64 + counter) % 251) as u8));
    out.extend_from_slice(&[0xFF, 0xD9]);
    out
}

fn mock_intrinsics() -> Intrinsics {
    Intrinsics::from_columns([
        [1598.5, 0.0, 0.0],
        [0.0, 1598.5, 0.0],
        [959.25, 719.5, 1.0],
    ])
}

fn mock_imu(timestamp: f64, counter: u64) -> ImuSample {
    let phase = counter as f64 * 0.1;
    let (s, c) = (phase / 2.0).sin_cos();
    ImuSample {
        timestamp,
        quaternion: [0.0, 0.0, s, c],
        rotation_rate: [0.0, 0.0, 0.2],
        user_acceleration: [0.01 * phase.sin(), 0.01 * phase.cos(), 0.0],
    }
}
