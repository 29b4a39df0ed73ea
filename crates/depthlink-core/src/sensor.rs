//! Producer-side encoders that turn captured sensor data into payload bytes.

use crate::errors::EncodeError;

/// Bytes per depth sample (float16).
pub const DEPTH_ELEMENT_SIZE: usize = 2;

// MARK: - Depth

/// Borrowed view of a row-strided depth buffer as handed out by a capture
/// device. Rows may carry padding past `width * element_size`.
#[derive(Debug, Clone, Copy)]
pub struct DepthBuffer<'a> {
    pub data: &'a [u8],
    pub width: usize,
    pub height: usize,
    pub bytes_per_row: usize,
    pub element_size: usize,
}

impl<'a> DepthBuffer<'a> {
    /// Tightly packed float16 buffer (stride equals row width).
    pub fn packed(data: &'a [u8], width: usize, height: usize) -> Self {
        Self {
            data,
            width,
            height,
            bytes_per_row: width * DEPTH_ELEMENT_SIZE,
            element_size: DEPTH_ELEMENT_SIZE,
        }
    }

    pub fn row_bytes(&self) -> usize {
        self.width * self.element_size
    }
}

/// Copy the logical rows of `buf` into a packed byte vector, skipping any
/// stride padding.
pub fn encode_depth_frame(buf: &DepthBuffer<'_>) -> Result<Vec<u8>, EncodeError> {
    let row_bytes = buf.row_bytes();
    if row_bytes > buf.bytes_per_row {
        return Err(EncodeError::StrideTooSmall {
            row_bytes,
            stride: buf.bytes_per_row,
        });
    }
    if buf.height == 0 || row_bytes == 0 {
        return Ok(Vec::new());
    }

    let needed = (buf.height - 1) * buf.bytes_per_row + row_bytes;
    if buf.data.len() < needed {
        return Err(EncodeError::BufferTooShort {
            expected: needed,
            actual: buf.data.len(),
        });
    }

    let mut out = Vec::with_capacity(row_bytes * buf.height);
    for row in buf.data.chunks(buf.bytes_per_row).take(buf.height) {
        out.extend_from_slice(&row[..row_bytes]);
    }
    Ok(out)
}

// MARK: - Calibration

/// Pinhole intrinsics of the color camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intrinsics {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
}

impl Intrinsics {
    /// Extract from a column-major 3×3 intrinsic matrix.
    pub fn from_columns(columns: [[f32; 3]; 3]) -> Self {
        Self {
            fx: columns[0][0],
            fy: columns[1][1],
            cx: columns[2][0],
            cy: columns[2][1],
        }
    }
}

/// Two-line CSV record: header then values.
pub fn encode_calibration(k: &Intrinsics) -> String {
    format!("fx,fy,cx,cy\n{},{},{},{}\n", k.fx, k.fy, k.cx, k.cy)
}

// MARK: - IMU

/// One device-motion sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuSample {
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    /// Attitude quaternion (x, y, z, w).
    pub quaternion: [f64; 4],
    /// Rotation rate in rad/s.
    pub rotation_rate: [f64; 3],
    /// User acceleration in g, gravity removed.
    pub user_acceleration: [f64; 3],
}

/// One CSV line: `t,qx,qy,qz,qw,rx,ry,rz,ax,ay,az`.
pub fn encode_imu_sample(s: &ImuSample) -> String {
    let [qx, qy, qz, qw] = s.quaternion;
    let [rx, ry, rz] = s.rotation_rate;
    let [ax, ay, az] = s.user_acceleration;
    format!(
        "{:.3},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6}\n",
        s.timestamp, qx, qy, qz, qw, rx, ry, rz, ax, ay, az
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_copy_skips_stride_padding() {
        // 2×3 float16 rows padded to 8 bytes each.
        let data = [
            1, 2, 3, 4, 0xEE, 0xEE, 0xEE, 0xEE,
            5, 6, 7, 8, 0xEE, 0xEE, 0xEE, 0xEE,
            9, 10, 11, 12, 0xEE, 0xEE, 0xEE, 0xEE,
        ];
        let buf = DepthBuffer {
            data: &data,
            width: 2,
            height: 3,
            bytes_per_row: 8,
            element_size: DEPTH_ELEMENT_SIZE,
        };
        let out = encode_depth_frame(&buf).unwrap();
        assert_eq!(out, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
    }

    #[test]
    fn depth_last_row_may_omit_padding() {
        let data = [1, 2, 0, 0, 3, 4];
        let buf = DepthBuffer {
            data: &data,
            width: 1,
            height: 2,
            bytes_per_row: 4,
            element_size: 2,
        };
        assert_eq!(encode_depth_frame(&buf).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn packed_depth_is_copied_verbatim() {
        let data: Vec<u8> = (0..24).collect();
        let out = encode_depth_frame(&DepthBuffer::packed(&data, 4, 3)).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn depth_rejects_bad_layouts() {
        let data = [0u8; 16];
        let narrow = DepthBuffer { data: &data, width: 4, height: 2, bytes_per_row: 6, element_size: 2 };
        assert_eq!(
            encode_depth_frame(&narrow),
            Err(EncodeError::StrideTooSmall { row_bytes: 8, stride: 6 })
        );

        let short = DepthBuffer::packed(&data, 4, 3);
        assert_eq!(
            encode_depth_frame(&short),
            Err(EncodeError::BufferTooShort { expected: 24, actual: 16 })
        );
    }

    #[test]
    fn calibration_csv_has_header_and_values() {
        let k = Intrinsics::from_columns([[1598.5, 0.0, 0.0], [0.0, 1598.5, 0.0], [959.25, 719.5, 1.0]]);
        assert_eq!(encode_calibration(&k), "fx,fy,cx,cy\n1598.5,1598.5,959.25,719.5\n");
    }

    #[test]
    fn imu_line_formatting() {
        let s = ImuSample {
            timestamp: 1733666589.4567,
            quaternion: [0.1, 0.2, 0.3, 0.4],
            rotation_rate: [1.1, 1.2, 1.3],
            user_acceleration: [2.1, 2.2, 2.3],
        };
        assert_eq!(
            encode_imu_sample(&s),
            "1733666589.457,0.100000,0.200000,0.300000,0.400000,1.100000,1.200000,1.300000,2.100000,2.200000,2.300000\n"
        );
    }
}
