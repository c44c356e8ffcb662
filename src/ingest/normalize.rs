use anyhow::{anyhow, Result};

/// Pixel layouts delivered by capture devices.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb24,
    Yuyv,
    Nv12,
}

impl PixelFormat {
    /// Map a V4L2 fourcc to a supported layout.
    pub fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"RGB3" => Some(PixelFormat::Rgb24),
            b"YUYV" => Some(PixelFormat::Yuyv),
            b"NV12" => Some(PixelFormat::Nv12),
            _ => None,
        }
    }

    pub fn frame_len(self, width: u32, height: u32) -> Option<usize> {
        let pixels = (width as usize).checked_mul(height as usize)?;
        match self {
            PixelFormat::Rgb24 => pixels.checked_mul(3),
            PixelFormat::Yuyv => pixels.checked_mul(2),
            PixelFormat::Nv12 => pixels.checked_add(pixels / 2),
        }
    }
}

pub fn normalize_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<Vec<u8>> {
    let expected = format
        .frame_len(width, height)
        .ok_or_else(|| anyhow!("{:?} frame dimensions overflow", format))?;
    // Drivers may pad the last buffer; anything shorter is a torn frame.
    if pixels.len() < expected {
        return Err(anyhow!(
            "{:?} frame length mismatch: expected {}, got {}",
            format,
            expected,
            pixels.len()
        ));
    }
    let pixels = &pixels[..expected];

    match format {
        PixelFormat::Rgb24 => Ok(pixels.to_vec()),
        PixelFormat::Yuyv => Ok(yuyv_to_rgb(pixels, width, height)),
        PixelFormat::Nv12 => Ok(nv12_to_rgb(pixels, width, height)),
    }
}

fn yuyv_to_rgb(pixels: &[u8], width: u32, height: u32) -> Vec<u8> {
    let count = width as usize * height as usize;
    let mut rgb = Vec::with_capacity(count * 3);
    for pair in pixels.chunks_exact(4) {
        let u = pair[1] as f32 - 128.0;
        let v = pair[3] as f32 - 128.0;
        for y in [pair[0], pair[2]] {
            push_rgb(&mut rgb, y as f32, u, v);
        }
    }
    rgb
}

fn nv12_to_rgb(pixels: &[u8], width: u32, height: u32) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;
    let y_plane = w * h;

    let mut rgb = Vec::with_capacity(y_plane * 3);
    for j in 0..h {
        for i in 0..w {
            let y = pixels[j * w + i] as f32;
            let uv_index = y_plane + (j / 2) * w + (i / 2) * 2;
            let u = pixels[uv_index] as f32 - 128.0;
            let v = pixels[uv_index + 1] as f32 - 128.0;
            push_rgb(&mut rgb, y, u, v);
        }
    }
    rgb
}

fn push_rgb(out: &mut Vec<u8>, y: f32, u: f32, v: f32) {
    let r = y + 1.402_f32 * v;
    let g = y - 0.344_136_f32 * u - 0.714_136_f32 * v;
    let b = y + 1.772_f32 * u;
    out.push(clamp_to_u8(r));
    out.push(clamp_to_u8(g));
    out.push(clamp_to_u8(b));
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
