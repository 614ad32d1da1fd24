//! Image capture helpers: canvas data URIs and animated GIF encoding.

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, Frame, ImageFormat, RgbaImage};

/// Decode the base64 payload of a `data:image/...;base64,` URI.
pub fn decode_data_url(url: &str) -> Result<Vec<u8>> {
    let (header, payload) = url
        .split_once(',')
        .context("Malformed data URL: missing ','")?;
    anyhow::ensure!(
        header.starts_with("data:") && header.ends_with(";base64"),
        "Unsupported data URL header: {header}"
    );
    STANDARD
        .decode(payload)
        .context("Malformed data URL: invalid base64")
}

/// Frame-by-frame GIF settings.
#[derive(Debug, Clone, Copy)]
pub struct GifSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// 1 (best) to 30 (fastest).
    pub quality: u32,
}

/// Encode a sequence of PNG frames into one infinitely looping GIF.
///
/// Every frame is drawn at the origin of a `width` x `height` canvas, so
/// frames of a different size are cropped or padded rather than rejected.
pub fn encode_gif(frames: &[Vec<u8>], settings: GifSettings) -> Result<Vec<u8>> {
    anyhow::ensure!(!frames.is_empty(), "No frames captured");

    let speed = i32::try_from(settings.quality.clamp(1, 30)).unwrap_or(10);
    let delay = Delay::from_numer_denom_ms(1000, settings.fps.max(1));

    let mut buffer = Vec::new();
    {
        let mut encoder = GifEncoder::new_with_speed(&mut buffer, speed);
        encoder
            .set_repeat(Repeat::Infinite)
            .context("Failed to configure GIF encoder")?;

        for (index, png) in frames.iter().enumerate() {
            let decoded = image::load_from_memory_with_format(png, ImageFormat::Png)
                .with_context(|| format!("Failed to decode frame {index}"))?
                .to_rgba8();
            let mut canvas = RgbaImage::new(settings.width, settings.height);
            image::imageops::replace(&mut canvas, &decoded, 0, 0);
            encoder
                .encode_frame(Frame::from_parts(canvas, 0, 0, delay))
                .with_context(|| format!("Failed to encode frame {index}"))?;
        }
    }
    Ok(buffer)
}
