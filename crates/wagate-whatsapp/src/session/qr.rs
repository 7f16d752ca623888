//! QR code rendering for pairing: terminal text and PNG bytes.

use qrcode::{Color, EcLevel, QrCode};
use wagate_core::error::WagateError;

/// PNG pixels per QR module.
const MODULE_PX: u32 = 10;
/// White border around the code, in modules.
const QUIET_ZONE: u32 = 2;

fn encode(qr_data: &str) -> Result<QrCode, WagateError> {
    QrCode::with_error_correction_level(qr_data.as_bytes(), EcLevel::L)
        .map_err(|e| WagateError::Session(format!("QR generation failed: {e}")))
}

/// Render a QR code for the terminal using Unicode half-block characters.
///
/// Two module rows share one text line, so the code is about half as tall
/// as a one-char-per-module rendering.
pub fn generate_qr_terminal(qr_data: &str) -> Result<String, WagateError> {
    let code = encode(qr_data)?;
    let width = code.width();
    let colors = code.into_colors();
    let dark = |row: usize, col: usize| row < width && colors[row * width + col] == Color::Dark;

    let mut out = String::with_capacity((width + 1) * width.div_ceil(2) * 3);
    for row in (0..width).step_by(2) {
        for col in 0..width {
            out.push(match (dark(row, col), dark(row + 1, col)) {
                (true, true) => '█',
                (true, false) => '▀',
                (false, true) => '▄',
                (false, false) => ' ',
            });
        }
        out.push('\n');
    }

    Ok(out)
}

/// Render a QR code as PNG bytes, served by the account QR endpoint.
pub fn generate_qr_image(qr_data: &str) -> Result<Vec<u8>, WagateError> {
    use image::{ImageBuffer, Luma};

    let code = encode(qr_data)?;
    let modules = code.width() as u32;
    let size = (modules + QUIET_ZONE * 2) * MODULE_PX;

    let img = ImageBuffer::from_fn(size, size, |x, y| {
        let (cx, cy) = (x / MODULE_PX, y / MODULE_PX);
        let inside = (QUIET_ZONE..QUIET_ZONE + modules).contains(&cx)
            && (QUIET_ZONE..QUIET_ZONE + modules).contains(&cy);
        if inside
            && code[((cx - QUIET_ZONE) as usize, (cy - QUIET_ZONE) as usize)] == Color::Dark
        {
            Luma([0u8])
        } else {
            Luma([255u8])
        }
    });

    let mut buf = std::io::Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageFormat::Png)
        .map_err(|e| WagateError::Session(format!("PNG encoding failed: {e}")))?;

    Ok(buf.into_inner())
}
