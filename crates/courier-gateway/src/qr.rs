//! Pairing payload rendering.
//!
//! The driver hands over the raw pairing string; callers get back an inline
//! `data:` URL carrying an SVG QR code, ready to drop into an `<img>` tag.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use courier_core::GatewayError;
use qrcode::QrCode;
use qrcode::render::svg;

/// Render a pairing payload as a base64 SVG data URL.
pub fn qr_data_url(payload: &str) -> Result<String, GatewayError> {
    let code = QrCode::new(payload.as_bytes())
        .map_err(|e| GatewayError::Driver(format!("unencodable pairing payload: {e}")))?;
    let image = code
        .render::<svg::Color<'_>>()
        .min_dimensions(256, 256)
        .quiet_zone(true)
        .build();
    Ok(format!("data:image/svg+xml;base64,{}", BASE64.encode(image)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_inline_svg_data_url() {
        let url = qr_data_url("1@AbCdEf,123456,987654==").unwrap();
        assert!(url.starts_with("data:image/svg+xml;base64,"));

        let encoded = url.strip_prefix("data:image/svg+xml;base64,").unwrap();
        let svg = String::from_utf8(BASE64.decode(encoded).unwrap()).unwrap();
        assert!(svg.contains("<svg"));
    }

    #[test]
    fn distinct_payloads_render_distinct_images() {
        let a = qr_data_url("payload-a").unwrap();
        let b = qr_data_url("payload-b").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn oversized_payload_is_an_error() {
        let payload = "x".repeat(8000);
        assert!(qr_data_url(&payload).is_err());
    }
}
