//! The static pixel response bodies.

/// A 43-byte transparent GIF89a, 1x1 pixel. Served verbatim, never
/// buffered or compressed (spec §6).
pub const PIXEL_GIF: [u8; 43] = [
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00,
    0xff, 0xff, 0xff, 0x21, 0xf9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2c, 0x00, 0x00, 0x00, 0x00,
    0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x44, 0x01, 0x00, 0x3b,
];

/// The browser-side fingerprinting script served from `_SMART.js`.
/// Collects the client-sent fields cataloged in spec §6 and issues the
/// pixel request; the collection logic itself is an external, versioned
/// asset in production and is represented here by a minimal stub that
/// still round-trips `sw`/`sh`/`canvasFP` so the modern hit-type path is
/// exercisable end to end.
pub const PIXEL_SCRIPT: &str = r"
(function () {
  var img = new Image();
  var qs = [
    'sw=' + screen.width,
    'sh=' + screen.height,
    'canvasFP=' + 'stub',
  ].join('&');
  img.src = window.location.pathname.replace(/_SMART\.js$/, '_SMART.GIF') + '?' + qs;
})();
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_gif_is_exactly_43_bytes() {
        assert_eq!(PIXEL_GIF.len(), 43);
    }

    #[test]
    fn pixel_gif_starts_with_gif89a_magic() {
        assert_eq!(&PIXEL_GIF[..6], b"GIF89a");
    }
}
