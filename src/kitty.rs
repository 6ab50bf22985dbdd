//! Kitty Graphics Protocol encoder.
//!
//! Frames have the shape `ESC _G <key=value,...> ; <payload> ESC \`.
//! Transmit frames carry base64 pixel data split into `CHUNK_SIZE` pieces;
//! the first chunk carries the full parameter list, later chunks only `m`.
//! Placement frames never carry a payload.
//!
//! Every frame sets `q=2`. Otherwise the terminal answers on stdin with
//! `ESC _G i=..;OK ESC \`, which the key reader would take for keystrokes.

use std::io::{self, Write};
use std::sync::atomic::{AtomicU32, Ordering};

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};

pub const CHUNK_SIZE: usize = 4096;

const APC_START: &str = "\x1b_G";
const APC_END: &str = "\x1b\\";

/// Pixel layout of a raw buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 3 bytes per pixel.
    Rgb,
    /// 4 bytes per pixel.
    Rgba,
}

impl PixelFormat {
    /// Value of the `f` key.
    pub fn code(self) -> u8 {
        match self {
            PixelFormat::Rgb => 24,
            PixelFormat::Rgba => 32,
        }
    }

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb => 3,
            PixelFormat::Rgba => 4,
        }
    }
}

/// An image uploaded (or about to be uploaded) to the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHandle {
    pub id: u32,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EncodingError {
    #[error("pixel buffer is {actual} bytes, expected {expected} for {width}x{height} {format:?}")]
    SizeMismatch {
        width: u32,
        height: u32,
        format: PixelFormat,
        expected: usize,
        actual: usize,
    },

    #[error("image dimensions {width}x{height} are too large")]
    Overflow { width: u32, height: u32 },
}

/// Stateless apart from the image-id counter. Ids are never recycled.
pub struct KittyEncoder {
    next_id: AtomicU32,
}

impl Default for KittyEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl KittyEncoder {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU32::new(1),
        }
    }

    /// Reserve a fresh image id.
    pub fn allocate_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Encode `pixels` into transmit frames (`a=T`).
    ///
    /// Fails without producing any frame when the buffer length does not match
    /// `width * height * bytes_per_pixel`.
    pub fn transmit(&self, image: &ImageHandle, pixels: &[u8]) -> Result<Vec<String>, EncodingError> {
        let expected = (image.width as usize)
            .checked_mul(image.height as usize)
            .and_then(|n| n.checked_mul(image.format.bytes_per_pixel()))
            .ok_or(EncodingError::Overflow {
                width: image.width,
                height: image.height,
            })?;
        if pixels.len() != expected {
            return Err(EncodingError::SizeMismatch {
                width: image.width,
                height: image.height,
                format: image.format,
                expected,
                actual: pixels.len(),
            });
        }

        let encoded = BASE64.encode(pixels);
        // base64 output is ASCII, so byte chunks are always char boundaries.
        let chunks: Vec<&str> = if encoded.is_empty() {
            vec![""]
        } else {
            (0..encoded.len())
                .step_by(CHUNK_SIZE)
                .map(|start| &encoded[start..(start + CHUNK_SIZE).min(encoded.len())])
                .collect()
        };

        let last = chunks.len() - 1;
        let frames = chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| {
                let m = u8::from(i != last);
                if i == 0 {
                    format!(
                        "{APC_START}a=T,i={},f={},s={},v={},q=2,m={m};{chunk}{APC_END}",
                        image.id,
                        image.format.code(),
                        image.width,
                        image.height,
                    )
                } else {
                    format!("{APC_START}m={m},q=2;{chunk}{APC_END}")
                }
            })
            .collect();
        Ok(frames)
    }

    /// Encode a placement frame (`a=p`) for an already transmitted image.
    pub fn place(&self, image_id: u32, x: i64, y: i64, suppress_cursor_move: bool) -> String {
        let c = u8::from(suppress_cursor_move);
        format!("{APC_START}a=p,i={image_id},x={x},y={y},C={c},q=2{APC_END}")
    }
}

/// Write frames in order, then flush once.
pub fn write_frames<W: Write + ?Sized>(out: &mut W, frames: &[String]) -> io::Result<()> {
    for frame in frames {
        out.write_all(frame.as_bytes())?;
    }
    out.flush()
}

/// Delete every image and placement. Used when leaving the alternate screen.
pub fn delete_all_frame() -> String {
    format!("{APC_START}a=d,d=A,q=2{APC_END}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn handle(width: u32, height: u32, format: PixelFormat) -> ImageHandle {
        ImageHandle {
            id: 7,
            width,
            height,
            format,
        }
    }

    /// Strip the APC wrapper and return (params, payload).
    fn split_frame(frame: &str) -> (&str, &str) {
        let body = frame
            .strip_prefix(APC_START)
            .and_then(|f| f.strip_suffix(APC_END))
            .expect("frame should be APC-wrapped");
        match body.split_once(';') {
            Some((params, payload)) => (params, payload),
            None => (body, ""),
        }
    }

    fn reassemble(frames: &[String]) -> Vec<u8> {
        let payload: String = frames.iter().map(|f| split_frame(f).1).collect();
        BASE64.decode(payload).expect("payload should be valid base64")
    }

    #[test]
    fn small_image_single_frame() {
        let enc = KittyEncoder::new();
        let pixels = vec![0xAB; 2 * 2 * 3];
        let frames = enc.transmit(&handle(2, 2, PixelFormat::Rgb), &pixels).unwrap();
        assert_eq!(frames.len(), 1);
        let (params, _) = split_frame(&frames[0]);
        assert_eq!(params, "a=T,i=7,f=24,s=2,v=2,q=2,m=0");
        assert_eq!(reassemble(&frames), pixels);
    }

    #[test]
    fn large_image_is_chunked() {
        let enc = KittyEncoder::new();
        let (w, h) = (100, 50);
        let pixels: Vec<u8> = (0..w * h * 4).map(|i| (i % 251) as u8).collect();
        let frames = enc.transmit(&handle(w, h, PixelFormat::Rgba), &pixels).unwrap();

        let encoded_len = BASE64.encode(&pixels).len();
        assert_eq!(frames.len(), encoded_len.div_ceil(CHUNK_SIZE));

        let (first, _) = split_frame(&frames[0]);
        assert_eq!(first, "a=T,i=7,f=32,s=100,v=50,q=2,m=1");
        for frame in &frames[1..frames.len() - 1] {
            let (params, payload) = split_frame(frame);
            assert_eq!(params, "m=1,q=2");
            assert_eq!(payload.len(), CHUNK_SIZE);
        }
        let (last, _) = split_frame(frames.last().unwrap());
        assert_eq!(last, "m=0,q=2");

        assert_eq!(reassemble(&frames), pixels);
    }

    #[test]
    fn exact_chunk_multiple_has_no_empty_tail() {
        let enc = KittyEncoder::new();
        // 3072 raw bytes -> exactly 4096 base64 chars
        let pixels = vec![1u8; 3072];
        let frames = enc.transmit(&handle(1024, 1, PixelFormat::Rgb), &pixels).unwrap();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].contains("m=0;"));
    }

    #[test]
    fn size_mismatch_is_rejected() {
        let enc = KittyEncoder::new();
        let err = enc
            .transmit(&handle(4, 4, PixelFormat::Rgba), &[0u8; 10])
            .unwrap_err();
        assert_eq!(
            err,
            EncodingError::SizeMismatch {
                width: 4,
                height: 4,
                format: PixelFormat::Rgba,
                expected: 64,
                actual: 10,
            }
        );
    }

    #[test]
    fn place_frame_has_no_payload() {
        let enc = KittyEncoder::new();
        assert_eq!(enc.place(3, 0, -181, true), "\x1b_Ga=p,i=3,x=0,y=-181,C=1,q=2\x1b\\");
        assert_eq!(enc.place(3, 0, 0, false), "\x1b_Ga=p,i=3,x=0,y=0,C=0,q=2\x1b\\");
    }

    #[test]
    fn empty_image_is_one_empty_frame() {
        let enc = KittyEncoder::new();
        let frames = enc.transmit(&handle(0, 0, PixelFormat::Rgb), &[]).unwrap();
        assert_eq!(frames, vec!["\x1b_Ga=T,i=7,f=24,s=0,v=0,q=2,m=0;\x1b\\".to_string()]);
    }

    #[test]
    fn delete_all_suppresses_replies() {
        assert_eq!(delete_all_frame(), "\x1b_Ga=d,d=A,q=2\x1b\\");
    }

    #[test]
    fn ids_are_not_recycled() {
        let enc = KittyEncoder::new();
        let a = enc.allocate_id();
        let b = enc.allocate_id();
        assert_ne!(a, b);
    }

    #[test]
    fn write_frames_preserves_order() {
        let mut out = Vec::new();
        write_frames(&mut out, &["a".into(), "b".into(), "c".into()]).unwrap();
        assert_eq!(out, b"abc");
    }

    fn m_flag(params: &str) -> &str {
        params
            .split(',')
            .find_map(|kv| kv.strip_prefix("m="))
            .expect("every transmit frame carries m")
    }

    fn image() -> impl Strategy<Value = (u32, u32, PixelFormat, Vec<u8>)> {
        (0u32..80, 0u32..80, prop_oneof![Just(PixelFormat::Rgb), Just(PixelFormat::Rgba)]).prop_flat_map(
            |(w, h, format)| {
                let len = (w * h) as usize * format.bytes_per_pixel();
                (Just(w), Just(h), Just(format), proptest::collection::vec(any::<u8>(), len))
            },
        )
    }

    proptest! {
        #[test]
        fn transmit_round_trips_with_chunk_flags((w, h, format, pixels) in image()) {
            let enc = KittyEncoder::new();
            let frames = enc.transmit(&handle(w, h, format), &pixels).unwrap();

            let encoded_len = BASE64.encode(&pixels).len();
            prop_assert_eq!(frames.len(), encoded_len.div_ceil(CHUNK_SIZE).max(1));
            prop_assert_eq!(reassemble(&frames), pixels);

            for (i, frame) in frames.iter().enumerate() {
                let (params, _) = split_frame(frame);
                prop_assert!(params.split(',').any(|kv| kv == "q=2"));
                let expected = if i + 1 == frames.len() { "0" } else { "1" };
                prop_assert_eq!(m_flag(params), expected);
                prop_assert_eq!(params.starts_with("a=T,"), i == 0);
            }
        }
    }
}
