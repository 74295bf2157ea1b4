//! Bitmap-to-sprite converter.
//!
//! Converts PNG/BMP sprite sheets to the vertically packed monochrome
//! format Arduboy display code draws from. Frame geometry is encoded in the
//! filename: `name_WxH.png` for W-by-H frames, `name_WxH_S.png` when the
//! sheet has S pixels of spacing around each frame. Without a dimension
//! suffix the whole image is one frame.
//!
//! A pixel is lit when its green channel exceeds 64. When any pixel of the
//! sheet is not fully opaque, a transparency mask byte is interleaved after
//! each data byte (bit set = opaque).

use std::fmt::Write as _;
use std::path::Path;

use byteorder::{BigEndian, WriteBytesExt};
use image::RgbaImage;

use crate::error::{Error, Result};

/// Frame geometry decoded from a sprite sheet filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpriteParams {
    /// Sprite name (filename stem without the geometry suffix).
    pub name: String,
    /// Frame width in pixels; 0 means the whole image.
    pub frame_width: u32,
    /// Frame height in pixels; 0 means the whole image.
    pub frame_height: u32,
    /// Spacing around frames in pixels.
    pub spacing: u32,
}

impl SpriteParams {
    /// Decode `name_WxH_S` geometry from a file path.
    pub fn from_filename(path: &Path) -> Self {
        let stem = path
            .file_stem()
            .map(|s| {
                s.to_string_lossy()
                    .to_lowercase()
            })
            .unwrap_or_default();
        let elements: Vec<&str> = stem
            .split('_')
            .collect();

        for i in (1..elements.len()).rev() {
            let Some((width, height)) = parse_dimensions(elements[i]) else {
                continue;
            };
            let spacing = elements
                .get(i + 1)
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            return Self {
                name: elements[..i].join("_"),
                frame_width: width,
                frame_height: height,
                spacing,
            };
        }
        Self {
            name: stem,
            frame_width: 0,
            frame_height: 0,
            spacing: 0,
        }
    }
}

fn parse_dimensions(text: &str) -> Option<(u32, u32)> {
    let (w, h) = text.split_once('x')?;
    Some((
        w.parse()
            .ok()?,
        h.parse()
            .ok()?,
    ))
}

/// A packed sprite sheet.
#[derive(Debug, Clone)]
pub struct Sprite {
    /// Sprite name.
    pub name: String,
    /// Frame width in pixels.
    pub frame_width: u32,
    /// Frame height in pixels.
    pub frame_height: u32,
    /// Frames per row.
    pub hframes: u32,
    /// Frame rows.
    pub vframes: u32,
    /// True when mask bytes are interleaved.
    pub transparent: bool,
    data: Vec<u8>,
}

/// Pack a sprite sheet according to `params`.
pub fn convert(img: &RgbaImage, params: &SpriteParams) -> Result<Sprite> {
    let spacing = params.spacing;
    let (frame_width, frame_height, hframes, vframes) = if params.frame_width == 0 {
        let width = img
            .width()
            .saturating_sub(spacing * 2);
        let height = img
            .height()
            .saturating_sub(spacing * 2);
        (width, height, 1, 1)
    } else {
        let hframes = img
            .width()
            .saturating_sub(spacing)
            / (params.frame_width + spacing);
        let vframes = img
            .height()
            .saturating_sub(spacing)
            / (params.frame_height + spacing);
        (params.frame_width, params.frame_height, hframes, vframes)
    };
    if frame_width == 0 || frame_height == 0 || hframes == 0 || vframes == 0 {
        return Err(Error::InvalidImage(format!(
            "no {}x{} frames fit in a {}x{} image",
            params.frame_width,
            params.frame_height,
            img.width(),
            img.height()
        )));
    }

    let transparent = img
        .pixels()
        .any(|p| p[3] < 255);

    let mut data = Vec::new();
    for vframe in 0..vframes {
        for hframe in 0..hframes {
            let fx = spacing + hframe * (frame_width + spacing);
            let fy = spacing + vframe * (frame_height + spacing);
            for y in (0..frame_height).step_by(8) {
                for x in 0..frame_width {
                    let mut bits = 0u8;
                    let mut mask = 0u8;
                    for p in 0..8 {
                        bits >>= 1;
                        mask >>= 1;
                        if y + p >= frame_height {
                            continue;
                        }
                        let px = img.get_pixel(fx + x, fy + y + p);
                        if px[1] > 64 {
                            bits |= 0x80;
                        }
                        if px[3] == 255 {
                            mask |= 0x80;
                        }
                    }
                    data.push(bits);
                    if transparent {
                        data.push(mask);
                    }
                }
            }
        }
    }

    Ok(Sprite {
        name: params
            .name
            .clone(),
        frame_width,
        frame_height,
        hframes,
        vframes,
        transparent,
        data,
    })
}

impl Sprite {
    /// Packed bytes (without the width/height header).
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    fn bytes_per_row(&self) -> usize {
        self.frame_width as usize * if self.transparent { 2 } else { 1 }
    }

    fn bytes_per_frame(&self) -> usize {
        self.bytes_per_row()
            * (self.frame_height as usize)
                .div_ceil(8)
    }

    /// C++ header text with a `PROGMEM` byte array.
    pub fn to_header(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "constexpr uint8_t {}_width = {};",
            self.name, self.frame_width
        );
        let _ = writeln!(
            out,
            "constexpr uint8_t {}_height = {};",
            self.name, self.frame_height
        );
        out.push('\n');
        let _ = writeln!(out, "const uint8_t PROGMEM {}[] =", self.name);
        out.push_str("{\n");
        let _ = writeln!(out, "  {0}_width, {0}_height,", self.name);
        for frame in self
            .data
            .chunks(self.bytes_per_frame())
        {
            out.push('\n');
            for row in frame.chunks(self.bytes_per_row()) {
                out.push_str(" ");
                for byte in row {
                    let _ = write!(out, " 0x{byte:02X},");
                }
                out.push('\n');
            }
        }
        out.push_str("};\n");
        out
    }

    /// Binary form: big-endian width and height, then the packed bytes.
    pub fn to_bin(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.data.len());
        let _ = out.write_u16::<BigEndian>(self.frame_width as u16);
        let _ = out.write_u16::<BigEndian>(self.frame_height as u16);
        out.extend_from_slice(&self.data);
        out
    }
}
