//! Skin rendering.
//!
//! Every resource is cut from the 64x64 (or legacy 64x32) skin atlas,
//! assembled at native resolution and scaled with nearest-neighbour to the
//! requested width. Overlay layers treat pixels equal to the skin's matte
//! colour (the top-left pixel) as transparent.

use std::io::Cursor;

use bytes::Bytes;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};

pub const DEFAULT_WIDTH: u32 = 180;
pub const MIN_WIDTH: u32 = 8;
pub const MAX_WIDTH: u32 = 300;

const HEAD: Rect = Rect::new(8, 8, 8, 8);
const HELM: Rect = Rect::new(40, 8, 8, 8);
const HEAD_TOP: Rect = Rect::new(8, 0, 8, 8);
const HELM_TOP: Rect = Rect::new(40, 0, 8, 8);
const HEAD_SIDE: Rect = Rect::new(0, 8, 8, 8);
const HELM_SIDE: Rect = Rect::new(32, 8, 8, 8);

const TORSO: Rect = Rect::new(20, 20, 8, 12);
const TORSO_LAYER: Rect = Rect::new(20, 36, 8, 12);
const RIGHT_ARM: Rect = Rect::new(44, 20, 4, 12);
const RIGHT_ARM_LAYER: Rect = Rect::new(44, 36, 4, 12);
const LEFT_ARM: Rect = Rect::new(36, 52, 4, 12);
const LEFT_ARM_LAYER: Rect = Rect::new(52, 52, 4, 12);
const RIGHT_LEG: Rect = Rect::new(4, 20, 4, 12);
const RIGHT_LEG_LAYER: Rect = Rect::new(4, 36, 4, 12);
const LEFT_LEG: Rect = Rect::new(20, 52, 4, 12);
const LEFT_LEG_LAYER: Rect = Rect::new(4, 52, 4, 12);

/// Height of a bust, head included.
const BUST_HEIGHT: u32 = 16;

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("skin decode failed: {0}")]
    Decode(String),

    #[error("unsupported skin dimensions {0}x{1}")]
    Dimensions(u32, u32),

    #[error("png encode failed: {0}")]
    Encode(String),
}

/// A rendered view of a skin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Avatar,
    Helm,
    Cube,
    CubeHelm,
    Bust,
    Body,
    ArmorBust,
    ArmorBody,
}

impl Resource {
    /// URL prefixes, including the British spellings of the armour views.
    pub const ROUTES: [(&'static str, Resource); 10] = [
        ("avatar", Resource::Avatar),
        ("helm", Resource::Helm),
        ("cube", Resource::Cube),
        ("cubehelm", Resource::CubeHelm),
        ("bust", Resource::Bust),
        ("body", Resource::Body),
        ("armor/bust", Resource::ArmorBust),
        ("armour/bust", Resource::ArmorBust),
        ("armor/body", Resource::ArmorBody),
        ("armour/body", Resource::ArmorBody),
    ];

    pub fn name(self) -> &'static str {
        match self {
            Resource::Avatar => "avatar",
            Resource::Helm => "helm",
            Resource::Cube => "cube",
            Resource::CubeHelm => "cubehelm",
            Resource::Bust => "bust",
            Resource::Body => "body",
            Resource::ArmorBust => "armor/bust",
            Resource::ArmorBody => "armor/body",
        }
    }

    /// Render this view of `skin`, `width` pixels wide.
    pub fn render(self, skin: &RgbaImage, width: u32) -> Result<RgbaImage, ProcessError> {
        let skin = Skin::new(skin)?;
        let width = width.clamp(MIN_WIDTH, MAX_WIDTH);

        let native = match self {
            Resource::Avatar => skin.crop(HEAD),
            Resource::Helm => skin.helm(),
            Resource::Cube => return Ok(skin.cube(width, false)),
            Resource::CubeHelm => return Ok(skin.cube(width, true)),
            Resource::Bust => bust(add_head(skin.upper_body(), &skin.crop(HEAD))),
            Resource::ArmorBust => bust(add_head(skin.upper_armor(), &skin.helm())),
            Resource::Body => add_legs(add_head(skin.upper_body(), &skin.crop(HEAD)), &skin.lower_body()),
            Resource::ArmorBody => add_legs(add_head(skin.upper_armor(), &skin.helm()), &skin.lower_armor()),
        };

        Ok(scale(&native, width))
    }
}

/// Parse a width path segment; non-numeric and zero fall back to the default.
pub fn parse_width(raw: &str) -> u32 {
    match raw.parse::<u32>() {
        Ok(0) | Err(_) => DEFAULT_WIDTH,
        Ok(width) => width.clamp(MIN_WIDTH, MAX_WIDTH),
    }
}

pub fn encode_png(img: RgbaImage) -> Result<Bytes, ProcessError> {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img)
        .write_to(&mut out, ImageFormat::Png)
        .map_err(|e| ProcessError::Encode(e.to_string()))?;
    Ok(Bytes::from(out.into_inner()))
}

#[derive(Debug, Clone, Copy)]
struct Rect {
    x: u32,
    y: u32,
    w: u32,
    h: u32,
}

impl Rect {
    const fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }
}

struct Skin<'a> {
    img: &'a RgbaImage,
    /// Matte colour; overlay pixels of exactly this colour are transparent.
    matte: Rgba<u8>,
    /// 64x64 skins carry left limbs and overlay layers.
    modern: bool,
}

impl<'a> Skin<'a> {
    fn new(img: &'a RgbaImage) -> Result<Self, ProcessError> {
        let (w, h) = img.dimensions();
        if w != 64 || (h != 64 && h != 32) {
            return Err(ProcessError::Dimensions(w, h));
        }
        Ok(Self { img, matte: *img.get_pixel(0, 0), modern: h == 64 })
    }

    fn crop(&self, r: Rect) -> RgbaImage {
        imageops::crop_imm(self.img, r.x, r.y, r.w, r.h).to_image()
    }

    /// Crop an overlay region with the matte colour made transparent.
    fn layer(&self, r: Rect) -> RgbaImage {
        let mut img = self.crop(r);
        if self.matte[3] != 0 {
            for px in img.pixels_mut() {
                if *px == self.matte {
                    px[3] = 0;
                }
            }
        }
        img
    }

    fn helm(&self) -> RgbaImage {
        let mut head = self.crop(HEAD);
        draw(&mut head, &self.layer(HELM), 0, 0);
        head
    }

    /// Torso with the right arm on the viewer's left.
    fn upper_body(&self) -> RgbaImage {
        let right_arm = self.crop(RIGHT_ARM);
        let left_arm = if self.modern { self.crop(LEFT_ARM) } else { imageops::flip_horizontal(&right_arm) };
        let mut base = RgbaImage::new(16, 12);
        draw(&mut base, &self.crop(TORSO), 4, 0);
        draw(&mut base, &right_arm, 0, 0);
        draw(&mut base, &left_arm, 12, 0);
        base
    }

    fn upper_armor(&self) -> RgbaImage {
        let mut base = self.upper_body();
        if self.modern {
            draw(&mut base, &self.layer(TORSO_LAYER), 4, 0);
            draw(&mut base, &self.layer(RIGHT_ARM_LAYER), 0, 0);
            draw(&mut base, &self.layer(LEFT_ARM_LAYER), 12, 0);
        }
        base
    }

    fn lower_body(&self) -> RgbaImage {
        let right_leg = self.crop(RIGHT_LEG);
        let left_leg = if self.modern { self.crop(LEFT_LEG) } else { imageops::flip_horizontal(&right_leg) };
        let mut base = RgbaImage::new(8, 12);
        draw(&mut base, &right_leg, 0, 0);
        draw(&mut base, &left_leg, 4, 0);
        base
    }

    fn lower_armor(&self) -> RgbaImage {
        let mut base = self.lower_body();
        if self.modern {
            draw(&mut base, &self.layer(RIGHT_LEG_LAYER), 0, 0);
            draw(&mut base, &self.layer(LEFT_LEG_LAYER), 4, 0);
        }
        base
    }

    /// Isometric head, `width` square, optionally with the hat layer.
    ///
    /// The top face is a diamond across the upper third; the head's right
    /// side fills the left half and the face the right half, both sheared to
    /// meet the diamond's lower edges. Each output pixel is mapped back to a
    /// texel, so no intermediate scaling is needed.
    fn cube(&self, width: u32, helm: bool) -> RgbaImage {
        let mut layers = vec![[self.crop(HEAD_TOP), self.crop(HEAD_SIDE), self.crop(HEAD)]];
        if helm {
            layers.push([self.layer(HELM_TOP), self.layer(HELM_SIDE), self.layer(HELM)]);
        }

        let mut out = RgbaImage::new(width, width);
        let w = f64::from(width);
        for (n, [top, side, front]) in layers.iter().enumerate() {
            for y in 0..width {
                for x in 0..width {
                    let Some(texel) = cube_texel(f64::from(x) + 0.5, f64::from(y) + 0.5, w, top, side, front) else {
                        continue;
                    };
                    if n == 0 {
                        out.put_pixel(x, y, texel);
                    } else if texel[3] != 0 {
                        blend(out.get_pixel_mut(x, y), texel);
                    }
                }
            }
        }
        out
    }
}

/// Texel under canvas point `(x, y)` for a `w`-wide cube, if any face covers it.
fn cube_texel(x: f64, y: f64, w: f64, top: &RgbaImage, side: &RgbaImage, front: &RgbaImage) -> Option<Rgba<u8>> {
    let sample = |img: &RgbaImage, u: f64, v: f64| -> Option<Rgba<u8>> {
        if !(0.0..1.0).contains(&u) || !(0.0..1.0).contains(&v) {
            return None;
        }
        let (iw, ih) = img.dimensions();
        let tx = ((u * f64::from(iw)) as u32).min(iw - 1);
        let ty = ((v * f64::from(ih)) as u32).min(ih - 1);
        Some(*img.get_pixel(tx, ty))
    };

    // Top diamond: left (0, w/6), top (w/2, 0), bottom (w/2, w/3).
    let dy = y - w / 6.0;
    if let Some(px) = sample(top, (x - 3.0 * dy) / w, (x + 3.0 * dy) / w) {
        return Some(px);
    }

    // Side faces are 2w/3 tall and sheared by w/6 across their half.
    let face_h = 2.0 * w / 3.0;
    if x < w / 2.0 {
        let u = x / (w / 2.0);
        sample(side, u, (y - w / 6.0 - u * w / 6.0) / face_h)
    } else {
        let u = (x - w / 2.0) / (w / 2.0);
        sample(front, u, (y - w / 3.0 + u * w / 6.0) / face_h)
    }
}

/// Draw `src` onto `dst` at `(x, y)`, blending by source alpha. Drawn pixels end up opaque.
fn draw(dst: &mut RgbaImage, src: &RgbaImage, x: u32, y: u32) {
    for (sx, sy, px) in src.enumerate_pixels() {
        let (dx, dy) = (x + sx, y + sy);
        if dx < dst.width() && dy < dst.height() {
            blend(dst.get_pixel_mut(dx, dy), *px);
        }
    }
}

fn blend(dst: &mut Rgba<u8>, src: Rgba<u8>) {
    let sa = u32::from(src[3]);
    for c in 0..3 {
        dst[c] = ((u32::from(src[c]) * sa + u32::from(dst[c]) * (255 - sa)) / 255) as u8;
    }
    dst[3] = 255;
}

/// Grow `base` upwards by a head's height and draw `head` centred on top.
fn add_head(base: RgbaImage, head: &RgbaImage) -> RgbaImage {
    let mut out = RgbaImage::new(base.width(), base.height() + HEAD.h);
    imageops::replace(&mut out, &base, 0, i64::from(HEAD.h));
    draw(&mut out, head, 4, 0);
    out
}

fn add_legs(base: RgbaImage, legs: &RgbaImage) -> RgbaImage {
    let mut out = RgbaImage::new(base.width(), base.height() + legs.height());
    imageops::replace(&mut out, &base, 0, 0);
    draw(&mut out, legs, 4, base.height());
    out
}

fn bust(body: RgbaImage) -> RgbaImage {
    imageops::crop_imm(&body, 0, 0, body.width(), BUST_HEIGHT).to_image()
}

/// Nearest-neighbour scale to `width`, keeping the aspect ratio.
fn scale(img: &RgbaImage, width: u32) -> RgbaImage {
    let height = ((u64::from(width) * u64::from(img.height()) + u64::from(img.width()) / 2) / u64::from(img.width())).max(1);
    imageops::resize(img, width, u32::try_from(height).unwrap_or(u32::MAX), FilterType::Nearest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skin(height: u32) -> RgbaImage {
        let mut img = RgbaImage::from_pixel(64, height, Rgba([0, 0, 0, 0]));
        for (x, y, px) in img.enumerate_pixels_mut() {
            *px = Rgba([x as u8 * 4, y as u8 * 4, 0x80, 0xff]);
        }
        img
    }

    #[test]
    fn test_parse_width() {
        assert_eq!(parse_width("0"), 180);
        assert_eq!(parse_width("abc"), 180);
        assert_eq!(parse_width("1"), 8);
        assert_eq!(parse_width("9999"), 300);
        assert_eq!(parse_width("64"), 64);
    }

    #[test]
    fn test_output_dimensions() {
        let img = skin(64);
        let cases = [
            (Resource::Avatar, 100, 100),
            (Resource::Helm, 100, 100),
            (Resource::Cube, 100, 100),
            (Resource::CubeHelm, 100, 100),
            (Resource::Bust, 100, 100),
            (Resource::ArmorBust, 100, 100),
            (Resource::Body, 100, 200),
            (Resource::ArmorBody, 100, 200),
        ];
        for (resource, w, h) in cases {
            let out = resource.render(&img, w).unwrap();
            assert_eq!(out.dimensions(), (w, h), "{}", resource.name());
        }
    }

    #[test]
    fn test_avatar_is_scaled_face() {
        let img = skin(64);
        let out = Resource::Avatar.render(&img, 16).unwrap();
        assert_eq!(*out.get_pixel(0, 0), *img.get_pixel(8, 8));
        assert_eq!(*out.get_pixel(15, 15), *img.get_pixel(15, 15));
    }

    #[test]
    fn test_helm_matte_is_transparent() {
        let mut img = RgbaImage::from_pixel(64, 64, Rgba([1, 2, 3, 0xff]));
        for y in 8..16 {
            for x in 8..16 {
                img.put_pixel(x, y, Rgba([200, 0, 0, 0xff]));
            }
        }
        let out = Resource::Helm.render(&img, 8).unwrap();
        assert_eq!(*out.get_pixel(3, 3), Rgba([200, 0, 0, 0xff]));
    }

    #[test]
    fn test_legacy_skin_mirrors_limbs() {
        let img = skin(32);
        let out = Resource::Body.render(&img, 16).unwrap();
        assert_eq!(out.dimensions(), (16, 32));
        // Left arm column 12 mirrors right arm column 3.
        assert_eq!(*out.get_pixel(12, 8), *img.get_pixel(47, 20));
    }

    #[test]
    fn test_rejects_odd_dimensions() {
        let img = RgbaImage::new(32, 32);
        assert!(matches!(Resource::Avatar.render(&img, 64), Err(ProcessError::Dimensions(32, 32))));
    }

    #[test]
    fn test_encode_png() {
        let png = encode_png(Resource::Avatar.render(&skin(64), 8).unwrap()).unwrap();
        assert!(png.starts_with(b"\x89PNG"));
    }

    #[test]
    fn test_routes_cover_every_resource() {
        for (route, resource) in Resource::ROUTES {
            assert!(route.ends_with(resource.name().rsplit('/').next().unwrap()));
        }
    }
}
