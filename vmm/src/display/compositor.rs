// Copyright 2024 Cloud Hypervisor Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Damage-tracked compositing
//!
//! The guest surface is uploaded into a source image and drawn through the
//! view transform into a shadow image the size of the screen; only damaged
//! rectangles are redrawn, then converted to the device pixel layout and
//! copied into framebuffer memory. The guest cursor is drawn on top of the
//! shadow after each pass.
//!
//! ```text
//!  guest surface ──upload──▶ source ──transform + filter──▶ shadow ──blit──▶ /dev/fbN
//!                                                      cursor ──┘
//! ```

use std::sync::Arc;

use devices::{FbBitfield, FbVarScreenInfo};
use log::debug;
use tiny_skia::{BlendMode, ColorU8, Mask, Pixmap, PixmapPaint, Transform};

use super::options::FilterMode;
use super::region::{DirtyRegion, Rect};
use super::{Cursor, DisplaySurface, Error, Result};

const BYTES_PER_PIXEL: usize = 4;

/// Channel placement of a device pixel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelLayout {
    pub red: FbBitfield,
    pub green: FbBitfield,
    pub blue: FbBitfield,
    pub transp: FbBitfield,
}

impl PixelLayout {
    /// `0x00RRGGBB`
    pub const XRGB8888: PixelLayout = PixelLayout {
        red: FbBitfield::new(16, 8),
        green: FbBitfield::new(8, 8),
        blue: FbBitfield::new(0, 8),
        transp: FbBitfield::new(0, 0),
    };

    pub fn from_var(var: &FbVarScreenInfo) -> Self {
        Self {
            red: var.red,
            green: var.green,
            blue: var.blue,
            transp: var.transp,
        }
    }

    /// Opaque device pixel for an RGB triple.
    pub fn encode(&self, r: u8, g: u8, b: u8) -> u32 {
        self.red.encode(r) | self.green.encode(g) | self.blue.encode(b) | self.transp.encode(0xff)
    }
}

/// Destination pixel memory, starting at the first visible pixel.
pub struct FrameTarget<'a> {
    pub bytes: &'a mut [u8],
    pub width: u32,
    pub height: u32,
    /// Bytes per scanline.
    pub stride: usize,
    pub layout: PixelLayout,
}

impl FrameTarget<'_> {
    fn bounds(&self) -> Rect {
        Rect::new(0, 0, self.width as i32, self.height as i32)
    }

    fn clear(&mut self) {
        self.bytes.fill(0);
    }

    fn write(&mut self, x: usize, y: usize, value: u32) {
        let start = y * self.stride + x * BYTES_PER_PIXEL;
        if let Some(dst) = self.bytes.get_mut(start..start + BYTES_PER_PIXEL) {
            dst.copy_from_slice(&value.to_ne_bytes());
        }
    }
}

/// Mapping from guest surface coordinates to screen coordinates:
/// `screen = guest * scale + (cx, cy)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewTransform {
    pub scale: f64,
    pub cx: i32,
    pub cy: i32,
}

impl Default for ViewTransform {
    fn default() -> Self {
        Self {
            scale: 1.0,
            cx: 0,
            cy: 0,
        }
    }
}

impl ViewTransform {
    /// Fit a `width`x`height` surface on a `screen_width`x`screen_height`
    /// screen.
    ///
    /// Scaling preserves the aspect ratio and centers the axis that has
    /// room left; without scaling a smaller surface is centered.
    pub fn compute(
        screen_width: u32,
        screen_height: u32,
        width: u32,
        height: u32,
        scaling: bool,
    ) -> Self {
        if width == 0 || height == 0 {
            return Self::default();
        }
        let (sw, sh) = (f64::from(screen_width), f64::from(screen_height));
        let (w, h) = (f64::from(width), f64::from(height));

        if scaling {
            let xs = sw / w;
            let ys = sh / h;
            if xs > ys {
                Self {
                    scale: ys,
                    cx: ((sw - w * ys) / 2.0) as i32,
                    cy: 0,
                }
            } else {
                Self {
                    scale: xs,
                    cx: 0,
                    cy: ((sh - h * xs) / 2.0) as i32,
                }
            }
        } else {
            let center = |screen: u32, size: u32| {
                if size < screen {
                    ((screen - size) / 2) as i32
                } else {
                    0
                }
            };
            Self {
                scale: 1.0,
                cx: center(screen_width, width),
                cy: center(screen_height, height),
            }
        }
    }

    pub fn is_scaled(&self) -> bool {
        (self.scale - 1.0).abs() > f64::EPSILON
    }

    /// Screen rectangle covering the guest rectangle `rect`, clipped to
    /// `screen`.
    ///
    /// Rounded outwards; scaled views grow by one pixel for filter bleed.
    pub fn map_rect(&self, rect: &Rect, screen: &Rect) -> Rect {
        if rect.is_empty() {
            return Rect::default();
        }
        let s = self.scale;
        let mut x0 = ((f64::from(rect.x) * s).floor() as i32).saturating_add(self.cx);
        let mut y0 = ((f64::from(rect.y) * s).floor() as i32).saturating_add(self.cy);
        let mut x1 = ((f64::from(rect.right()) * s).ceil() as i32).saturating_add(self.cx);
        let mut y1 = ((f64::from(rect.bottom()) * s).ceil() as i32).saturating_add(self.cy);
        if self.is_scaled() {
            x0 = x0.saturating_sub(1);
            y0 = y0.saturating_sub(1);
            x1 = x1.saturating_add(1);
            y1 = y1.saturating_add(1);
        }
        Rect::from_edges(x0, y0, x1, y1).intersect(screen)
    }

    /// Size of a `width`x`height` surface on screen.
    pub fn scaled_extent(&self, width: u32, height: u32) -> (i32, i32) {
        (
            (f64::from(width) * self.scale) as i32,
            (f64::from(height) * self.scale) as i32,
        )
    }

    fn to_skia(self) -> Transform {
        let s = self.scale as f32;
        Transform::from_row(s, 0.0, 0.0, s, self.cx as f32, self.cy as f32)
    }
}

/// Guest pointer overlay.
#[derive(Default)]
struct CursorOverlay {
    cursor: Option<Arc<Cursor>>,
    image: Option<Pixmap>,
    x: i32,
    y: i32,
    visible: bool,
    /// Screen rectangle of the last drawn cursor.
    last: Option<Rect>,
    refresh: u32,
}

impl CursorOverlay {
    fn image_from(cursor: &Cursor) -> Option<Pixmap> {
        let mut pixmap = Pixmap::new(cursor.width, cursor.height)?;
        for (dst, &argb) in pixmap.pixels_mut().iter_mut().zip(&cursor.pixels) {
            *dst = ColorU8::from_rgba(
                (argb >> 16) as u8,
                (argb >> 8) as u8,
                argb as u8,
                (argb >> 24) as u8,
            )
            .premultiply();
        }
        Some(pixmap)
    }

    fn is_shown(&self) -> bool {
        self.image.is_some() && self.visible
    }
}

pub struct Compositor {
    screen: Rect,
    shadow: Pixmap,
    clip: Mask,
    source: Option<Pixmap>,
    surface: Option<(u32, u32)>,
    transform: ViewTransform,
    scaling: bool,
    filter: FilterMode,
    resize_pending: bool,
    redraw_pending: bool,
    /// Damage in guest coordinates, not yet uploaded.
    damage: DirtyRegion,
    /// Screen rectangles to recomposite.
    dirty: DirtyRegion,
    cursor: CursorOverlay,
}

impl Compositor {
    pub fn new(width: u32, height: u32, scaling: bool, filter: FilterMode) -> Result<Self> {
        let shadow = Pixmap::new(width, height).ok_or(Error::Image(width, height))?;
        let clip = Mask::new(width, height).ok_or(Error::Image(width, height))?;
        Ok(Self {
            screen: Rect::new(0, 0, width as i32, height as i32),
            shadow,
            clip,
            source: None,
            surface: None,
            transform: ViewTransform::default(),
            scaling,
            filter,
            resize_pending: false,
            redraw_pending: false,
            damage: DirtyRegion::new(),
            dirty: DirtyRegion::new(),
            cursor: CursorOverlay::default(),
        })
    }

    pub fn transform(&self) -> ViewTransform {
        self.transform
    }

    pub fn surface_size(&self) -> Option<(u32, u32)> {
        self.surface
    }

    pub fn is_scaling(&self) -> bool {
        self.scaling
    }

    pub fn is_resize_pending(&self) -> bool {
        self.resize_pending
    }

    pub fn is_redraw_pending(&self) -> bool {
        self.redraw_pending
    }

    pub fn dirty(&self) -> &DirtyRegion {
        &self.dirty
    }

    /// Shadow pixel at (`x`, `y`) as `0xAARRGGBB`, premultiplied.
    pub fn shadow_pixel(&self, x: u32, y: u32) -> Option<u32> {
        let c = self.shadow.pixel(x, y)?;
        Some(
            u32::from(c.alpha()) << 24
                | u32::from(c.red()) << 16
                | u32::from(c.green()) << 8
                | u32::from(c.blue()),
        )
    }

    /// The guest switched to a `width`x`height` surface.
    pub fn surface_switch(&mut self, width: u32, height: u32) {
        self.surface = Some((width, height));
        self.resize_pending = true;
        self.redraw_pending = true;
    }

    pub fn toggle_scale(&mut self) {
        self.scaling = !self.scaling;
        debug!("Scaling {}", if self.scaling { "on" } else { "off" });
        self.resize_pending = true;
        self.redraw_pending = true;
    }

    pub fn request_redraw(&mut self) {
        self.redraw_pending = true;
    }

    /// Guest rectangle changed.
    pub fn damage(&mut self, rect: Rect) {
        self.damage.union_rect(rect);
        if self.cursor.is_shown() {
            self.cursor.refresh += 1;
        }
    }

    pub fn set_pointer(&mut self, x: i32, y: i32, visible: bool) {
        self.cursor.refresh += 1;
        self.cursor.x = x;
        self.cursor.y = y;
        self.cursor.visible = visible;
    }

    pub fn define_cursor(&mut self, cursor: Option<Arc<Cursor>>) {
        self.cursor.refresh += 1;
        self.cursor.cursor = None;
        self.cursor.image = None;

        let Some(cursor) = cursor else {
            return;
        };
        self.cursor.image = CursorOverlay::image_from(&cursor);
        self.cursor.cursor = Some(cursor);
    }

    /// Pointer area in screen pixels, used for absolute pointer events.
    pub fn pointer_extent(&self) -> (i32, i32) {
        match self.surface {
            Some((w, h)) => self.transform.scaled_extent(w, h),
            None => (0, 0),
        }
    }

    /// Bring `target` up to date with `surface`.
    pub fn render(&mut self, surface: &DisplaySurface, target: &mut FrameTarget<'_>) -> Result<()> {
        let Some((width, height)) = self.surface else {
            return Ok(());
        };

        if self.resize_pending {
            self.resize_pending = false;
            self.transform =
                ViewTransform::compute(self.screen.width as u32, self.screen.height as u32, width, height, self.scaling);
            self.source = if width > 0 && height > 0 {
                Some(Pixmap::new(width, height).ok_or(Error::Image(width, height))?)
            } else {
                None
            };
            debug!(
                "Resized to {width}x{height}: scale {:.3} offset {},{}",
                self.transform.scale, self.transform.cx, self.transform.cy
            );
        }

        if self.redraw_pending {
            self.redraw_pending = false;
            target.clear();
            self.shadow.fill(tiny_skia::Color::BLACK);
            // Also schedules the cursor overlay, the clear wiped it.
            self.damage(Rect::new(0, 0, width as i32, height as i32));
        }

        self.upload_damage(surface);

        if self.cursor.refresh > 0 {
            if let Some(last) = self.cursor.last.take() {
                self.dirty.union_rect(last);
            }
        }

        if !self.dirty.is_empty() {
            self.composite();
            for rect in self.dirty.rects() {
                Self::blit(&self.shadow, rect, target);
            }
            self.dirty.clear();
        }

        if self.cursor.refresh > 0 {
            self.cursor.refresh = 0;
            self.render_cursor(target);
        }
        Ok(())
    }

    fn upload_damage(&mut self, surface: &DisplaySurface) {
        let Some(source) = self.source.as_mut() else {
            self.damage.clear();
            return;
        };
        let bounds = Rect::new(
            0,
            0,
            source.width().min(surface.width) as i32,
            source.height().min(surface.height) as i32,
        );
        let stride = source.width() as usize;
        let data = source.data_mut();
        for rect in self.damage.rects() {
            let rect = rect.intersect(&bounds);
            for y in rect.y..rect.bottom() {
                for x in rect.x..rect.right() {
                    let px = surface.pixel(x as u32, y as u32);
                    let i = (y as usize * stride + x as usize) * BYTES_PER_PIXEL;
                    data[i..i + BYTES_PER_PIXEL].copy_from_slice(&[
                        (px >> 16) as u8,
                        (px >> 8) as u8,
                        px as u8,
                        0xff,
                    ]);
                }
            }
            self.dirty
                .union_rect(self.transform.map_rect(&rect, &self.screen));
        }
        self.damage.clear();
    }

    /// Redraw the dirty rectangles of the shadow from the source image.
    fn composite(&mut self) {
        let stride = self.screen.width as usize;
        let mask = self.clip.data_mut();
        mask.fill(0);
        let pixels = self.shadow.data_mut();
        for rect in self.dirty.rects() {
            let rect = rect.intersect(&self.screen);
            for y in rect.y..rect.bottom() {
                let row = y as usize * stride;
                let (start, end) = (row + rect.x as usize, row + rect.right() as usize);
                mask[start..end].fill(0xff);
                // Screen outside the guest image is black.
                for px in pixels[start * BYTES_PER_PIXEL..end * BYTES_PER_PIXEL].chunks_exact_mut(BYTES_PER_PIXEL) {
                    px.copy_from_slice(&[0, 0, 0, 0xff]);
                }
            }
        }

        if let Some(source) = self.source.as_ref() {
            let paint = PixmapPaint {
                opacity: 1.0,
                blend_mode: BlendMode::Source,
                quality: self.filter.quality(),
            };
            self.shadow
                .draw_pixmap(0, 0, source.as_ref(), &paint, self.transform.to_skia(), Some(&self.clip));
        }
    }

    fn render_cursor(&mut self, target: &mut FrameTarget<'_>) {
        let (Some(cursor), Some(image)) = (self.cursor.cursor.as_ref(), self.cursor.image.as_ref()) else {
            return;
        };
        let Some((width, height)) = self.surface else {
            return;
        };
        let (mx, my) = (self.cursor.x, self.cursor.y);
        if !self.cursor.visible || mx < 0 || my < 0 || mx >= width as i32 || my >= height as i32 {
            return;
        }

        let px = mx - cursor.hot_x;
        let py = my - cursor.hot_y;
        let guest = Rect::new(px, py, cursor.width as i32, cursor.height as i32);
        let rect = self.transform.map_rect(&guest, &self.screen);
        if rect.is_empty() {
            return;
        }

        let paint = PixmapPaint {
            opacity: 1.0,
            blend_mode: BlendMode::SourceOver,
            quality: self.filter.quality(),
        };
        self.shadow
            .draw_pixmap(px, py, image.as_ref(), &paint, self.transform.to_skia(), None);
        Self::blit(&self.shadow, &rect, target);
        self.cursor.last = Some(rect);
    }

    /// Copy `rect` of the shadow into `target`, converting pixels.
    fn blit(shadow: &Pixmap, rect: &Rect, target: &mut FrameTarget<'_>) {
        let rect = rect
            .intersect(&target.bounds())
            .intersect(&Rect::new(0, 0, shadow.width() as i32, shadow.height() as i32));
        let stride = shadow.width() as usize;
        let pixels = shadow.pixels();
        for y in rect.y..rect.bottom() {
            for x in rect.x..rect.right() {
                let c = pixels[y as usize * stride + x as usize];
                let value = target.layout.encode(c.red(), c.green(), c.blue());
                target.write(x as usize, y as usize, value);
            }
        }
    }
}
