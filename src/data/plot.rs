//! Diagnostic charts.
//!
//! [`PlotSink`] is the seam between the experiment loops and chart rendering.
//! [`PngPlotter`] draws plain raster charts (frame, polylines, markers, heat maps)
//! straight into an RGB buffer; [`NullPlotter`] discards everything, which is what
//! `--no-plots` and most tests use.

use crate::measurement::Spectrum;
use anyhow::{bail, Context, Result};
use image::{Rgb, RgbImage};
use palette::{Hsl, IntoColor, LinSrgb, Mix, Srgb};
use std::path::Path;

/// Chart rendering target.
pub trait PlotSink: Send + Sync {
    /// Single spectrum with a vertical marker at its peak.
    fn spectrum(&self, path: &Path, spectrum: &Spectrum) -> Result<()>;

    /// Several spectra on shared axes, one colour each.
    fn overlay(&self, path: &Path, spectra: &[&Spectrum]) -> Result<()>;

    /// Scalar series `y(x)` drawn as a line with point markers.
    fn trace(&self, path: &Path, x: &[f64], y: &[f64]) -> Result<()>;

    /// Wavelength × time heat map. `levels` quantizes the colour scale into
    /// filled contour bands; `None` renders a continuous gradient.
    fn intensity_map(
        &self,
        path: &Path,
        times: &[f64],
        spectra: &[Spectrum],
        levels: Option<usize>,
    ) -> Result<()>;
}

/// Discards every chart.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullPlotter;

impl PlotSink for NullPlotter {
    fn spectrum(&self, _path: &Path, _spectrum: &Spectrum) -> Result<()> {
        Ok(())
    }

    fn overlay(&self, _path: &Path, _spectra: &[&Spectrum]) -> Result<()> {
        Ok(())
    }

    fn trace(&self, _path: &Path, _x: &[f64], _y: &[f64]) -> Result<()> {
        Ok(())
    }

    fn intensity_map(
        &self,
        _path: &Path,
        _times: &[f64],
        _spectra: &[Spectrum],
        _levels: Option<usize>,
    ) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Colours
// ---------------------------------------------------------------------------

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const FRAME: Rgb<u8> = Rgb([90, 90, 90]);
const GRID: Rgb<u8> = Rgb([225, 225, 225]);
const LINE: Rgb<u8> = Rgb([31, 119, 180]);
const PEAK: Rgb<u8> = Rgb([214, 39, 40]);

/// Stops of an inferno-like colour map, dark to bright.
const HEAT_STOPS: [(f32, f32, f32); 5] = [
    (0.0, 0.0, 0.016),
    (0.341, 0.063, 0.431),
    (0.735, 0.216, 0.330),
    (0.976, 0.557, 0.035),
    (0.988, 1.0, 0.643),
];

/// Generates `n` visually distinct colours using evenly spaced hues.
fn series_palette(n: usize) -> Vec<Rgb<u8>> {
    (0..n)
        .map(|i| {
            let hue = (i as f32 / n.max(1) as f32) * 360.0;
            let hsl = Hsl::new(hue, 0.75, 0.45);
            let rgb: Srgb = hsl.into_color();
            to_pixel(rgb)
        })
        .collect()
}

fn to_pixel(rgb: Srgb) -> Rgb<u8> {
    let rgb: Srgb<u8> = rgb.into_format();
    Rgb([rgb.red, rgb.green, rgb.blue])
}

/// Colour for `t` in `[0, 1]` on the heat map.
fn heat_color(t: f64) -> Rgb<u8> {
    let t = t.clamp(0.0, 1.0) as f32 * (HEAT_STOPS.len() - 1) as f32;
    let idx = (t.floor() as usize).min(HEAT_STOPS.len() - 2);
    let frac = t - idx as f32;
    let (r0, g0, b0) = HEAT_STOPS[idx];
    let (r1, g1, b1) = HEAT_STOPS[idx + 1];
    let lo: LinSrgb = Srgb::new(r0, g0, b0).into_linear();
    let hi: LinSrgb = Srgb::new(r1, g1, b1).into_linear();
    to_pixel(Srgb::from_linear(lo.mix(hi, frac)))
}

// ---------------------------------------------------------------------------
// Canvas
// ---------------------------------------------------------------------------

/// Data range mapped onto the plot area.
#[derive(Debug, Clone, Copy)]
struct Bounds {
    x0: f64,
    x1: f64,
    y0: f64,
    y1: f64,
}

impl Bounds {
    fn from_points<'a>(points: impl Iterator<Item = (&'a f64, &'a f64)>) -> Result<Self> {
        let mut b = Bounds {
            x0: f64::INFINITY,
            x1: f64::NEG_INFINITY,
            y0: f64::INFINITY,
            y1: f64::NEG_INFINITY,
        };
        for (x, y) in points.filter(|(x, y)| x.is_finite() && y.is_finite()) {
            b.x0 = b.x0.min(*x);
            b.x1 = b.x1.max(*x);
            b.y0 = b.y0.min(*y);
            b.y1 = b.y1.max(*y);
        }
        if !b.x0.is_finite() {
            bail!("no finite data to plot");
        }
        let (x0, x1) = widen(b.x0, b.x1);
        let (y0, y1) = widen(b.y0, b.y1);
        let pad = (y1 - y0) * 0.05;
        Ok(Bounds {
            x0,
            x1,
            y0: y0 - pad,
            y1: y1 + pad,
        })
    }
}

fn widen(lo: f64, hi: f64) -> (f64, f64) {
    if hi > lo {
        (lo, hi)
    } else {
        let half = if lo == 0.0 { 1.0 } else { lo.abs() * 0.5 };
        (lo - half, hi + half)
    }
}

struct Canvas {
    img: RgbImage,
    left: u32,
    top: u32,
    right: u32,
    bottom: u32,
}

impl Canvas {
    const WIDTH: u32 = 800;
    const HEIGHT: u32 = 500;
    const MARGIN: u32 = 40;

    fn new() -> Self {
        Self {
            img: RgbImage::from_pixel(Self::WIDTH, Self::HEIGHT, WHITE),
            left: Self::MARGIN,
            top: Self::MARGIN,
            right: Self::WIDTH - Self::MARGIN,
            bottom: Self::HEIGHT - Self::MARGIN,
        }
    }

    fn plot_width(&self) -> u32 {
        self.right - self.left
    }

    fn plot_height(&self) -> u32 {
        self.bottom - self.top
    }

    fn to_px(&self, b: &Bounds, x: f64, y: f64) -> (i64, i64) {
        let fx = (x - b.x0) / (b.x1 - b.x0);
        let fy = (y - b.y0) / (b.y1 - b.y0);
        let px = self.left as f64 + fx * self.plot_width() as f64;
        let py = self.bottom as f64 - fy * self.plot_height() as f64;
        (px.round() as i64, py.round() as i64)
    }

    fn put(&mut self, x: i64, y: i64, color: Rgb<u8>) {
        if x >= 0 && y >= 0 && (x as u32) < self.img.width() && (y as u32) < self.img.height() {
            self.img.put_pixel(x as u32, y as u32, color);
        }
    }

    fn grid(&mut self) {
        for i in 1..5 {
            let y = self.top + self.plot_height() * i / 5;
            let x = self.left + self.plot_width() * i / 5;
            self.line((self.left as i64, y as i64), (self.right as i64, y as i64), GRID);
            self.line((x as i64, self.top as i64), (x as i64, self.bottom as i64), GRID);
        }
    }

    fn frame(&mut self) {
        let (l, t, r, b) = (
            self.left as i64,
            self.top as i64,
            self.right as i64,
            self.bottom as i64,
        );
        self.line((l, t), (r, t), FRAME);
        self.line((r, t), (r, b), FRAME);
        self.line((r, b), (l, b), FRAME);
        self.line((l, b), (l, t), FRAME);
    }

    /// Bresenham line.
    fn line(&mut self, from: (i64, i64), to: (i64, i64), color: Rgb<u8>) {
        let (mut x, mut y) = from;
        let dx = (to.0 - x).abs();
        let dy = -(to.1 - y).abs();
        let sx = if x < to.0 { 1 } else { -1 };
        let sy = if y < to.1 { 1 } else { -1 };
        let mut err = dx + dy;
        loop {
            self.put(x, y, color);
            if x == to.0 && y == to.1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }

    fn polyline(&mut self, b: &Bounds, xs: &[f64], ys: &[f64], color: Rgb<u8>) {
        let mut last: Option<(i64, i64)> = None;
        for (x, y) in xs.iter().zip(ys) {
            if !(x.is_finite() && y.is_finite()) {
                last = None;
                continue;
            }
            let p = self.to_px(b, *x, *y);
            match last {
                Some(prev) => self.line(prev, p, color),
                None => self.put(p.0, p.1, color),
            }
            last = Some(p);
        }
    }

    fn marker(&mut self, center: (i64, i64), color: Rgb<u8>) {
        for dx in -2..=2 {
            for dy in -2..=2 {
                self.put(center.0 + dx, center.1 + dy, color);
            }
        }
    }

    fn dashed_vertical(&mut self, x: i64, color: Rgb<u8>) {
        for y in (self.top as i64)..=(self.bottom as i64) {
            if (y / 6) % 2 == 0 {
                self.put(x, y, color);
                self.put(x + 1, y, color);
            }
        }
    }

    fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        self.img
            .save(path)
            .with_context(|| format!("writing chart {}", path.display()))
    }
}

// ---------------------------------------------------------------------------
// PNG plotter
// ---------------------------------------------------------------------------

/// Renders charts as PNG files.
#[derive(Debug, Clone, Copy, Default)]
pub struct PngPlotter;

impl PlotSink for PngPlotter {
    fn spectrum(&self, path: &Path, spectrum: &Spectrum) -> Result<()> {
        let b = Bounds::from_points(spectrum.wavelength().iter().zip(spectrum.intensity()))?;
        let mut canvas = Canvas::new();
        canvas.grid();
        canvas.polyline(&b, spectrum.wavelength(), spectrum.intensity(), LINE);
        let peak = spectrum.peak();
        let (px, py) = canvas.to_px(&b, peak.wavelength, peak.intensity);
        canvas.dashed_vertical(px, PEAK);
        canvas.marker((px, py), PEAK);
        canvas.frame();
        canvas.save(path)
    }

    fn overlay(&self, path: &Path, spectra: &[&Spectrum]) -> Result<()> {
        if spectra.is_empty() {
            bail!("overlay needs at least one spectrum");
        }
        let b = Bounds::from_points(
            spectra
                .iter()
                .copied()
                .flat_map(|s| s.wavelength().iter().zip(s.intensity())),
        )?;
        let mut canvas = Canvas::new();
        canvas.grid();
        for (spectrum, color) in spectra.iter().zip(series_palette(spectra.len())) {
            canvas.polyline(&b, spectrum.wavelength(), spectrum.intensity(), color);
        }
        canvas.frame();
        canvas.save(path)
    }

    fn trace(&self, path: &Path, x: &[f64], y: &[f64]) -> Result<()> {
        if x.len() != y.len() {
            bail!("trace has {} x values but {} y values", x.len(), y.len());
        }
        let b = Bounds::from_points(x.iter().zip(y))?;
        let mut canvas = Canvas::new();
        canvas.grid();
        canvas.polyline(&b, x, y, LINE);
        for (xi, yi) in x.iter().zip(y).filter(|(a, b)| a.is_finite() && b.is_finite()) {
            let p = canvas.to_px(&b, *xi, *yi);
            canvas.marker(p, LINE);
        }
        canvas.frame();
        canvas.save(path)
    }

    fn intensity_map(
        &self,
        path: &Path,
        times: &[f64],
        spectra: &[Spectrum],
        levels: Option<usize>,
    ) -> Result<()> {
        if spectra.len() < 2 || times.len() != spectra.len() {
            bail!(
                "intensity map needs at least two spectra with one time each (got {} spectra, {} times)",
                spectra.len(),
                times.len()
            );
        }
        let pixels = spectra[0].len();
        if spectra.iter().any(|s| s.len() != pixels) {
            bail!("intensity map needs spectra on a common wavelength axis");
        }
        let (lo, hi) = spectra
            .iter()
            .flat_map(|s| s.intensity().iter().copied())
            .filter(|v| v.is_finite())
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(v), hi.max(v))
            });
        let (lo, hi) = widen(lo, hi);
        let (t0, t1) = widen(times[0], times[times.len() - 1]);

        let mut canvas = Canvas::new();
        let (w, h) = (canvas.plot_width(), canvas.plot_height());
        for px in 0..w {
            let t = t0 + (t1 - t0) * (px as f64 + 0.5) / w as f64;
            let col = times.partition_point(|x| *x < t).min(times.len() - 1);
            let col = if col > 0 && (t - times[col - 1]) < (times[col] - t) {
                col - 1
            } else {
                col
            };
            let intensity = spectra[col].intensity();
            for py in 0..h {
                let row = ((h - 1 - py) as usize * pixels) / h as usize;
                let mut f = (intensity[row] - lo) / (hi - lo);
                if let Some(n) = levels.filter(|n| *n > 1) {
                    f = ((f * n as f64).floor().min(n as f64 - 1.0)) / (n as f64 - 1.0);
                }
                let (x, y) = (canvas.left + px, canvas.top + py);
                canvas.put(x as i64, y as i64, heat_color(f));
            }
        }
        canvas.frame();
        canvas.save(path)
    }
}
