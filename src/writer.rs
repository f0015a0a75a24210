use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::{GrayImage, ImageFormat, RgbImage};
use tracing::info;

use crate::decode::{DecodedPicture, PictureMeta, PictureSink, PixelFormat};
use crate::Error;

/// Still-image container for exported pictures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Png,
    Jpeg,
    Bmp,
    Tga,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Bmp => "bmp",
            OutputFormat::Tga => "tga",
        }
    }

    fn image_format(&self) -> ImageFormat {
        match self {
            OutputFormat::Png => ImageFormat::Png,
            OutputFormat::Jpeg => ImageFormat::Jpeg,
            OutputFormat::Bmp => ImageFormat::Bmp,
            OutputFormat::Tga => ImageFormat::Tga,
        }
    }
}

/// Writes decoded pictures into a directory as numbered image files.
///
/// JPEG honours the configured quality; the lossless formats ignore it.
pub struct ImageFileWriter {
    dir: PathBuf,
    stem: String,
    format: OutputFormat,
    quality: u8,
    written: Vec<PathBuf>,
}

impl ImageFileWriter {
    pub fn new(
        dir: impl Into<PathBuf>,
        stem: impl Into<String>,
        format: OutputFormat,
        quality: u8,
    ) -> Self {
        Self {
            dir: dir.into(),
            stem: stem.into(),
            format,
            quality: quality.clamp(1, 100),
            written: Vec::new(),
        }
    }

    /// Paths of every picture written so far, in output order.
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    fn write_file(&self, rgb: &RgbImage, path: &Path) -> Result<(), Error> {
        match self.format {
            OutputFormat::Jpeg => {
                let file = File::create(path)?;
                let mut w = BufWriter::new(file);
                JpegEncoder::new_with_quality(&mut w, self.quality)
                    .encode_image(rgb)
                    .map_err(image_error)?;
            }
            _ => {
                rgb.save_with_format(path, self.format.image_format())
                    .map_err(image_error)?;
            }
        }
        Ok(())
    }
}

impl PictureSink for ImageFileWriter {
    fn write_picture(&mut self, picture: &DecodedPicture, meta: &PictureMeta) -> Result<(), Error> {
        let rgb = to_rgb(picture)?;
        let path = self.dir.join(format!(
            "{}_{:03}.{}",
            self.stem,
            meta.index,
            self.format.extension()
        ));
        self.write_file(&rgb, &path)?;
        info!(
            target: "keysnap::writer",
            path = %path.display(),
            pts = meta.pts,
            "picture written"
        );
        self.written.push(path);
        Ok(())
    }
}

fn image_error(e: image::ImageError) -> Error {
    match e {
        image::ImageError::IoError(io) => Error::Io(io),
        other => Error::Io(io::Error::other(other)),
    }
}

/// Expand any supported pixel layout to interleaved RGB for encoding.
fn to_rgb(picture: &DecodedPicture) -> Result<RgbImage, Error> {
    let (w, h) = (picture.width, picture.height);
    if w == 0 || h == 0 {
        return Err(Error::Unsupported("zero-sized picture".into()));
    }

    match picture.format {
        PixelFormat::Rgb24 => {
            let expected = w as usize * h as usize * 3;
            if picture.data.len() != expected {
                return Err(Error::Unsupported(format!(
                    "rgb buffer holds {} bytes, expected {expected}",
                    picture.data.len()
                )));
            }
            RgbImage::from_raw(w, h, picture.data.clone())
                .ok_or_else(|| Error::Unsupported("rgb buffer rejected".into()))
        }
        PixelFormat::Luma8 => {
            let expected = w as usize * h as usize;
            if picture.data.len() != expected {
                return Err(Error::Unsupported(format!(
                    "luma buffer holds {} bytes, expected {expected}",
                    picture.data.len()
                )));
            }
            let gray = GrayImage::from_raw(w, h, picture.data.clone())
                .ok_or_else(|| Error::Unsupported("luma buffer rejected".into()))?;
            Ok(image::DynamicImage::ImageLuma8(gray).to_rgb8())
        }
        PixelFormat::Yuv420Planar => yuv420_to_rgb(picture),
    }
}

/// BT.601 full-range 4:2:0 to RGB.
fn yuv420_to_rgb(picture: &DecodedPicture) -> Result<RgbImage, Error> {
    let w = picture.width as usize;
    let h = picture.height as usize;
    let cw = w.div_ceil(2);
    let ch = h.div_ceil(2);
    let expected = w * h + 2 * cw * ch;
    if picture.data.len() != expected {
        return Err(Error::Unsupported(format!(
            "yuv420 buffer holds {} bytes, expected {expected}",
            picture.data.len()
        )));
    }

    let (y_plane, chroma) = picture.data.split_at(w * h);
    let (u_plane, v_plane) = chroma.split_at(cw * ch);

    let mut rgb = Vec::with_capacity(w * h * 3);
    for row in 0..h {
        for col in 0..w {
            let y = y_plane[row * w + col] as i32;
            let u = u_plane[(row / 2) * cw + col / 2] as i32 - 128;
            let v = v_plane[(row / 2) * cw + col / 2] as i32 - 128;

            let r = y + ((91_881 * v) >> 16);
            let g = y - ((22_554 * u + 46_802 * v) >> 16);
            let b = y + ((116_130 * u) >> 16);

            rgb.push(r.clamp(0, 255) as u8);
            rgb.push(g.clamp(0, 255) as u8);
            rgb.push(b.clamp(0, 255) as u8);
        }
    }

    RgbImage::from_raw(picture.width, picture.height, rgb)
        .ok_or_else(|| Error::Unsupported("yuv conversion buffer rejected".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray_picture(w: u32, h: u32, level: u8) -> DecodedPicture {
        DecodedPicture {
            width: w,
            height: h,
            format: PixelFormat::Luma8,
            data: vec![level; (w * h) as usize],
        }
    }

    #[test]
    fn luma_expands_to_rgb() {
        let rgb = to_rgb(&gray_picture(4, 2, 200)).unwrap();
        assert_eq!(rgb.dimensions(), (4, 2));
        assert_eq!(rgb.get_pixel(0, 0).0, [200, 200, 200]);
    }

    #[test]
    fn yuv_neutral_chroma_is_grayscale() {
        let (w, h) = (4u32, 4u32);
        let mut data = vec![120u8; (w * h) as usize];
        data.extend(std::iter::repeat(128).take(2 * 2 * 2)); // u + v planes
        let pic = DecodedPicture {
            width: w,
            height: h,
            format: PixelFormat::Yuv420Planar,
            data,
        };
        let rgb = to_rgb(&pic).unwrap();
        assert_eq!(rgb.get_pixel(1, 1).0, [120, 120, 120]);
    }

    #[test]
    fn short_buffer_rejected() {
        let mut pic = gray_picture(4, 4, 0);
        pic.data.truncate(3);
        assert!(to_rgb(&pic).is_err());
    }

    #[test]
    fn writer_emits_numbered_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = ImageFileWriter::new(dir.path(), "shot", OutputFormat::Png, 90);
        let meta = PictureMeta {
            index: 0,
            pts: 0,
            dts: 0,
            timescale: 90_000,
        };
        writer
            .write_picture(&gray_picture(8, 8, 64), &meta)
            .unwrap();
        assert_eq!(writer.written().len(), 1);
        assert!(writer.written()[0].ends_with("shot_000.png"));
        assert!(writer.written()[0].exists());
    }
}
