//! Tensor and image file helpers.

use crate::error::{AppError, AppResult};
use crate::models::auth::DEFAULT_PROFILE_PICTURE;
use crate::models::config::StorageConfig;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use candle_core::{DType, Tensor};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// Pixel size of one grid cell at scale 1.
const CELL_PX: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    ChannelsFirst,
    ChannelsLast,
}

impl FromStr for DataFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "channels_first" => Ok(DataFormat::ChannelsFirst),
            "channels_last" => Ok(DataFormat::ChannelsLast),
            _ => Err(AppError::Unprocessable(
                "expected data_format to be 'channels_first' or 'channels_last'".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageExt {
    Jpeg,
    Png,
}

impl ImageExt {
    pub fn format(self) -> ImageFormat {
        match self {
            ImageExt::Jpeg => ImageFormat::Jpeg,
            ImageExt::Png => ImageFormat::Png,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ImageExt::Jpeg => "jpg",
            ImageExt::Png => "png",
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            ImageExt::Jpeg => "image/jpeg",
            ImageExt::Png => "image/png",
        }
    }
}

impl FromStr for ImageExt {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Ok(ImageExt::Jpeg),
            "png" => Ok(ImageExt::Png),
            other => Err(AppError::Unprocessable(format!("unsupported image type '{other}'"))),
        }
    }
}

/// Layout of [`tensor_to_image`].
#[derive(Debug, Clone)]
pub struct GridOptions {
    /// Only draw the first `n` images.
    pub n: Option<usize>,
    /// Inferred from the shape when `None`.
    pub data_format: Option<DataFormat>,
    /// Value range mapped to black..white.
    pub bounds: (f32, f32),
    pub nrows: Option<usize>,
    pub ncols: Option<usize>,
    /// Multiplies the 100 px cell size.
    pub scale: f64,
}

impl Default for GridOptions {
    fn default() -> Self {
        Self {
            n: None,
            data_format: None,
            bounds: (0.0, 1.0),
            nrows: None,
            ncols: None,
            scale: 1.0,
        }
    }
}

impl GridOptions {
    pub fn with_bounds(mut self, min: f32, max: f32) -> Self {
        self.bounds = (min, max);
        self
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }
}

fn infer_format(dims: &[usize]) -> AppResult<DataFormat> {
    let first = dims[1] == 1 || dims[1] == 3;
    let last = dims[3] == 1 || dims[3] == 3;
    match (first, last) {
        (true, false) => Ok(DataFormat::ChannelsFirst),
        (false, true) => Ok(DataFormat::ChannelsLast),
        _ => Err(AppError::Unprocessable(
            "data_format ambiguous, please specify it explicitly".to_string(),
        )),
    }
}

/// Draw a batch of images on a grid of square cells, each image scaled to
/// fit its cell on a white background.
pub fn tensor_to_image(tensor: &Tensor, options: &GridOptions) -> AppResult<RgbImage> {
    let dims = tensor.dims().to_vec();
    if dims.len() != 4 {
        return Err(AppError::Unprocessable(
            "expected images to have four dimensions: (N, C, H, W) or (N, H, W, C)".to_string(),
        ));
    }

    let mut x = tensor.to_dtype(DType::F32)?;
    if let Some(n) = options.n {
        x = x.narrow(0, 0, n.min(dims[0]))?;
    }

    let format = match options.data_format {
        Some(format) => format,
        None => infer_format(&dims)?,
    };
    if format == DataFormat::ChannelsFirst {
        x = x.permute((0, 2, 3, 1))?;
    }

    let (count, height, width, channels) = x.dims4()?;
    if channels != 1 && channels != 3 {
        return Err(AppError::Unprocessable(format!("cannot draw {channels}-channel images")));
    }

    let (min, max) = options.bounds;
    let pixels: Vec<u8> = x
        .flatten_all()?
        .to_vec1::<f32>()?
        .into_iter()
        .map(|v| (((v - min) / (max - min)).clamp(0.0, 1.0) * 255.0).round() as u8)
        .collect();

    let (nrows, ncols) = match (options.nrows, options.ncols) {
        (None, None) => (1, count.max(1)),
        (Some(r), None) => (r.max(1), count.div_ceil(r.max(1)).max(1)),
        (None, Some(c)) => (count.div_ceil(c.max(1)).max(1), c.max(1)),
        (Some(r), Some(c)) => (r.max(1), c.max(1)),
    };

    let cell = (CELL_PX * options.scale).round().max(1.0) as u32;
    let mut canvas = RgbImage::from_pixel(ncols as u32 * cell, nrows as u32 * cell, Rgb([255, 255, 255]));

    let per_image = height * width * channels;
    for i in 0..count.min(nrows * ncols) {
        let data = &pixels[i * per_image..(i + 1) * per_image];
        let rgb: Vec<u8> = if channels == 3 {
            data.to_vec()
        } else {
            data.iter().flat_map(|&v| [v, v, v]).collect()
        };
        let Some(img) = RgbImage::from_raw(width as u32, height as u32, rgb) else {
            return Err(AppError::Internal("pixel buffer does not match image size".to_string()));
        };

        let fit = cell as f64 / width.max(height) as f64;
        let fw = ((width as f64 * fit).round() as u32).clamp(1, cell);
        let fh = ((height as f64 * fit).round() as u32).clamp(1, cell);
        let resized = image::imageops::resize(&img, fw, fh, FilterType::Triangle);

        let row = (i / ncols) as u32;
        let col = (i % ncols) as u32;
        let left = col * cell + (cell - fw) / 2;
        let top = row * cell + (cell - fh) / 2;
        image::imageops::overlay(&mut canvas, &resized, left as i64, top as i64);
    }

    Ok(canvas)
}

pub fn encode_image(image: &DynamicImage, ext: ImageExt) -> AppResult<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    match ext {
        // JPEG has no alpha channel
        ImageExt::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8()).write_to(&mut buf, ext.format())?,
        ImageExt::Png => image.write_to(&mut buf, ext.format())?,
    }
    Ok(buf.into_inner())
}

pub fn tensor_to_bytes(tensor: &Tensor, ext: ImageExt, options: &GridOptions) -> AppResult<Vec<u8>> {
    let grid = tensor_to_image(tensor, options)?;
    encode_image(&DynamicImage::ImageRgb8(grid), ext)
}

pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode base64 image data; a `data:image/...;base64,` prefix is allowed.
pub fn decode_base64_image(data: &str) -> AppResult<DynamicImage> {
    let payload = match data.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => data,
    };

    // form encoding may turn '+' into ' '
    let payload: String = payload
        .trim()
        .chars()
        .filter(|c| *c != '\n' && *c != '\r')
        .map(|c| if c == ' ' { '+' } else { c })
        .collect();

    let bytes = STANDARD
        .decode(payload)
        .map_err(|e| AppError::Unprocessable(format!("image data is not valid base64: {e}")))?;
    decode_image(&bytes)
}

pub fn decode_image(bytes: &[u8]) -> AppResult<DynamicImage> {
    image::load_from_memory(bytes).map_err(|e| AppError::Unprocessable(format!("cannot decode image: {e}")))
}

/// 16 hex characters.
pub fn random_name() -> String {
    let bytes: [u8; 8] = rand::random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Save `image` under a random name in `dir`, shrunk to fit `output_size`
/// if given. Returns the file name.
pub fn save_image(
    image: &DynamicImage,
    dir: &Path,
    output_size: Option<(u32, u32)>,
    ext: ImageExt,
) -> AppResult<String> {
    std::fs::create_dir_all(dir)?;
    let file_name = format!("{}.{}", random_name(), ext.extension());

    let image = match output_size {
        Some((w, h)) if image.width() > w || image.height() > h => image.thumbnail(w, h),
        _ => image.clone(),
    };
    let bytes = encode_image(&image, ext)?;
    std::fs::write(dir.join(&file_name), bytes)?;

    debug!(file = %file_name, dir = %dir.display(), "Image saved");
    Ok(file_name)
}

/// Create the upload directories under the static dir, and a plain
/// default profile picture if there is none.
pub fn prepare_storage(storage: &StorageConfig) -> AppResult<()> {
    for sub in [
        &storage.models_dir,
        &storage.tmp_dir,
        &storage.profile_pictures_dir,
        &storage.reports_dir,
    ] {
        std::fs::create_dir_all(storage.dir(sub))?;
    }

    let default_picture = storage
        .dir(&storage.profile_pictures_dir)
        .join(DEFAULT_PROFILE_PICTURE);
    if !default_picture.exists() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(125, 125, Rgb([95, 120, 138])));
        std::fs::write(&default_picture, encode_image(&image, ImageExt::Jpeg)?)?;
        debug!(path = %default_picture.display(), "Default profile picture created");
    }
    Ok(())
}

/// Lower-case extension of an uploaded file name, if any.
pub fn extension_of(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Store an uploaded model file under a random name that keeps the
/// original extension. Returns the full path.
pub async fn save_model(bytes: &[u8], original_name: &str, dir: &Path) -> AppResult<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let file_name = match extension_of(original_name) {
        Some(ext) => format!("{}.{ext}", random_name()),
        None => random_name(),
    };
    let path = dir.join(file_name);
    tokio::fs::write(&path, bytes).await?;
    debug!(path = %path.display(), size = bytes.len(), "Model file saved");
    Ok(path)
}

/// Delete a stored file; a file that is already gone is not an error.
pub async fn remove_file(path: &Path) -> AppResult<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
