use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use ndarray::{Array2, Array3, Array4, Axis};
use std::path::{Path, PathBuf};

/// Side length every model is trained and served at.
pub const IMAGE_SIZE: u32 = 128;
pub const CHANNELS: usize = 3;
/// Length of a flattened `IMAGE_SIZE x IMAGE_SIZE x CHANNELS` image.
pub const FLAT_LEN: usize = (IMAGE_SIZE as usize) * (IMAGE_SIZE as usize) * CHANNELS;

#[derive(Debug, thiserror::Error)]
pub enum PreprocessError {
    #[error("Failed to read image {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("Unexpected tensor layout: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// One uploaded image in the three layouts the ensemble members consume.
#[derive(Debug, Clone)]
pub struct PreprocessedImage {
    /// `[1, 128, 128, 3]`, batch/height/width/channel.
    pub cnn: Array4<f32>,
    /// `[1, 49152]` in double precision.
    pub dbn: Array2<f64>,
    /// `[1, 49152]`.
    pub sdae: Array2<f32>,
}

impl PreprocessedImage {
    pub fn from_pixels(pixels: Array3<f32>) -> Result<Self, PreprocessError> {
        let sdae = pixels
            .as_standard_layout()
            .into_owned()
            .into_shape_with_order((1, FLAT_LEN))?;
        let dbn = sdae.mapv(f64::from);
        let cnn = pixels.insert_axis(Axis(0));

        Ok(Self { cnn, dbn, sdae })
    }

    pub fn shapes(&self) -> String {
        format!(
            "CNN: {:?}, DBN: {:?}, SDAE: {:?}",
            self.cnn.shape(),
            self.dbn.shape(),
            self.sdae.shape()
        )
    }
}

/// Opens, decodes and normalizes the image stored at `path`.
pub fn preprocess_image(path: &Path) -> Result<PreprocessedImage, PreprocessError> {
    let pixels = load_pixels(path)?;
    PreprocessedImage::from_pixels(pixels)
}

/// Decodes `path` into a `[128, 128, 3]` array scaled to `[0, 1]`.
pub fn load_pixels(path: &Path) -> Result<Array3<f32>, PreprocessError> {
    let reader = ImageReader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|source| PreprocessError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    let image = reader.decode()?;
    Ok(image_to_array(&image))
}

pub fn decode_pixels(bytes: &[u8]) -> Result<Array3<f32>, PreprocessError> {
    let image = image::load_from_memory(bytes)?;
    Ok(image_to_array(&image))
}

/// Forces RGB, resizes to `IMAGE_SIZE` square ignoring aspect ratio, and
/// scales intensities from `0..=255` to `0.0..=1.0`.
pub fn image_to_array(image: &DynamicImage) -> Array3<f32> {
    let rgb = image.to_rgb8();
    let resized = image::imageops::resize(&rgb, IMAGE_SIZE, IMAGE_SIZE, FilterType::CatmullRom);
    let side = IMAGE_SIZE as usize;

    Array3::from_shape_fn((side, side, CHANNELS), |(y, x, c)| {
        resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
    })
}
