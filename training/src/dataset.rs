use lungscan::models::tensor_from;
use lungscan::preprocess::{CHANNELS, FLAT_LEN, IMAGE_SIZE, PreprocessError, load_pixels};
use ndarray::{Array4, Axis};
use rand::Rng;
use rand::seq::SliceRandom;
use shared::{CLASS_COUNT, LungClass};
use std::path::{Path, PathBuf};
use tch::{Device, Kind, Tensor};

use crate::augment::Augmenter;

const IMAGE_EXTENSIONS: [&str; 7] = ["png", "jpg", "jpeg", "bmp", "gif", "tif", "tiff"];

#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Directory {} does not name a known class", path.display())]
    UnknownClass { path: PathBuf },
    #[error("No images found under {}", path.display())]
    Empty { path: PathBuf },
    #[error("Failed to load {}: {source}", path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: PreprocessError,
    },
}

#[derive(Debug, Clone)]
pub struct Sample {
    pub path: PathBuf,
    pub class: LungClass,
}

/// Images laid out as `<root>/<class directory>/<image>`.
///
/// Directory names only need to start with a class name, so the
/// stage-annotated folders of the public chest CT set resolve as well.
#[derive(Debug)]
pub struct ImageFolder {
    root: PathBuf,
    samples: Vec<Sample>,
}

impl ImageFolder {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, DatasetError> {
        let root = root.as_ref().to_path_buf();
        let mut samples = Vec::new();

        for class_dir in sorted_entries(&root)? {
            if !class_dir.is_dir() {
                continue;
            }
            let class = class_dir
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(LungClass::from_label)
                .ok_or_else(|| DatasetError::UnknownClass {
                    path: class_dir.clone(),
                })?;

            for path in sorted_entries(&class_dir)? {
                if path.is_file() && has_image_extension(&path) {
                    samples.push(Sample { path, class });
                }
            }
        }

        if samples.is_empty() {
            return Err(DatasetError::Empty { path: root });
        }
        samples.sort_by(|a, b| (a.class.index(), &a.path).cmp(&(b.class.index(), &b.path)));

        let folder = Self { root, samples };
        log::info!(
            "Found {} images in {} ({:?} per class)",
            folder.len(),
            folder.root.display(),
            folder.class_counts()
        );
        Ok(folder)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Number of images per class, in canonical class order.
    pub fn class_counts(&self) -> [usize; CLASS_COUNT] {
        let mut counts = [0; CLASS_COUNT];
        for sample in &self.samples {
            counts[sample.class.index()] += 1;
        }
        counts
    }

    /// Splits the sample indices into batches of `batch_size`; the last one
    /// may be shorter.
    pub fn batches(&self, batch_size: usize, shuffle: bool, rng: &mut impl Rng) -> Vec<Vec<usize>> {
        let mut order: Vec<usize> = (0..self.len()).collect();
        if shuffle {
            order.shuffle(rng);
        }
        order.chunks(batch_size.max(1)).map(<[usize]>::to_vec).collect()
    }

    /// Number of complete batches of `batch_size`, dropping the remainder.
    pub fn full_batches(&self, batch_size: usize) -> usize {
        self.len() / batch_size.max(1)
    }

    /// Decodes the given samples, applying `augmenter` to each when set.
    pub fn load_batch(
        &self,
        indices: &[usize],
        augmenter: Option<&Augmenter>,
        rng: &mut impl Rng,
    ) -> Result<Batch, DatasetError> {
        let side = IMAGE_SIZE as usize;
        let mut images = Array4::<f32>::zeros((indices.len(), side, side, CHANNELS));
        let mut labels = Vec::with_capacity(indices.len());

        for (slot, &index) in indices.iter().enumerate() {
            let sample = &self.samples[index];
            let mut pixels = load_pixels(&sample.path).map_err(|source| DatasetError::Image {
                path: sample.path.clone(),
                source,
            })?;
            if let Some(augmenter) = augmenter {
                pixels = augmenter.apply(&pixels, rng);
            }
            images.index_axis_mut(Axis(0), slot).assign(&pixels);
            labels.push(sample.class.index() as i64);
        }

        Ok(Batch { images, labels })
    }
}

/// Decoded images with their canonical class indices.
#[derive(Debug)]
pub struct Batch {
    /// `[n, 128, 128, 3]`
    pub images: Array4<f32>,
    pub labels: Vec<i64>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Images as a `[n, 128, 128, 3]` float tensor.
    pub fn image_tensor(&self, device: Device) -> Tensor {
        tensor_from(self.images.iter().copied(), self.images.shape()).to_device(device)
    }

    /// Images flattened to `[n, 49152]` in the requested precision.
    pub fn flat_tensor(&self, kind: Kind, device: Device) -> Tensor {
        self.image_tensor(device)
            .view([self.len() as i64, FLAT_LEN as i64])
            .to_kind(kind)
    }

    pub fn label_tensor(&self, device: Device) -> Tensor {
        Tensor::from_slice(&self.labels).to_device(device)
    }
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, DatasetError> {
    let io_err = |source| DatasetError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = std::fs::read_dir(dir)
        .map_err(io_err)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(io_err)?;
    entries.sort();
    Ok(entries)
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn write_image(path: &Path, shade: u8) {
        RgbImage::from_pixel(40, 30, Rgb([shade, shade, shade]))
            .save(path)
            .unwrap();
    }

    /// Two normal scans and one adenocarcinoma scan, plus a stray text file.
    fn small_tree(root: &Path) {
        let adeno = root.join("adenocarcinoma_left.lower.lobe_T2_N0_M0_Ib");
        let normal = root.join("normal");
        std::fs::create_dir_all(&adeno).unwrap();
        std::fs::create_dir_all(&normal).unwrap();
        write_image(&adeno.join("a1.png"), 200);
        write_image(&normal.join("n1.png"), 10);
        write_image(&normal.join("n2.JPG"), 20);
        std::fs::write(normal.join("notes.txt"), "not an image").unwrap();
    }

    #[test]
    fn labels_follow_canonical_order() {
        let dir = tempfile::tempdir().unwrap();
        small_tree(dir.path());

        let folder = ImageFolder::open(dir.path()).unwrap();
        assert_eq!(folder.len(), 3);
        assert_eq!(folder.class_counts(), [0, 0, 1, 2]);

        let mut rng = StdRng::seed_from_u64(0);
        let batch = folder.load_batch(&[0, 1, 2], None, &mut rng).unwrap();
        assert_eq!(batch.labels, vec![2, 3, 3]);
        assert_eq!(batch.images.shape(), &[3, 128, 128, 3]);
        assert!((batch.images[[0, 5, 5, 0]] - 200.0 / 255.0).abs() < 0.02);
    }

    #[test]
    fn unknown_directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("mesothelioma")).unwrap();

        assert!(matches!(
            ImageFolder::open(dir.path()),
            Err(DatasetError::UnknownClass { .. })
        ));
    }

    #[test]
    fn empty_tree_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("normal")).unwrap();

        assert!(matches!(
            ImageFolder::open(dir.path()),
            Err(DatasetError::Empty { .. })
        ));
    }

    #[test]
    fn batches_cover_every_sample_once() {
        let dir = tempfile::tempdir().unwrap();
        small_tree(dir.path());
        let folder = ImageFolder::open(dir.path()).unwrap();

        let mut rng = StdRng::seed_from_u64(7);
        let batches = folder.batches(2, true, &mut rng);
        assert_eq!(batches.iter().map(Vec::len).collect::<Vec<_>>(), vec![2, 1]);

        let mut seen: Vec<usize> = batches.into_iter().flatten().collect();
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[test]
    fn full_batches_drop_the_remainder() {
        let dir = tempfile::tempdir().unwrap();
        small_tree(dir.path());
        let folder = ImageFolder::open(dir.path()).unwrap();

        assert_eq!(folder.full_batches(2), 1);
        assert_eq!(folder.full_batches(3), 1);
        assert_eq!(folder.full_batches(4), 0);
        assert_eq!(folder.full_batches(0), 3);
    }

    #[test]
    fn flat_tensor_matches_model_input() {
        let dir = tempfile::tempdir().unwrap();
        small_tree(dir.path());
        let folder = ImageFolder::open(dir.path()).unwrap();

        let mut rng = StdRng::seed_from_u64(0);
        let batch = folder.load_batch(&[1, 2], None, &mut rng).unwrap();
        let flat = batch.flat_tensor(Kind::Double, Device::Cpu);
        assert_eq!(flat.size(), vec![2, FLAT_LEN as i64]);
        assert_eq!(flat.kind(), Kind::Double);
        assert_eq!(batch.label_tensor(Device::Cpu).size(), vec![2]);
    }
}
