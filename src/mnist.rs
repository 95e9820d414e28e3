use crate::error::{Error, Result};
use flate2::read::GzDecoder;
use itertools::Itertools;
use ndarray::{Array2, ArrayView1, Axis, s};
use std::{fs::File, io::Read, path::Path};
use tracing::info;

pub const IMAGE_ROWS: usize = 28;
pub const IMAGE_COLUMNS: usize = 28;
pub const IMAGE_SIZE: usize = IMAGE_ROWS * IMAGE_COLUMNS;

/// Number of trailing training-file examples held out for validation.
pub const VALIDATION_SIZE: usize = 10_000;

const IMAGE_MAGIC: u32 = 2051;
const LABEL_MAGIC: u32 = 2049;

// Turn every label into a row of n_classes values where every value is 0.0 except for the value in
// the position corresponding to the label, whose value is 1.0. This is the format of a perfect
// prediction of the network once exponentiated.
pub fn one_hot(labels: &[usize], n_classes: usize) -> Result<Array2<f64>> {
    if let Some(&label) = labels.iter().find(|&&label| label >= n_classes) {
        return Err(Error::InvalidLabel { label, n_classes });
    }
    Ok(Array2::from_shape_fn((labels.len(), n_classes), |(i, j)| {
        if labels[i] == j { 1.0 } else { 0.0 }
    }))
}

/// The class count implied by a split: the largest label plus one.
pub fn n_targets(labels: &[usize]) -> usize {
    labels.iter().max().map_or(0, |&max| max + 1)
}

/// Aligned inputs and one-hot labels: row `i` of `labels` belongs to row `i` of `inputs`.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    inputs: Array2<f64>,
    labels: Array2<f64>,
}

impl Dataset {
    pub fn new(inputs: Array2<f64>, labels: Array2<f64>) -> Result<Dataset> {
        if inputs.nrows() != labels.nrows() {
            return Err(Error::ShapeMismatch(format!(
                "{} inputs but {} labels",
                inputs.nrows(),
                labels.nrows()
            )));
        }
        Ok(Dataset { inputs, labels })
    }

    /// Builds a dataset from integer labels, one-hot encoding them over `n_classes`.
    pub fn from_labels(inputs: Array2<f64>, labels: &[usize], n_classes: usize) -> Result<Dataset> {
        Dataset::new(inputs, one_hot(labels, n_classes)?)
    }

    pub fn inputs(&self) -> &Array2<f64> {
        &self.inputs
    }

    pub fn labels(&self) -> &Array2<f64> {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.inputs.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn input_dim(&self) -> usize {
        self.inputs.ncols()
    }

    pub fn n_classes(&self) -> usize {
        self.labels.ncols()
    }
}

pub struct MnistData {
    pub training: Dataset,
    pub validation: Dataset,
    pub test: Dataset,
}

impl MnistData {
    /// Loads the four gzipped IDX files from `dir`, holding the last [`VALIDATION_SIZE`] training
    /// examples out as the validation split.
    pub fn load<P: AsRef<Path>>(dir: P) -> Result<MnistData> {
        MnistData::load_with_validation(dir, VALIDATION_SIZE)
    }

    pub fn load_with_validation<P: AsRef<Path>>(
        dir: P,
        validation_size: usize,
    ) -> Result<MnistData> {
        let dir = dir.as_ref();

        let training_images = parse_images(&read_bytes(dir.join("train-images-idx3-ubyte.gz"))?)?;
        let training_labels = parse_labels(&read_bytes(dir.join("train-labels-idx1-ubyte.gz"))?)?;
        check_aligned(&training_images, &training_labels)?;

        let test_images = parse_images(&read_bytes(dir.join("t10k-images-idx3-ubyte.gz"))?)?;
        let test_labels = parse_labels(&read_bytes(dir.join("t10k-labels-idx1-ubyte.gz"))?)?;
        check_aligned(&test_images, &test_labels)?;

        if validation_size >= training_labels.len() {
            return Err(Error::MalformedArchive(format!(
                "cannot hold out {validation_size} validation examples from {} training examples",
                training_labels.len()
            )));
        }

        // The class count comes from the training split and is reused for the other splits, so a
        // label the training split never saw is rejected rather than silently widening the output.
        let n_classes = n_targets(&training_labels);

        // Create the validation split by taking the final validation_size training examples.
        let split = training_labels.len() - validation_size;
        let validation = Dataset::from_labels(
            training_images.slice(s![split.., ..]).to_owned(),
            &training_labels[split..],
            n_classes,
        )?;
        let training = Dataset::from_labels(
            training_images.slice(s![..split, ..]).to_owned(),
            &training_labels[..split],
            n_classes,
        )?;
        let test = Dataset::from_labels(test_images, &test_labels, n_classes)?;

        info!(
            training = training.len(),
            validation = validation.len(),
            test = test.len(),
            n_classes,
            "loaded MNIST from {}",
            dir.display()
        );

        Ok(MnistData {
            training,
            validation,
            test,
        })
    }
}

// Take a file path to gzipped MNIST data, and return the decompressed bytes.
fn read_bytes<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
    let file = File::open(path)?;
    let mut unzipped_file = GzDecoder::new(file);
    let mut bytes = Vec::new();
    unzipped_file.read_to_end(&mut bytes)?;
    Ok(bytes)
}

// Read `fields` big-endian 32-bit integers from the front of an IDX file.
fn read_header(bytes: &[u8], fields: usize) -> Result<Vec<u32>> {
    if bytes.len() < fields * 4 {
        return Err(Error::MalformedArchive(format!(
            "expected a {}-byte header, file has {} bytes",
            fields * 4,
            bytes.len()
        )));
    }
    Ok(bytes[..fields * 4]
        .chunks_exact(4)
        .map(|chunk| u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Parses decompressed IDX image data into an `(images, rows * columns)` array of pixel
/// intensities scaled to `[0, 1]`.
pub fn parse_images(bytes: &[u8]) -> Result<Array2<f64>> {
    // The headers are four 32-bit integers, which represent in order: the magic number, the number
    // of images, the number of rows per image, and the number of columns per image.
    let header = read_header(bytes, 4)?;
    if header[0] != IMAGE_MAGIC {
        return Err(Error::MalformedArchive(format!(
            "image file magic number is {}, expected {IMAGE_MAGIC}",
            header[0]
        )));
    }
    let (images, rows, columns) = (header[1] as usize, header[2] as usize, header[3] as usize);
    let (image_size, total) = rows
        .checked_mul(columns)
        .and_then(|image_size| Some((image_size, image_size.checked_mul(images)?)))
        .ok_or_else(|| {
            Error::MalformedArchive(format!(
                "header promises {images} images of {rows}x{columns} pixels, which overflows"
            ))
        })?;

    let pixels = &bytes[16..];
    if pixels.len() != total {
        return Err(Error::MalformedArchive(format!(
            "header promises {images} images of {rows}x{columns} pixels, payload has {} bytes",
            pixels.len()
        )));
    }

    Array2::from_shape_vec(
        (images, image_size),
        pixels.iter().map(|&value| value as f64 / 255.0).collect(),
    )
    .map_err(|err| Error::MalformedArchive(err.to_string()))
}

/// Parses decompressed IDX label data.
pub fn parse_labels(bytes: &[u8]) -> Result<Vec<usize>> {
    // These headers are just two 32-bit integers: the magic number and the number of labels.
    let header = read_header(bytes, 2)?;
    if header[0] != LABEL_MAGIC {
        return Err(Error::MalformedArchive(format!(
            "label file magic number is {}, expected {LABEL_MAGIC}",
            header[0]
        )));
    }

    let labels = &bytes[8..];
    if labels.len() != header[1] as usize {
        return Err(Error::MalformedArchive(format!(
            "header promises {} labels, payload has {}",
            header[1],
            labels.len()
        )));
    }
    Ok(labels.iter().map(|&label| label as usize).collect())
}

// There should be an equal number of images and labels. If not, an incorrect pair of files has
// been provided.
fn check_aligned(images: &Array2<f64>, labels: &[usize]) -> Result<()> {
    if images.nrows() != labels.len() {
        return Err(Error::MalformedArchive(format!(
            "{} images but {} labels",
            images.nrows(),
            labels.len()
        )));
    }
    Ok(())
}

/// Draws a 28x28 image as shaded block characters, followed by a caption line.
pub fn render_digit(image: ArrayView1<f64>, caption: &str) -> Result<String> {
    if image.len() != IMAGE_SIZE {
        return Err(Error::ShapeMismatch(format!(
            "cannot render {} pixels as a {IMAGE_ROWS}x{IMAGE_COLUMNS} image",
            image.len()
        )));
    }

    let mut rendered = String::with_capacity(IMAGE_SIZE * 3 + caption.len() + IMAGE_ROWS + 1);
    for row in &image.iter().chunks(IMAGE_COLUMNS) {
        for &pixel in row {
            rendered.push(match pixel {
                a if a < 0.2 => ' ',
                a if a < 0.4 => '░',
                a if a < 0.6 => '▒',
                a if a < 0.8 => '▓',
                _ => '█',
            });
        }
        rendered.push('\n');
    }
    rendered.push_str(caption);
    Ok(rendered)
}

/// Index of the hot entry of every one-hot row.
pub fn class_indices(labels: &Array2<f64>) -> Vec<usize> {
    labels
        .axis_iter(Axis(0))
        .map(|row| crate::loss::argmax(row))
        .collect()
}
