//! Loading and preprocessing of CIFAR-10 batch files.
//!
//! Three containers are understood:
//! * the pickled python batches (`data_batch_1`, `test_batch`, ...), a dictionary with the byte
//!   string keys `b"data"` and `b"labels"`;
//! * the binary batches (`*.bin`), consecutive records of one label byte followed by 3072 pixel
//!   bytes;
//! * safetensors files holding a `data` tensor of shape `[N, 3072]` (`U8`) and a `labels` tensor
//!   of shape `[N]` (`U8`, `I32` or `I64`).
//!
//! Pixels are stored channel-major, 1024 red bytes then green then blue, each a row-major 32x32
//! plane.

use std::{fs, path::Path};

use log::info;
use machine_learning::dataset::Dataset;
use ndarray::{Array1, Array2, ArrayView3};
use safetensors::{Dtype, SafeTensors};
use serde_pickle::{DeOptions, HashableValue, Value};

use crate::error::DatasetErr;

pub const IMAGE_SIDE: usize = 32;
pub const CHANNELS: usize = 3;
pub const IMAGE_BYTES: usize = IMAGE_SIDE * IMAGE_SIDE * CHANNELS;
pub const NUM_CLASSES: usize = 10;

const RECORD_BYTES: usize = IMAGE_BYTES + 1;
const DATA_KEY: &str = "data";
const LABELS_KEY: &str = "labels";

pub type Result<T> = std::result::Result<T, DatasetErr>;

/// Undecoded images and labels as read from a batch file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBatch {
    /// `len() * IMAGE_BYTES` channel-major pixel bytes.
    pub data: Vec<u8>,
    pub labels: Vec<u8>,
}

impl RawBatch {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Pickle,
    Binary,
    SafeTensors,
}

/// Reads a whole batch file, picking the container from the extension or, failing that, from
/// the contents.
pub fn load_batch(path: &Path) -> Result<RawBatch> {
    let bytes = fs::read(path).map_err(|source| DatasetErr::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let batch = match container(path, &bytes)? {
        Container::Pickle => parse_pickle(&bytes)?,
        Container::Binary => parse_binary(&bytes)?,
        Container::SafeTensors => parse_safetensors(&bytes)?,
    };

    info!(samples = batch.len(); "loaded {}", path.display());
    Ok(batch)
}

/// Turns raw images into rows of `f32` in `[0, 1]`, laid out height-width-channel.
pub fn preprocess(raw: &RawBatch) -> Result<Dataset> {
    let n = raw.len();

    if raw.data.len() != n * IMAGE_BYTES {
        return Err(DatasetErr::Format(format!(
            "{} pixel bytes for {n} labels",
            raw.data.len()
        )));
    }

    let mut x = Array2::zeros((n, IMAGE_BYTES));

    for (mut row, image) in x.rows_mut().into_iter().zip(raw.data.chunks_exact(IMAGE_BYTES)) {
        let chw = ArrayView3::from_shape((CHANNELS, IMAGE_SIDE, IMAGE_SIDE), image)?;
        let hwc = chw.permuted_axes([1, 2, 0]);

        row.iter_mut()
            .zip(hwc.iter())
            .for_each(|(out, &byte)| *out = byte as f32 / 255.);
    }

    Ok(Dataset::new(x, Array1::from(raw.labels.clone()))?)
}

/// The inverse of `preprocess`: back to channel-major bytes.
pub fn denormalize(dataset: &Dataset) -> Result<Vec<u8>> {
    let mut bytes = Vec::with_capacity(dataset.len() * IMAGE_BYTES);

    for row in dataset.x().rows() {
        let hwc = row.into_shape_with_order((IMAGE_SIDE, IMAGE_SIDE, CHANNELS))?;
        let chw = hwc.permuted_axes([2, 0, 1]);
        bytes.extend(chw.iter().map(|v| (v * 255.).round().clamp(0., 255.) as u8));
    }

    Ok(bytes)
}

/// Loads and preprocesses the training and test batches.
pub fn load_cifar10(train: &Path, test: &Path) -> Result<(Dataset, Dataset)> {
    let train = preprocess(&load_batch(train)?)?;
    let test = preprocess(&load_batch(test)?)?;
    Ok((train, test))
}

fn container(path: &Path, bytes: &[u8]) -> Result<Container> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("bin") => return Ok(Container::Binary),
        Some("safetensors") => return Ok(Container::SafeTensors),
        Some("pkl" | "pickle") => return Ok(Container::Pickle),
        _ => {}
    }

    if looks_like_safetensors(bytes) {
        Ok(Container::SafeTensors)
    } else if looks_like_pickle(bytes) {
        Ok(Container::Pickle)
    } else if !bytes.is_empty() && bytes.len() % RECORD_BYTES == 0 {
        Ok(Container::Binary)
    } else {
        Err(DatasetErr::Format(format!(
            "unrecognized container for {}",
            path.display()
        )))
    }
}

fn looks_like_safetensors(bytes: &[u8]) -> bool {
    let Some((len, rest)) = bytes.split_first_chunk::<8>() else {
        return false;
    };

    let header_len = u64::from_le_bytes(*len) as usize;
    header_len <= rest.len() && rest.first() == Some(&b'{')
}

/// Protocol 2 and later open with `PROTO <version>`.
fn looks_like_pickle(bytes: &[u8]) -> bool {
    matches!(bytes, [0x80, 2..=5, ..])
}

fn parse_pickle(bytes: &[u8]) -> Result<RawBatch> {
    let value = serde_pickle::value_from_slice(bytes, DeOptions::new().replace_unresolved_globals())?;

    let Value::Dict(mut entries) = value else {
        return Err(DatasetErr::Format("pickled batch is not a dictionary".to_string()));
    };

    let mut take = |key: &str| {
        entries
            .remove(&HashableValue::Bytes(key.as_bytes().to_vec()))
            .or_else(|| entries.remove(&HashableValue::String(key.to_string())))
            .ok_or_else(|| DatasetErr::Format(format!("missing `{key}` entry")))
    };

    let data = pickled_pixels(take(DATA_KEY)?)?;
    let labels = match take(LABELS_KEY)? {
        Value::List(items) | Value::Tuple(items) => items
            .into_iter()
            .enumerate()
            .map(|(index, item)| match item {
                Value::I64(label) => check_label(index, label),
                other => Err(DatasetErr::Format(format!(
                    "label {index} is not a small integer: {other:?}"
                ))),
            })
            .collect::<Result<Vec<_>>>()?,
        other => {
            return Err(DatasetErr::Format(format!(
                "`{LABELS_KEY}` must be a list of integers, got {other:?}"
            )));
        }
    };

    if data.len() != labels.len() * IMAGE_BYTES {
        return Err(DatasetErr::Format(format!(
            "{} pixel bytes for {} labels",
            data.len(),
            labels.len()
        )));
    }

    Ok(RawBatch { data, labels })
}

/// Accepts a byte string, or integer lists nested to any depth.
fn pickled_pixels(value: Value) -> Result<Vec<u8>> {
    match value {
        Value::Bytes(bytes) => Ok(bytes),
        Value::List(items) | Value::Tuple(items) => {
            let mut pixels = Vec::with_capacity(items.len());

            for item in items {
                match item {
                    Value::I64(v) => pixels.push(u8::try_from(v).map_err(|_| {
                        DatasetErr::Format(format!("pixel value {v} does not fit in a byte"))
                    })?),
                    nested => pixels.extend(pickled_pixels(nested)?),
                }
            }

            Ok(pixels)
        }
        // unresolved globals, such as a numpy array, come back as `None`
        Value::None => Err(DatasetErr::Format(format!(
            "`{DATA_KEY}` holds an object that cannot be rebuilt outside python, store it as \
             bytes or convert the batch to the binary format"
        ))),
        other => Err(DatasetErr::Format(format!(
            "`{DATA_KEY}` must be bytes or a list of integers, got {other:?}"
        ))),
    }
}

fn parse_binary(bytes: &[u8]) -> Result<RawBatch> {
    if bytes.is_empty() || bytes.len() % RECORD_BYTES != 0 {
        return Err(DatasetErr::Format(format!(
            "binary batch of {} bytes is not a whole number of {RECORD_BYTES} byte records",
            bytes.len()
        )));
    }

    let n = bytes.len() / RECORD_BYTES;
    let mut data = Vec::with_capacity(n * IMAGE_BYTES);
    let mut labels = Vec::with_capacity(n);

    for (index, record) in bytes.chunks_exact(RECORD_BYTES).enumerate() {
        let (&label, image) = record
            .split_first()
            .ok_or_else(|| DatasetErr::Format("empty record".to_string()))?;

        labels.push(check_label(index, label as i64)?);
        data.extend_from_slice(image);
    }

    Ok(RawBatch { data, labels })
}

fn parse_safetensors(bytes: &[u8]) -> Result<RawBatch> {
    let tensors = SafeTensors::deserialize(bytes)?;

    let data = tensors
        .tensor(DATA_KEY)
        .map_err(|_| DatasetErr::Format(format!("missing `{DATA_KEY}` tensor")))?;
    let labels = tensors
        .tensor(LABELS_KEY)
        .map_err(|_| DatasetErr::Format(format!("missing `{LABELS_KEY}` tensor")))?;

    if data.dtype() != Dtype::U8 {
        return Err(DatasetErr::Format(format!(
            "`{DATA_KEY}` must hold U8 values, got {:?}",
            data.dtype()
        )));
    }

    let n = labels.shape().first().copied().unwrap_or_default();
    if labels.shape().len() != 1 {
        return Err(DatasetErr::Format(format!(
            "`{LABELS_KEY}` must be one dimensional, got shape {:?}",
            labels.shape()
        )));
    }

    let per_sample: usize = data.shape().iter().skip(1).product();
    if data.shape().first() != Some(&n) || per_sample != IMAGE_BYTES {
        return Err(DatasetErr::Format(format!(
            "`{DATA_KEY}` has shape {:?}, expected [{n}, {IMAGE_BYTES}]",
            data.shape()
        )));
    }

    let raw_labels: Vec<i64> = match labels.dtype() {
        Dtype::U8 => labels.data().iter().map(|&l| l as i64).collect(),
        Dtype::I32 => labels
            .data()
            .chunks_exact(4)
            .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as i64)
            .collect(),
        Dtype::I64 => labels
            .data()
            .chunks_exact(8)
            .map(|b| i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
            .collect(),
        other => {
            return Err(DatasetErr::Format(format!(
                "`{LABELS_KEY}` must hold U8, I32 or I64 values, got {other:?}"
            )));
        }
    };

    let labels = raw_labels
        .into_iter()
        .enumerate()
        .map(|(index, label)| check_label(index, label))
        .collect::<Result<Vec<_>>>()?;

    Ok(RawBatch {
        data: data.data().to_vec(),
        labels,
    })
}

fn check_label(index: usize, label: i64) -> Result<u8> {
    if !(0..NUM_CLASSES as i64).contains(&label) {
        return Err(DatasetErr::InvalidLabel { index, label });
    }

    Ok(label as u8)
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, io::Write};

    use safetensors::tensor::{TensorView, serialize};
    use tempfile::NamedTempFile;

    use super::*;

    fn image(seed: u8) -> Vec<u8> {
        (0..IMAGE_BYTES)
            .map(|i| (i as u8).wrapping_mul(7).wrapping_add(seed))
            .collect()
    }

    fn binary_batch(labels: &[u8]) -> Vec<u8> {
        labels
            .iter()
            .enumerate()
            .flat_map(|(i, &label)| std::iter::once(label).chain(image(i as u8)))
            .collect()
    }

    fn write_temp(suffix: &str, bytes: &[u8]) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(bytes).unwrap();
        file
    }

    fn safetensors_batch(labels_dtype: Dtype, labels: &[u8], labels_bytes: Vec<u8>) -> Vec<u8> {
        let data: Vec<u8> = (0..labels.len()).flat_map(|i| image(i as u8)).collect();
        let data_view = TensorView::new(Dtype::U8, vec![labels.len(), IMAGE_BYTES], &data).unwrap();
        let labels_view =
            TensorView::new(labels_dtype, vec![labels.len()], &labels_bytes).unwrap();

        let tensors: HashMap<String, TensorView> = [
            (DATA_KEY.to_string(), data_view),
            (LABELS_KEY.to_string(), labels_view),
        ]
        .into_iter()
        .collect();

        serialize(tensors, &None).unwrap()
    }

    fn push_short_str(out: &mut Vec<u8>, s: &[u8]) {
        out.push(b'U');
        out.push(s.len() as u8);
        out.extend_from_slice(s);
    }

    /// A protocol 2 pickle of `{b'batch_label': ..., b'labels': [...], b'data': b'...'}`.
    fn pickled_batch(labels: &[u8], data: &[u8]) -> Vec<u8> {
        let mut out = vec![0x80, 2, b'}', b'('];

        push_short_str(&mut out, b"batch_label");
        push_short_str(&mut out, b"training batch 1 of 5");

        push_short_str(&mut out, b"labels");
        out.extend_from_slice(b"](");
        labels.iter().for_each(|&l| out.extend_from_slice(&[b'K', l]));
        out.push(b'e');

        push_short_str(&mut out, b"data");
        out.push(b'T');
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(data);

        out.extend_from_slice(b"u.");
        out
    }

    #[test]
    fn reads_pickled_python_batches() {
        let data = [image(0), image(1)].concat();
        // the python batches ship without an extension
        let file = write_temp("", &pickled_batch(&[3, 7], &data));

        let raw = load_batch(file.path()).unwrap();
        assert_eq!(raw.labels, vec![3, 7]);
        assert_eq!(raw.data, data);
    }

    #[test]
    fn pickled_labels_are_range_checked() {
        let data = [image(0), image(1)].concat();
        let file = write_temp(".pkl", &pickled_batch(&[1, 12], &data));

        assert!(matches!(
            load_batch(file.path()),
            Err(DatasetErr::InvalidLabel { index: 1, label: 12 })
        ));
    }

    #[test]
    fn pickled_pixels_must_match_labels() {
        let file = write_temp(".pkl", &pickled_batch(&[1, 2], &image(0)));
        assert!(matches!(load_batch(file.path()), Err(DatasetErr::Format(_))));
    }

    #[test]
    fn reads_binary_batches() {
        let file = write_temp(".bin", &binary_batch(&[3, 9, 0]));
        let raw = load_batch(file.path()).unwrap();

        assert_eq!(raw.labels, vec![3, 9, 0]);
        assert_eq!(raw.data.len(), 3 * IMAGE_BYTES);
        assert_eq!(&raw.data[IMAGE_BYTES..2 * IMAGE_BYTES], image(1).as_slice());
    }

    #[test]
    fn sniffs_binary_without_extension() {
        let file = write_temp("", &binary_batch(&[1]));
        assert_eq!(load_batch(file.path()).unwrap().labels, vec![1]);
    }

    #[test]
    fn rejects_truncated_binary() {
        let mut bytes = binary_batch(&[1, 2]);
        bytes.pop();
        let file = write_temp(".bin", &bytes);

        assert!(matches!(load_batch(file.path()), Err(DatasetErr::Format(_))));
    }

    #[test]
    fn rejects_out_of_range_labels() {
        let file = write_temp(".bin", &binary_batch(&[2, 10]));
        assert!(matches!(
            load_batch(file.path()),
            Err(DatasetErr::InvalidLabel { index: 1, label: 10 })
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let res = load_batch(Path::new("/definitely/not/here/data_batch_1.bin"));
        assert!(matches!(res, Err(DatasetErr::Io { .. })));
    }

    #[test]
    fn reads_safetensors_with_wide_labels() {
        let labels = [4u8, 7];
        let wide: Vec<u8> = labels
            .iter()
            .flat_map(|&l| (l as i64).to_le_bytes())
            .collect();
        let file = write_temp(".safetensors", &safetensors_batch(Dtype::I64, &labels, wide));

        let raw = load_batch(file.path()).unwrap();
        assert_eq!(raw.labels, vec![4, 7]);
        assert_eq!(&raw.data[..IMAGE_BYTES], image(0).as_slice());
    }

    #[test]
    fn sniffs_safetensors_without_extension() {
        let labels = [5u8];
        let file = write_temp("", &safetensors_batch(Dtype::U8, &labels, labels.to_vec()));
        assert_eq!(load_batch(file.path()).unwrap().labels, vec![5]);
    }

    #[test]
    fn safetensors_labels_are_range_checked() {
        let labels = [1u8];
        let bytes = (-1i32).to_le_bytes().to_vec();
        let file = write_temp(".safetensors", &safetensors_batch(Dtype::I32, &labels, bytes));

        assert!(matches!(
            load_batch(file.path()),
            Err(DatasetErr::InvalidLabel { index: 0, label: -1 })
        ));
    }

    #[test]
    fn preprocess_transposes_to_hwc_in_unit_range() {
        let mut data = vec![0u8; IMAGE_BYTES];
        // pixel (0, 1): red 255, green 51, blue 102
        data[1] = 255;
        data[1024 + 1] = 51;
        data[2048 + 1] = 102;
        let raw = RawBatch {
            data,
            labels: vec![6],
        };

        let dataset = preprocess(&raw).unwrap();
        let x = dataset.x();

        assert_eq!(x.dim(), (1, IMAGE_BYTES));
        assert_eq!(x[[0, 3]], 1.);
        assert!((x[[0, 4]] - 0.2).abs() < 1e-6);
        assert!((x[[0, 5]] - 0.4).abs() < 1e-6);
        assert!(x.iter().all(|v| (0. ..=1.).contains(v)));
        assert_eq!(dataset.y()[0], 6);
    }

    #[test]
    fn denormalize_round_trips() {
        let raw = RawBatch {
            data: [image(0), image(1)].concat(),
            labels: vec![0, 1],
        };

        let dataset = preprocess(&raw).unwrap();
        assert_eq!(denormalize(&dataset).unwrap(), raw.data);
    }
}
