//! Loading of the startup artifacts: model weights and scaler parameters.
//!
//! Two weight encodings are accepted:
//!
//! - a JSON export of the PyTorch `state_dict`, keyed by parameter name
//!   (`lstm.weight_ih_l0`, ..., `linear.bias`) with row-major nested lists;
//! - the native `.lcw` binary, a 32-byte header followed by the same tensors
//!   as little-endian f32 in `state_dict` order.
//!
//! ```text
//! offset  size  field
//!      0     4  magic "LCWT"
//!      4     1  version major
//!      5     1  version minor
//!      6     2  reserved
//!      8     4  input_size
//!     12     4  hidden_size
//!     16     4  num_layers
//!     20     4  output_size
//!     24     4  payload length (bytes)
//!     28     4  CRC32 of payload
//! ```
//!
//! The format is detected from the leading magic bytes, not the file name.
//! Every failure here is an `ArtifactError` and aborts startup.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use ndarray::{Array1, Array2};
use serde::Deserialize;

use crate::logging::{self, Component};
use crate::lstm::{Architecture, GATES, Linear, LstmLayer, SequenceModel};
use crate::model::ArtifactError;
use crate::normalize::{AffineScaler, ScalerFile};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Magic bytes identifying a native weight file.
pub const MAGIC: &[u8; 4] = b"LCWT";

pub const CURRENT_VERSION_MAJOR: u8 = 1;
pub const CURRENT_VERSION_MINOR: u8 = 0;

/// Size of the native header in bytes.
pub const HEADER_SIZE: usize = 32;

// ---------------------------------------------------------------------------
// Tensor layout
// ---------------------------------------------------------------------------

/// Name and shape of one tensor in the weight artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorSpec {
    pub name: String,
    pub shape: Vec<usize>,
}

impl TensorSpec {
    fn new(name: String, shape: Vec<usize>) -> Self {
        Self { name, shape }
    }

    /// Number of elements.
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Tensors the architecture requires, in PyTorch `state_dict` order.
pub fn tensor_layout(arch: &Architecture) -> Vec<TensorSpec> {
    let g = GATES * arch.hidden_size;
    let mut specs = Vec::with_capacity(arch.num_layers * 4 + 2);

    for k in 0..arch.num_layers {
        specs.push(TensorSpec::new(
            format!("lstm.weight_ih_l{}", k),
            vec![g, arch.layer_input_size(k)],
        ));
        specs.push(TensorSpec::new(
            format!("lstm.weight_hh_l{}", k),
            vec![g, arch.hidden_size],
        ));
        specs.push(TensorSpec::new(format!("lstm.bias_ih_l{}", k), vec![g]));
        specs.push(TensorSpec::new(format!("lstm.bias_hh_l{}", k), vec![g]));
    }
    specs.push(TensorSpec::new(
        "linear.weight".to_string(),
        vec![arch.output_size, arch.hidden_size],
    ));
    specs.push(TensorSpec::new("linear.bias".to_string(), vec![arch.output_size]));

    specs
}

fn matrix(spec: &TensorSpec, data: Vec<f32>) -> Result<Array2<f32>, ArtifactError> {
    let len = data.len();
    Array2::from_shape_vec((spec.shape[0], spec.shape[1]), data).map_err(|_| {
        ArtifactError::ShapeMismatch {
            tensor: spec.name.clone(),
            expected: spec.shape.clone(),
            found: vec![len],
        }
    })
}

/// Builds the model from flat tensors given in `tensor_layout` order.
/// Element counts must already have been checked against the layout.
/// Any NaN or Infinity rejects the whole artifact.
fn assemble(arch: &Architecture, tensors: Vec<Vec<f32>>) -> Result<SequenceModel, ArtifactError> {
    let layout = tensor_layout(arch);
    if tensors.len() != layout.len() {
        return Err(ArtifactError::MissingTensor(format!(
            "expected {} tensors, got {}",
            layout.len(),
            tensors.len()
        )));
    }
    for (spec, values) in layout.iter().zip(&tensors) {
        if let Some(index) = values.iter().position(|v| !v.is_finite()) {
            return Err(ArtifactError::NonFiniteWeight {
                tensor: spec.name.clone(),
                index,
            });
        }
    }

    let mut specs = layout.iter();
    let mut data = tensors.into_iter();
    let mut next = || match (specs.next(), data.next()) {
        (Some(spec), Some(values)) => Ok((spec, values)),
        _ => Err(ArtifactError::MissingTensor("<layout exhausted>".to_string())),
    };

    let mut layers = Vec::with_capacity(arch.num_layers);
    for _ in 0..arch.num_layers {
        let (spec, values) = next()?;
        let w_ih = matrix(spec, values)?;
        let (spec, values) = next()?;
        let w_hh = matrix(spec, values)?;
        let (_, b_ih) = next()?;
        let (_, b_hh) = next()?;
        layers.push(LstmLayer::new(w_ih, w_hh, Array1::from(b_ih), Array1::from(b_hh))?);
    }

    let (spec, values) = next()?;
    let head_weight = matrix(spec, values)?;
    let (_, head_bias) = next()?;
    let head = Linear::new(head_weight, Array1::from(head_bias))?;

    SequenceModel::new(layers, head, arch)
}

// ---------------------------------------------------------------------------
// JSON state_dict
// ---------------------------------------------------------------------------

/// A tensor as it appears in the JSON export.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JsonTensor {
    Matrix(Vec<Vec<f32>>),
    Vector(Vec<f32>),
}

impl JsonTensor {
    fn shape(&self) -> Vec<usize> {
        match self {
            JsonTensor::Vector(v) => vec![v.len()],
            JsonTensor::Matrix(rows) => vec![rows.len(), rows.first().map_or(0, |r| r.len())],
        }
    }

    /// Flattens row-major, failing on ragged rows.
    fn into_flat(self, spec: &TensorSpec) -> Result<Vec<f32>, ArtifactError> {
        let found = self.shape();
        if found != spec.shape {
            return Err(ArtifactError::ShapeMismatch {
                tensor: spec.name.clone(),
                expected: spec.shape.clone(),
                found,
            });
        }
        match self {
            JsonTensor::Vector(v) => Ok(v),
            JsonTensor::Matrix(rows) => {
                let cols = spec.shape[1];
                let mut flat = Vec::with_capacity(spec.numel());
                for (r, row) in rows.into_iter().enumerate() {
                    if row.len() != cols {
                        return Err(ArtifactError::ShapeMismatch {
                            tensor: format!("{} row {}", spec.name, r),
                            expected: vec![cols],
                            found: vec![row.len()],
                        });
                    }
                    flat.extend(row);
                }
                Ok(flat)
            }
        }
    }
}

/// Parses a JSON `state_dict` export.
pub fn parse_state_dict(text: &str, arch: &Architecture) -> Result<SequenceModel, ArtifactError> {
    let mut tensors: BTreeMap<String, JsonTensor> =
        serde_json::from_str(text).map_err(|e| ArtifactError::Parse {
            path: "state_dict".to_string(),
            message: e.to_string(),
        })?;

    let layout = tensor_layout(arch);
    let mut flat = Vec::with_capacity(layout.len());
    for spec in &layout {
        let tensor = tensors
            .remove(&spec.name)
            .ok_or_else(|| ArtifactError::MissingTensor(spec.name.clone()))?;
        flat.push(tensor.into_flat(spec)?);
    }

    for extra in tensors.keys() {
        logging::warn(
            Component::Artifact,
            Some(extra.as_str()),
            "ignoring tensor not used by the inference model",
        );
    }

    assemble(arch, flat)
}

// ---------------------------------------------------------------------------
// Native binary
// ---------------------------------------------------------------------------

/// Parsed native header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeightHeader {
    pub version_major: u8,
    pub version_minor: u8,
    pub architecture: Architecture,
    pub payload_len: u32,
    pub checksum: u32,
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

impl WeightHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(MAGIC);
        buf[4] = self.version_major;
        buf[5] = self.version_minor;
        // 6..8 reserved
        buf[8..12].copy_from_slice(&(self.architecture.input_size as u32).to_le_bytes());
        buf[12..16].copy_from_slice(&(self.architecture.hidden_size as u32).to_le_bytes());
        buf[16..20].copy_from_slice(&(self.architecture.num_layers as u32).to_le_bytes());
        buf[20..24].copy_from_slice(&(self.architecture.output_size as u32).to_le_bytes());
        buf[24..28].copy_from_slice(&self.payload_len.to_le_bytes());
        buf[28..32].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, ArtifactError> {
        if buf.len() < HEADER_SIZE {
            return Err(ArtifactError::Truncated {
                expected: HEADER_SIZE,
                actual: buf.len(),
            });
        }
        if &buf[0..4] != MAGIC {
            return Err(ArtifactError::NotAnArtifact);
        }

        let version_major = buf[4];
        let version_minor = buf[5];
        if version_major > CURRENT_VERSION_MAJOR {
            return Err(ArtifactError::UnsupportedVersion {
                major: version_major,
                minor: version_minor,
            });
        }

        Ok(Self {
            version_major,
            version_minor,
            architecture: Architecture {
                input_size: read_u32(buf, 8) as usize,
                hidden_size: read_u32(buf, 12) as usize,
                num_layers: read_u32(buf, 16) as usize,
                output_size: read_u32(buf, 20) as usize,
            },
            payload_len: read_u32(buf, 24),
            checksum: read_u32(buf, 28),
        })
    }
}

/// Parses a native `.lcw` weight file.
pub fn parse_native(bytes: &[u8], arch: &Architecture) -> Result<SequenceModel, ArtifactError> {
    let header = WeightHeader::from_bytes(bytes)?;

    if header.architecture != *arch {
        let a = header.architecture;
        return Err(ArtifactError::ShapeMismatch {
            tensor: "header".to_string(),
            expected: vec![arch.input_size, arch.hidden_size, arch.num_layers, arch.output_size],
            found: vec![a.input_size, a.hidden_size, a.num_layers, a.output_size],
        });
    }

    let expected_len = arch.parameter_count() * 4;
    let payload_len = header.payload_len as usize;
    if payload_len != expected_len {
        return Err(ArtifactError::ShapeMismatch {
            tensor: "payload".to_string(),
            expected: vec![expected_len],
            found: vec![payload_len],
        });
    }

    let available = bytes.len() - HEADER_SIZE;
    if available < payload_len {
        return Err(ArtifactError::Truncated {
            expected: HEADER_SIZE + payload_len,
            actual: bytes.len(),
        });
    }
    if available > payload_len {
        return Err(ArtifactError::Parse {
            path: "payload".to_string(),
            message: format!("{} trailing bytes", available - payload_len),
        });
    }

    let payload = &bytes[HEADER_SIZE..];
    let actual = crc32fast::hash(payload);
    if actual != header.checksum {
        return Err(ArtifactError::ChecksumMismatch {
            expected: header.checksum,
            actual,
        });
    }

    let mut values = payload
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]));
    let tensors = tensor_layout(arch)
        .iter()
        .map(|spec| values.by_ref().take(spec.numel()).collect())
        .collect();

    assemble(arch, tensors)
}

fn push_le<'a>(payload: &mut Vec<u8>, values: impl Iterator<Item = &'a f32>) {
    for v in values {
        payload.extend_from_slice(&v.to_le_bytes());
    }
}

/// Serializes a model into the native format.
pub fn encode_native(model: &SequenceModel) -> Vec<u8> {
    let arch = model.architecture();
    let mut payload = Vec::with_capacity(arch.parameter_count() * 4);

    // ndarray iterates in logical (row-major) order.
    for layer in model.layers() {
        push_le(&mut payload, layer.w_ih().iter());
        push_le(&mut payload, layer.w_hh().iter());
        push_le(&mut payload, layer.b_ih().iter());
        push_le(&mut payload, layer.b_hh().iter());
    }
    push_le(&mut payload, model.head().weight().iter());
    push_le(&mut payload, model.head().bias().iter());

    let header = WeightHeader {
        version_major: CURRENT_VERSION_MAJOR,
        version_minor: CURRENT_VERSION_MINOR,
        architecture: arch,
        payload_len: payload.len() as u32,
        checksum: crc32fast::hash(&payload),
    };

    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(&payload);
    out
}

/// Writes a model to `path` in the native format.
pub fn write_native(model: &SequenceModel, path: &Path) -> Result<(), ArtifactError> {
    fs::write(path, encode_native(model)).map_err(|e| ArtifactError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// File loading
// ---------------------------------------------------------------------------

/// Parses weights in either encoding, picking the parser by magic bytes.
pub fn parse_weights(bytes: &[u8], arch: &Architecture) -> Result<SequenceModel, ArtifactError> {
    if bytes.starts_with(MAGIC) {
        return parse_native(bytes, arch);
    }
    let text = std::str::from_utf8(bytes).map_err(|_| ArtifactError::NotAnArtifact)?;
    parse_state_dict(text, arch)
}

/// Reads and parses the weight artifact at `path`.
pub fn load_weights(path: &Path, arch: &Architecture) -> Result<SequenceModel, ArtifactError> {
    let display = path.display().to_string();
    let bytes = fs::read(path).map_err(|e| ArtifactError::Io {
        path: display.clone(),
        message: e.to_string(),
    })?;

    let model = parse_weights(&bytes, arch).map_err(|e| match e {
        ArtifactError::Parse { message, .. } => ArtifactError::Parse {
            path: display.clone(),
            message,
        },
        other => other,
    })?;

    logging::debug(
        Component::Artifact,
        Some(&display),
        &format!("loaded {} weights", arch.parameter_count()),
    );
    Ok(model)
}

/// Reads a scaler export (see `ScalerFile`) from `path`.
pub fn load_scaler(path: &Path) -> Result<AffineScaler, ArtifactError> {
    let display = path.display().to_string();
    let text = fs::read_to_string(path).map_err(|e| ArtifactError::Io {
        path: display.clone(),
        message: e.to_string(),
    })?;
    let file: ScalerFile = serde_json::from_str(&text).map_err(|e| ArtifactError::Parse {
        path: display,
        message: e.to_string(),
    })?;
    file.into_scaler()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
