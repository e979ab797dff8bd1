//! Stacked LSTM with a linear head, evaluated in inference mode.
//!
//! Layout and gate math follow `torch.nn.LSTM` so that exported weights load
//! unchanged:
//!
//! ```text
//! gates = W_ih·x + b_ih + W_hh·h + b_hh        (4H rows: i, f, g, o)
//! i = σ(gates[0..H])      f = σ(gates[H..2H])
//! g = tanh(gates[2H..3H]) o = σ(gates[3H..4H])
//! c' = f ⊙ c + i ⊙ g
//! h' = o ⊙ tanh(c')
//! ```
//!
//! Hidden and cell state start at zero for every call. Layer `k + 1` consumes
//! the hidden sequence of layer `k`, and only the top layer's final hidden
//! state reaches the linear head. Inter-layer dropout exists only at training
//! time and is never applied here.

use ndarray::{Array1, Array2, ArrayView1, s};
use serde::{Deserialize, Serialize};

use crate::model::{
    ArtifactError, FEATURES, HIDDEN_SIZE, NUM_LAYERS, NormalizedWindow, OUTPUT_SIZE,
};

/// Number of gates stacked in each LSTM weight matrix.
pub const GATES: usize = 4;

// ---------------------------------------------------------------------------
// Architecture
// ---------------------------------------------------------------------------

/// Dimensions a weight artifact must agree with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Architecture {
    pub input_size: usize,
    pub hidden_size: usize,
    pub num_layers: usize,
    pub output_size: usize,
}

impl Architecture {
    /// The architecture the production weights were trained with.
    pub const REFERENCE: Architecture = Architecture {
        input_size: FEATURES,
        hidden_size: HIDDEN_SIZE,
        num_layers: NUM_LAYERS,
        output_size: OUTPUT_SIZE,
    };

    /// Input width of layer `layer`: the feature width for the first layer,
    /// the hidden width above it.
    pub fn layer_input_size(&self, layer: usize) -> usize {
        if layer == 0 {
            self.input_size
        } else {
            self.hidden_size
        }
    }

    /// Total number of f32 parameters.
    pub fn parameter_count(&self) -> usize {
        let g = GATES * self.hidden_size;
        let layers: usize = (0..self.num_layers)
            .map(|k| g * self.layer_input_size(k) + g * self.hidden_size + 2 * g)
            .sum();
        layers + self.output_size * self.hidden_size + self.output_size
    }
}

impl Default for Architecture {
    fn default() -> Self {
        Self::REFERENCE
    }
}

// ---------------------------------------------------------------------------
// Layers
// ---------------------------------------------------------------------------

#[inline]
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn shape_error(tensor: &str, expected: &[usize], found: &[usize]) -> ArtifactError {
    ArtifactError::ShapeMismatch {
        tensor: tensor.to_string(),
        expected: expected.to_vec(),
        found: found.to_vec(),
    }
}

/// One LSTM layer.
#[derive(Debug, Clone, PartialEq)]
pub struct LstmLayer {
    /// Input-to-hidden weights, `[4H, input]`.
    w_ih: Array2<f32>,
    /// Hidden-to-hidden weights, `[4H, H]`.
    w_hh: Array2<f32>,
    b_ih: Array1<f32>,
    b_hh: Array1<f32>,
    hidden_size: usize,
}

impl LstmLayer {
    pub fn new(
        w_ih: Array2<f32>,
        w_hh: Array2<f32>,
        b_ih: Array1<f32>,
        b_hh: Array1<f32>,
    ) -> Result<Self, ArtifactError> {
        let rows = w_hh.nrows();
        if rows == 0 || rows % GATES != 0 {
            return Err(shape_error(
                "weight_hh",
                &[GATES * w_hh.ncols(), w_hh.ncols()],
                w_hh.shape(),
            ));
        }
        let hidden_size = rows / GATES;
        let g = rows;

        if w_hh.ncols() != hidden_size {
            return Err(shape_error("weight_hh", &[g, hidden_size], w_hh.shape()));
        }
        if w_ih.nrows() != g {
            return Err(shape_error("weight_ih", &[g, w_ih.ncols()], w_ih.shape()));
        }
        if b_ih.len() != g {
            return Err(shape_error("bias_ih", &[g], b_ih.shape()));
        }
        if b_hh.len() != g {
            return Err(shape_error("bias_hh", &[g], b_hh.shape()));
        }

        Ok(Self {
            w_ih,
            w_hh,
            b_ih,
            b_hh,
            hidden_size,
        })
    }

    pub fn input_size(&self) -> usize {
        self.w_ih.ncols()
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    pub fn w_ih(&self) -> &Array2<f32> {
        &self.w_ih
    }

    pub fn w_hh(&self) -> &Array2<f32> {
        &self.w_hh
    }

    pub fn b_ih(&self) -> &Array1<f32> {
        &self.b_ih
    }

    pub fn b_hh(&self) -> &Array1<f32> {
        &self.b_hh
    }

    /// Advances the cell by one time step, returning `(h', c')`.
    pub fn step(
        &self,
        x: ArrayView1<f32>,
        h: &Array1<f32>,
        c: &Array1<f32>,
    ) -> (Array1<f32>, Array1<f32>) {
        let hs = self.hidden_size;
        let input_gates = self.w_ih.dot(&x) + &self.b_ih;
        let hidden_gates = self.w_hh.dot(h) + &self.b_hh;
        let gates = input_gates + hidden_gates;

        let i = gates.slice(s![0..hs]).mapv(sigmoid);
        let f = gates.slice(s![hs..2 * hs]).mapv(sigmoid);
        let g = gates.slice(s![2 * hs..3 * hs]).mapv(f32::tanh);
        let o = gates.slice(s![3 * hs..4 * hs]).mapv(sigmoid);

        let c_next = &f * c + &i * &g;
        let h_next = &o * &c_next.mapv(f32::tanh);
        (h_next, c_next)
    }

    /// Runs the whole sequence from a zero state and returns the hidden
    /// output of every step.
    pub fn forward_sequence(&self, inputs: &[Array1<f32>]) -> Vec<Array1<f32>> {
        let mut h = Array1::<f32>::zeros(self.hidden_size);
        let mut c = Array1::<f32>::zeros(self.hidden_size);
        let mut outputs = Vec::with_capacity(inputs.len());

        for x in inputs {
            let (h_next, c_next) = self.step(x.view(), &h, &c);
            outputs.push(h_next.clone());
            h = h_next;
            c = c_next;
        }

        outputs
    }
}

/// Fully connected projection `y = W·x + b`.
#[derive(Debug, Clone, PartialEq)]
pub struct Linear {
    /// `[out, in]`
    weight: Array2<f32>,
    bias: Array1<f32>,
}

impl Linear {
    pub fn new(weight: Array2<f32>, bias: Array1<f32>) -> Result<Self, ArtifactError> {
        if bias.len() != weight.nrows() {
            return Err(shape_error("linear.bias", &[weight.nrows()], bias.shape()));
        }
        Ok(Self { weight, bias })
    }

    pub fn weight(&self) -> &Array2<f32> {
        &self.weight
    }

    pub fn bias(&self) -> &Array1<f32> {
        &self.bias
    }

    pub fn forward(&self, x: &Array1<f32>) -> Array1<f32> {
        self.weight.dot(x) + &self.bias
    }
}

// ---------------------------------------------------------------------------
// Sequence model
// ---------------------------------------------------------------------------

/// The trained network: stacked LSTM layers followed by a linear head.
///
/// Immutable once built; `forward` takes `&self` and allocates its own
/// state, so a single instance can serve concurrent callers.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceModel {
    layers: Vec<LstmLayer>,
    head: Linear,
}

impl SequenceModel {
    /// Assembles the model and checks that the layers chain together and
    /// that the result matches `expected`.
    pub fn new(
        layers: Vec<LstmLayer>,
        head: Linear,
        expected: &Architecture,
    ) -> Result<Self, ArtifactError> {
        if expected.num_layers == 0 || expected.output_size == 0 {
            return Err(shape_error(
                "architecture",
                &[NUM_LAYERS, OUTPUT_SIZE],
                &[expected.num_layers, expected.output_size],
            ));
        }
        if layers.len() != expected.num_layers {
            return Err(shape_error(
                "lstm.num_layers",
                &[expected.num_layers],
                &[layers.len()],
            ));
        }
        for (k, layer) in layers.iter().enumerate() {
            let want_in = expected.layer_input_size(k);
            if layer.input_size() != want_in || layer.hidden_size() != expected.hidden_size {
                return Err(shape_error(
                    &format!("lstm layer {}", k),
                    &[want_in, expected.hidden_size],
                    &[layer.input_size(), layer.hidden_size()],
                ));
            }
        }
        let head_shape = head.weight.shape();
        if head_shape != [expected.output_size, expected.hidden_size] {
            return Err(shape_error(
                "linear.weight",
                &[expected.output_size, expected.hidden_size],
                head_shape,
            ));
        }

        Ok(Self { layers, head })
    }

    pub fn layers(&self) -> &[LstmLayer] {
        &self.layers
    }

    pub fn head(&self) -> &Linear {
        &self.head
    }

    pub fn architecture(&self) -> Architecture {
        Architecture {
            input_size: self.layers[0].input_size(),
            hidden_size: self.layers[0].hidden_size(),
            num_layers: self.layers.len(),
            output_size: self.head.weight.nrows(),
        }
    }

    /// Maps a normalized window to the scalar prediction in normalized
    /// target space.
    pub fn forward(&self, window: &NormalizedWindow) -> f32 {
        let mut sequence: Vec<Array1<f32>> = window
            .steps()
            .iter()
            .map(|step| Array1::from(step.to_vec()))
            .collect();

        for layer in &self.layers {
            sequence = layer.forward_sequence(&sequence);
        }

        let last = &sequence[sequence.len() - 1];
        self.head.forward(last)[0]
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
