/*!
The recurrent next-day predictor: stacked LSTM layers feeding a linear head
*/

use crate::data::window::Window;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use tch::nn::{self, Linear, Module, RNNConfig, VarStore, LSTM, RNN};
use tch::{Device, Reduction, Tensor};

/// Whether a forward pass is part of training (dropout active) or evaluation (dropout off)
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Mode {
    /// Apply dropout between recurrent layers
    Train,
    /// Deterministic inference
    Eval,
}

impl Mode {
    /// Whether dropout is active
    pub fn is_train(self) -> bool {
        self == Mode::Train
    }
}

/// The AirLSTM model: `layers` stacked LSTMs and a linear projection of the last time step
#[derive(Debug)]
pub struct AirLSTM {
    /// The number of input features per time step
    pub features: usize,
    /// The number of time steps per window
    pub seq_length: usize,
    /// Dropout probability between recurrent layers, in training mode only
    pub dropout: f64,
    /// This model's LSTM layers, bottom first
    pub lstm_layers: Vec<LSTM>,
    /// This model's linear layer
    pub linear_layer: Linear,
}

impl AirLSTM {
    /// Check that an input is shaped `(batch, seq_length, features)`
    pub fn check_input(&self, xs: &Tensor) -> Result<()> {
        let size = xs.size();
        if size.len() != 3 || size[1] != self.seq_length as i64 || size[2] != self.features as i64 {
            return Err(Error::shape(
                format!("[batch, {}, {}]", self.seq_length, self.features),
                size,
            ));
        }
        Ok(())
    }

    /// Map a `(batch, seq_length, features)` input to `(batch, 1)` predictions
    ///
    /// Every call starts from a zero hidden and cell state.
    pub fn forward(&self, xs: &Tensor, mode: Mode) -> Result<Tensor> {
        self.check_input(xs)?;
        let depth = self.lstm_layers.len();
        let mut hidden = xs.shallow_clone();
        for (i, layer) in self.lstm_layers.iter().enumerate() {
            let (output, _state) = layer.seq(&hidden);
            hidden = if i + 1 < depth {
                output.dropout(self.dropout, mode.is_train())
            } else {
                output
            };
        }
        let last_step = hidden.select(1, -1);
        Ok(self.linear_layer.forward(&last_step))
    }

    /// Compute the mean squared error of the predictions for `xs` against `ys`
    pub fn loss(&self, xs: &Tensor, ys: &Tensor, mode: Mode) -> Result<Tensor> {
        let yhat = self.forward(xs, mode)?;
        if yhat.size() != ys.size() {
            return Err(Error::shape(yhat.size(), ys.size()));
        }
        Ok(yhat.mse_loss(ys, Reduction::Mean))
    }
}

/// A descriptor for an instance of the AirLSTM model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirLSTMDesc {
    /// The number of input features per time step
    pub features: usize,
    /// The number of time steps per window
    pub seq_length: usize,
    /// The size of the hidden LSTM layers to use
    pub hidden: usize,
    /// The number of hidden LSTM layers to use
    pub layers: usize,
    /// Dropout between LSTM layers during training
    pub dropout: f64,
}

impl AirLSTMDesc {
    /// Check that the descriptor describes a buildable model
    pub fn validate(&self) -> Result<()> {
        if self.features == 0 || self.seq_length == 0 || self.hidden == 0 || self.layers == 0 {
            return Err(Error::Configuration(format!(
                "model dimensions must be positive: {:?}",
                self
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(Error::Configuration(format!(
                "dropout must lie in [0, 1), got {}",
                self.dropout
            )));
        }
        Ok(())
    }

    /// Build an `AirLSTM` over a given `VarStore`
    pub fn build(&self, vs: &VarStore) -> AirLSTM {
        let root = vs.root();
        let config = RNNConfig {
            has_biases: true,
            num_layers: 1,
            dropout: 0.,
            train: true,
            bidirectional: false,
            batch_first: true,
            ..Default::default()
        };
        let lstm_layers = (0..self.layers)
            .map(|layer| {
                let inputs = if layer == 0 { self.features } else { self.hidden };
                nn::lstm(
                    &root / format!("lstm{}", layer),
                    inputs as i64,
                    self.hidden as i64,
                    config,
                )
            })
            .collect();
        let linear_layer = nn::linear(&root / "head", self.hidden as i64, 1, Default::default());
        AirLSTM {
            features: self.features,
            seq_length: self.seq_length,
            dropout: self.dropout,
            lstm_layers,
            linear_layer,
        }
    }
}

/// A detached copy of a predictor's parameters
#[derive(Debug)]
pub struct Snapshot {
    vs: VarStore,
}

/// An AirLSTM together with the parameters it owns
#[derive(Debug)]
pub struct Predictor {
    desc: AirLSTMDesc,
    vs: VarStore,
    net: AirLSTM,
    trained: bool,
}

impl Predictor {
    /// A freshly initialized, untrained predictor
    pub fn new(desc: AirLSTMDesc, device: Device) -> Result<Predictor> {
        desc.validate()?;
        let vs = VarStore::new(device);
        let net = desc.build(&vs);
        Ok(Predictor {
            desc,
            vs,
            net,
            trained: false,
        })
    }

    /// A freshly initialized predictor, seeding libtorch's generator first
    pub fn seeded(desc: AirLSTMDesc, device: Device, seed: i64) -> Result<Predictor> {
        tch::manual_seed(seed);
        Predictor::new(desc, device)
    }

    /// The architecture of this predictor
    pub fn desc(&self) -> &AirLSTMDesc {
        &self.desc
    }

    /// The network
    pub fn net(&self) -> &AirLSTM {
        &self.net
    }

    /// The parameters
    pub fn var_store(&self) -> &VarStore {
        &self.vs
    }

    /// The parameters, mutably
    pub fn var_store_mut(&mut self) -> &mut VarStore {
        &mut self.vs
    }

    /// The device holding the parameters
    pub fn device(&self) -> Device {
        self.vs.device()
    }

    /// Whether these parameters were trained or loaded from a checkpoint
    pub fn is_trained(&self) -> bool {
        self.trained
    }

    /// Mark the parameters as trained
    pub fn mark_trained(&mut self) {
        self.trained = true;
    }

    /// Run the network on a batch
    pub fn forward(&self, xs: &Tensor, mode: Mode) -> Result<Tensor> {
        self.net.forward(&xs.to_device(self.device()), mode)
    }

    /// Predict the standardized target following a single window, in evaluation mode without gradients
    pub fn forward_window(&self, window: &Window) -> Result<f64> {
        if window.features != self.desc.features || window.seq_length != self.desc.seq_length {
            return Err(Error::shape(
                [self.desc.seq_length, self.desc.features],
                [window.seq_length, window.features],
            ));
        }
        let output = tch::no_grad(|| self.forward(&window.to_tensor(), Mode::Eval))?;
        Ok(output.double_value(&[0, 0]))
    }

    /// Copy the current parameters
    pub fn snapshot(&self) -> Result<Snapshot> {
        let mut vs = VarStore::new(self.device());
        self.desc.build(&vs);
        vs.copy(&self.vs)?;
        Ok(Snapshot { vs })
    }

    /// Overwrite the parameters with a snapshot
    pub fn restore(&mut self, snapshot: &Snapshot) -> Result<()> {
        self.vs.copy(&snapshot.vs)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::Kind;

    fn desc() -> AirLSTMDesc {
        AirLSTMDesc {
            features: 2,
            seq_length: 10,
            hidden: 16,
            layers: 2,
            dropout: 0.2,
        }
    }

    #[test]
    fn forward_shapes() {
        let predictor = Predictor::seeded(desc(), Device::Cpu, 1).unwrap();
        let xs = Tensor::randn([5, 10, 2], (Kind::Float, Device::Cpu));
        let ys = predictor.forward(&xs, Mode::Train).unwrap();
        assert_eq!(ys.size(), vec![5, 1]);
        let ys = predictor.forward(&xs.narrow(0, 0, 1), Mode::Eval).unwrap();
        assert_eq!(ys.size(), vec![1, 1]);
    }

    #[test]
    fn wrong_shapes_are_rejected() {
        let predictor = Predictor::new(desc(), Device::Cpu).unwrap();
        let wrong_features = Tensor::zeros([3, 10, 5], (Kind::Float, Device::Cpu));
        assert!(matches!(
            predictor.forward(&wrong_features, Mode::Eval),
            Err(Error::ShapeMismatch { .. })
        ));
        let wrong_length = Tensor::zeros([3, 7, 2], (Kind::Float, Device::Cpu));
        assert!(matches!(
            predictor.forward(&wrong_length, Mode::Eval),
            Err(Error::ShapeMismatch { .. })
        ));
        let flat = Tensor::zeros([10, 2], (Kind::Float, Device::Cpu));
        assert!(predictor.forward(&flat, Mode::Eval).is_err());
        let window = Window::new(vec![0.0; 30], 10, 3, 0).unwrap();
        assert!(matches!(
            predictor.forward_window(&window),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn eval_mode_is_deterministic() {
        let predictor = Predictor::seeded(desc(), Device::Cpu, 2).unwrap();
        let xs = Tensor::randn([4, 10, 2], (Kind::Float, Device::Cpu));
        let a = tch::no_grad(|| predictor.forward(&xs, Mode::Eval)).unwrap();
        let b = tch::no_grad(|| predictor.forward(&xs, Mode::Eval)).unwrap();
        assert!(a.equal(&b));
        let window = Window::new(vec![0.25; 20], 10, 2, 0).unwrap();
        let p = predictor.forward_window(&window).unwrap();
        assert!(p.is_finite());
        assert_eq!(p, predictor.forward_window(&window).unwrap());
    }

    #[test]
    fn snapshot_and_restore() {
        let mut predictor = Predictor::seeded(desc(), Device::Cpu, 3).unwrap();
        let window = Window::new(vec![0.5; 20], 10, 2, 0).unwrap();
        let before = predictor.forward_window(&window).unwrap();
        let snapshot = predictor.snapshot().unwrap();
        tch::no_grad(|| {
            for (_, mut var) in predictor.var_store().variables() {
                let _ = var.fill_(0.1);
            }
        });
        assert_ne!(before, predictor.forward_window(&window).unwrap());
        predictor.restore(&snapshot).unwrap();
        assert_eq!(before, predictor.forward_window(&window).unwrap());
    }

    #[test]
    fn invalid_descriptors() {
        let mut bad = desc();
        bad.layers = 0;
        assert!(matches!(bad.validate(), Err(Error::Configuration(_))));
        let mut bad = desc();
        bad.dropout = 1.0;
        assert!(Predictor::new(bad, Device::Cpu).is_err());
    }
}
