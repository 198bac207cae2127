//! Scripted collaborators shared by the integration tests.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use monotrain_core::config::TrainingConfig;
use monotrain_core::error::{Result, TrainError};
use monotrain_core::telemetry::{RunSession, TelemetrySink};
use monotrain_core::tensor::{DevicePreference, ParamStore, Tensor};
use monotrain_core::training::{
    Backward, Batch, BatchStats, Criterion, DataSource, EpochSummary, LrScheduler, Model,
    ModelMode, Optimizer, Targets, TrainerComponents,
};

pub type Shared<T> = Arc<Mutex<Vec<T>>>;

pub fn shared<T>() -> Shared<T> {
    Arc::new(Mutex::new(Vec::new()))
}

/// One scalar parameter `w`; forward ignores the input.
pub struct ScalarModel {
    params: ParamStore,
    mode: ModelMode,
}

impl ScalarModel {
    pub fn new(value: f32) -> Self {
        let mut params = ParamStore::new();
        params.insert("w", Tensor::new(vec![1], vec![value]).unwrap());
        Self {
            params,
            mode: ModelMode::Eval,
        }
    }
}

impl Model for ScalarModel {
    type Output = ();

    fn forward(&mut self, _input: &Tensor) -> Result<()> {
        Ok(())
    }

    fn params(&self) -> &ParamStore {
        &self.params
    }

    fn params_mut(&mut self) -> &mut ParamStore {
        &mut self.params
    }

    fn mode(&self) -> ModelMode {
        self.mode
    }

    fn set_mode(&mut self, mode: ModelMode) {
        self.mode = mode;
    }
}

pub struct ZeroLoss;

impl Backward for ZeroLoss {
    fn value(&self) -> f64 {
        0.0
    }

    fn backward(&self, _params: &mut ParamStore) -> Result<()> {
        Ok(())
    }
}

/// Reports `seg=1, size2d=2, depth=3, size3d=4, heading=5` for every batch,
/// minus any term listed in `omit`.
#[derive(Default)]
pub struct ConstCriterion {
    pub omit: Vec<&'static str>,
}

impl Criterion<()> for ConstCriterion {
    type Loss = ZeroLoss;

    fn compute(&self, _outputs: &(), _targets: &Targets) -> Result<(ZeroLoss, BatchStats)> {
        let stats = [
            ("seg", 1.0),
            ("size2d", 2.0),
            ("depth", 3.0),
            ("size3d", 4.0),
            ("heading", 5.0),
        ]
        .into_iter()
        .filter(|(name, _)| !self.omit.contains(name))
        .map(|(name, value)| (name.to_string(), value))
        .collect();
        Ok((ZeroLoss, stats))
    }
}

/// Adds 1 to every parameter per step and records every rate it is given.
pub struct CountingOptimizer {
    pub lr: f64,
    pub steps: u64,
    pub lr_log: Shared<f64>,
}

impl CountingOptimizer {
    pub fn new(lr_log: Shared<f64>) -> Self {
        Self {
            lr: 0.0,
            steps: 0,
            lr_log,
        }
    }
}

impl Optimizer for CountingOptimizer {
    fn step(&mut self, params: &mut ParamStore) -> Result<()> {
        for (_, value, _) in params.iter_with_grads_mut() {
            value.data_mut().iter_mut().for_each(|v| *v += 1.0);
        }
        self.steps += 1;
        Ok(())
    }

    fn lr(&self) -> f64 {
        self.lr
    }

    fn set_lr(&mut self, lr: f64) {
        self.lr_log.lock().unwrap().push(lr);
        self.lr = lr;
    }

    fn state(&self) -> Result<serde_json::Value> {
        Ok(serde_json::json!({ "steps": self.steps }))
    }

    fn load_state(&mut self, state: serde_json::Value, _params: &ParamStore) -> Result<()> {
        self.steps = state["steps"]
            .as_u64()
            .ok_or_else(|| TrainError::model("optimizer state has no step count"))?;
        Ok(())
    }
}

/// A fixed number of empty batches; records the seed of every epoch.
pub struct CountingSource {
    pub batches: usize,
    pub seeds: Shared<u64>,
}

impl DataSource for CountingSource {
    fn len(&self) -> usize {
        self.batches
    }

    fn batches(&mut self, seed: u64) -> Box<dyn Iterator<Item = Result<Batch>> + '_> {
        self.seeds.lock().unwrap().push(seed);
        Box::new((0..self.batches).map(|_| {
            Ok::<_, TrainError>(Batch::new(Tensor::zeros(vec![1, 1]), Targets::new()))
        }))
    }
}

/// Constant-rate scheduler that logs its name on every step.
pub struct RecordingScheduler {
    pub name: &'static str,
    pub rate: f64,
    pub last_epoch: i64,
    pub log: Shared<&'static str>,
}

impl RecordingScheduler {
    pub fn new(name: &'static str, rate: f64, log: Shared<&'static str>) -> Self {
        Self {
            name,
            rate,
            last_epoch: -1,
            log,
        }
    }
}

impl LrScheduler for RecordingScheduler {
    fn rate_at(&self, _epoch: usize) -> f64 {
        self.rate
    }

    fn last_epoch(&self) -> i64 {
        self.last_epoch
    }

    fn set_last_epoch(&mut self, last_epoch: i64) {
        self.last_epoch = last_epoch;
    }

    fn step(&mut self) -> f64 {
        self.log.lock().unwrap().push(self.name);
        self.last_epoch += 1;
        self.current_lr()
    }
}

/// Captures every epoch it is handed.
pub struct RecordingSink {
    pub started: Shared<RunSession>,
    pub epochs: Shared<(usize, EpochSummary)>,
    pub fail_start: bool,
}

impl TelemetrySink for RecordingSink {
    fn start(&mut self, session: &RunSession) -> Result<()> {
        if self.fail_start {
            return Err(TrainError::telemetry("tracker unreachable"));
        }
        self.started.lock().unwrap().push(session.clone());
        Ok(())
    }

    fn log_epoch(&mut self, epoch: usize, summary: &EpochSummary) -> Result<()> {
        self.epochs.lock().unwrap().push((epoch, summary.clone()));
        Ok(())
    }
}

/// Handles onto everything the scripted collaborators record.
#[derive(Clone, Default)]
pub struct Probe {
    pub seeds: Shared<u64>,
    pub lrs: Shared<f64>,
    pub steps: Shared<&'static str>,
    pub sessions: Shared<RunSession>,
    pub epochs: Shared<(usize, EpochSummary)>,
}

impl Probe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn logged_epochs(&self) -> Vec<usize> {
        self.epochs.lock().unwrap().iter().map(|(e, _)| *e).collect()
    }
}

/// Scripted components: `batches` per epoch, warmup rate 0.5 when
/// `with_warmup`, primary rate 1.0.
pub fn components(
    probe: &Probe,
    batches: usize,
    with_warmup: bool,
) -> TrainerComponents<ScalarModel, ConstCriterion> {
    TrainerComponents {
        model: ScalarModel::new(0.0),
        criterion: ConstCriterion::default(),
        optimizer: Box::new(CountingOptimizer::new(probe.lrs.clone())),
        train_source: Box::new(CountingSource {
            batches,
            seeds: probe.seeds.clone(),
        }),
        test_source: None,
        primary_scheduler: Box::new(RecordingScheduler::new("primary", 1.0, probe.steps.clone())),
        warmup_scheduler: with_warmup.then(|| {
            Box::new(RecordingScheduler::new("warmup", 0.5, probe.steps.clone()))
                as Box<dyn LrScheduler>
        }),
        sink: Box::new(RecordingSink {
            started: probe.sessions.clone(),
            epochs: probe.epochs.clone(),
            fail_start: false,
        }),
    }
}

/// CPU-only config writing checkpoints under `dir`.
pub fn config(max_epoch: usize, save_frequency: usize, dir: &std::path::Path) -> TrainingConfig {
    let mut config = TrainingConfig::new(max_epoch, save_frequency)
        .unwrap()
        .with_checkpoint_dir(dir);
    config.device = DevicePreference::Cpu;
    config
}

pub fn expected_means() -> BTreeMap<String, f64> {
    BTreeMap::from([
        ("center".to_string(), 1.0),
        ("hm".to_string(), 2.0),
        ("depth".to_string(), 3.0),
        ("size3d".to_string(), 4.0),
        ("rotation".to_string(), 5.0),
    ])
}
