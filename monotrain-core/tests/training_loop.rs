//! Loop behaviour driven through scripted collaborators.

mod common;

use common::{Probe, components, config, expected_means};
use monotrain_core::TrainError;
use monotrain_core::training::{CheckpointState, CheckpointStore, LoopState, Model, Trainer};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

#[test]
fn two_epochs_report_means_and_write_checkpoints() {
    let dir = TempDir::new().unwrap();
    let probe = Probe::new();
    let mut trainer = Trainer::new(config(2, 1, dir.path()), components(&probe, 3, false)).unwrap();
    assert_eq!(trainer.state(), LoopState::Idle);

    trainer.run().unwrap();

    assert_eq!(trainer.state(), LoopState::Done);
    assert_eq!(trainer.current_epoch(), 2);
    assert_eq!(probe.logged_epochs(), vec![1, 2]);
    for (_, summary) in probe.epochs.lock().unwrap().iter() {
        assert_eq!(summary.means, expected_means());
    }
    assert_eq!(trainer.last_summary().unwrap().means, expected_means());

    let saved: Vec<usize> = trainer
        .checkpoint_store()
        .list()
        .unwrap()
        .into_iter()
        .map(|(epoch, _)| epoch)
        .collect();
    assert_eq!(saved, vec![1, 2]);
    assert!(dir.path().join("checkpoint_epoch_1").is_file());
    assert!(dir.path().join("checkpoint_epoch_2").is_file());

    let state = CheckpointStore::read(&dir.path().join("checkpoint_epoch_2")).unwrap();
    assert_eq!(state.epoch, 2);
    // Three batches per epoch, one unit per step.
    assert_eq!(state.model_state["w"].data(), &[6.0]);
    assert_eq!(state.optimizer_state.unwrap()["steps"], 6);
}

#[test]
fn checkpoint_cadence_follows_save_frequency() {
    let dir = TempDir::new().unwrap();
    let probe = Probe::new();
    let mut trainer = Trainer::new(config(7, 3, dir.path()), components(&probe, 1, false)).unwrap();
    trainer.run().unwrap();

    let saved: Vec<usize> = CheckpointStore::new(dir.path())
        .list()
        .unwrap()
        .into_iter()
        .map(|(epoch, _)| epoch)
        .collect();
    assert_eq!(saved, vec![3, 6]);
}

#[test]
fn each_epoch_steps_exactly_one_scheduler() {
    let dir = TempDir::new().unwrap();
    let probe = Probe::new();
    let mut trainer =
        Trainer::new(config(8, 100, dir.path()), components(&probe, 1, true)).unwrap();
    trainer.run().unwrap();

    let steps = probe.steps.lock().unwrap().clone();
    assert_eq!(
        steps,
        vec![
            "warmup", "warmup", "warmup", "warmup", "warmup", "primary", "primary", "primary"
        ]
    );
    assert_eq!(trainer.warmup_scheduler().unwrap().last_epoch(), 4);
    assert_eq!(trainer.primary_scheduler().last_epoch(), 2);
}

#[test]
fn optimizer_rate_follows_the_active_scheduler() {
    let dir = TempDir::new().unwrap();
    let probe = Probe::new();
    let mut trainer =
        Trainer::new(config(6, 100, dir.path()), components(&probe, 1, true)).unwrap();
    trainer.run().unwrap();

    // Initial rate, then one update per epoch.
    let lrs = probe.lrs.lock().unwrap().clone();
    assert_eq!(lrs, vec![0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 1.0]);
    assert_eq!(trainer.optimizer().lr(), 1.0);
}

#[test]
fn epoch_seeds_derive_from_base_seed() {
    let dir = TempDir::new().unwrap();
    let probe = Probe::new();
    let mut cfg = config(3, 10, dir.path());
    cfg.seed = 7;
    let mut trainer = Trainer::new(cfg, components(&probe, 1, false)).unwrap();
    trainer.run().unwrap();

    assert_eq!(probe.seeds.lock().unwrap().clone(), vec![7, 8, 9]);
}

#[test]
fn model_is_placed_and_put_in_train_mode() {
    let dir = TempDir::new().unwrap();
    let probe = Probe::new();
    let mut cfg = config(1, 1, dir.path());
    cfg.compute_units = vec![0, 1];
    let mut trainer = Trainer::new(cfg, components(&probe, 1, false)).unwrap();

    assert_eq!(trainer.device(), monotrain_core::Device::Cpu);
    assert_eq!(trainer.model().units(), &[0, 1]);
    trainer.run().unwrap();
    assert_eq!(
        trainer.model().mode(),
        monotrain_core::training::ModelMode::Train
    );
}

#[test]
fn session_is_started_once_with_run_bounds() {
    let dir = TempDir::new().unwrap();
    let probe = Probe::new();
    let mut cfg = config(4, 2, dir.path());
    cfg.telemetry.project = Some("mono3d".into());
    let trainer = Trainer::new(cfg, components(&probe, 1, false)).unwrap();

    let sessions = probe.sessions.lock().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].project, "mono3d");
    assert_eq!(sessions[0].max_epoch, 4);
    assert_eq!(sessions[0].run_id, trainer.session().run_id);
}

#[test]
fn telemetry_start_failure_aborts_construction() {
    let dir = TempDir::new().unwrap();
    let probe = Probe::new();
    let mut parts = components(&probe, 1, false);
    parts.sink = Box::new(common::RecordingSink {
        started: probe.sessions.clone(),
        epochs: probe.epochs.clone(),
        fail_start: true,
    });

    let err = Trainer::new(config(2, 1, dir.path()), parts).err().unwrap();
    assert!(matches!(err, TrainError::Telemetry(_)));
}

#[test]
fn empty_data_source_fails_the_epoch() {
    let dir = TempDir::new().unwrap();
    let probe = Probe::new();
    let mut trainer = Trainer::new(config(2, 1, dir.path()), components(&probe, 0, false)).unwrap();

    let err = trainer.run().unwrap_err();
    assert!(matches!(err, TrainError::EmptySeries { .. }));
    assert_eq!(trainer.current_epoch(), 0);
    assert!(probe.logged_epochs().is_empty());
    assert!(CheckpointStore::new(dir.path()).list().unwrap().is_empty());
}

#[test]
fn missing_loss_term_fails_the_epoch() {
    let dir = TempDir::new().unwrap();
    let probe = Probe::new();
    let mut parts = components(&probe, 2, false);
    parts.criterion.omit = vec!["heading"];
    let mut trainer = Trainer::new(config(1, 1, dir.path()), parts).unwrap();

    let err = trainer.run().unwrap_err();
    assert!(matches!(err, TrainError::MissingStatistic(ref name) if name == "heading"));
}

#[test]
fn invalid_configuration_is_rejected_before_training() {
    let dir = TempDir::new().unwrap();
    let probe = Probe::new();
    let mut cfg = config(2, 1, dir.path());
    cfg.save_frequency = 0;

    let err = Trainer::new(cfg, components(&probe, 1, false)).err().unwrap();
    assert!(matches!(err, TrainError::InvalidConfiguration(_)));
    assert!(probe.sessions.lock().unwrap().is_empty());
}

#[test]
fn checkpoint_round_trips_through_capture() {
    let dir = TempDir::new().unwrap();
    let probe = Probe::new();
    let mut trainer = Trainer::new(config(1, 1, dir.path()), components(&probe, 2, false)).unwrap();
    trainer.run().unwrap();

    let path = dir.path().join("checkpoint_epoch_1");
    let state = CheckpointStore::read(&path).unwrap();
    let expected =
        CheckpointState::capture(trainer.model().params(), Some(trainer.optimizer()), 1).unwrap();
    assert_eq!(state.model_state, expected.model_state);
    assert_eq!(state.digest, expected.digest);
}
