use burn::backend::{Autodiff, NdArray};

use hyperdag::config::scaffold::{data_template, model_template};
use hyperdag::config::ModelFile;
use hyperdag::graph::assemble;
use hyperdag::model::checkpoint::{load_model, save_model};
use hyperdag::model::{evaluate, fit};
use hyperdag::tuner::{BestRecord, Tuner};

type B = Autodiff<NdArray>;

/// Model file on disk -> search -> record -> replayed build -> saved weights.
#[test]
fn search_record_replay() {
    let dir = tempfile::tempdir().unwrap();
    let model_path = dir.path().join("model.toml");
    let data_path = dir.path().join("data.csv");
    std::fs::write(&model_path, model_template("roundtrip")).unwrap();
    std::fs::write(&data_path, data_template(48)).unwrap();

    let source = std::fs::read_to_string(&model_path).unwrap();
    let file = ModelFile::parse(&source).unwrap();
    let graph = file.to_graph().unwrap();

    let mut first_build = file.hyperparameters();
    let assembly = assemble(&graph, &mut first_build).unwrap();
    let data = file.load_data(&data_path, &assembly.plan).unwrap();
    assert_eq!(data.len(), 48);

    let mut config = file.search.tuner_config();
    config.max_trials = 2;
    config.fit.epochs = 2;
    let device = Default::default();
    let result = Tuner::new(&graph, file.compile.clone(), config)
        .with_pinned(file.hyperparameters())
        .search::<B>(&data, &device)
        .unwrap();
    assert_eq!(result.trials.len(), 2);
    assert_eq!(result.trials[0].id, 0);

    let record = result.best_record().unwrap();
    assert_eq!(record.objective, "val_loss");
    assert!(record.score.is_finite());
    let record_path = dir.path().join("out").join("best.json");
    record.save(&record_path).unwrap();
    let loaded = BestRecord::load(&record_path).unwrap();
    assert_eq!(loaded, record);

    // Replaying the record reproduces the trial's assignment.
    let mut hp = file.hyperparameters();
    loaded.apply(&mut hp);
    let replay = assemble(&graph, &mut hp).unwrap();
    assert_eq!(hp.assignment(), loaded.values);
    assert!(hp.unused_fixed().is_empty());

    let (train, validation) = data.split(file.search.validation_split);
    let model = replay.plan.init::<B>(&device);
    let (model, history) = fit(
        model,
        &file.compile,
        &train,
        Some(&validation),
        &file.search.fit_config(),
        &device,
    )
    .unwrap();
    assert_eq!(history.len(), file.search.epochs);

    let weights = dir.path().join("weights");
    let trained = model.valid();
    save_model(&trained, &weights).unwrap();
    let restored = load_model::<NdArray>(&replay.plan, &weights, &device).unwrap();
    let before = evaluate(&trained, &file.compile, &validation, 16, &device).unwrap();
    let after = evaluate(&restored, &file.compile, &validation, 16, &device).unwrap();
    assert_eq!(before, after);
    assert!(after.contains_key("accuracy"));
}
