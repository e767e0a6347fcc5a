use anyhow::{bail, Context, Result};
use approx::assert_abs_diff_eq;
use evalpool_rs::config::Config;
use evalpool_rs::engine::engine_by_name;
use evalpool_rs::{
    BatchRunner, DenseEngine, Device, ErrorKind, EvaluationPool, NodeGroup, TensorMap,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

fn fixture(name: &str) -> Result<PathBuf> {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name);
    if !path.exists() {
        bail!("Missing test fixture at {}", path.display());
    }
    Ok(path)
}

fn dense_pool(size: usize) -> Result<EvaluationPool> {
    let pool = EvaluationPool::new(Arc::new(DenseEngine::new()));
    pool.initialize(size, fixture("dense_model.json")?, Device::cpu())
        .context("Failed to load dense model fixture")?;
    Ok(pool)
}

#[test]
fn dense_fixture_outputs() -> Result<()> {
    let pool = dense_pool(2)?;

    let schema = pool.schema().context("pool has no schema")?;
    assert_eq!(schema.dimensions(NodeGroup::Input)["features"], vec![4]);
    assert_eq!(schema.dimensions(NodeGroup::Output)["scores"], vec![2]);

    let inputs = TensorMap::from_json_file(fixture("input.json")?)?;
    let outputs = pool.evaluate(&inputs)?;

    assert_eq!(outputs.len(), 1);
    let scores = outputs.get("scores").context("missing scores")?;
    assert_eq!(scores.shape(), &[2]);
    let values = scores.to_flat_vec();
    // hidden = relu([1, 2 - 1, 10 + 0.5]) = [1, 1, 10.5]
    assert_abs_diff_eq!(values[0], 2.1, epsilon = 1e-5);
    assert_abs_diff_eq!(values[1], 5.15, epsilon = 1e-5);
    Ok(())
}

#[test]
fn dense_relu_clamps_negative_activations() -> Result<()> {
    let pool = dense_pool(1)?;
    let inputs = TensorMap::new().with_flat("features", &[4], vec![-1.0, 0.5, 0.0, 0.0])?;
    let values = pool.evaluate(&inputs)?.get("scores").context("missing scores")?.to_flat_vec();
    assert_abs_diff_eq!(values[0], 0.1, epsilon = 1e-6);
    assert_abs_diff_eq!(values[1], -0.1, epsilon = 1e-6);
    Ok(())
}

#[test]
fn dense_accepts_any_shape_with_matching_element_count() -> Result<()> {
    let pool = dense_pool(1)?;
    let inputs = TensorMap::new().with_flat("features", &[2, 2], vec![1.0, 2.0, 3.0, 4.0])?;
    let values = pool.evaluate(&inputs)?.get("scores").context("missing scores")?.to_flat_vec();
    assert_abs_diff_eq!(values[0], 2.1, epsilon = 1e-5);
    Ok(())
}

#[test]
fn dense_rejects_gpu_device() -> Result<()> {
    let pool = EvaluationPool::new(Arc::new(DenseEngine::new()));
    let err = pool
        .initialize(2, fixture("dense_model.json")?, Device::gpu(0))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Load);
    Ok(())
}

#[test]
fn dense_missing_artifact() {
    let pool = EvaluationPool::new(Arc::new(DenseEngine::new()));
    let err = pool
        .initialize(1, "/no/such/model.json", Device::cpu())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Load);
}

#[test]
fn dense_yaml_artifact() -> Result<()> {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile()?;
    writeln!(
        file,
        r#"
input: {{name: x, shape: [2]}}
output: {{name: y, shape: [1]}}
layers:
  - weights: [[0.5, 0.5]]
    bias: [0.0]
    activation: sigmoid
"#
    )?;

    let pool = EvaluationPool::new(engine_by_name("dense")?);
    pool.initialize(1, file.path(), Device::cpu())?;
    let inputs = TensorMap::new().with_flat("x", &[2], vec![1.0, -1.0])?;
    let y = pool.evaluate(&inputs)?.get("y").context("missing y")?.to_flat_vec();
    assert_abs_diff_eq!(y[0], 0.5, epsilon = 1e-6);
    Ok(())
}

#[test]
fn batch_run_from_config() -> Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(
        file,
        "model:\n  path: {}\n  engine: dense\n\
         pool:\n  size: 3\n\
         run:\n  threads: 6\n  iterations: 30\n",
        fixture("dense_model.json")?.display()
    )?;
    let config = Config::from_yaml_file(file.path())?;

    let pool = EvaluationPool::new(engine_by_name(&config.model.engine)?);
    pool.initialize(
        config.pool.size,
        config.model.path.as_ref().context("no model path")?,
        config.model.device()?,
    )?;

    let inputs = TensorMap::from_json_file(fixture("input.json")?)?;
    let requests = vec![inputs; config.run.iterations];
    let report = BatchRunner::new(&pool)
        .threads(config.run.threads.unwrap_or(1))
        .run(&requests)?;

    assert_eq!(report.succeeded(), 30);
    assert_eq!(report.stats.total_evaluations, 30);
    assert!(report.stats.peak_in_flight <= 3);
    assert!(report.stats.throughput() > 0.0);
    for result in &report.results {
        let values = result.as_ref().map_err(|e| anyhow::anyhow!("{e}"))?;
        let scores = values.get("scores").context("missing scores")?.to_flat_vec();
        assert_abs_diff_eq!(scores[1], 5.15, epsilon = 1e-5);
    }

    pool.shutdown();
    Ok(())
}
