use std::env;

use burn_autodiff::Autodiff;
use burn_ndarray::NdArray;

use burn_lenet::{
    context::ExecutionContext,
    training::{self, SmokeTestConfig},
};

const CONFIG_ENV: &str = "LENET_SMOKE_CONFIG";
const DEVICE_ENV: &str = "LENET_DEVICE";

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    println!("🔥 Test de fumée LeNet avec Burn 0.19\n");

    type Backend = Autodiff<NdArray>;

    let config = match env::var(CONFIG_ENV) {
        Ok(path) => SmokeTestConfig::from_file(path)?,
        Err(_) => SmokeTestConfig::fixture(),
    };
    let config = config.with_device_override(env::var(DEVICE_ENV).ok().as_deref())?;

    let ctx = ExecutionContext::<Backend>::ndarray(config.device_target, config.seed)?;
    let report = training::run(&ctx, &config)?;

    println!(
        "✅ logits {:?}, adverses {:?} (|δ|max={:.4}), loss={:.4}",
        report.logits_shape, report.adversarial_shape, report.max_perturbation, report.loss
    );
    Ok(())
}
