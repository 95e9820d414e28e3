use clap::Parser;
use mnist_mlp::{
    MnistData, Trainer, TrainingConfig, accuracy, logging, loss::argmax, mnist::render_digit,
    predict,
};
use std::{error::Error, path::PathBuf};
use tracing::info;

/// Train a fully-connected digit classifier on MNIST.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Directory holding the four gzipped MNIST IDX files
    #[arg(short, long, value_name = "PATH", default_value = "data")]
    data_dir: PathBuf,
    /// JSON training configuration; fields left out take their defaults
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(short, long, value_name = "INT")]
    epochs: Option<usize>,
    #[arg(short, long, value_name = "FLOAT")]
    learning_rate: Option<f64>,
    #[arg(short, long, value_name = "INT")]
    batch_size: Option<usize>,
    #[arg(long, value_name = "INT")]
    seed: Option<u64>,
    /// Number of validation digits to draw alongside their predictions
    #[arg(long, value_name = "INT", default_value_t = 5)]
    show: usize,
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn training_config(&self) -> mnist_mlp::Result<TrainingConfig> {
        let mut config = match &self.config {
            Some(path) => TrainingConfig::load(path)?,
            None => TrainingConfig::default(),
        };
        if let Some(epochs) = self.epochs {
            config.epochs = epochs;
        }
        if let Some(learning_rate) = self.learning_rate {
            config.learning_rate = learning_rate;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    logging::init(cli.verbose)?;

    let config = cli.training_config()?;
    info!(?config, "starting training");

    let mnist_data = MnistData::load(&cli.data_dir)?;
    let mut trainer = Trainer::new(config)?;
    trainer.fit(&mnist_data.training, &mnist_data.validation)?;

    let params = trainer.into_params();
    let test_accuracy = accuracy(
        &params,
        mnist_data.test.inputs().view(),
        mnist_data.test.labels().view(),
    )?;
    info!("Test set accuracy {:.4}", test_accuracy);

    let validation = &mnist_data.validation;
    for (image, label) in validation
        .inputs()
        .outer_iter()
        .zip(validation.labels().outer_iter())
        .take(cli.show)
    {
        let predicted = argmax(predict(&params, image)?.view());
        let caption = format!("Label: {}  Predicted: {}", argmax(label), predicted);
        println!("{}\n", render_digit(image, &caption)?);
    }

    Ok(())
}
