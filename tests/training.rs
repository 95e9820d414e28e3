use mnist_mlp::{Dataset, Key, Trainer, TrainerState, TrainingConfig, accuracy, loss};
use ndarray::Array2;
use ndarray_rand::{RandomExt, rand_distr::Uniform};

const N_CLASSES: usize = 10;
const INPUT_DIM: usize = 784;
const BLOCK: usize = INPUT_DIM / N_CLASSES;

// Example i belongs to class i % 10 and lights up only that class's block of pixels, at an
// intensity between 0.6 and 1.0. Classes are disjoint, so they are linearly separable.
fn separable_digits(n: usize, key: Key) -> Dataset {
    let intensities =
        Array2::random_using((n, INPUT_DIM), Uniform::new(0.6, 1.0), &mut key.rng());
    let inputs = Array2::from_shape_fn((n, INPUT_DIM), |(i, j)| {
        if j / BLOCK == i % N_CLASSES { intensities[[i, j]] } else { 0.0 }
    });
    let labels: Vec<usize> = (0..n).map(|i| i % N_CLASSES).collect();
    Dataset::from_labels(inputs, &labels, N_CLASSES).unwrap()
}

#[test]
fn loss_falls_and_accuracy_climbs_on_separable_data() {
    let (train_key, valid_key) = Key::new(2024).split();
    let train = separable_digits(1000, train_key);
    let valid = separable_digits(200, valid_key);

    let config = TrainingConfig::default();
    assert_eq!(config.layer_sizes, vec![784, 512, 512, 10]);
    let mut trainer = Trainer::new(config).unwrap();
    let (inputs, labels) = (train.inputs().view(), train.labels().view());
    let initial_loss = loss(trainer.params(), inputs, labels).unwrap();
    let initial_accuracy = accuracy(trainer.params(), inputs, labels).unwrap();
    assert!(initial_accuracy < 0.5, "untrained accuracy {initial_accuracy}");

    let reports = trainer.fit(&train, &valid).unwrap();

    assert_eq!(reports.len(), 5);
    assert_eq!(trainer.state(), TrainerState::Done);
    assert!(
        reports[0].train_loss < initial_loss,
        "first epoch moved loss from {initial_loss} to {}",
        reports[0].train_loss
    );
    assert!(reports[0].train_accuracy > initial_accuracy);
    for pair in reports.windows(2) {
        assert!(
            pair[1].train_loss < pair[0].train_loss,
            "loss rose from {} to {} after epoch {}",
            pair[0].train_loss,
            pair[1].train_loss,
            pair[1].epoch
        );
        assert!(
            pair[1].train_accuracy >= pair[0].train_accuracy - 0.02,
            "accuracy fell from {} to {}",
            pair[0].train_accuracy,
            pair[1].train_accuracy
        );
    }

    let last = &reports[reports.len() - 1];
    assert!(last.train_accuracy >= 0.9, "final accuracy {}", last.train_accuracy);
    assert!(
        last.valid_accuracy >= 0.9,
        "final validation accuracy {}",
        last.valid_accuracy
    );
    assert!(last.train_loss.is_finite());
}

#[test]
fn training_is_reproducible() {
    let data = separable_digits(60, Key::new(7));
    let config = TrainingConfig {
        layer_sizes: vec![784, 16, 10],
        epochs: 2,
        batch_size: 25,
        ..Default::default()
    };

    let mut first = Trainer::new(config.clone()).unwrap();
    let mut second = Trainer::new(config).unwrap();
    first.fit(&data, &data).unwrap();
    second.fit(&data, &data).unwrap();
    assert_eq!(first.params(), second.params());
}
