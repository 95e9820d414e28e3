//! Contiguous mini-batches.
//!
//! Batches are views into the original arrays, handed out in order. Every batch holds exactly
//! `batch_size` rows except possibly the last, which holds the remainder. There is no shuffling,
//! so two passes over the same [`Batcher`] see identical batches.

use crate::error::{Error, Result};
use crate::mnist::Dataset;
use ndarray::{ArrayView2, s};

#[derive(Debug, Clone, Copy)]
pub struct Batch<'a> {
    pub inputs: ArrayView2<'a, f64>,
    pub labels: ArrayView2<'a, f64>,
}

impl Batch<'_> {
    pub fn len(&self) -> usize {
        self.inputs.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Batcher<'a> {
    inputs: ArrayView2<'a, f64>,
    labels: ArrayView2<'a, f64>,
    batch_size: usize,
}

impl<'a> Batcher<'a> {
    /// Fails if `batch_size` is zero, if there are no examples, or if inputs and labels are not
    /// aligned. A `batch_size` larger than the dataset gives a single batch holding everything.
    pub fn new(
        inputs: ArrayView2<'a, f64>,
        labels: ArrayView2<'a, f64>,
        batch_size: usize,
    ) -> Result<Batcher<'a>> {
        if batch_size == 0 {
            return Err(Error::InvalidConfiguration(
                "batch_size must be > 0".to_owned(),
            ));
        }
        if inputs.nrows() != labels.nrows() {
            return Err(Error::ShapeMismatch(format!(
                "{} inputs but {} labels",
                inputs.nrows(),
                labels.nrows()
            )));
        }
        if inputs.nrows() == 0 {
            return Err(Error::EmptyDataset("nothing to batch".to_owned()));
        }
        Ok(Batcher {
            inputs,
            labels,
            batch_size,
        })
    }

    pub fn from_dataset(dataset: &'a Dataset, batch_size: usize) -> Result<Batcher<'a>> {
        Batcher::new(dataset.inputs().view(), dataset.labels().view(), batch_size)
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn n_examples(&self) -> usize {
        self.inputs.nrows()
    }

    /// Number of batches in one pass.
    pub fn len(&self) -> usize {
        self.n_examples().div_ceil(self.batch_size)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Starts a fresh pass over the data, in the original order.
    pub fn iter(&self) -> Batches<'a> {
        Batches {
            inputs: self.inputs,
            labels: self.labels,
            batch_size: self.batch_size,
            start: 0,
        }
    }
}

impl<'a> IntoIterator for &Batcher<'a> {
    type Item = Batch<'a>;
    type IntoIter = Batches<'a>;

    fn into_iter(self) -> Batches<'a> {
        self.iter()
    }
}

pub struct Batches<'a> {
    inputs: ArrayView2<'a, f64>,
    labels: ArrayView2<'a, f64>,
    batch_size: usize,
    start: usize,
}

impl<'a> Iterator for Batches<'a> {
    type Item = Batch<'a>;

    fn next(&mut self) -> Option<Batch<'a>> {
        let n = self.inputs.nrows();
        if self.start >= n {
            return None;
        }
        let end = (self.start + self.batch_size).min(n);
        // Views are Copy, so slicing a copy hands out rows that live as long as the data itself.
        let batch = Batch {
            inputs: self.inputs.slice_move(s![self.start..end, ..]),
            labels: self.labels.slice_move(s![self.start..end, ..]),
        };
        self.start = end;
        Some(batch)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.inputs.nrows() - self.start).div_ceil(self.batch_size);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Batches<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, Axis, concatenate};
    use proptest::prelude::*;

    fn numbered(n: usize, width: usize) -> Array2<f64> {
        Array2::from_shape_fn((n, width), |(i, j)| (i * width + j) as f64)
    }

    #[test]
    fn last_batch_holds_the_remainder() {
        let inputs = numbered(10, 3);
        let labels = numbered(10, 2);
        let batcher = Batcher::new(inputs.view(), labels.view(), 4).unwrap();
        let sizes: Vec<usize> = batcher.iter().map(|batch| batch.len()).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        assert_eq!(batcher.len(), 3);
        assert_eq!(batcher.iter().len(), 3);
    }

    #[test]
    fn exact_multiple_has_no_partial_batch() {
        let inputs = numbered(9, 1);
        let labels = numbered(9, 1);
        let batcher = Batcher::new(inputs.view(), labels.view(), 3).unwrap();
        let sizes: Vec<usize> = batcher.iter().map(|batch| batch.len()).collect();
        assert_eq!(sizes, vec![3, 3, 3]);
    }

    #[test]
    fn oversized_batch_takes_everything() {
        let inputs = numbered(5, 2);
        let labels = numbered(5, 2);
        let batcher = Batcher::new(inputs.view(), labels.view(), 100).unwrap();
        let batches: Vec<Batch> = batcher.iter().collect();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].inputs, inputs.view());
    }

    #[test]
    fn passes_are_restartable() {
        let inputs = numbered(7, 2);
        let labels = numbered(7, 1);
        let batcher = Batcher::new(inputs.view(), labels.view(), 3).unwrap();
        let first: Vec<_> = batcher
            .iter()
            .map(|batch| batch.inputs.to_owned())
            .collect();
        let second: Vec<_> = (&batcher)
            .into_iter()
            .map(|batch| batch.inputs.to_owned())
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn rejects_degenerate_input() {
        let inputs = numbered(4, 2);
        let labels = numbered(4, 1);
        assert!(matches!(
            Batcher::new(inputs.view(), labels.view(), 0),
            Err(Error::InvalidConfiguration(_))
        ));

        let empty = Array2::<f64>::zeros((0, 2));
        assert!(matches!(
            Batcher::new(empty.view(), empty.view(), 10),
            Err(Error::EmptyDataset(_))
        ));

        let short = numbered(3, 1);
        assert!(matches!(
            Batcher::new(inputs.view(), short.view(), 2),
            Err(Error::ShapeMismatch(_))
        ));
    }

    proptest! {
        #[test]
        fn batches_cover_every_example_once(n in 1usize..200, batch_size in 1usize..64) {
            let inputs = numbered(n, 3);
            let labels = numbered(n, 2);
            let batcher = Batcher::new(inputs.view(), labels.view(), batch_size).unwrap();
            let batches: Vec<Batch> = batcher.iter().collect();

            prop_assert_eq!(batches.iter().map(Batch::len).sum::<usize>(), n);
            for batch in &batches[..batches.len() - 1] {
                prop_assert_eq!(batch.len(), batch_size);
            }

            let input_views: Vec<_> = batches.iter().map(|batch| batch.inputs).collect();
            let label_views: Vec<_> = batches.iter().map(|batch| batch.labels).collect();
            prop_assert_eq!(concatenate(Axis(0), &input_views).unwrap(), inputs.view());
            prop_assert_eq!(concatenate(Axis(0), &label_views).unwrap(), labels.view());
        }
    }
}
