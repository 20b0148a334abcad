//! Batching iterator over a constructed dataset.
//!
//! The controller drives one `epoch()` at a time; the iterator yields whole
//! batches and keeps the final partial batch. Worker parallelism maps to a
//! rayon decode of the samples inside a batch.

use anyhow::Result;
use rand::seq::SliceRandom;
use rayon::prelude::*;

use super::{BuiltDataset, Dataset, Sample};

pub struct DataLoader {
    dataset: BuiltDataset,
    batch_size: usize,
    shuffle: bool,
    num_workers: usize,
}

impl DataLoader {
    pub fn new(dataset: BuiltDataset, batch_size: usize, shuffle: bool, num_workers: usize) -> Self {
        Self {
            dataset,
            batch_size: batch_size.max(1),
            shuffle,
            num_workers: num_workers.max(1),
        }
    }

    pub fn dataset(&self) -> &BuiltDataset {
        &self.dataset
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn shuffle(&self) -> bool {
        self.shuffle
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// One pass over the dataset, reshuffled when shuffling is enabled.
    pub fn epoch(&self) -> Epoch<'_> {
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        if self.shuffle {
            order.shuffle(&mut rand::thread_rng());
        }
        Epoch {
            loader: self,
            order,
            cursor: 0,
        }
    }

    fn load_batch(&self, indices: &[usize]) -> Result<Vec<Sample>> {
        if self.num_workers > 1 {
            indices
                .par_iter()
                .map(|&i| self.dataset.get(i))
                .collect()
        } else {
            indices.iter().map(|&i| self.dataset.get(i)).collect()
        }
    }
}

pub struct Epoch<'a> {
    loader: &'a DataLoader,
    order: Vec<usize>,
    cursor: usize,
}

impl Iterator for Epoch<'_> {
    type Item = Result<Vec<Sample>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.order.len() {
            return None;
        }
        let end = (self.cursor + self.loader.batch_size).min(self.order.len());
        let indices = &self.order[self.cursor..end];
        self.cursor = end;
        Some(self.loader.load_batch(indices))
    }
}
