use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread::{self, JoinHandle};

use ndarray::{Array3, Array4};
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use super::{DatasetError, Sample};
use crate::vision::preprocess::{Preprocessor, stack_batch};

#[derive(Debug, Clone, PartialEq)]
pub struct LoaderOptions {
    pub batch_size: usize,
    pub num_workers: usize,
    /// Batches decoded ahead of the consumer.
    pub prefetch: usize,
    pub shuffle: bool,
    pub augment: bool,
    pub seed: u64,
}

impl LoaderOptions {
    pub fn training(batch_size: usize, num_workers: usize, prefetch: usize, seed: u64) -> Self {
        Self {
            batch_size,
            num_workers,
            prefetch,
            shuffle: true,
            augment: true,
            seed,
        }
    }

    pub fn evaluation(batch_size: usize, num_workers: usize) -> Self {
        Self {
            batch_size,
            num_workers,
            prefetch: 2,
            shuffle: false,
            augment: false,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Batch {
    pub images: Array4<f32>,
    pub targets: Vec<i64>,
    pub paths: Vec<PathBuf>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// One pass over a sample list. A producer thread decodes batches on a
/// dedicated rayon pool and hands them over through a bounded channel;
/// batches arrive in order.
pub struct BatchLoader {
    receiver: Option<Receiver<Result<Batch, DatasetError>>>,
    producer: Option<JoinHandle<()>>,
    batches: usize,
}

impl BatchLoader {
    pub fn new(
        samples: Vec<Sample>,
        preprocessor: Preprocessor,
        options: &LoaderOptions,
        epoch: u64,
    ) -> Self {
        let batch_size = options.batch_size.max(1);
        let batches = samples.len().div_ceil(batch_size);
        let (sender, receiver) = mpsc::sync_channel(options.prefetch.max(1));
        let options = options.clone();

        let producer = thread::Builder::new()
            .name("batch-loader".into())
            .spawn(move || produce(samples, preprocessor, options, epoch, sender));
        let producer = match producer {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::error!("Failed to spawn batch loader: {}", e);
                None
            }
        };

        Self {
            receiver: Some(receiver),
            producer,
            batches,
        }
    }

    /// Number of batches in this pass.
    pub fn len(&self) -> usize {
        self.batches
    }

    pub fn is_empty(&self) -> bool {
        self.batches == 0
    }
}

impl Iterator for BatchLoader {
    type Item = Result<Batch, DatasetError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.producer.is_none() {
            self.receiver = None;
            return (self.batches > 0).then(|| {
                self.batches = 0;
                Err(DatasetError::Pool("batch loader thread did not start".into()))
            });
        }
        self.receiver.as_ref()?.recv().ok()
    }
}

impl Drop for BatchLoader {
    fn drop(&mut self) {
        // unblocks a producer waiting on a full channel
        self.receiver.take();
        if let Some(handle) = self.producer.take() {
            let _ = handle.join();
        }
    }
}

fn epoch_seed(seed: u64, epoch: u64) -> u64 {
    seed.wrapping_add(epoch.wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

fn produce(
    mut samples: Vec<Sample>,
    preprocessor: Preprocessor,
    options: LoaderOptions,
    epoch: u64,
    sender: SyncSender<Result<Batch, DatasetError>>,
) {
    let seed = epoch_seed(options.seed, epoch);
    if options.shuffle {
        samples.shuffle(&mut ChaCha8Rng::seed_from_u64(seed));
    }

    let pool = match rayon::ThreadPoolBuilder::new()
        .num_threads(options.num_workers)
        .thread_name(|i| format!("loader-{}", i))
        .build()
    {
        Ok(pool) => pool,
        Err(e) => {
            let _ = sender.send(Err(DatasetError::Pool(e.to_string())));
            return;
        }
    };

    let batch_size = options.batch_size.max(1);
    for (batch_index, chunk) in samples.chunks(batch_size).enumerate() {
        let offset = batch_index * batch_size;
        let batch = pool.install(|| load_batch(chunk, offset, &preprocessor, &options, seed));
        let failed = batch.is_err();
        if sender.send(batch).is_err() || failed {
            return;
        }
    }
}

fn load_batch(
    chunk: &[Sample],
    offset: usize,
    preprocessor: &Preprocessor,
    options: &LoaderOptions,
    seed: u64,
) -> Result<Batch, DatasetError> {
    let images = chunk
        .par_iter()
        .enumerate()
        .map(|(i, sample)| load_sample(sample, (offset + i) as u64, preprocessor, options, seed))
        .collect::<Result<Vec<Array3<f32>>, _>>()?;

    Ok(Batch {
        images: stack_batch(&images)?,
        targets: chunk.iter().map(|s| s.target as i64).collect(),
        paths: chunk.iter().map(|s| s.path.clone()).collect(),
    })
}

fn load_sample(
    sample: &Sample,
    position: u64,
    preprocessor: &Preprocessor,
    options: &LoaderOptions,
    seed: u64,
) -> Result<Array3<f32>, DatasetError> {
    let image = preprocessor
        .open(&sample.path)
        .map_err(|source| DatasetError::Image {
            path: sample.path.clone(),
            source,
        })?;
    if !options.augment {
        return Ok(preprocessor.preprocess_image(image));
    }
    // one stream per position keeps augmentation independent of worker scheduling
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(position + 1);
    Ok(preprocessor.preprocess_augmented(image, &mut rng))
}

#[cfg(test)]
mod tests {
    use super::super::ImageFolder;
    use super::super::test_support::{touch, write_png};
    use super::*;
    use crate::config::PreprocessingConfig;

    fn small_preprocessor() -> Preprocessor {
        Preprocessor::new(&PreprocessingConfig {
            image_size: 16,
            ..PreprocessingConfig::default()
        })
    }

    fn folder(fakes: usize, reals: usize) -> (tempfile::TempDir, ImageFolder) {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..fakes {
            write_png(&dir.path().join(format!("fake/{}.png", i)), 20 + i as u32, 10);
        }
        for i in 0..reals {
            write_png(&dir.path().join(format!("real/{}.png", i)), 10, 20 + i as u32);
        }
        let folder = ImageFolder::open(dir.path()).unwrap();
        (dir, folder)
    }

    #[test]
    fn sequential_pass_keeps_order_and_sizes() {
        let (_dir, folder) = folder(3, 2);
        let loader = BatchLoader::new(
            folder.samples().to_vec(),
            small_preprocessor(),
            &LoaderOptions::evaluation(2, 2),
            0,
        );
        assert_eq!(loader.len(), 3);

        let batches: Vec<Batch> = loader.map(|b| b.unwrap()).collect();
        assert_eq!(batches.iter().map(Batch::len).collect::<Vec<_>>(), vec![2, 2, 1]);
        assert_eq!(batches[0].images.shape(), &[2, 3, 16, 16]);
        let targets: Vec<i64> = batches.iter().flat_map(|b| b.targets.clone()).collect();
        assert_eq!(targets, vec![0, 0, 0, 1, 1]);
        let paths: Vec<PathBuf> = batches.iter().flat_map(|b| b.paths.clone()).collect();
        let expected: Vec<PathBuf> = folder.samples().iter().map(|s| s.path.clone()).collect();
        assert_eq!(paths, expected);
    }

    #[test]
    fn same_seed_and_epoch_reproduce_batches() {
        let (_dir, folder) = folder(4, 4);
        let options = LoaderOptions::training(3, 3, 1, 20);
        let run = |epoch| -> Vec<Batch> {
            BatchLoader::new(folder.samples().to_vec(), small_preprocessor(), &options, epoch)
                .map(|b| b.unwrap())
                .collect()
        };
        let a = run(1);
        let b = run(1);
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.paths, y.paths);
            assert_eq!(x.images, y.images);
        }

        let order = |batches: &[Batch]| -> Vec<PathBuf> {
            batches.iter().flat_map(|b| b.paths.clone()).collect()
        };
        let mut first = order(&a);
        let mut other = order(&run(2));
        assert_eq!(first.len(), 8);
        first.sort();
        other.sort();
        assert_eq!(first, other);
    }

    #[test]
    fn corrupt_image_surfaces_as_error() {
        let (dir, _) = folder(2, 2);
        touch(&dir.path().join("fake/zz-broken.png"), b"nope");
        let folder = ImageFolder::open(dir.path()).unwrap();
        let results: Vec<_> = BatchLoader::new(
            folder.samples().to_vec(),
            small_preprocessor(),
            &LoaderOptions::evaluation(8, 2),
            0,
        )
        .collect();
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(DatasetError::Image { .. })));
    }

    #[test]
    fn dropping_early_does_not_hang() {
        let (_dir, folder) = folder(6, 6);
        let mut loader = BatchLoader::new(
            folder.samples().to_vec(),
            small_preprocessor(),
            &LoaderOptions::training(1, 2, 1, 7),
            0,
        );
        assert!(loader.next().unwrap().is_ok());
        drop(loader);
    }
}
