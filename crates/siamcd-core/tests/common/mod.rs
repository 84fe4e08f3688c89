#![allow(dead_code)]

use siamcd_core::test_utils::{index_pairs, ChangeSceneBuilder, LearningModel, Region};
use siamcd_core::{LabelMap, PseudoRecord};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

pub const HEIGHT: usize = 20;
pub const WIDTH: usize = 20;

/// 20x20 scene with an 8x8 change and two unlabelled bottom rows.
pub fn scene() -> ChangeSceneBuilder {
    ChangeSceneBuilder::new(HEIGHT, WIDTH)
        .with_changed(Region::new(4, 4, 8, 8))
        .with_unknown(Region::new(18, 0, 2, WIDTH))
        .with_noise(0.05)
}

/// Everything one refinement run needs.
pub struct Fixture {
    pub ground_truth: LabelMap,
    pub record: PseudoRecord,
    pub pairs: Vec<usize>,
    pub model: LearningModel,
}

/// Fixture whose model misses the top half of the changed block.
pub fn fixture() -> Fixture {
    let scene = scene();
    let mut rng = ChaCha8Rng::seed_from_u64(43);
    let record = scene.record(&mut rng).unwrap();

    let mut scores = record.distances().to_vec();
    for row in 4..8 {
        for col in 4..12 {
            scores[row * WIDTH + col] = 0.2;
        }
    }

    Fixture {
        ground_truth: scene.ground_truth(),
        record,
        pairs: index_pairs(HEIGHT * WIDTH),
        model: LearningModel::new(scores, 0.2, 1.0),
    }
}
