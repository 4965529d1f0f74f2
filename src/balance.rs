use crate::io::FeatureDocument;
use geojson::Feature;
use log::info;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceStats {
    pub marked: usize,
    pub unmarked: usize,
    pub skipped: usize,
    pub kept_per_class: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Label {
    Marked,
    Unmarked,
    Unusable,
}

fn label(feature: &Feature) -> Label {
    if feature.property("error").is_some_and(|e| !e.is_null()) {
        return Label::Unusable;
    }
    match feature.property("markedPixelCount").and_then(|v| v.as_u64()) {
        Some(0) => Label::Unmarked,
        Some(_) => Label::Marked,
        None => Label::Unusable,
    }
}

/// Equal numbers of marked and unmarked buildings, shuffled.
///
/// Failed and unannotated features are left out. The same seed always
/// produces the same subset and order.
pub fn balance_document(document: &FeatureDocument, seed: u64) -> (FeatureDocument, BalanceStats) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut marked = Vec::new();
    let mut unmarked = Vec::new();
    let mut skipped = 0;

    for feature in document.features() {
        match label(feature) {
            Label::Marked => marked.push(feature.clone()),
            Label::Unmarked => unmarked.push(feature.clone()),
            Label::Unusable => skipped += 1,
        }
    }

    let stats = BalanceStats {
        marked: marked.len(),
        unmarked: unmarked.len(),
        skipped,
        kept_per_class: marked.len().min(unmarked.len()),
    };
    info!(
        "Balancing: {} marked, {} unmarked, {} skipped -> {} per class",
        stats.marked, stats.unmarked, stats.skipped, stats.kept_per_class
    );

    marked.shuffle(&mut rng);
    unmarked.shuffle(&mut rng);
    marked.truncate(stats.kept_per_class);
    unmarked.truncate(stats.kept_per_class);

    let mut balanced = marked;
    balanced.append(&mut unmarked);
    balanced.shuffle(&mut rng);

    (document.with_features(balanced), stats)
}
