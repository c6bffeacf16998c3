//! Validation metrics for binary classifiers

/// Mean binary cross entropy; probabilities are clipped away from 0 and 1
pub fn log_loss(labels: &[f32], probs: &[f32]) -> f64 {
    if labels.is_empty() {
        return 0.0;
    }
    let eps = 1e-7f64;
    labels
        .iter()
        .zip(probs)
        .map(|(&y, &p)| {
            let p = f64::from(p).clamp(eps, 1.0 - eps);
            let y = f64::from(y);
            -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
        })
        .sum::<f64>()
        / labels.len() as f64
}

/// Area under the ROC curve from average ranks (ties share their rank)
///
/// Returns 0.5 when only one class is present.
pub fn roc_auc(labels: &[f32], scores: &[f32]) -> f64 {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut ranks = vec![0.0f64; scores.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        let avg = (i + j) as f64 / 2.0 + 1.0;
        for k in i..=j {
            ranks[order[k]] = avg;
        }
        i = j + 1;
    }

    let positives = labels.iter().filter(|&&y| y > 0.5).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        return 0.5;
    }

    let rank_sum: f64 = labels
        .iter()
        .zip(&ranks)
        .filter(|(&y, _)| y > 0.5)
        .map(|(_, r)| r)
        .sum();
    let p = positives as f64;
    (rank_sum - p * (p + 1.0) / 2.0) / (p * negatives as f64)
}
