//! Cosine similarity and the 0–100 dimension score.

/// Cosine similarity of two vectors.
///
/// `None` when the lengths differ, either vector is empty or has zero norm,
/// since the angle is undefined there.
pub fn cosine(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    let cos = dot / (norm_a.sqrt() * norm_b.sqrt());
    Some(cos.clamp(-1.0, 1.0))
}

/// Rescale cosine from [-1, 1] to a [0, 100] percentage.
pub fn rescale(cos: f64) -> f64 {
    (cos + 1.0) / 2.0 * 100.0
}

/// Dimension score between a session vector and a photographer vector.
pub fn dimension_score(session: &[f32], photographer: &[f32]) -> Option<f64> {
    cosine(session, photographer).map(rescale)
}

/// Element-wise mean of equally sized vectors. Vectors whose length differs
/// from the first are skipped; returns `None` when nothing usable remains.
pub fn mean(vectors: &[&[f32]]) -> Option<Vec<f32>> {
    let first = vectors.first()?;
    let width = first.len();
    if width == 0 {
        return None;
    }

    let mut acc = vec![0.0f64; width];
    let mut used = 0usize;
    for v in vectors {
        if v.len() != width {
            tracing::warn!(expected = width, got = v.len(), "skipping vector of mismatched length");
            continue;
        }
        for (a, x) in acc.iter_mut().zip(v.iter()) {
            *a += *x as f64;
        }
        used += 1;
    }

    Some(acc.into_iter().map(|a| (a / used as f64) as f32).collect())
}
