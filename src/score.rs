//! Pure scoring functions for hybrid retrieval.
//!
//! A lesson's final relevance is the product of four independent signals:
//! cosine similarity to the query vector, the author-assigned confidence,
//! a time-decay factor, and a vote factor derived from community feedback.
//! The local stores decay with a configurable half-life; the server uses an
//! exponential rate instead ([`exponential_decay`]). Both shapes are
//! monotonically decreasing in age, and callers must treat scores as opaque
//! ranking keys.

/// Default half-life for local time decay, in days.
pub const DEFAULT_HALF_LIFE_DAYS: f64 = 30.0;

/// Decay rate used by the server-side ranking (per day). 0.01 corresponds
/// to a half-life of roughly 69 days.
pub const SERVER_DECAY_LAMBDA: f64 = 0.01;

/// Norms below this are treated as zero vectors.
const NORM_EPSILON: f64 = 1e-9;

/// Cosine similarity between two equal-length vectors, in [-1, 1].
///
/// Returns 0.0 when either vector's norm is below 1e-9. Unequal lengths are
/// a programmer error.
pub fn cosine(a: &[f32], b: &[f32]) -> f64 {
    assert_eq!(a.len(), b.len(), "cosine over unequal vector lengths");

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        dot += f64::from(x) * f64::from(y);
        norm_a += f64::from(x) * f64::from(x);
        norm_b += f64::from(y) * f64::from(y);
    }
    let norm_a = norm_a.sqrt();
    let norm_b = norm_b.sqrt();

    if norm_a < NORM_EPSILON || norm_b < NORM_EPSILON {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Geometric time decay: `0.5 ^ (age_days / half_life_days)`.
///
/// Always in (0, 1] for non-negative ages.
pub fn time_decay(age_days: f64, half_life_days: f64) -> f64 {
    0.5f64.powf(age_days / half_life_days)
}

/// Exponential time decay used by the server: `exp(-lambda * age_days)`.
pub fn exponential_decay(age_days: f64, lambda: f64) -> f64 {
    (-lambda * age_days).exp()
}

/// Vote factor: `1.0 + 0.1 * (up - down)`, clamped below to 0.1.
///
/// The clamp keeps mass-downvoted lessons discoverable at low rank rather
/// than zeroing or inverting their score.
pub fn vote_factor(upvotes: u32, downvotes: u32) -> f64 {
    let net = f64::from(upvotes) - f64::from(downvotes);
    (1.0 + 0.1 * net).max(0.1)
}

/// Final score for client-side ranking.
pub fn final_score(
    cosine_sim: f64,
    confidence: f64,
    age_days: f64,
    upvotes: u32,
    downvotes: u32,
    half_life_days: f64,
) -> f64 {
    cosine_sim
        * confidence
        * time_decay(age_days, half_life_days)
        * vote_factor(upvotes, downvotes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_identical_vectors() {
        let v = vec![1.0f32, 2.0, 3.0];
        assert!((cosine(&v, &v) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cosine_orthogonal_vectors() {
        let a = vec![1.0f32, 0.0];
        let b = vec![0.0f32, 1.0];
        assert!(cosine(&a, &b).abs() < 1e-9);
    }

    #[test]
    fn cosine_opposite_vectors() {
        let a = vec![1.0f32, 0.0];
        let b = vec![-1.0f32, 0.0];
        assert!((cosine(&a, &b) + 1.0).abs() < 1e-9);
    }

    #[test]
    fn cosine_zero_vector_is_zero() {
        let a = vec![0.0f32; 8];
        let b = vec![1.0f32; 8];
        assert_eq!(cosine(&a, &b), 0.0);
    }

    #[test]
    #[should_panic(expected = "unequal vector lengths")]
    fn cosine_length_mismatch_panics() {
        cosine(&[1.0, 2.0], &[1.0]);
    }

    #[test]
    fn decay_at_zero_age_is_one() {
        assert_eq!(time_decay(0.0, 30.0), 1.0);
    }

    #[test]
    fn decay_at_half_life_is_half() {
        assert!((time_decay(30.0, 30.0) - 0.5).abs() < 1e-12);
        assert!((time_decay(60.0, 30.0) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn decay_stays_in_unit_interval() {
        for age in [0.0, 1.0, 10.0, 365.0, 10_000.0] {
            let d = time_decay(age, 30.0);
            assert!(d > 0.0 && d <= 1.0, "decay {d} for age {age}");
        }
    }

    #[test]
    fn exponential_decay_matches_lambda() {
        let d = exponential_decay(100.0, SERVER_DECAY_LAMBDA);
        assert!((d - (-1.0f64).exp()).abs() < 1e-12);
    }

    #[test]
    fn vote_factor_neutral_is_one() {
        assert_eq!(vote_factor(0, 0), 1.0);
        assert_eq!(vote_factor(3, 3), 1.0);
    }

    #[test]
    fn vote_factor_upvotes_boost() {
        assert!((vote_factor(5, 0) - 1.5).abs() < 1e-12);
    }

    #[test]
    fn vote_factor_clamped_at_floor() {
        assert_eq!(vote_factor(0, 100), 0.1);
        assert_eq!(vote_factor(0, 9), 0.1);
    }

    #[test]
    fn final_score_bounded_by_confidence() {
        // With no votes and zero age, score = cosine * confidence <= confidence.
        let score = final_score(0.8, 0.9, 0.0, 0, 0, 30.0);
        assert!(score <= 0.9);
        assert!((score - 0.72).abs() < 1e-12);
    }

    #[test]
    fn five_upvotes_is_1_5x_neutral() {
        let base = final_score(0.7, 0.5, 0.0, 0, 0, 30.0);
        let boosted = final_score(0.7, 0.5, 0.0, 5, 0, 30.0);
        assert!((boosted / base - 1.5).abs() < 1e-9);
    }
}
