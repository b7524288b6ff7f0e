use docchat_core::error::AppError;

pub fn l2_norm(v: &[f32]) -> f32 {
    let mut sum = 0.0f32;
    for x in v {
        sum += x * x;
    }
    sum.sqrt()
}

/// Cosine of the angle between `a` and `b`; 0 when either has zero length.
pub fn cosine_similarity(a: &[f32], b: &[f32], a_norm: f32, b_norm: f32) -> f32 {
    if a_norm == 0.0 || b_norm == 0.0 {
        return 0.0;
    }
    let mut dot = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
    }
    dot / (a_norm * b_norm)
}

/// Map a cosine onto `[0, 1]` via the L2 distance between the unit vectors:
/// `1 - sqrt(2 - 2cos) / sqrt(2)`.
pub fn relevance_from_cosine(cos: f32) -> f64 {
    let cos = f64::from(cos).clamp(-1.0, 1.0);
    let distance = (2.0 - 2.0 * cos).max(0.0).sqrt();
    (1.0 - distance / std::f64::consts::SQRT_2).clamp(0.0, 1.0)
}

pub(crate) fn encode_embedding(v: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(v.len() * 4);
    for x in v {
        out.extend_from_slice(&x.to_le_bytes());
    }
    out
}

pub(crate) fn decode_embedding(bytes: &[u8]) -> Result<Vec<f32>, AppError> {
    if bytes.len() % 4 != 0 {
        return Err(AppError::new(
            "STORE_CORRUPT_EMBEDDING",
            "Stored embedding has a truncated value",
        )
        .with_details(format!("bytes={}", bytes.len())));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relevance_spans_unit_interval() {
        assert!((relevance_from_cosine(1.0) - 1.0).abs() < 1e-12);
        assert!(relevance_from_cosine(0.0).abs() < 1e-12);
        assert_eq!(relevance_from_cosine(-1.0), 0.0);
        let mid = relevance_from_cosine(0.9);
        assert!(mid > 0.5 && mid < 1.0);
        assert!(relevance_from_cosine(0.95) > mid);
    }

    #[test]
    fn zero_vectors_are_orthogonal_to_everything() {
        let z = [0.0f32, 0.0];
        let v = [1.0f32, 2.0];
        assert_eq!(cosine_similarity(&z, &v, l2_norm(&z), l2_norm(&v)), 0.0);
    }

    #[test]
    fn embedding_blob_is_little_endian_f32() {
        let v = vec![1.5f32, -0.25, 3.0];
        let blob = encode_embedding(&v);
        assert_eq!(blob.len(), 12);
        assert_eq!(&blob[..4], &1.5f32.to_le_bytes());
        assert_eq!(decode_embedding(&blob).expect("decode"), v);
        assert_eq!(
            decode_embedding(&blob[..5]).expect_err("truncated").code,
            "STORE_CORRUPT_EMBEDDING"
        );
    }
}
