//! SIMD-accelerated f32 kernels behind the distance metrics.
//!
//! Provides AVX2+FMA (x86_64, detected at runtime) and NEON (aarch64)
//! implementations of dot product, cosine similarity and squared Euclidean
//! distance. Every kernel walks the input in fixed-width chunks and finishes
//! the tail with a scalar loop. Other targets use an 8-lane chunked portable
//! loop that the compiler can autovectorize.
//!
//! Callers guarantee `a.len() == b.len()`.

/// Lane count of the portable fallback.
const LANES: usize = 8;

// ============================================================================
// Public dispatch functions
// ============================================================================

/// Dot product between two f32 slices.
#[inline]
#[allow(unreachable_code)]
pub fn dot_product_f32(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    #[cfg(target_arch = "aarch64")]
    {
        return unsafe { neon_dot_product_f32(a, b) };
    }
    #[cfg(target_arch = "x86_64")]
    {
        if has_avx2_fma() {
            return unsafe { avx2_dot_product_f32(a, b) };
        }
    }
    chunked_dot_product_f32(a, b)
}

/// Cosine similarity between two f32 slices. Returns a value in [-1, 1], or
/// 0.0 when either operand has zero norm.
#[inline]
#[allow(unreachable_code)]
pub fn cosine_f32(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    #[cfg(target_arch = "aarch64")]
    {
        return similarity(unsafe { neon_cosine_parts(a, b) });
    }
    #[cfg(target_arch = "x86_64")]
    {
        if has_avx2_fma() {
            return similarity(unsafe { avx2_cosine_parts(a, b) });
        }
    }
    similarity(chunked_cosine_parts(a, b))
}

/// Squared Euclidean distance between two f32 slices.
#[inline]
#[allow(unreachable_code)]
pub fn euclidean_sq_f32(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    #[cfg(target_arch = "aarch64")]
    {
        return unsafe { neon_euclidean_sq_f32(a, b) };
    }
    #[cfg(target_arch = "x86_64")]
    {
        if has_avx2_fma() {
            return unsafe { avx2_euclidean_sq_f32(a, b) };
        }
    }
    chunked_euclidean_sq_f32(a, b)
}

/// Combine `(dot, |a|², |b|²)` into a cosine similarity.
#[inline]
fn similarity((dot, norm_a, norm_b): (f32, f32, f32)) -> f32 {
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }
    dot / denom
}

#[cfg(target_arch = "x86_64")]
#[inline]
fn has_avx2_fma() -> bool {
    std::arch::is_x86_feature_detected!("avx2") && std::arch::is_x86_feature_detected!("fma")
}

// ============================================================================
// Portable chunked fallbacks
// ============================================================================

fn chunked_dot_product_f32(a: &[f32], b: &[f32]) -> f32 {
    let a_chunks = a.chunks_exact(LANES);
    let b_chunks = b.chunks_exact(LANES);
    let (a_tail, b_tail) = (a_chunks.remainder(), b_chunks.remainder());

    let mut acc = [0.0f32; LANES];
    for (ca, cb) in a_chunks.zip(b_chunks) {
        for lane in 0..LANES {
            acc[lane] += ca[lane] * cb[lane];
        }
    }

    let mut sum: f32 = acc.iter().sum();
    for (x, y) in a_tail.iter().zip(b_tail) {
        sum += x * y;
    }
    sum
}

fn chunked_cosine_parts(a: &[f32], b: &[f32]) -> (f32, f32, f32) {
    let a_chunks = a.chunks_exact(LANES);
    let b_chunks = b.chunks_exact(LANES);
    let (a_tail, b_tail) = (a_chunks.remainder(), b_chunks.remainder());

    let mut dot = [0.0f32; LANES];
    let mut na = [0.0f32; LANES];
    let mut nb = [0.0f32; LANES];
    for (ca, cb) in a_chunks.zip(b_chunks) {
        for lane in 0..LANES {
            dot[lane] += ca[lane] * cb[lane];
            na[lane] += ca[lane] * ca[lane];
            nb[lane] += cb[lane] * cb[lane];
        }
    }

    let mut dot: f32 = dot.iter().sum();
    let mut norm_a: f32 = na.iter().sum();
    let mut norm_b: f32 = nb.iter().sum();
    for (x, y) in a_tail.iter().zip(b_tail) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    (dot, norm_a, norm_b)
}

fn chunked_euclidean_sq_f32(a: &[f32], b: &[f32]) -> f32 {
    let a_chunks = a.chunks_exact(LANES);
    let b_chunks = b.chunks_exact(LANES);
    let (a_tail, b_tail) = (a_chunks.remainder(), b_chunks.remainder());

    let mut acc = [0.0f32; LANES];
    for (ca, cb) in a_chunks.zip(b_chunks) {
        for lane in 0..LANES {
            let d = ca[lane] - cb[lane];
            acc[lane] += d * d;
        }
    }

    let mut sum: f32 = acc.iter().sum();
    for (x, y) in a_tail.iter().zip(b_tail) {
        let d = x - y;
        sum += d * d;
    }
    sum
}

// ============================================================================
// NEON implementations (aarch64)
// ============================================================================

#[cfg(target_arch = "aarch64")]
use std::arch::aarch64::*;

#[cfg(target_arch = "aarch64")]
unsafe fn neon_dot_product_f32(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len();
    let a_ptr = a.as_ptr();
    let b_ptr = b.as_ptr();

    let mut s0 = vdupq_n_f32(0.0);
    let mut s1 = vdupq_n_f32(0.0);

    let chunks = len / 8;
    for i in 0..chunks {
        let base = i * 8;
        s0 = vfmaq_f32(s0, vld1q_f32(a_ptr.add(base)), vld1q_f32(b_ptr.add(base)));
        s1 = vfmaq_f32(
            s1,
            vld1q_f32(a_ptr.add(base + 4)),
            vld1q_f32(b_ptr.add(base + 4)),
        );
    }

    let mut sum = vaddvq_f32(vaddq_f32(s0, s1));
    for i in (chunks * 8)..len {
        sum += *a_ptr.add(i) * *b_ptr.add(i);
    }
    sum
}

#[cfg(target_arch = "aarch64")]
unsafe fn neon_cosine_parts(a: &[f32], b: &[f32]) -> (f32, f32, f32) {
    let len = a.len();
    let a_ptr = a.as_ptr();
    let b_ptr = b.as_ptr();

    let mut dot0 = vdupq_n_f32(0.0);
    let mut dot1 = vdupq_n_f32(0.0);
    let mut na0 = vdupq_n_f32(0.0);
    let mut na1 = vdupq_n_f32(0.0);
    let mut nb0 = vdupq_n_f32(0.0);
    let mut nb1 = vdupq_n_f32(0.0);

    let chunks = len / 8;
    for i in 0..chunks {
        let base = i * 8;
        let a0 = vld1q_f32(a_ptr.add(base));
        let a1 = vld1q_f32(a_ptr.add(base + 4));
        let b0 = vld1q_f32(b_ptr.add(base));
        let b1 = vld1q_f32(b_ptr.add(base + 4));
        dot0 = vfmaq_f32(dot0, a0, b0);
        dot1 = vfmaq_f32(dot1, a1, b1);
        na0 = vfmaq_f32(na0, a0, a0);
        na1 = vfmaq_f32(na1, a1, a1);
        nb0 = vfmaq_f32(nb0, b0, b0);
        nb1 = vfmaq_f32(nb1, b1, b1);
    }

    let mut dot = vaddvq_f32(vaddq_f32(dot0, dot1));
    let mut norm_a = vaddvq_f32(vaddq_f32(na0, na1));
    let mut norm_b = vaddvq_f32(vaddq_f32(nb0, nb1));
    for i in (chunks * 8)..len {
        let ai = *a_ptr.add(i);
        let bi = *b_ptr.add(i);
        dot += ai * bi;
        norm_a += ai * ai;
        norm_b += bi * bi;
    }
    (dot, norm_a, norm_b)
}

#[cfg(target_arch = "aarch64")]
unsafe fn neon_euclidean_sq_f32(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len();
    let a_ptr = a.as_ptr();
    let b_ptr = b.as_ptr();

    let mut s0 = vdupq_n_f32(0.0);
    let mut s1 = vdupq_n_f32(0.0);

    let chunks = len / 8;
    for i in 0..chunks {
        let base = i * 8;
        let d0 = vsubq_f32(vld1q_f32(a_ptr.add(base)), vld1q_f32(b_ptr.add(base)));
        let d1 = vsubq_f32(
            vld1q_f32(a_ptr.add(base + 4)),
            vld1q_f32(b_ptr.add(base + 4)),
        );
        s0 = vfmaq_f32(s0, d0, d0);
        s1 = vfmaq_f32(s1, d1, d1);
    }

    let mut sum = vaddvq_f32(vaddq_f32(s0, s1));
    for i in (chunks * 8)..len {
        let d = *a_ptr.add(i) - *b_ptr.add(i);
        sum += d * d;
    }
    sum
}

// ============================================================================
// AVX2+FMA implementations (x86_64)
// ============================================================================

#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::*;

/// Horizontal sum of the 8 lanes of a __m256.
#[cfg(target_arch = "x86_64")]
#[inline]
#[target_feature(enable = "avx2")]
unsafe fn hsum_f32x8(v: __m256) -> f32 {
    let sum128 = _mm_add_ps(_mm256_castps256_ps128(v), _mm256_extractf128_ps(v, 1));
    let sum64 = _mm_add_ps(sum128, _mm_movehl_ps(sum128, sum128));
    let sum32 = _mm_add_ss(sum64, _mm_shuffle_ps(sum64, sum64, 0x55));
    _mm_cvtss_f32(sum32)
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2,fma")]
unsafe fn avx2_dot_product_f32(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len();
    let a_ptr = a.as_ptr();
    let b_ptr = b.as_ptr();

    let mut s0 = _mm256_setzero_ps();
    let mut s1 = _mm256_setzero_ps();

    let chunks = len / 16;
    for i in 0..chunks {
        let base = i * 16;
        s0 = _mm256_fmadd_ps(
            _mm256_loadu_ps(a_ptr.add(base)),
            _mm256_loadu_ps(b_ptr.add(base)),
            s0,
        );
        s1 = _mm256_fmadd_ps(
            _mm256_loadu_ps(a_ptr.add(base + 8)),
            _mm256_loadu_ps(b_ptr.add(base + 8)),
            s1,
        );
    }

    let mut sum = hsum_f32x8(_mm256_add_ps(s0, s1));
    for i in (chunks * 16)..len {
        sum += *a_ptr.add(i) * *b_ptr.add(i);
    }
    sum
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2,fma")]
unsafe fn avx2_cosine_parts(a: &[f32], b: &[f32]) -> (f32, f32, f32) {
    let len = a.len();
    let a_ptr = a.as_ptr();
    let b_ptr = b.as_ptr();

    let mut dot0 = _mm256_setzero_ps();
    let mut dot1 = _mm256_setzero_ps();
    let mut na0 = _mm256_setzero_ps();
    let mut na1 = _mm256_setzero_ps();
    let mut nb0 = _mm256_setzero_ps();
    let mut nb1 = _mm256_setzero_ps();

    let chunks = len / 16;
    for i in 0..chunks {
        let base = i * 16;
        let a0 = _mm256_loadu_ps(a_ptr.add(base));
        let a1 = _mm256_loadu_ps(a_ptr.add(base + 8));
        let b0 = _mm256_loadu_ps(b_ptr.add(base));
        let b1 = _mm256_loadu_ps(b_ptr.add(base + 8));
        dot0 = _mm256_fmadd_ps(a0, b0, dot0);
        dot1 = _mm256_fmadd_ps(a1, b1, dot1);
        na0 = _mm256_fmadd_ps(a0, a0, na0);
        na1 = _mm256_fmadd_ps(a1, a1, na1);
        nb0 = _mm256_fmadd_ps(b0, b0, nb0);
        nb1 = _mm256_fmadd_ps(b1, b1, nb1);
    }

    let mut dot = hsum_f32x8(_mm256_add_ps(dot0, dot1));
    let mut norm_a = hsum_f32x8(_mm256_add_ps(na0, na1));
    let mut norm_b = hsum_f32x8(_mm256_add_ps(nb0, nb1));
    for i in (chunks * 16)..len {
        let ai = *a_ptr.add(i);
        let bi = *b_ptr.add(i);
        dot += ai * bi;
        norm_a += ai * ai;
        norm_b += bi * bi;
    }
    (dot, norm_a, norm_b)
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2,fma")]
unsafe fn avx2_euclidean_sq_f32(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len();
    let a_ptr = a.as_ptr();
    let b_ptr = b.as_ptr();

    let mut s0 = _mm256_setzero_ps();
    let mut s1 = _mm256_setzero_ps();

    let chunks = len / 16;
    for i in 0..chunks {
        let base = i * 16;
        let d0 = _mm256_sub_ps(
            _mm256_loadu_ps(a_ptr.add(base)),
            _mm256_loadu_ps(b_ptr.add(base)),
        );
        let d1 = _mm256_sub_ps(
            _mm256_loadu_ps(a_ptr.add(base + 8)),
            _mm256_loadu_ps(b_ptr.add(base + 8)),
        );
        s0 = _mm256_fmadd_ps(d0, d0, s0);
        s1 = _mm256_fmadd_ps(d1, d1, s1);
    }

    let mut sum = hsum_f32x8(_mm256_add_ps(s0, s1));
    for i in (chunks * 16)..len {
        let d = *a_ptr.add(i) - *b_ptr.add(i);
        sum += d * d;
    }
    sum
}
