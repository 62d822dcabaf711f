// Copyright (c) 2024 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use log::warn;

use crate::image_funcs::min_max;
use crate::plane::Gray16Image;

/// Builds the 256 bin histogram used by the automatic threshold methods. The
/// image's [min, max] range is linearly mapped onto the bins.
/// Returns (histogram, min, max).
pub fn histogram_256(image: &Gray16Image)
                     -> (/*histogram*/[u32; 256], /*min*/u16, /*max*/u16) {
    let (min, max) = min_max(image);
    let scale = 256.0 / (max as f64 - min as f64 + 1.0);
    let mut histogram = [0_u32; 256];
    for &v in image.as_raw() {
        let scaled = ((v - min) as f64 * scale + 0.5) as usize;
        histogram[scaled.min(255)] += 1;
    }
    (histogram, min, max)
}

/// Maps a histogram bin from [histogram_256] back to the 16-bit domain.
pub fn bin_to_value(bin: u32, min: u16, max: u16) -> u16 {
    if max <= min {
        return min;
    }
    if bin >= 255 {
        return u16::MAX;
    }
    let value = min as f64 + (bin as f64 / 255.0) * (max as f64 - min as f64);
    value as u16
}

/// Most populated 16-bit value of the image.
pub fn histogram_mode(image: &Gray16Image) -> u16 {
    let mut histogram = vec![0_u32; 65536];
    for &v in image.as_raw() {
        histogram[v as usize] += 1;
    }
    let mut mode = 0;
    for (v, &count) in histogram.iter().enumerate() {
        if count > histogram[mode] {
            mode = v;
        }
    }
    mode as u16
}

/// Zack's triangle method. Draws a line from the histogram peak to the far
/// end of the longer tail and picks the bin furthest below it.
pub fn triangle_threshold(histogram: &[u32; 256]) -> u8 {
    let mut data: Vec<f64> = histogram.iter().map(|&c| c as f64).collect();
    let first = data.iter().position(|&c| c > 0.0).unwrap_or(0);
    let last = (0..256).rev().find(|&i| data[i] > 0.0).unwrap_or(0);
    let mut max = 0;
    let mut dmax = 0.0;
    for (i, &c) in data.iter().enumerate() {
        if c > dmax {
            max = i;
            dmax = c;
        }
    }
    // Equal tails have no longer side; the mode splits them.
    if max - first == last - max {
        return max as u8;
    }
    // The line starts at the empty bin next to the data.
    let mut min = first.saturating_sub(1);
    let min2 = (last + 1).min(255);

    // Work on the longer tail, which is the left one after flipping.
    let inverted = (max as i32 - min as i32) < (min2 as i32 - max as i32);
    if inverted {
        data.reverse();
        min = 255 - min2;
        max = 255 - max;
    }
    if min == max {
        return min as u8;
    }

    let mut nx = data[max];
    let mut ny = min as f64 - max as f64;
    let d = (nx * nx + ny * ny).sqrt();
    nx /= d;
    ny /= d;
    let d = nx * min as f64 + ny * data[min];

    let mut split = min;
    let mut split_distance = 0.0;
    for i in min + 1..=max {
        let distance = nx * i as f64 + ny * data[i] - d;
        if distance > split_distance {
            split = i;
            split_distance = distance;
        }
    }
    let split = split as i32 - 1;
    let result = if inverted { 255 - split } else { split };
    result.clamp(0, 255) as u8
}

/// Li's iterative minimum cross entropy method.
pub fn li_threshold(histogram: &[u32; 256]) -> u8 {
    const TOLERANCE: f64 = 0.5;
    const MAX_ITERATIONS: usize = 1000;
    let num_pixels: f64 = histogram.iter().map(|&c| c as f64).sum();
    if num_pixels == 0.0 {
        return 0;
    }
    let mean = histogram.iter().enumerate().skip(1)
        .map(|(i, &c)| i as f64 * c as f64).sum::<f64>() / num_pixels;

    let mut new_thresh = mean;
    let mut threshold;
    let mut iterations = 0;
    loop {
        let old_thresh = new_thresh;
        threshold = ((old_thresh + 0.5) as i32).clamp(0, 255) as usize;

        let (mut sum_back, mut num_back) = (0.0, 0.0);
        for (i, &c) in histogram.iter().enumerate().take(threshold + 1) {
            sum_back += i as f64 * c as f64;
            num_back += c as f64;
        }
        let mean_back = if num_back == 0.0 { 0.0 } else { sum_back / num_back };
        let (mut sum_obj, mut num_obj) = (0.0, 0.0);
        for (i, &c) in histogram.iter().enumerate().skip(threshold + 1) {
            sum_obj += i as f64 * c as f64;
            num_obj += c as f64;
        }
        let mean_obj = if num_obj == 0.0 { 0.0 } else { sum_obj / num_obj };

        let temp = (mean_back - mean_obj) / (mean_back.ln() - mean_obj.ln());
        new_thresh = if temp.is_nan() {
            old_thresh
        } else if temp < -f64::EPSILON {
            (temp - 0.5).trunc()
        } else {
            (temp + 0.5).trunc()
        };
        iterations += 1;
        if (new_thresh - old_thresh).abs() <= TOLERANCE {
            break;
        }
        if iterations >= MAX_ITERATIONS {
            warn!("Li threshold did not converge");
            break;
        }
    }
    threshold as u8
}

/// Kittler and Illingworth's minimum error method, iterative version.
pub fn min_error_threshold(histogram: &[u32; 256]) -> u8 {
    const MAX_ITERATIONS: usize = 1000;
    // Cumulative sums of count, i*count and i*i*count.
    let mut a = [0.0_f64; 256];
    let mut b = [0.0_f64; 256];
    let mut c = [0.0_f64; 256];
    let (mut sa, mut sb, mut sc) = (0.0, 0.0, 0.0);
    for (i, &count) in histogram.iter().enumerate() {
        let count = count as f64;
        let i = i as f64;
        sa += count;
        sb += i * count;
        sc += i * i * count;
        a[i as usize] = sa;
        b[i as usize] = sb;
        c[i as usize] = sc;
    }
    if sa == 0.0 {
        return 0;
    }
    let last = 255;

    // Initial estimate is the mean.
    let mut threshold = ((sb / sa).floor() as i32).clamp(0, 255);
    let mut previous = -2;
    let mut iterations = 0;
    while threshold != previous && iterations < MAX_ITERATIONS {
        let t = threshold as usize;
        let mu = b[t] / a[t];
        let nu = (b[last] - b[t]) / (a[last] - a[t]);
        let p = a[t] / a[last];
        let q = (a[last] - a[t]) / a[last];
        let sigma2 = c[t] / a[t] - mu * mu;
        let tau2 = (c[last] - c[t]) / (a[last] - a[t]) - nu * nu;

        let w0 = 1.0 / sigma2 - 1.0 / tau2;
        let w1 = mu / sigma2 - nu / tau2;
        let w2 = (mu * mu) / sigma2 - (nu * nu) / tau2 +
            ((sigma2 * q * q) / (tau2 * p * p)).log10();

        let sqterm = w1 * w1 - w0 * w2;
        if sqterm < 0.0 {
            warn!("MinError threshold not converging");
            break;
        }
        previous = threshold;
        let temp = (w1 + sqterm.sqrt()) / w0;
        if !temp.is_nan() {
            threshold = (temp.floor() as i32).clamp(0, 255);
        }
        iterations += 1;
    }
    threshold as u8
}

/// Otsu's method: maximizes the between-class variance.
pub fn otsu_threshold(histogram: &[u32; 256]) -> u8 {
    let total: f64 = histogram.iter().map(|&c| c as f64).sum();
    if total == 0.0 {
        return 0;
    }
    let sum_all: f64 = histogram.iter().enumerate()
        .map(|(i, &c)| i as f64 * c as f64).sum();
    let mut weight_back = 0.0;
    let mut sum_back = 0.0;
    let mut best = 0;
    let mut best_variance = -1.0;
    for (k, &count) in histogram.iter().enumerate() {
        weight_back += count as f64;
        if weight_back == 0.0 {
            continue;
        }
        let weight_obj = total - weight_back;
        if weight_obj == 0.0 {
            break;
        }
        sum_back += k as f64 * count as f64;
        let mean_back = sum_back / weight_back;
        let mean_obj = (sum_all - sum_back) / weight_obj;
        let variance = weight_back * weight_obj *
            (mean_back - mean_obj) * (mean_back - mean_obj);
        if variance > best_variance {
            best_variance = variance;
            best = k;
        }
    }
    best as u8
}

/// Tsai's moment preserving method: the threshold keeps the first three
/// moments of the image in the binarized result.
pub fn moments_threshold(histogram: &[u32; 256]) -> u8 {
    let total: f64 = histogram.iter().map(|&c| c as f64).sum();
    if total == 0.0 {
        return 0;
    }
    let (m0, mut m1, mut m2, mut m3) = (1.0, 0.0, 0.0, 0.0);
    for (i, &c) in histogram.iter().enumerate() {
        let p = c as f64 / total;
        let i = i as f64;
        m1 += i * p;
        m2 += i * i * p;
        m3 += i * i * i * p;
    }
    let cd = m0 * m2 - m1 * m1;
    let c0 = (-m2 * m2 + m1 * m3) / cd;
    let c1 = (m0 * -m3 + m2 * m1) / cd;
    let root = (c1 * c1 - 4.0 * c0).sqrt();
    let z0 = 0.5 * (-c1 - root);
    let z1 = 0.5 * (-c1 + root);
    // Fraction of the pixels below the threshold.
    let p0 = (z1 - m1) / (z1 - z0);
    if !p0.is_finite() {
        // A single occupied level.
        return histogram.iter().position(|&c| c > 0).unwrap_or(0) as u8;
    }
    // A class ending exactly at p0 stays below the threshold.
    let p0 = p0 - 1e-9;
    let mut sum = 0.0;
    for (i, &c) in histogram.iter().enumerate() {
        sum += c as f64 / total;
        if sum > p0 {
            return i as u8;
        }
    }
    255
}

// Renyi entropy of order `alpha` of both classes, maximized over the
// split. Order 1 is the Shannon (maximum entropy) case.
fn max_entropy_split(norm: &[f64; 256], p1: &[f64; 256], p2: &[f64; 256],
                     first: usize, last: usize, alpha: f64) -> usize {
    let mut threshold = 0;
    let mut max_ent = 0.0;
    for it in first..=last {
        let (back, obj) = (&norm[..=it], &norm[it + 1..]);
        let total = if alpha == 1.0 {
            let entropy = |values: &[f64], p: f64| -> f64 {
                values.iter().filter(|&&v| v != 0.0)
                    .map(|&v| -(v / p) * (v / p).ln()).sum()
            };
            entropy(back, p1[it]) + entropy(obj, p2[it])
        } else {
            let sum = |values: &[f64], p: f64| -> f64 {
                values.iter().map(|&v| (v / p).powf(alpha)).sum()
            };
            let product = sum(back, p1[it]) * sum(obj, p2[it]);
            let log = if product > 0.0 { product.ln() } else { 0.0 };
            log / (1.0 - alpha)
        };
        if total > max_ent {
            max_ent = total;
            threshold = it;
        }
    }
    threshold
}

/// Kapur, Sahoo and Wong's method generalized to Renyi entropies: the
/// splits maximizing the entropies of order 0.5, 1 and 2 are combined.
pub fn renyi_entropy_threshold(histogram: &[u32; 256]) -> u8 {
    let total: f64 = histogram.iter().map(|&c| c as f64).sum();
    if total == 0.0 {
        return 0;
    }
    let mut occupied = (0..256).filter(|&i| histogram[i] > 0);
    if let (Some(level), None) = (occupied.next(), occupied.next()) {
        return level as u8;
    }
    let mut norm = [0.0_f64; 256];
    let mut p1 = [0.0_f64; 256];
    let mut p2 = [0.0_f64; 256];
    let mut cumulative = 0.0;
    for i in 0..256 {
        norm[i] = histogram[i] as f64 / total;
        cumulative += norm[i];
        p1[i] = cumulative;
        p2[i] = 1.0 - cumulative;
    }
    let first = p1.iter().position(|p| p.abs() >= f64::EPSILON)
        .unwrap_or(0);
    let last = (first..256).rev().find(|&i| p2[i].abs() >= f64::EPSILON)
        .unwrap_or(255);

    let mut stars = [
        max_entropy_split(&norm, &p1, &p2, first, last, 0.5),
        max_entropy_split(&norm, &p1, &p2, first, last, 1.0),
        max_entropy_split(&norm, &p1, &p2, first, last, 2.0),
    ];
    stars.sort_unstable();
    let [t1, t2, t3] = stars;
    let close = |a: usize, b: usize| a.abs_diff(b) <= 5;
    let (beta1, beta2, beta3) = match (close(t1, t2), close(t2, t3)) {
        (true, true) => (1.0, 2.0, 1.0),
        (true, false) => (0.0, 1.0, 3.0),
        (false, true) => (3.0, 1.0, 0.0),
        (false, false) => (1.0, 2.0, 1.0),
    };
    let omega = p1[t3] - p1[t1];
    let threshold = t1 as f64 * (p1[t1] + 0.25 * omega * beta1) +
        0.25 * t2 as f64 * omega * beta2 +
        t3 as f64 * (p2[t3] + 0.25 * omega * beta3);
    (threshold as i32).clamp(0, 255) as u8
}

// mod tests.
