use std::cmp::Ordering;

use serde::Serialize;

/// Minimum index distance between two kept peaks.
pub const MIN_PEAK_DISTANCE: usize = 10;

/// Local maximum inside a transformed window.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Peak {
    /// Sample offset within the window the peak was found in.
    pub offset: usize,
    /// Height of the normalized window at `offset`.
    pub height: f64,
}

/// Local maxima of `signal`. Flat-topped maxima report the middle of the plateau.
/// Non-finite samples never form a peak.
pub fn local_maxima(signal: &[f64]) -> Vec<usize> {
    let mut peaks = Vec::new();
    if signal.len() < 3 {
        return peaks;
    }
    let last = signal.len() - 1;
    let mut i = 1;
    while i < last {
        if signal[i - 1] < signal[i] {
            let mut ahead = i + 1;
            while ahead < last && signal[ahead] == signal[i] {
                ahead += 1;
            }
            if signal[ahead] < signal[i] {
                peaks.push((i + ahead - 1) / 2);
                i = ahead;
            }
        }
        i += 1;
    }
    peaks
}

/// Height descending, then offset ascending.
fn by_prominence(a: &Peak, b: &Peak) -> Ordering {
    b.height
        .partial_cmp(&a.height)
        .unwrap_or(Ordering::Equal)
        .then(a.offset.cmp(&b.offset))
}

/// Peaks at or above `min_height`, at least `min_distance` samples apart, reduced to
/// the `max_peaks` highest. When two candidates collide the higher one wins and equal
/// heights go to the earlier offset. The result is ordered by offset.
pub fn select_peaks(
    signal: &[f64],
    min_height: f64,
    min_distance: usize,
    max_peaks: usize,
) -> Vec<Peak> {
    let candidates: Vec<Peak> = local_maxima(signal)
        .into_iter()
        .map(|offset| Peak {
            offset,
            height: signal[offset],
        })
        .filter(|p| p.height >= min_height)
        .collect();

    let mut ranked: Vec<usize> = (0..candidates.len()).collect();
    ranked.sort_by(|&a, &b| by_prominence(&candidates[a], &candidates[b]));

    let mut keep = vec![true; candidates.len()];
    for &j in &ranked {
        if !keep[j] {
            continue;
        }
        let center = candidates[j].offset;
        for k in (0..j).rev() {
            if center - candidates[k].offset >= min_distance {
                break;
            }
            keep[k] = false;
        }
        for k in j + 1..candidates.len() {
            if candidates[k].offset - center >= min_distance {
                break;
            }
            keep[k] = false;
        }
    }

    let mut kept: Vec<Peak> = ranked
        .into_iter()
        .filter(|&j| keep[j])
        .take(max_peaks)
        .map(|j| candidates[j])
        .collect();
    kept.sort_by_key(|p| p.offset);
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bumps(len: usize, spikes: &[(usize, f64)]) -> Vec<f64> {
        let mut signal = vec![0.0; len];
        for &(at, height) in spikes {
            signal[at] = height;
            signal[at - 1] = height / 2.0;
            signal[at + 1] = height / 2.0;
        }
        signal
    }

    #[test]
    fn finds_plateau_midpoints() {
        let signal = [0.0, 1.0, 1.0, 1.0, 0.0, 2.0, 0.0];
        assert_eq!(local_maxima(&signal), vec![2, 5]);
        assert!(local_maxima(&[0.0, 1.0, 2.0, 3.0]).is_empty());
        assert!(local_maxima(&[0.0, f64::NAN, 0.0]).is_empty());
    }

    #[test]
    fn keeps_the_highest_n_not_the_first_n() {
        let signal = bumps(200, &[(20, 0.85), (60, 0.99), (100, 0.81), (140, 0.95), (180, 0.9)]);
        let peaks = select_peaks(&signal, 0.8, MIN_PEAK_DISTANCE, 3);
        let offsets: Vec<usize> = peaks.iter().map(|p| p.offset).collect();
        assert_eq!(offsets, vec![60, 140, 180]);
    }

    #[test]
    fn returns_every_candidate_under_the_cap() {
        let signal = bumps(100, &[(20, 0.9), (70, 0.95)]);
        let peaks = select_peaks(&signal, 0.8, MIN_PEAK_DISTANCE, 5);
        assert_eq!(peaks.len(), 2);
        assert!(select_peaks(&signal, 0.96, MIN_PEAK_DISTANCE, 5).is_empty());
    }

    #[test]
    fn close_candidates_are_deduplicated_by_height() {
        let signal = bumps(100, &[(40, 0.85), (45, 0.95), (60, 0.9)]);
        let peaks = select_peaks(&signal, 0.8, MIN_PEAK_DISTANCE, 5);
        let offsets: Vec<usize> = peaks.iter().map(|p| p.offset).collect();
        assert_eq!(offsets, vec![45, 60]);
    }

    #[test]
    fn equal_heights_favour_the_earlier_offset() {
        let signal = bumps(100, &[(40, 0.9), (46, 0.9)]);
        let peaks = select_peaks(&signal, 0.8, MIN_PEAK_DISTANCE, 5);
        assert_eq!(peaks, vec![Peak { offset: 40, height: 0.9 }]);

        let signal = bumps(200, &[(30, 0.9), (90, 0.9), (150, 0.9)]);
        let peaks = select_peaks(&signal, 0.8, MIN_PEAK_DISTANCE, 2);
        let offsets: Vec<usize> = peaks.iter().map(|p| p.offset).collect();
        assert_eq!(offsets, vec![30, 90]);
    }
}
