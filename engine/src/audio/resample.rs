//! Audio resampling using rubato

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use super::AudioError;

/// Resample mono audio from `source_rate` to `target_rate`.
///
/// Identity when the rates match. Filter overshoot is clamped back into
/// [-1.0, 1.0] so downstream range invariants hold.
pub fn resample(samples: &[f32], source_rate: u32, target_rate: u32) -> Result<Vec<f32>, AudioError> {
    if source_rate == target_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler = SincFixedIn::<f32>::new(
        target_rate as f64 / source_rate as f64,
        2.0,
        params,
        samples.len(),
        1, // mono
    )
    .map_err(|e| AudioError::Resample {
        message: e.to_string(),
    })?;

    let input = vec![samples.to_vec()];
    let output = resampler
        .process(&input, None)
        .map_err(|e| AudioError::Resample {
            message: e.to_string(),
        })?;

    let mut resampled = output.into_iter().next().unwrap_or_default();
    for sample in resampled.iter_mut() {
        *sample = sample.clamp(-1.0, 1.0);
    }

    Ok(resampled)
}
