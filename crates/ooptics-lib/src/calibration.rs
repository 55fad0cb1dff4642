//! Pixel-to-wavelength conversion.

use serde::Serialize;

use crate::eeprom::CalibrationCoefficients;
use crate::spectrum::Spectrum;

/// Evaluate `a + b·p + c·p² + d·p³` for every pixel `p` in `0..pixel_count`.
pub fn wavelengths(pixel_count: usize, coefficients: &CalibrationCoefficients) -> Vec<f64> {
    let CalibrationCoefficients { a, b, c, d } = *coefficients;
    (0..pixel_count)
        .map(|p| {
            let p = p as f64;
            // Horner form
            a + p * (b + p * (c + p * d))
        })
        .collect()
}

/// One sample paired with its wavelength.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SpectralPoint {
    pub wavelength: f64,
    pub intensity: f64,
}

/// A spectrum in device-independent form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibratedSpectrum {
    pub points: Vec<SpectralPoint>,
}

impl CalibratedSpectrum {
    /// Pair samples with wavelengths. The shorter of the two bounds the result.
    pub fn new(wavelengths: &[f64], spectrum: &Spectrum) -> Self {
        let points = wavelengths
            .iter()
            .zip(spectrum.to_f64())
            .map(|(&wavelength, intensity)| SpectralPoint {
                wavelength,
                intensity,
            })
            .collect();
        CalibratedSpectrum { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// The point with the highest intensity.
    pub fn peak(&self) -> Option<SpectralPoint> {
        self.points
            .iter()
            .copied()
            .max_by(|x, y| x.intensity.total_cmp(&y.intensity))
    }
}
