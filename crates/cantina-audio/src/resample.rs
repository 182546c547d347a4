use crate::error::{AudioError, Result};

/// Converts interleaved device-rate audio to the 16 kHz mono wire format.
///
/// Linear interpolation is enough for speech recognition input; the STT
/// vendor applies its own front-end filtering.
pub struct Resampler {
    input_rate: u32,
    output_rate: u32,
    channels: usize,
}

impl Resampler {
    pub fn new(input_rate: u32, output_rate: u32, channels: usize) -> Result<Self> {
        if channels == 0 {
            return Err(AudioError::UnsupportedFormat(
                "channel count must be > 0".to_string(),
            ));
        }
        if input_rate == 0 || output_rate == 0 {
            return Err(AudioError::UnsupportedFormat(
                "sample rate must be > 0".to_string(),
            ));
        }
        Ok(Self {
            input_rate,
            output_rate,
            channels,
        })
    }

    /// Downmix to mono and resample to the output rate.
    pub fn process(&self, input: &[i16]) -> Vec<i16> {
        if input.is_empty() {
            return Vec::new();
        }

        let mono = self.downmix(input);
        if self.input_rate == self.output_rate {
            return mono;
        }

        let ratio = self.output_rate as f64 / self.input_rate as f64;
        let out_len = (mono.len() as f64 * ratio).ceil() as usize;
        let mut out = Vec::with_capacity(out_len);

        for i in 0..out_len {
            let src_pos = i as f64 / ratio;
            let idx = src_pos.floor() as usize;
            let frac = src_pos - idx as f64;

            let sample = match (mono.get(idx), mono.get(idx + 1)) {
                (Some(&s0), Some(&s1)) => {
                    (s0 as f64 + (s1 as f64 - s0 as f64) * frac).round() as i16
                }
                (Some(&s0), None) => s0,
                _ => 0,
            };
            out.push(sample);
        }
        out
    }

    fn downmix(&self, input: &[i16]) -> Vec<i16> {
        if self.channels == 1 {
            return input.to_vec();
        }
        input
            .chunks(self.channels)
            .map(|frame| {
                let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                (sum / frame.len() as i32) as i16
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_when_rates_match() {
        let r = Resampler::new(16_000, 16_000, 1).unwrap();
        let input = vec![1, 2, 3, 4];
        assert_eq!(r.process(&input), input);
    }

    #[test]
    fn stereo_downmixes_by_averaging() {
        let r = Resampler::new(16_000, 16_000, 2).unwrap();
        assert_eq!(r.process(&[100, 200, -100, 100]), vec![150, 0]);
    }

    #[test]
    fn downsampling_halves_length() {
        let r = Resampler::new(32_000, 16_000, 1).unwrap();
        let input: Vec<i16> = (0..64).collect();
        let out = r.process(&input);
        assert_eq!(out.len(), 32);
    }

    #[test]
    fn zero_channels_rejected() {
        assert!(Resampler::new(16_000, 16_000, 0).is_err());
    }

    #[test]
    fn empty_input_yields_empty_output() {
        let r = Resampler::new(48_000, 16_000, 2).unwrap();
        assert!(r.process(&[]).is_empty());
    }
}
