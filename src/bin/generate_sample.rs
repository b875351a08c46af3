//! Writes a small synthetic tomato-leaf dataset as ENVI cubes so the
//! inventory → export → self-check chain can be run without camera data.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use leaf_spectra::data::envi::{write_cube, Interleave};
use leaf_spectra::data::model::Cube;

const HEIGHT: usize = 6;
const WIDTH: usize = 5;

fn gaussian(x: f64, mu: f64, sigma: f64, amplitude: f64) -> f64 {
    amplitude * (-(x - mu).powi(2) / (2.0 * sigma.powi(2))).exp()
}

/// Reflectance-like curve: a smooth plateau with absorption dips.
fn leaf_spectrum(wavelengths: &[f64], plateau: f64, dips: &[(f64, f64, f64)]) -> Vec<f64> {
    wavelengths
        .iter()
        .map(|&wl| {
            let absorbed: f64 = dips
                .iter()
                .map(|&(mu, sigma, depth)| gaussian(wl, mu, sigma, depth))
                .sum();
            (plateau - absorbed).max(0.01)
        })
        .collect()
}

fn noisy_cube(spectrum: &[f64], noise_level: f64, rng: &mut SimpleRng) -> Cube {
    let bands = spectrum.len();
    let data = (0..HEIGHT * WIDTH)
        .flat_map(|_| spectrum.iter().map(|&v| v + rng.gauss(0.0, noise_level)).collect::<Vec<_>>())
        .collect();
    Cube::new(HEIGHT, WIDTH, bands, data).unwrap_or_else(|| Cube::uniform(HEIGHT, WIDTH, spectrum))
}

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5)).rotate_left(7).wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

struct SensorSetup {
    tag: &'static str,
    wavelengths: Vec<f64>,
    dips: Vec<(f64, f64, f64)>,
    interleave: Interleave,
}

fn main() -> Result<()> {
    let out_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("data/tomato_leaf"));
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("creating {}", out_dir.display()))?;

    let mut rng = SimpleRng::new(42);

    let sensors = [
        SensorSetup {
            tag: "VISNIR",
            wavelengths: (0..64).map(|i| 400.0 + i as f64 * 9.5).collect(),
            dips: vec![(480.0, 30.0, 0.25), (670.0, 25.0, 0.35)],
            interleave: Interleave::Bil,
        },
        SensorSetup {
            tag: "SWIR",
            wavelengths: (0..48).map(|i| 1000.0 + i as f64 * 31.0).collect(),
            dips: vec![(1450.0, 60.0, 0.3), (1940.0, 80.0, 0.4)],
            interleave: Interleave::Bsq,
        },
    ];

    // (name fragment, disease severity); D0 is the healthy baseline day
    let captures = [("before", 0.0), ("2h", 0.02), ("D0", 0.0), ("D3", 0.15), ("D7", 0.35)];
    let leaves = ["leaf01", "leaf02"];

    let mut written = 0usize;
    for setup in &sensors {
        for &(tp, severity) in &captures {
            for leaf in &leaves {
                let plateau = 0.55 - severity * 0.4;
                let spectrum = leaf_spectrum(&setup.wavelengths, plateau, &setup.dips);
                let cube = noisy_cube(&spectrum, 0.01, &mut rng);
                let name = format!("{leaf}_{}_{tp}.hdr", setup.tag);
                write_one(&out_dir, &name, &cube, &setup.wavelengths, setup.interleave)?;
                written += 1;
            }
        }

        // Cloth panel captured on the baseline day only; later days rely on fallback
        let cloth = vec![0.95; setup.wavelengths.len()];
        let cube = noisy_cube(&cloth, 0.005, &mut rng);
        let name = format!("cloth_{}_D0.hdr", setup.tag);
        write_one(&out_dir, &name, &cube, &setup.wavelengths, setup.interleave)?;
        written += 1;
    }

    println!("Wrote {written} cubes ({HEIGHT}x{WIDTH} pixels each) to {}", out_dir.display());
    Ok(())
}

fn write_one(
    dir: &Path,
    name: &str,
    cube: &Cube,
    wavelengths: &[f64],
    interleave: Interleave,
) -> Result<()> {
    write_cube(&dir.join(name), cube, Some(wavelengths), interleave)?;
    Ok(())
}
