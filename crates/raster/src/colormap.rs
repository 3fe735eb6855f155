use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Colormap {
    #[default]
    Gray,
    Jet,
}

impl Colormap {
    pub fn name(self) -> &'static str {
        match self {
            Colormap::Gray => "gray",
            Colormap::Jet => "jet",
        }
    }

    /// Colour for a normalized value `t` in `[0, 1]`; out-of-range input is clamped.
    pub fn rgb(self, t: f64) -> [u8; 3] {
        let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
        match self {
            Colormap::Gray => {
                let v = to_u8(t);
                [v, v, v]
            }
            Colormap::Jet => jet(t),
        }
    }
}

fn to_u8(t: f64) -> u8 {
    (t * 255.0).round() as u8
}

/// Piecewise-linear blue-cyan-yellow-red ramp.
fn jet(t: f64) -> [u8; 3] {
    let channel = |center: f64| to_u8((1.5 - (4.0 * t - center).abs()).clamp(0.0, 1.0));
    [channel(3.0), channel(2.0), channel(1.0)]
}
