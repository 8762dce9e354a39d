//! Color classification policies.
//!
//! A policy is a pure decision table from raw channel counts to a
//! [`ColorLabel`]. Three tables are provided; they disagree on thresholds and
//! bucket sets and are kept side by side rather than merged.

use crate::reading::Channels;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorLabel {
    /// Not enough light to say anything about hue.
    VeryDark,
    /// Clear channel beyond the usable range.
    Saturated,
    Black,
    White,
    Gray,
    Red,
    DarkRed,
    Orange,
    Pink,
    Magenta,
    Yellow,
    Green,
    Cyan,
    Blue,
    Brown,
    /// Reading matched no bucket.
    Unclassified,
}

impl ColorLabel {
    pub const ALL: [ColorLabel; 16] = [
        ColorLabel::VeryDark,
        ColorLabel::Saturated,
        ColorLabel::Black,
        ColorLabel::White,
        ColorLabel::Gray,
        ColorLabel::Red,
        ColorLabel::DarkRed,
        ColorLabel::Orange,
        ColorLabel::Pink,
        ColorLabel::Magenta,
        ColorLabel::Yellow,
        ColorLabel::Green,
        ColorLabel::Cyan,
        ColorLabel::Blue,
        ColorLabel::Brown,
        ColorLabel::Unclassified,
    ];

    /// Name used in the report query string.
    pub fn as_str(self) -> &'static str {
        match self {
            ColorLabel::VeryDark => "VERY_DARK",
            ColorLabel::Saturated => "SATURATED",
            ColorLabel::Black => "BLACK",
            ColorLabel::White => "WHITE",
            ColorLabel::Gray => "GRAY",
            ColorLabel::Red => "RED",
            ColorLabel::DarkRed => "DARK_RED",
            ColorLabel::Orange => "ORANGE",
            ColorLabel::Pink => "PINK",
            ColorLabel::Magenta => "MAGENTA",
            ColorLabel::Yellow => "YELLOW",
            ColorLabel::Green => "GREEN",
            ColorLabel::Cyan => "CYAN",
            ColorLabel::Blue => "BLUE",
            ColorLabel::Brown => "BROWN",
            ColorLabel::Unclassified => "UNCLASSIFIED",
        }
    }
}

impl core::fmt::Display for ColorLabel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait ClassifierPolicy {
    fn classify(&self, channels: &Channels) -> ColorLabel;
}

impl<P: ClassifierPolicy + ?Sized> ClassifierPolicy for &P {
    fn classify(&self, channels: &Channels) -> ColorLabel {
        (**self).classify(channels)
    }
}

/// Channel values divided by a common reference.
#[derive(Debug, Clone, Copy)]
struct Ratios {
    r: f32,
    g: f32,
    b: f32,
}

impl Ratios {
    fn over(channels: &Channels, reference: u32) -> Self {
        if reference == 0 {
            return Self {
                r: 0.0,
                g: 0.0,
                b: 0.0,
            };
        }
        let reference = reference as f32;
        Self {
            r: f32::from(channels.red) / reference,
            g: f32::from(channels.green) / reference,
            b: f32::from(channels.blue) / reference,
        }
    }

    fn max(&self) -> f32 {
        self.r.max(self.g).max(self.b)
    }

    fn min(&self) -> f32 {
        self.r.min(self.g).min(self.b)
    }

    /// Saturation proxy.
    fn spread(&self) -> f32 {
        self.max() - self.min()
    }

    fn flat_within(&self, tolerance: f32) -> bool {
        libm::fabsf(self.r - self.g) < tolerance
            && libm::fabsf(self.r - self.b) < tolerance
            && libm::fabsf(self.g - self.b) < tolerance
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearNormalizedThresholds {
    pub dark_clear: u16,
    pub saturated_clear: u16,
    /// Below this spread the reading is a candidate for white or gray.
    pub low_saturation: f32,
    pub white_min_ratio: f32,
    pub white_min_clear: u16,
    pub gray_tolerance: f32,
    pub gray_min_ratio: f32,
    pub gray_max_ratio: f32,
    pub gray_min_clear: u16,
    pub gray_max_clear: u16,
    /// Minimum spread for any hue bucket.
    pub hue_min_spread: f32,
    pub dominance: f32,
    pub secondary: f32,
    pub magenta_blue_over_green: f32,
    pub orange_min_green_to_red: f32,
    pub pink_max_spread: f32,
    pub pink_min_clear: u16,
    pub pink_green_to_red: f32,
    pub yellow_balance: f32,
    pub dark_red_green_factor: f32,
}

impl Default for ClearNormalizedThresholds {
    fn default() -> Self {
        Self {
            dark_clear: 50,
            saturated_clear: 60000,
            low_saturation: 0.015,
            white_min_ratio: 0.28,
            white_min_clear: 42000,
            gray_tolerance: 0.002,
            gray_min_ratio: 0.12,
            gray_max_ratio: 0.28,
            gray_min_clear: 2000,
            gray_max_clear: 42000,
            hue_min_spread: 0.02,
            dominance: 1.05,
            secondary: 1.3,
            magenta_blue_over_green: 1.2,
            orange_min_green_to_red: 0.3,
            pink_max_spread: 0.08,
            pink_min_clear: 10000,
            pink_green_to_red: 0.75,
            yellow_balance: 0.15,
            dark_red_green_factor: 0.95,
        }
    }
}

/// Fine-grained table working on channels normalized by the clear count.
///
/// Pairs with auto-gain: the clear channel stays inside a controlled range,
/// so the ratios are comparable between scenes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClearNormalized {
    pub thresholds: ClearNormalizedThresholds,
}

impl ClearNormalized {
    fn neutral(&self, n: &Ratios, spread: f32, clear: u16) -> Option<ColorLabel> {
        let t = &self.thresholds;
        let all_above = |v: f32| n.r > v && n.g > v && n.b > v;

        if spread < t.low_saturation && all_above(t.white_min_ratio) && clear > t.white_min_clear {
            return Some(ColorLabel::White);
        }
        let mid = n.r > t.gray_min_ratio && n.r < t.gray_max_ratio;
        let mid_clear = clear > t.gray_min_clear && clear < t.gray_max_clear;
        if spread < t.gray_tolerance && n.flat_within(t.gray_tolerance) && mid && mid_clear {
            return Some(ColorLabel::Gray);
        }
        None
    }

    fn hue(&self, n: &Ratios, spread: f32, clear: u16) -> Option<ColorLabel> {
        let t = &self.thresholds;
        if spread <= t.hue_min_spread {
            return None;
        }
        let Ratios { r, g, b } = *n;
        let balanced = |x: f32, y: f32| x > y * (1.0 - t.yellow_balance) && x < y * (1.0 + t.yellow_balance);

        if r > g && r > b {
            if spread < t.pink_max_spread && clear > t.pink_min_clear {
                return Some(ColorLabel::Pink);
            }
            if r > g * t.dominance {
                let label = if g > b * t.secondary && g >= r * t.orange_min_green_to_red {
                    ColorLabel::Orange
                } else if b > g * t.magenta_blue_over_green {
                    ColorLabel::Magenta
                } else if g > b * t.dominance && g / r > t.pink_green_to_red {
                    ColorLabel::Pink
                } else {
                    ColorLabel::Red
                };
                return Some(label);
            }
        }

        if balanced(r, g) && r > b * t.secondary && g > b * t.secondary {
            return Some(ColorLabel::Yellow);
        }

        if g > r && g > b && g > r * t.dominance && g > b * t.dominance {
            return Some(if b > r * t.secondary {
                ColorLabel::Cyan
            } else {
                ColorLabel::Green
            });
        }

        if b > r && b > g && b > r * t.dominance && b > g * t.dominance {
            return Some(if r > g * t.secondary {
                ColorLabel::Magenta
            } else if g > r * t.secondary {
                ColorLabel::Cyan
            } else {
                ColorLabel::Blue
            });
        }

        None
    }
}

impl ClassifierPolicy for ClearNormalized {
    fn classify(&self, channels: &Channels) -> ColorLabel {
        let t = &self.thresholds;
        if channels.clear < t.dark_clear {
            return ColorLabel::VeryDark;
        }
        if channels.clear > t.saturated_clear {
            return ColorLabel::Saturated;
        }

        let n = Ratios::over(channels, u32::from(channels.clear));
        let spread = n.spread();

        if spread < t.low_saturation {
            if let Some(label) = self.neutral(&n, spread, channels.clear) {
                return label;
            }
        }
        if let Some(label) = self.hue(&n, spread, channels.clear) {
            return label;
        }
        if !n.flat_within(t.gray_tolerance) && n.r > n.b && n.r >= n.g * t.dark_red_green_factor {
            return ColorLabel::DarkRed;
        }
        ColorLabel::Unclassified
    }
}

/// Coarse table on each channel's share of `r + g + b`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShareOfTotal {
    pub dark_clear: u16,
    pub bright_clear: u16,
    pub dominant: f32,
    pub minor: f32,
    pub yellow_max_blue: f32,
    pub white_min: f32,
}

impl Default for ShareOfTotal {
    fn default() -> Self {
        Self {
            dark_clear: 100,
            bright_clear: 10000,
            dominant: 0.40,
            minor: 0.35,
            yellow_max_blue: 0.30,
            white_min: 0.30,
        }
    }
}

impl ClassifierPolicy for ShareOfTotal {
    fn classify(&self, channels: &Channels) -> ColorLabel {
        if channels.clear < self.dark_clear {
            return ColorLabel::VeryDark;
        }
        if channels.clear > self.bright_clear {
            return ColorLabel::Saturated;
        }

        let total = u32::from(channels.red) + u32::from(channels.green) + u32::from(channels.blue);
        let s = Ratios::over(channels, total.max(1));
        let (hi, lo) = (self.dominant, self.minor);

        if s.r > hi && s.g < lo && s.b < lo {
            ColorLabel::Red
        } else if s.g > hi && s.r < lo && s.b < lo {
            ColorLabel::Green
        } else if s.b > hi && s.r < lo && s.g < lo {
            ColorLabel::Blue
        } else if s.r > hi && s.g > hi && s.b < self.yellow_max_blue {
            ColorLabel::Yellow
        } else if s.r > self.white_min && s.g > self.white_min && s.b > self.white_min {
            ColorLabel::White
        } else {
            ColorLabel::Unclassified
        }
    }
}

/// Table on ratios to the strongest channel, with absolute-count checks
/// for black, white, gray and brown.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakRatio {
    pub black_max: u16,
    pub white_min: u16,
    pub strong: f32,
    pub pair: f32,
    pub weak: f32,
    pub orange_red: f32,
    pub orange_green: (f32, f32),
    pub orange_max_blue: f32,
    pub gray_counts: (u16, u16),
    pub gray_tolerance: f32,
    pub brown_max_red: u16,
    pub brown_max_green: u16,
}

impl Default for PeakRatio {
    fn default() -> Self {
        Self {
            black_max: 50,
            white_min: 200,
            strong: 0.8,
            pair: 0.7,
            weak: 0.5,
            orange_red: 0.9,
            orange_green: (0.4, 0.7),
            orange_max_blue: 0.4,
            gray_counts: (80, 200),
            gray_tolerance: 0.2,
            brown_max_red: 150,
            brown_max_green: 100,
        }
    }
}

impl ClassifierPolicy for PeakRatio {
    fn classify(&self, channels: &Channels) -> ColorLabel {
        let Channels { red, green, blue, .. } = *channels;
        let peak = red.max(green).max(blue);

        if peak < self.black_max {
            return ColorLabel::Black;
        }
        if red > self.white_min && green > self.white_min && blue > self.white_min {
            return ColorLabel::White;
        }

        let p = Ratios::over(channels, u32::from(peak));
        let (strong, pair, weak) = (self.strong, self.pair, self.weak);

        if p.r > strong && p.g < weak && p.b < weak {
            return ColorLabel::Red;
        }
        if p.g > strong && p.r < weak && p.b < weak {
            return ColorLabel::Green;
        }
        if p.b > strong && p.r < weak && p.g < weak {
            return ColorLabel::Blue;
        }
        if p.r > pair && p.g > pair && p.b < weak {
            return ColorLabel::Yellow;
        }
        if p.g > pair && p.b > pair && p.r < weak {
            return ColorLabel::Cyan;
        }
        if p.r > pair && p.b > pair && p.g < weak {
            return ColorLabel::Magenta;
        }
        let (green_lo, green_hi) = self.orange_green;
        if p.r > self.orange_red && p.g > green_lo && p.g < green_hi && p.b < self.orange_max_blue {
            return ColorLabel::Orange;
        }

        let (gray_lo, gray_hi) = self.gray_counts;
        let mid = |v: u16| v > gray_lo && v < gray_hi;
        if mid(red) && mid(green) && mid(blue) && p.flat_within(self.gray_tolerance) {
            return ColorLabel::Gray;
        }
        if red > green && green > blue && red < self.brown_max_red && green < self.brown_max_green {
            return ColorLabel::Brown;
        }
        ColorLabel::Unclassified
    }
}
