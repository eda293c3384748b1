//! Tag and color vector encoding.
//!
//! Tags are folded into a fixed-width multi-hot vector with the hashing
//! trick; dominant colors are counted into 12 hue bins of 30° each. Both
//! vectors are L2-normalized so a dot product reads as cosine similarity.

use std::hash::Hasher;

use serde::{Deserialize, Serialize};
use twox_hash::XxHash32;

/// Width of the tag hashing space.
pub const TAG_DIM: usize = 4096;

/// Hue bin names, one per 30° slice starting at 0°. The order is part of
/// the stored-vector contract: one-hot query vectors index into it.
pub const COLOR_BINS: [&str; 12] = [
    "red",
    "orange",
    "yellow",
    "chartreuse",
    "green",
    "teal",
    "cyan",
    "sky",
    "blue",
    "indigo",
    "violet",
    "magenta",
];

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum VectorError {
    #[error("unknown color '{given}', valid: {}", valid.join(", "))]
    InvalidColorName { given: String, valid: Vec<String> },

    #[error("bad hex color: {0}")]
    MalformedHex(String),
}

/// Immutable encoding configuration shared by stored-vector construction
/// and query construction. Both sides must agree on the tag dimension and
/// the bin table or dot products between them are meaningless.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorSpace {
    tag_dim: usize,
    color_bins: Vec<String>,
}

impl Default for VectorSpace {
    fn default() -> Self {
        Self {
            tag_dim: TAG_DIM,
            color_bins: COLOR_BINS.iter().map(|b| b.to_string()).collect(),
        }
    }
}

impl VectorSpace {
    pub fn tag_dim(&self) -> usize {
        self.tag_dim
    }

    pub fn color_dim(&self) -> usize {
        self.color_bins.len()
    }

    /// Multi-hot hashing trick over `tag_dim` bins. Tags are trimmed and
    /// lowercased; entries empty after trimming are skipped. Collisions are
    /// an accepted fixed-size tradeoff and are not corrected.
    pub fn tag_vector<I, S>(&self, tags: I) -> Vec<f32>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut v = vec![0.0f32; self.tag_dim];
        for tag in tags {
            let tag = tag.as_ref().trim().to_lowercase();
            if tag.is_empty() {
                continue;
            }
            let idx = stable_hash(&tag) as usize % self.tag_dim;
            v[idx] += 1.0;
        }
        l2_normalize(v)
    }

    /// Count colors per hue bin. Malformed hex strings are skipped.
    pub fn color_vector<I, S>(&self, hex_colors: I) -> Vec<f32>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut v = vec![0.0f32; self.color_dim()];
        for hex in hex_colors {
            match self.nearest_color_bin_index(hex.as_ref()) {
                Ok(idx) => v[idx] += 1.0,
                Err(_) => continue,
            }
        }
        l2_normalize(v)
    }

    /// Map a '#RRGGBB' color to its hue bin by simple 30° ranges.
    pub fn nearest_color_bin_index(&self, hex: &str) -> Result<usize, VectorError> {
        let hue = hex_to_hue_deg(hex)?;
        Ok((hue / 30.0).floor() as usize % self.color_dim())
    }

    /// Build a one-hot color query vector from a bin name ("blue") or a hex
    /// code ("#3B82F6"). Unknown names report the valid set.
    pub fn color_query_one_hot(&self, name_or_hex: &str) -> Result<Vec<f32>, VectorError> {
        let mut q = vec![0.0f32; self.color_dim()];

        let idx = if name_or_hex.starts_with('#') {
            self.nearest_color_bin_index(name_or_hex)?
        } else {
            let name = name_or_hex.trim().to_lowercase();
            self.color_bins
                .iter()
                .position(|bin| *bin == name)
                .ok_or_else(|| VectorError::InvalidColorName {
                    given: name_or_hex.to_string(),
                    valid: self.color_bins.clone(),
                })?
        };

        q[idx] = 1.0;
        Ok(q)
    }
}

/// XxHash32 with a fixed zero seed. The tag encoding needs a hash that is
/// uniform and stable across runs; the std DefaultHasher guarantees
/// neither.
fn stable_hash(s: &str) -> u32 {
    let mut hasher = XxHash32::with_seed(0);
    hasher.write(s.as_bytes());
    hasher.finish() as u32
}

/// Scale to unit L2 norm. The zero vector is returned unchanged.
pub fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = l2_norm(&v);
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    v
}

pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Convert '#RRGGBB' to HSV hue in degrees [0, 360). Grayscale (max==min)
/// resolves to 0°.
fn hex_to_hue_deg(hex: &str) -> Result<f32, VectorError> {
    let s = hex.strip_prefix('#').unwrap_or(hex);
    if s.len() != 6 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(VectorError::MalformedHex(hex.to_string()));
    }

    let parse = |range: std::ops::Range<usize>| {
        u8::from_str_radix(&s[range], 16)
            .map(|byte| byte as f32 / 255.0)
            .map_err(|_| VectorError::MalformedHex(hex.to_string()))
    };
    let r = parse(0..2)?;
    let g = parse(2..4)?;
    let b = parse(4..6)?;

    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    if delta == 0.0 {
        return Ok(0.0);
    }

    let hue = if max == r {
        (g - b) / delta % 6.0
    } else if max == g {
        (b - r) / delta + 2.0
    } else {
        (r - g) / delta + 4.0
    } * 60.0;

    Ok(if hue < 0.0 { hue + 360.0 } else { hue })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space() -> VectorSpace {
        VectorSpace::default()
    }

    #[test]
    fn test_tag_vector_deterministic() {
        let tags = ["person", "Sunset", " beach "];
        let a = space().tag_vector(tags);
        let b = space().tag_vector(tags);
        assert_eq!(a, b);
        assert_eq!(a.len(), TAG_DIM);
    }

    #[test]
    fn test_tag_vector_case_and_whitespace_fold() {
        let a = space().tag_vector(["Person"]);
        let b = space().tag_vector(["  person  "]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_tag_vector_normalized() {
        let v = space().tag_vector(["cat", "dog", "tree"]);
        assert!((l2_norm(&v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_tag_vector_empty_input_is_zero() {
        let v = space().tag_vector(Vec::<String>::new());
        assert!(v.iter().all(|x| *x == 0.0));

        // whitespace-only entries count as empty
        let v = space().tag_vector(["", "   "]);
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_hue_bins_cover_circle() {
        // walk the hue circle through pure-hue colors and check every bin
        // index stays in range
        let sp = space();
        for (hex, expected) in [
            ("#FF0000", 0),  // 0° red
            ("#FF8000", 1),  // ~30° orange
            ("#FFFF00", 2),  // 60° yellow
            ("#7FFF00", 3),  // ~90° chartreuse
            ("#00FF00", 4),  // 120° green
            ("#00FF80", 5),  // ~150° teal
            ("#00FFFF", 6),  // 180° cyan
            ("#007FFF", 7),  // ~210° sky
            ("#0000FF", 8),  // 240° blue
            ("#8000FF", 9),  // ~270° indigo
            ("#FF00FF", 10), // 300° violet
            ("#FF007F", 11), // ~330° magenta
        ] {
            assert_eq!(sp.nearest_color_bin_index(hex).unwrap(), expected, "{hex}");
        }
    }

    #[test]
    fn test_grayscale_resolves_to_bin_zero() {
        let sp = space();
        assert_eq!(sp.nearest_color_bin_index("#FFFFFF").unwrap(), 0);
        assert_eq!(sp.nearest_color_bin_index("#000000").unwrap(), 0);
        assert_eq!(sp.nearest_color_bin_index("#7F7F7F").unwrap(), 0);
    }

    #[test]
    fn test_color_vector_normalized_and_skips_malformed() {
        let v = space().color_vector(["#FF0000", "not-a-color", "#FF0000", "#00FF00"]);
        assert!((l2_norm(&v) - 1.0).abs() < 1e-6);
        // two reds, one green
        assert!(v[0] > v[4]);
    }

    #[test]
    fn test_color_vector_all_malformed_is_zero() {
        let v = space().color_vector(["xyz", "#12345", "#GGGGGG"]);
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_one_hot_by_name_and_hex_agree() {
        let sp = space();
        let by_name = sp.color_query_one_hot("red").unwrap();
        let by_hex = sp.color_query_one_hot("#FF0000").unwrap();
        assert_eq!(by_name, by_hex);
        assert_eq!(by_name.iter().filter(|x| **x == 1.0).count(), 1);
    }

    #[test]
    fn test_one_hot_matches_stored_vector() {
        let sp = space();
        // stored vector built purely from red-family hues
        let stored = sp.color_vector(["#FF0000", "#F01010"]);
        let query = sp.color_query_one_hot("red").unwrap();
        assert!(dot(&query, &stored) >= 0.3);

        // a hue 180° away scores exactly zero
        let cyan = sp.color_vector(["#00FFFF"]);
        assert_eq!(dot(&query, &cyan), 0.0);
    }

    #[test]
    fn test_one_hot_unknown_name() {
        let err = space().color_query_one_hot("puce").unwrap_err();
        match err {
            VectorError::InvalidColorName { given, valid } => {
                assert_eq!(given, "puce");
                assert_eq!(valid.len(), 12);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_one_hot_malformed_hex_is_error() {
        assert!(matches!(
            space().color_query_one_hot("#12"),
            Err(VectorError::MalformedHex(_))
        ));
    }

    #[test]
    fn test_bin_boundaries() {
        let sp = space();
        // 29.9° stays in bin 0, 30° tips into bin 1
        // #FF7F00 is ~29.9°, #FF8000 is ~30.1°
        assert_eq!(sp.nearest_color_bin_index("#FF7F00").unwrap(), 0);
        assert_eq!(sp.nearest_color_bin_index("#FF8000").unwrap(), 1);
    }

    #[test]
    fn test_hash_collision_accumulates() {
        // same tag twice doubles the bin before normalization, so the
        // vector is still unit-norm with a single non-zero component
        let v = space().tag_vector(["dog", "dog"]);
        assert!((l2_norm(&v) - 1.0).abs() < 1e-6);
        assert_eq!(v.iter().filter(|x| **x != 0.0).count(), 1);
    }
}
