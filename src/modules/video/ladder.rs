//! Resolution ladder: which renditions to produce for a given source height,
//! and the bandwidth/dimension hints advertised for each in the master playlist.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rendition {
    P1080,
    P720,
    P480,
}

impl Rendition {
    /// Candidates in descending order.
    pub const CANDIDATES: [Rendition; 3] = [Rendition::P1080, Rendition::P720, Rendition::P480];

    /// Always produced, even for sources shorter than it.
    pub const FLOOR: Rendition = Rendition::P480;

    pub fn height(self) -> u32 {
        match self {
            Rendition::P1080 => 1080,
            Rendition::P720 => 720,
            Rendition::P480 => 480,
        }
    }

    pub fn width(self) -> u32 {
        match self {
            Rendition::P1080 => 1920,
            Rendition::P720 => 1280,
            Rendition::P480 => 854,
        }
    }

    /// Advertised peak bandwidth in bits per second.
    pub fn bandwidth(self) -> u64 {
        match self {
            Rendition::P1080 => 5_000_000,
            Rendition::P720 => 3_000_000,
            Rendition::P480 => 1_500_000,
        }
    }

    /// Directory name of the variant inside the episode prefix, e.g. `720p`.
    pub fn dir_name(self) -> String {
        format!("{}p", self.height())
    }
}

impl fmt::Display for Rendition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}p", self.height())
    }
}

/// Renditions to produce for a source of `source_height` pixels, highest first.
/// Never empty: falls back to [`Rendition::FLOOR`] when nothing fits.
pub fn ladder_for(source_height: u32) -> Vec<Rendition> {
    let ladder: Vec<Rendition> = Rendition::CANDIDATES
        .into_iter()
        .filter(|r| r.height() <= source_height)
        .collect();

    if ladder.is_empty() {
        vec![Rendition::FLOOR]
    } else {
        ladder
    }
}
