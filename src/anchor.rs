// src/anchor.rs
//! 2D reference point within a packed image: either one of nine named
//! positions (center, four edges, four corners) or an explicit fractional
//! coordinate pair.

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnchorKind {
    Center,
    Explicit,
    Left,
    Right,
    Top,
    Bottom,
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl AnchorKind {
    pub fn as_u32(self) -> u32 {
        match self {
            AnchorKind::Center => 0,
            AnchorKind::Explicit => 1,
            AnchorKind::Left => 2,
            AnchorKind::Right => 3,
            AnchorKind::Top => 4,
            AnchorKind::Bottom => 5,
            AnchorKind::TopLeft => 6,
            AnchorKind::TopRight => 7,
            AnchorKind::BottomLeft => 8,
            AnchorKind::BottomRight => 9,
        }
    }

    pub fn from_u32(value: u32) -> Result<Self> {
        Ok(match value {
            0 => AnchorKind::Center,
            1 => AnchorKind::Explicit,
            2 => AnchorKind::Left,
            3 => AnchorKind::Right,
            4 => AnchorKind::Top,
            5 => AnchorKind::Bottom,
            6 => AnchorKind::TopLeft,
            7 => AnchorKind::TopRight,
            8 => AnchorKind::BottomLeft,
            9 => AnchorKind::BottomRight,
            other => return Err(Error::InvalidAnchor(format!("unknown anchor kind {other}"))),
        })
    }

    pub fn from_name(name: &str) -> Result<Self> {
        Ok(match name {
            "center" => AnchorKind::Center,
            "left" => AnchorKind::Left,
            "right" => AnchorKind::Right,
            "top" => AnchorKind::Top,
            "bottom" => AnchorKind::Bottom,
            "topleft" => AnchorKind::TopLeft,
            "topright" => AnchorKind::TopRight,
            "bottomleft" => AnchorKind::BottomLeft,
            "bottomright" => AnchorKind::BottomRight,
            other => return Err(Error::InvalidAnchor(format!("unknown anchor name '{other}'"))),
        })
    }
}

/// A reference point within an image: kind plus its resolved fractional
/// coordinates (0.0-1.0 range for named kinds, caller-supplied for explicit).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchor {
    pub kind: AnchorKind,
    pub x: f64,
    pub y: f64,
}

impl Anchor {
    pub fn explicit(x: f64, y: f64) -> Self {
        Anchor {
            kind: AnchorKind::Explicit,
            x,
            y,
        }
    }

    /// Derives (x, y) from a named anchor kind and the image's pixel
    /// dimensions -- absolute pixel coordinates, not normalised fractions
    /// (center of a 16x16 image is (8.0, 8.0), not (0.5, 0.5)). Every branch
    /// assigns both coordinates independently -- there is no shared
    /// fallthrough that could leave `y` stuck at a previous branch's value.
    pub fn named(kind: AnchorKind, width: u32, height: u32) -> Self {
        let (w, h) = (width as f64, height as f64);
        let (x, y) = match kind {
            AnchorKind::Center => (w / 2.0, h / 2.0),
            AnchorKind::Left => (0.0, h / 2.0),
            AnchorKind::Right => (w, h / 2.0),
            AnchorKind::Top => (w / 2.0, 0.0),
            AnchorKind::Bottom => (w / 2.0, h),
            AnchorKind::TopLeft => (0.0, 0.0),
            AnchorKind::TopRight => (w, 0.0),
            AnchorKind::BottomLeft => (0.0, h),
            AnchorKind::BottomRight => (w, h),
            AnchorKind::Explicit => (0.0, 0.0),
        };
        Anchor { kind, x, y }
    }

    /// Returns true if `self` and `other` describe the same anchor for the
    /// incremental-rebuild dirty check: same kind, and for `Explicit`, equal
    /// coordinates.
    pub fn matches(&self, other: &Anchor) -> bool {
        if self.kind != other.kind {
            return false;
        }
        if self.kind == AnchorKind::Explicit {
            return self.x == other.x && self.y == other.y;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_anchors_assign_distinct_x_and_y() {
        // Regression test for the copy-paste bug in the original C
        // implementation, where every branch wrote to anchor_x and the
        // anchor_y field was never updated. Each named kind here must
        // produce the correct y, not whatever a previous branch left.
        assert_eq!(Anchor::named(AnchorKind::Top, 10, 20).y, 0.0);
        assert_eq!(Anchor::named(AnchorKind::Bottom, 10, 20).y, 20.0);
        assert_eq!(Anchor::named(AnchorKind::Left, 10, 20).y, 10.0);
        assert_eq!(Anchor::named(AnchorKind::TopLeft, 10, 20).y, 0.0);
        assert_eq!(Anchor::named(AnchorKind::BottomLeft, 10, 20).y, 20.0);
        assert_eq!(Anchor::named(AnchorKind::BottomRight, 10, 20).y, 20.0);
    }

    #[test]
    fn named_anchors_scale_with_image_dimensions() {
        assert_eq!(Anchor::named(AnchorKind::Center, 16, 16).x, 8.0);
        assert_eq!(Anchor::named(AnchorKind::Center, 16, 16).y, 8.0);
        assert_eq!(Anchor::named(AnchorKind::Right, 8, 8).x, 8.0);
        assert_eq!(Anchor::named(AnchorKind::Bottom, 8, 8).y, 8.0);
    }

    #[test]
    fn explicit_roundtrips_kind() {
        let a = Anchor::explicit(3.5, 4.0);
        assert_eq!(a.kind, AnchorKind::Explicit);
        assert_eq!(a.x, 3.5);
        assert_eq!(a.y, 4.0);
    }

    #[test]
    fn matches_requires_same_kind_and_coords_when_explicit() {
        let a = Anchor::explicit(1.0, 2.0);
        let b = Anchor::explicit(1.0, 2.0);
        let c = Anchor::explicit(1.0, 3.0);
        assert!(a.matches(&b));
        assert!(!a.matches(&c));
        assert!(!a.matches(&Anchor::named(AnchorKind::Center, 10, 10)));
    }

    #[test]
    fn kind_round_trips_through_u32() {
        for kind in [
            AnchorKind::Center,
            AnchorKind::Explicit,
            AnchorKind::Left,
            AnchorKind::Right,
            AnchorKind::Top,
            AnchorKind::Bottom,
            AnchorKind::TopLeft,
            AnchorKind::TopRight,
            AnchorKind::BottomLeft,
            AnchorKind::BottomRight,
        ] {
            assert_eq!(AnchorKind::from_u32(kind.as_u32()).unwrap(), kind);
        }
    }
}
