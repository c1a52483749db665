// src/packer.rs
//! Rectangle packer (C6): Maximal Rectangles with Best Short-Side Fit.
//!
//! Places a set of rectangles into a bounded canvas, optionally rotating
//! individual pieces 90 degrees, and reports the smallest observed bounding
//! box (optionally rounded up to a power of two). Two calls with the same
//! input produce byte-identical placements: the sort key is stable and the
//! free-rectangle scan order is deterministic.

use crate::error::{Error, Result};

/// One rectangle awaiting placement.
#[derive(Debug, Clone)]
pub struct PackInput {
    pub key: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// True if the caller has already forced this image to be rotated 90
    /// degrees, independent of `allow_r90`.
    pub forced_r90: bool,
}

/// Where a rectangle ended up.
#[derive(Debug, Clone)]
pub struct Placement {
    pub key: Vec<u8>,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub r90: bool,
}

pub struct PackResult {
    pub placements: Vec<Placement>,
    pub width: u32,
    pub height: u32,
}

/// A free rectangle in the scratch set. `x == -1` is the tombstone sentinel
/// for a removed slot; callers must skip those while scanning.
#[derive(Debug, Clone, Copy)]
struct Rect {
    x: i64,
    y: i64,
    w: i64,
    h: i64,
}

const REMOVED_X: i64 = -1;

struct FreeSet {
    positions: Vec<Rect>,
    garbage_count: usize,
}

impl FreeSet {
    fn new() -> Self {
        FreeSet {
            positions: Vec::new(),
            garbage_count: 0,
        }
    }

    fn add(&mut self, r: Rect) -> usize {
        if self.garbage_count > 0 {
            if let Some(i) = self.positions.iter().position(|p| p.x == REMOVED_X) {
                self.garbage_count -= 1;
                self.positions[i] = r;
                return i;
            }
        }
        self.positions.push(r);
        self.positions.len() - 1
    }

    fn remove(&mut self, index: usize) {
        self.positions[index].x = REMOVED_X;
        self.garbage_count += 1;
        let mut tail = self.positions.len();
        while tail > 0 && self.positions[tail - 1].x == REMOVED_X {
            tail -= 1;
            self.garbage_count -= 1;
        }
        self.positions.truncate(tail);
    }

    fn iter_live(&self) -> impl Iterator<Item = (usize, &Rect)> {
        self.positions
            .iter()
            .enumerate()
            .filter(|(_, r)| r.x != REMOVED_X)
    }
}

fn rects_intersect(a: &Rect, b: &Rect) -> bool {
    a.x < b.x + b.w && b.x < a.x + a.w && a.y < b.y + b.h && b.y < a.y + a.h
}

fn next_pow2(x: u32) -> u32 {
    let mut power = 1u32;
    while power < x {
        power *= 2;
    }
    power
}

/// Descending `max(w,h)`, ties broken by descending `min(w,h)`.
fn compare_images(a: &PackInput, b: &PackInput) -> std::cmp::Ordering {
    let (max_a, min_a) = (a.width.max(a.height), a.width.min(a.height));
    let (max_b, min_b) = (b.width.max(b.height), b.width.min(b.height));
    max_b.cmp(&max_a).then(min_b.cmp(&min_a))
}

pub fn pack(
    images: &[PackInput],
    max_width: u32,
    max_height: u32,
    allow_r90: bool,
    pow2: bool,
) -> Result<PackResult> {
    let mut sorted: Vec<&PackInput> = images.iter().collect();
    sorted.sort_by(|a, b| compare_images(a, b));

    let mut free = FreeSet::new();
    free.add(Rect {
        x: 0,
        y: 0,
        w: max_width as i64,
        h: max_height as i64,
    });

    let mut width = 0i64;
    let mut height = 0i64;
    let mut placements = Vec::with_capacity(images.len());

    for img in sorted {
        let mut best_short_side = i64::MAX;
        let mut best_rect_idx: Option<usize> = None;
        let mut best_is_r90 = false;

        for (idx, free_r) in free.iter_live() {
            if !img.forced_r90 {
                let w_len = free_r.w - img.width as i64;
                let h_len = free_r.h - img.height as i64;
                let can_fit = w_len > 0 && h_len > 0;
                let short_side = w_len.min(h_len);
                if can_fit && short_side < best_short_side {
                    best_short_side = short_side;
                    best_rect_idx = Some(idx);
                    best_is_r90 = false;
                }
            }
            if allow_r90 || img.forced_r90 {
                let w_len = free_r.w - img.height as i64;
                let h_len = free_r.h - img.width as i64;
                let can_fit = w_len > 0 && h_len > 0;
                let short_side = w_len.min(h_len);
                if can_fit && short_side < best_short_side {
                    best_short_side = short_side;
                    best_rect_idx = Some(idx);
                    best_is_r90 = true;
                }
            }
        }

        let best_idx = best_rect_idx.ok_or(Error::CannotFit)?;
        let best_rect = free.positions[best_idx];

        let placed_w = if best_is_r90 {
            img.height as i64
        } else {
            img.width as i64
        };
        let placed_h = if best_is_r90 {
            img.width as i64
        } else {
            img.height as i64
        };

        let img_rect = Rect {
            x: best_rect.x,
            y: best_rect.y,
            w: placed_w,
            h: placed_h,
        };

        width = width.max(img_rect.x + placed_w);
        height = height.max(img_rect.y + placed_h);

        free.add(Rect {
            x: best_rect.x,
            y: best_rect.y + placed_h,
            w: best_rect.w,
            h: best_rect.h - placed_h,
        });
        free.add(Rect {
            x: best_rect.x + placed_w,
            y: best_rect.y,
            w: best_rect.w - placed_w,
            h: best_rect.h,
        });
        free.remove(best_idx);

        let mut to_remove = Vec::new();
        let mut to_add = Vec::new();
        for (idx, free_r) in free.iter_live() {
            if !rects_intersect(free_r, &img_rect) {
                continue;
            }
            let free_r = *free_r;

            let left = Rect {
                x: free_r.x,
                y: free_r.y,
                w: img_rect.x - free_r.x,
                h: free_r.h,
            };
            if left.w > 0 {
                to_add.push(left);
            }

            let right = Rect {
                x: img_rect.x + img_rect.w,
                y: free_r.y,
                w: free_r.x + free_r.w - (img_rect.x + img_rect.w),
                h: free_r.h,
            };
            if right.w > 0 {
                to_add.push(right);
            }

            let top = Rect {
                x: free_r.x,
                y: free_r.y,
                w: free_r.w,
                h: img_rect.y - free_r.y,
            };
            if top.h > 0 {
                to_add.push(top);
            }

            let bottom = Rect {
                x: free_r.x,
                y: img_rect.y + img_rect.h,
                w: free_r.w,
                h: free_r.y + free_r.h - (img_rect.y + img_rect.h),
            };
            if bottom.h > 0 {
                to_add.push(bottom);
            }

            to_remove.push(idx);
        }
        for idx in to_remove {
            free.remove(idx);
        }
        for r in to_add {
            free.add(r);
        }

        // Prune: drop any free rectangle that is a subset of another. One
        // pass over all pairs, same as the placement loop above -- a
        // subset-of-a-subset left over after this pass gets cleaned up the
        // next time an image is placed.
        let live: Vec<usize> = free.iter_live().map(|(i, _)| i).collect();
        for (ai, &i) in live.iter().enumerate() {
            if free.positions[i].x == REMOVED_X {
                continue;
            }
            for &j in &live[ai + 1..] {
                if free.positions[j].x == REMOVED_X {
                    continue;
                }
                let r1 = free.positions[i];
                let r2 = free.positions[j];

                let x_diff = r1.x - r2.x;
                let y_diff = r1.y - r2.y;
                if x_diff >= 0 && y_diff >= 0 && r1.w <= r2.w - x_diff && r1.h <= r2.h - y_diff {
                    free.remove(i);
                    continue;
                }

                let x_diff = r2.x - r1.x;
                let y_diff = r2.y - r1.y;
                if x_diff >= 0 && y_diff >= 0 && r2.w <= r1.w - x_diff && r2.h <= r1.h - y_diff {
                    free.remove(j);
                }
            }
        }

        placements.push(Placement {
            key: img.key.clone(),
            x: img_rect.x as u32,
            y: img_rect.y as u32,
            width: img.width,
            height: img.height,
            r90: best_is_r90,
        });
    }

    let mut final_width = width as u32;
    let mut final_height = height as u32;
    if pow2 {
        final_width = next_pow2(final_width);
        final_height = next_pow2(final_height);
    }

    Ok(PackResult {
        placements,
        width: final_width,
        height: final_height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(key: &str, w: u32, h: u32) -> PackInput {
        PackInput {
            key: key.as_bytes().to_vec(),
            width: w,
            height: h,
            forced_r90: false,
        }
    }

    #[test]
    fn packs_non_overlapping() {
        let images = vec![
            input("a", 32, 32),
            input("b", 16, 16),
            input("c", 8, 8),
            input("d", 24, 40),
        ];
        let result = pack(&images, 256, 256, true, false).unwrap();
        assert_eq!(result.placements.len(), 4);
        for i in 0..result.placements.len() {
            for j in (i + 1)..result.placements.len() {
                let a = &result.placements[i];
                let b = &result.placements[j];
                let (aw, ah) = if a.r90 { (a.height, a.width) } else { (a.width, a.height) };
                let (bw, bh) = if b.r90 { (b.height, b.width) } else { (b.width, b.height) };
                let overlap = (a.x as i64) < (b.x as i64 + bw as i64)
                    && (b.x as i64) < (a.x as i64 + aw as i64)
                    && (a.y as i64) < (b.y as i64 + bh as i64)
                    && (b.y as i64) < (a.y as i64 + ah as i64);
                assert!(!overlap, "images {} and {} overlap", i, j);
            }
        }
    }

    #[test]
    fn deterministic_across_runs() {
        let images = vec![input("a", 32, 32), input("b", 16, 16), input("c", 8, 8)];
        let r1 = pack(&images, 64, 64, true, false).unwrap();
        let r2 = pack(&images, 64, 64, true, false).unwrap();
        for (p1, p2) in r1.placements.iter().zip(r2.placements.iter()) {
            assert_eq!(p1.x, p2.x);
            assert_eq!(p1.y, p2.y);
            assert_eq!(p1.r90, p2.r90);
        }
    }

    #[test]
    fn fails_to_fit_too_large() {
        let images = vec![input("a", 1000, 1000)];
        let err = pack(&images, 16, 16, false, false).unwrap_err();
        assert_eq!(err.err_str(), "cannot-fit");
    }

    #[test]
    fn rounds_up_to_power_of_two() {
        let images = vec![input("a", 10, 10)];
        let result = pack(&images, 256, 256, false, true).unwrap();
        assert_eq!(result.width & (result.width - 1), 0);
        assert_eq!(result.height & (result.height - 1), 0);
    }

    #[test]
    fn respects_disallowed_rotation() {
        let images = vec![PackInput {
            key: b"tall".to_vec(),
            width: 5,
            height: 60,
            forced_r90: false,
        }];
        let result = pack(&images, 64, 64, false, false).unwrap();
        assert!(!result.placements[0].r90);
    }
}
