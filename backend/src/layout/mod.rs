//! Grid layout composer for exports.
//!
//! Items live on a fixed 12-column grid of at most [`MAX_ROWS`] rows.
//! [`place`] is a first-fit scan: candidates advance left to right in steps of the item
//! width and wrap to the next band of `h` rows when the item would cross the
//! right edge. Results depend on the order items are added.

use std::collections::HashSet;

use crate::error::LayoutError;
use crate::models::ExportLayoutItem;

/// Grid width in columns.
pub const GRID_COLUMNS: u32 = 12;

/// Default item footprint.
pub const DEFAULT_ITEM_WIDTH: u32 = 4;
pub const DEFAULT_ITEM_HEIGHT: u32 = 6;

/// Grid height in rows.
pub const MAX_ROWS: u32 = 1_000;

fn check_size(w: u32, h: u32) -> Result<(), LayoutError> {
    if w == 0 || w > GRID_COLUMNS || h == 0 || h > MAX_ROWS {
        return Err(LayoutError::InvalidSize {
            w,
            h,
            columns: GRID_COLUMNS,
            rows: MAX_ROWS,
        });
    }
    Ok(())
}

fn within_grid(item: &ExportLayoutItem) -> bool {
    item.x.saturating_add(item.w) <= GRID_COLUMNS && item.y.saturating_add(item.h) <= MAX_ROWS
}

/// First free `(x, y)` for a `w`×`h` item given the existing layout.
pub fn place(layout: &[ExportLayoutItem], w: u32, h: u32) -> Result<(u32, u32), LayoutError> {
    check_size(w, h)?;

    let is_free = |x: u32, y: u32| {
        let candidate = ExportLayoutItem {
            visualization_id: String::new(),
            x,
            y,
            w,
            h,
        };
        !layout.iter().any(|item| overlaps(item, &candidate))
    };

    let (mut x, mut y) = (0, 0);
    while y + h <= MAX_ROWS {
        if is_free(x, y) {
            return Ok((x, y));
        }
        x += w;
        if x + w > GRID_COLUMNS {
            x = 0;
            y += h;
        }
    }
    Err(LayoutError::GridFull { w, h, rows: MAX_ROWS })
}

/// Place a new item for `visualization_id` and push it onto the layout.
pub fn append(
    layout: &mut Vec<ExportLayoutItem>,
    visualization_id: impl Into<String>,
    w: u32,
    h: u32,
) -> Result<ExportLayoutItem, LayoutError> {
    let (x, y) = place(layout, w, h)?;
    let item = ExportLayoutItem {
        visualization_id: visualization_id.into(),
        x,
        y,
        w,
        h,
    };
    layout.push(item.clone());
    Ok(item)
}

/// Lay out a sequence of visualizations one at a time.
pub fn compose<I, S>(ids: I, w: u32, h: u32) -> Result<Vec<ExportLayoutItem>, LayoutError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut layout = Vec::new();
    for id in ids {
        append(&mut layout, id, w, h)?;
    }
    Ok(layout)
}

/// Whether two items share at least one cell.
pub fn overlaps(a: &ExportLayoutItem, b: &ExportLayoutItem) -> bool {
    a.x < b.x.saturating_add(b.w)
        && b.x < a.x.saturating_add(a.w)
        && a.y < b.y.saturating_add(b.h)
        && b.y < a.y.saturating_add(a.h)
}

/// Check sizes, grid bounds, unique ids and pairwise non-overlap.
pub fn validate(layout: &[ExportLayoutItem]) -> Result<(), LayoutError> {
    let mut seen = HashSet::new();
    for item in layout {
        check_size(item.w, item.h)?;
        if !within_grid(item) {
            return Err(LayoutError::OutOfBounds(item.visualization_id.clone()));
        }
        if !seen.insert(item.visualization_id.as_str()) {
            return Err(LayoutError::DuplicateItem(item.visualization_id.clone()));
        }
    }

    for (i, a) in layout.iter().enumerate() {
        if let Some(b) = layout[i + 1..].iter().find(|b| overlaps(a, b)) {
            return Err(LayoutError::Overlap {
                first: a.visualization_id.clone(),
                second: b.visualization_id.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, x: u32, y: u32, w: u32, h: u32) -> ExportLayoutItem {
        ExportLayoutItem {
            visualization_id: id.into(),
            x,
            y,
            w,
            h,
        }
    }

    #[test]
    fn test_row_major_fill_then_wrap() {
        let ids: Vec<String> = (0..5).map(|i| format!("v{}", i)).collect();
        let layout = compose(ids, DEFAULT_ITEM_WIDTH, DEFAULT_ITEM_HEIGHT).unwrap();
        let positions: Vec<(u32, u32)> = layout.iter().map(|i| (i.x, i.y)).collect();
        assert_eq!(positions, vec![(0, 0), (4, 0), (8, 0), (0, 6), (4, 6)]);
    }

    #[test]
    fn test_identical_placements_never_overlap() {
        for (w, h) in [(1, 1), (3, 2), (5, 4), (7, 1), (12, 3)] {
            let layout = compose((0..20).map(|i| i.to_string()), w, h).unwrap();
            assert!(validate(&layout).is_ok(), "overlap for {}x{}", w, h);
        }
    }

    #[test]
    fn test_width_that_does_not_divide_grid() {
        let layout = compose(["a", "b", "c"], 5, 2).unwrap();
        let positions: Vec<(u32, u32)> = layout.iter().map(|i| (i.x, i.y)).collect();
        assert_eq!(positions, vec![(0, 0), (5, 0), (0, 2)]);
    }

    #[test]
    fn test_place_skips_manual_item() {
        let existing = vec![item("manual", 0, 0, 6, 6)];
        assert_eq!(place(&existing, 4, 6).unwrap(), (8, 0));
        assert_eq!(place(&existing, 6, 6).unwrap(), (6, 0));
    }

    #[test]
    fn test_invalid_sizes_rejected() {
        assert!(matches!(place(&[], 0, 6), Err(LayoutError::InvalidSize { .. })));
        assert!(matches!(place(&[], 13, 6), Err(LayoutError::InvalidSize { .. })));
        assert!(matches!(place(&[], 4, 0), Err(LayoutError::InvalidSize { .. })));
        assert!(matches!(place(&[], 4, MAX_ROWS + 1), Err(LayoutError::InvalidSize { .. })));
    }

    #[test]
    fn test_oversized_height_rejected() {
        let tall = vec![item("tall", 0, 0, 12, 2_000_000)];
        assert!(matches!(validate(&tall), Err(LayoutError::InvalidSize { .. })));

        let deep = vec![item("deep", 0, MAX_ROWS - 2, 4, 6)];
        assert_eq!(validate(&deep), Err(LayoutError::OutOfBounds("deep".into())));
    }

    #[test]
    fn test_place_ignores_cell_count_of_existing_items() {
        let existing = vec![item("tall", 0, 0, 12, 990)];
        assert_eq!(place(&existing, 4, 6).unwrap(), (0, 990));

        let far = vec![item("far", 0, u32::MAX - 1, 12, 1)];
        assert_eq!(place(&far, 4, 6).unwrap(), (0, 0));
    }

    #[test]
    fn test_full_grid_reports_error() {
        let full = vec![item("all", 0, 0, GRID_COLUMNS, MAX_ROWS)];
        assert_eq!(
            place(&full, 1, 1),
            Err(LayoutError::GridFull {
                w: 1,
                h: 1,
                rows: MAX_ROWS
            })
        );
    }

    #[test]
    fn test_validate_detects_problems() {
        let overlapping = vec![item("a", 0, 0, 4, 6), item("b", 2, 3, 4, 6)];
        assert_eq!(
            validate(&overlapping),
            Err(LayoutError::Overlap {
                first: "a".into(),
                second: "b".into()
            })
        );

        let touching = vec![item("a", 0, 0, 4, 6), item("b", 4, 0, 4, 6)];
        assert!(validate(&touching).is_ok());

        let out = vec![item("a", 10, 0, 4, 6)];
        assert_eq!(validate(&out), Err(LayoutError::OutOfBounds("a".into())));

        let dup = vec![item("a", 0, 0, 4, 6), item("a", 4, 0, 4, 6)];
        assert_eq!(validate(&dup), Err(LayoutError::DuplicateItem("a".into())));
    }
}
