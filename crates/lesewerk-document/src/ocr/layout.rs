// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Layout detection on the unprocessed page: ink blobs classified by
// position and shape, and ruled tables found through line morphology.

use image::{DynamicImage, GrayImage, Luma};
use imageproc::contours::{BorderType, Contour, find_contours};
use imageproc::morphology::{Mask, grayscale_open};
use lesewerk_core::{BoundingBox, DetectedRegion, RegionType};
use tracing::{debug, instrument};

use crate::scan::threshold::otsu_binarize;

/// Minimum contour area for [`detect_document_regions`] in the pipeline.
pub const DEFAULT_MIN_REGION_AREA: f64 = 500.0;

/// Minimum contour area for a table candidate.
pub const TABLE_MIN_AREA: f64 = 5000.0;

/// Length of the horizontal and vertical line kernels (below 256, the mask
/// centre is a `u8`).
const LINE_KERNEL_LENGTH: u32 = 41;

/// Find ink regions and classify each as header, signature, table or text.
///
/// Regions are sorted top to bottom.
#[instrument(skip(image), fields(width = image.width(), height = image.height()))]
pub fn detect_document_regions(image: &DynamicImage, min_area: f64) -> Vec<DetectedRegion> {
    let gray = image.to_luma8();
    let (page_w, page_h) = (gray.width() as f64, gray.height() as f64);
    let mask = otsu_binarize(&gray, true);

    let mut regions: Vec<DetectedRegion> = external_contours(&mask)
        .into_iter()
        .filter_map(|contour| {
            let area = polygon_area(&contour.points);
            if area < min_area {
                return None;
            }
            let bbox = bounding_rect(&contour.points);
            let region_type = classify(&bbox, page_w, page_h);
            Some(DetectedRegion {
                region_type,
                aspect_ratio: bbox.aspect_ratio(),
                bounding_box: bbox,
                area,
            })
        })
        .collect();

    regions.sort_by(|a, b| a.bounding_box.y.total_cmp(&b.bounding_box.y));
    debug!(count = regions.len(), "Document regions detected");
    regions
}

/// Find ruled tables: long horizontal and vertical strokes survive a
/// morphological opening, their union is traced, and large blobs are kept.
#[instrument(skip(image), fields(width = image.width(), height = image.height()))]
pub fn detect_tables(image: &DynamicImage) -> Vec<DetectedRegion> {
    let gray = image.to_luma8();
    let mask = otsu_binarize(&gray, true);

    let horizontal = grayscale_open(&mask, &line_mask(LINE_KERNEL_LENGTH, true));
    let vertical = grayscale_open(&mask, &line_mask(LINE_KERNEL_LENGTH, false));
    let grid = GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        Luma([horizontal.get_pixel(x, y).0[0].max(vertical.get_pixel(x, y).0[0])])
    });

    let tables: Vec<DetectedRegion> = external_contours(&grid)
        .into_iter()
        .filter_map(|contour| {
            let area = polygon_area(&contour.points);
            if area < TABLE_MIN_AREA {
                return None;
            }
            let bbox = bounding_rect(&contour.points);
            Some(DetectedRegion {
                region_type: RegionType::Table,
                aspect_ratio: bbox.aspect_ratio(),
                bounding_box: bbox,
                area,
            })
        })
        .collect();

    debug!(count = tables.len(), "Tables detected");
    tables
}

fn classify(bbox: &BoundingBox, page_w: f64, page_h: f64) -> RegionType {
    if bbox.y < 0.15 * page_h && bbox.width > 0.4 * page_w {
        RegionType::Header
    } else if bbox.y > 0.8 * page_h {
        RegionType::Signature
    } else if bbox.aspect_ratio() > 3.0 && bbox.height > 20.0 {
        RegionType::Table
    } else {
        RegionType::Text
    }
}

/// Outer borders that are not nested inside another shape.
fn external_contours(mask: &GrayImage) -> Vec<Contour<i32>> {
    find_contours::<i32>(mask)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .collect()
}

/// Shoelace area of a closed polygon.
fn polygon_area(points: &[imageproc::point::Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let twice: i64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| a.x as i64 * b.y as i64 - b.x as i64 * a.y as i64)
        .sum();
    twice.abs() as f64 / 2.0
}

/// Inclusive pixel bounds of a point set.
fn bounding_rect(points: &[imageproc::point::Point<i32>]) -> BoundingBox {
    let (mut x0, mut y0, mut x1, mut y1) = (i32::MAX, i32::MAX, i32::MIN, i32::MIN);
    for p in points {
        x0 = x0.min(p.x);
        y0 = y0.min(p.y);
        x1 = x1.max(p.x);
        y1 = y1.max(p.y);
    }
    if points.is_empty() {
        return BoundingBox::new(0.0, 0.0, 0.0, 0.0);
    }
    BoundingBox::new(
        x0 as f64,
        y0 as f64,
        (x1 - x0 + 1) as f64,
        (y1 - y0 + 1) as f64,
    )
}

/// Flat line structuring element of `length` pixels, centred.
fn line_mask(length: u32, horizontal: bool) -> Mask {
    let (w, h) = if horizontal { (length, 1) } else { (1, length) };
    let centre = (length / 2) as u8;
    let (cx, cy) = if horizontal { (centre, 0) } else { (0, centre) };
    Mask::from_image(&GrayImage::from_pixel(w, h, Luma([255u8])), cx, cy)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page() -> GrayImage {
        GrayImage::from_pixel(600, 800, Luma([255u8]))
    }

    fn fill(img: &mut GrayImage, x: u32, y: u32, w: u32, h: u32) {
        for yy in y..y + h {
            for xx in x..x + w {
                img.put_pixel(xx, yy, Luma([0u8]));
            }
        }
    }

    fn outline(img: &mut GrayImage, x: u32, y: u32, w: u32, h: u32, t: u32) {
        fill(img, x, y, w, t);
        fill(img, x, y + h - t, w, t);
        fill(img, x, y, t, h);
        fill(img, x + w - t, y, t, h);
    }

    #[test]
    fn classifies_by_position_and_shape() {
        let mut img = page();
        fill(&mut img, 50, 20, 400, 40); // wide, near top
        fill(&mut img, 50, 300, 200, 40); // wide and short
        fill(&mut img, 50, 400, 60, 60); // squarish body
        fill(&mut img, 50, 700, 150, 40); // bottom
        let regions = detect_document_regions(&DynamicImage::ImageLuma8(img), 500.0);

        let kinds: Vec<RegionType> = regions.iter().map(|r| r.region_type).collect();
        assert_eq!(
            kinds,
            vec![RegionType::Header, RegionType::Table, RegionType::Text, RegionType::Signature]
        );
        assert_eq!(regions[0].bounding_box, BoundingBox::new(50.0, 20.0, 400.0, 40.0));
    }

    #[test]
    fn small_blobs_are_discarded() {
        let mut img = page();
        fill(&mut img, 100, 300, 10, 10);
        fill(&mut img, 100, 400, 60, 60);
        let regions = detect_document_regions(&DynamicImage::ImageLuma8(img), 500.0);
        assert_eq!(regions.len(), 1);
        assert!(regions[0].area >= 500.0);
    }

    #[test]
    fn nested_shapes_report_only_outer_region() {
        let mut img = page();
        outline(&mut img, 100, 300, 200, 150, 4);
        fill(&mut img, 150, 350, 60, 40);
        let regions = detect_document_regions(&DynamicImage::ImageLuma8(img), 500.0);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].bounding_box.width, 200.0);
    }

    #[test]
    fn blank_page_has_no_regions() {
        let img = DynamicImage::ImageLuma8(page());
        assert!(detect_document_regions(&img, 500.0).is_empty());
        assert!(detect_tables(&img).is_empty());
    }

    #[test]
    fn ruled_grid_is_a_table() {
        let mut img = page();
        outline(&mut img, 100, 200, 300, 200, 3);
        fill(&mut img, 100, 300, 300, 3);
        fill(&mut img, 250, 200, 3, 200);
        // Short text-like strokes should not survive the opening.
        fill(&mut img, 120, 600, 20, 8);
        let tables = detect_tables(&DynamicImage::ImageLuma8(img));
        assert_eq!(tables.len(), 1);
        let table = &tables[0];
        assert_eq!(table.region_type, RegionType::Table);
        assert_eq!(table.bounding_box, BoundingBox::new(100.0, 200.0, 300.0, 200.0));
    }

    #[test]
    fn line_opening_keeps_only_long_runs() {
        let mut img = GrayImage::new(100, 3);
        for x in 5..60 {
            img.put_pixel(x, 1, Luma([255u8]));
        }
        for x in 70..90 {
            img.put_pixel(x, 1, Luma([255u8]));
        }
        let opened = grayscale_open(&img, &line_mask(LINE_KERNEL_LENGTH, true));
        assert!((5..60).all(|x| opened.get_pixel(x, 1).0[0] == 255));
        assert!((60..100).all(|x| opened.get_pixel(x, 1).0[0] == 0));
        assert!(grayscale_open(&img, &line_mask(LINE_KERNEL_LENGTH, false))
            .pixels()
            .all(|p| p.0[0] == 0));
    }

    #[test]
    fn shoelace_area_of_rectangle() {
        use imageproc::point::Point;
        let pts = [Point::new(0, 0), Point::new(10, 0), Point::new(10, 5), Point::new(0, 5)];
        assert_eq!(polygon_area(&pts), 50.0);
    }
}
