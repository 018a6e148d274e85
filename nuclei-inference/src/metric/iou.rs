use crate::InstanceMask;
use anyhow::Result;
use ndarray::Array2;

/// Intersection over union of two equally sized masks.
///
/// Defined as zero when both masks are empty.
pub fn iou(a: &InstanceMask, b: &InstanceMask) -> Result<f32> {
    a.ensure_same_size(b)?;

    Ok(a.overlap(b))
}

/// `rows[i][j] = iou(rows[i], columns[j])`
pub fn iou_matrix(rows: &[InstanceMask], columns: &[InstanceMask]) -> Result<Array2<f32>> {
    if let Some(first) = rows.first().or(columns.first()) {
        for mask in rows.iter().chain(columns) {
            first.ensure_same_size(mask)?;
        }
    }

    Ok(Array2::from_shape_fn(
        (rows.len(), columns.len()),
        |(i, j)| rows[i].overlap(&columns[j]),
    ))
}

#[test]
fn test_iou_is_symmetric_and_bounded() -> Result<()> {
    let a = InstanceMask::from_fn(20, 20, |x, y| x < 10 && y < 10);
    let b = InstanceMask::from_fn(20, 20, |x, y| (5..15).contains(&x) && y < 10);
    let empty = InstanceMask::empty(20, 20);

    assert_eq!(iou(&a, &b)?, iou(&b, &a)?);
    assert!((iou(&a, &b)? - 50.0 / 150.0).abs() < 1e-6);
    assert_eq!(iou(&a, &a)?, 1.0);
    assert_eq!(iou(&empty, &empty)?, 0.0);
    assert_eq!(iou(&a, &empty)?, 0.0);

    Ok(())
}

#[test]
fn test_iou_rejects_size_mismatch() {
    let a = InstanceMask::empty(4, 4);
    let b = InstanceMask::empty(4, 5);
    assert!(iou(&a, &b).is_err());
    assert!(iou_matrix(&[a], &[b]).is_err());
}
