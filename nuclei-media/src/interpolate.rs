use ndarray::{Array2, ArrayView2};

/// Resamples a single plane to `new_shape` (`(height, width)`).
///
/// Shrinking averages every source pixel by its coverage of the output
/// footprint; enlarging uses centre-aligned bilinear sampling with edge
/// clamping. Neither path invents values outside the source range, so a
/// `{0, 1}` plane stays in `[0, 1]` and can be re-thresholded.
pub fn resize_plane(input: ArrayView2<f32>, new_shape: (usize, usize)) -> Array2<f32> {
    let (old_height, old_width) = input.dim();
    let (new_height, new_width) = new_shape;

    if (old_height, old_width) == new_shape {
        return input.to_owned();
    }
    if old_height == 0 || old_width == 0 || new_height == 0 || new_width == 0 {
        return Array2::zeros(new_shape);
    }

    if new_height <= old_height && new_width <= old_width {
        area_interpolate(input, new_shape)
    } else {
        bilinear_interpolate_centered(input, new_shape)
    }
}

pub fn area_interpolate(input: ArrayView2<f32>, new_shape: (usize, usize)) -> Array2<f32> {
    let (old_height, old_width) = input.dim();
    let (new_height, new_width) = new_shape;
    let scale_y = old_height as f32 / new_height as f32;
    let scale_x = old_width as f32 / new_width as f32;

    Array2::from_shape_fn(new_shape, |(i, j)| {
        let y_start = i as f32 * scale_y;
        let y_end = y_start + scale_y;
        let x_start = j as f32 * scale_x;
        let x_end = x_start + scale_x;

        let mut acc = 0.0;
        let mut weight = 0.0;

        let mut y = y_start.floor() as usize;
        while (y as f32) < y_end && y < old_height {
            let wy = (y_end.min(y as f32 + 1.0) - y_start.max(y as f32)).max(0.0);

            let mut x = x_start.floor() as usize;
            while (x as f32) < x_end && x < old_width {
                let wx = (x_end.min(x as f32 + 1.0) - x_start.max(x as f32)).max(0.0);
                acc += input[[y, x]] * wx * wy;
                weight += wx * wy;
                x += 1;
            }
            y += 1;
        }

        if weight > 0.0 {
            acc / weight
        } else {
            0.0
        }
    })
}

pub fn bilinear_interpolate_centered(
    input: ArrayView2<f32>,
    new_shape: (usize, usize),
) -> Array2<f32> {
    let (old_height, old_width) = input.dim();
    let (new_height, new_width) = new_shape;

    // out-of-range coordinates read the nearest edge pixel
    let read = |x: isize, y: isize| {
        let x = x.clamp(0, old_width as isize - 1) as usize;
        let y = y.clamp(0, old_height as isize - 1) as usize;
        input[[y, x]]
    };

    Array2::from_shape_fn(new_shape, |(i, j)| {
        let x = (j as f32 + 0.5) * (old_width as f32 / new_width as f32) - 0.5;
        let y = (i as f32 + 0.5) * (old_height as f32 / new_height as f32) - 0.5;

        let x0 = x.floor();
        let y0 = y.floor();
        let dx = x - x0;
        let dy = y - y0;
        let (x0, y0) = (x0 as isize, y0 as isize);

        let p00 = read(x0, y0);
        let p01 = read(x0 + 1, y0);
        let p10 = read(x0, y0 + 1);
        let p11 = read(x0 + 1, y0 + 1);

        let top = p00 * (1.0 - dx) + p01 * dx;
        let bottom = p10 * (1.0 - dx) + p11 * dx;
        top * (1.0 - dy) + bottom * dy
    })
}

#[test]
fn test_area_downscale_averages_blocks() {
    let input = Array2::from_shape_vec((2, 4), vec![1., 1., 0., 0., 1., 1., 0., 0.]).unwrap();
    let output = resize_plane(input.view(), (1, 2));
    assert_eq!(output, Array2::from_shape_vec((1, 2), vec![1., 0.]).unwrap());
}

#[test]
fn test_bilinear_upscale_stays_within_source_range() {
    let input = Array2::from_shape_vec((2, 2), vec![0., 1., 1., 0.]).unwrap();
    let output = resize_plane(input.view(), (5, 7));
    assert_eq!(output.dim(), (5, 7));
    assert!(output.iter().all(|v| *v >= -1e-6 && *v <= 1.0 + 1e-6));
    assert!(output[[0, 0]].abs() < 1e-6);
    assert!((output[[0, 6]] - 1.0).abs() < 1e-6);
}

#[test]
fn test_same_shape_is_a_copy() {
    let input = Array2::from_shape_fn((3, 3), |(i, j)| (i * 3 + j) as f32);
    assert_eq!(resize_plane(input.view(), (3, 3)), input);
}
